use serde::{Deserialize, Serialize};
use std::fmt;

use extract::StructuredFeatures;
use recommend::CropScore;

/// Fallback tier that produced a chat reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Secondary,
    Tertiary,
    Local,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Secondary => "secondary",
            Tier::Tertiary => "tertiary",
            Tier::Local => "local",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the coordinator left the primary provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Relevance check timed out or errored.
    PrimaryUnavailable,
    /// Extraction timed out, returned unusable data, or scoring failed.
    ExtractionFailed,
    /// Primary chat timed out or errored.
    PrimaryChatFailed,
}

impl FallbackReason {
    fn describe(&self) -> &'static str {
        match self {
            FallbackReason::PrimaryUnavailable => "the primary assistant was slow or unavailable",
            FallbackReason::ExtractionFailed => {
                "soil and climate values could not be read from your message"
            }
            FallbackReason::PrimaryChatFailed => "the primary assistant did not answer in time",
        }
    }
}

/// Exactly one of these is produced per utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Features {
        features: StructuredFeatures,
        crops: Vec<CropScore>,
    },
    Chat {
        text: String,
    },
    FallbackChat {
        text: String,
        served_by: Tier,
        provider: String,
        reason: FallbackReason,
    },
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Features { .. } => "features",
            Response::Chat { .. } => "chat",
            Response::FallbackChat { .. } => "fallback_chat",
        }
    }

    /// User-facing message text.
    pub fn render(&self) -> String {
        match self {
            Response::Features { features, crops } => render_recommendation(features, crops),
            Response::Chat { text } => text.clone(),
            Response::FallbackChat {
                text,
                served_by,
                provider,
                reason,
            } => {
                let note = match served_by {
                    Tier::Local => format!("Offline reply because {}.", reason.describe()),
                    tier => format!(
                        "Answered by the {} assistant ({}) because {}.",
                        tier,
                        provider,
                        reason.describe()
                    ),
                };
                format!("{}\n\n({})", text, note)
            }
        }
    }
}

fn render_recommendation(features: &StructuredFeatures, crops: &[CropScore]) -> String {
    let names: Vec<&str> = crops.iter().map(|c| c.label.as_str()).collect();

    format!(
        "Based on your input, the following crops are well-suited for cultivation in your environment: {}.\n\n\
         These recommendations are made considering your soil and climate conditions, which include:\n\
         - Nitrogen: {}\n\
         - Phosphorus: {}\n\
         - Potassium: {}\n\
         - Temperature: {}°C\n\
         - Humidity: {}%\n\
         - pH: {}\n\
         - Rainfall: {} mm\n\n\
         These nutrient levels, along with other environmental factors, align well with the optimal growing conditions for the suggested crops.",
        names.join(", "),
        features.nitrogen,
        features.phosphorus,
        features.potassium,
        features.temperature,
        features.humidity,
        features.ph,
        features.rainfall,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crops(labels: &[&str]) -> Vec<CropScore> {
        labels
            .iter()
            .map(|l| CropScore {
                label: l.to_string(),
                probability: 0.3,
            })
            .collect()
    }

    /// Pull the listed values back out of a rendered recommendation.
    fn reparse(rendered: &str) -> StructuredFeatures {
        let labels = [
            "- Nitrogen: ",
            "- Phosphorus: ",
            "- Potassium: ",
            "- Temperature: ",
            "- Humidity: ",
            "- pH: ",
            "- Rainfall: ",
        ];
        let mut values = [0.0; 7];
        for (value, label) in values.iter_mut().zip(labels) {
            let line = rendered.lines().find(|l| l.starts_with(label)).unwrap();
            let number: String = line[label.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            *value = number.parse().unwrap();
        }
        StructuredFeatures::from_vector(values)
    }

    #[test]
    fn test_recommendation_message() {
        let features = StructuredFeatures::from_vector([90.0, 42.0, 43.0, 20.5, 80.0, 6.8, 120.0]);
        let response = Response::Features {
            features,
            crops: crops(&["rice", "maize", "banana"]),
        };

        let rendered = response.render();
        assert!(rendered.contains("environment: rice, maize, banana."));
        assert!(rendered.contains("- Temperature: 20.5°C"));
        assert!(rendered.contains("- Humidity: 80%"));
        assert!(rendered.contains("- pH: 6.8"));
        assert!(rendered.contains("- Rainfall: 120 mm"));

        let order: Vec<usize> = ["Nitrogen", "Phosphorus", "Potassium", "Temperature", "Humidity", "pH", "Rainfall"]
            .iter()
            .map(|label| rendered.find(label).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_rendered_values_reparse() {
        for values in [
            [90.0, 42.0, 43.0, 20.5, 80.0, 6.8, 120.0],
            [0.1, 140.0, 5.25, -3.5, 99.999, 3.5, 298.123],
            [1e-3, 1234567.0, 0.0, 10.0, 10.0, 9.5, 0.0],
        ] {
            let features = StructuredFeatures::from_vector(values);
            let rendered = Response::Features {
                features,
                crops: crops(&["a", "b", "c"]),
            }
            .render();

            let reparsed = reparse(&rendered).to_vector();
            for (a, b) in reparsed.iter().zip(values) {
                assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
            }
        }
    }

    #[test]
    fn test_fallback_note_names_tier() {
        let response = Response::FallbackChat {
            text: "Hello!".to_string(),
            served_by: Tier::Secondary,
            provider: "openai".to_string(),
            reason: FallbackReason::PrimaryUnavailable,
        };
        let rendered = response.render();
        assert!(rendered.starts_with("Hello!"));
        assert!(rendered.contains("secondary assistant (openai)"));

        let chat = Response::Chat {
            text: "plain".to_string(),
        };
        assert_eq!(chat.render(), "plain");
    }

    #[test]
    fn test_serialized_kind_tag() {
        let json = serde_json::to_value(Response::Chat {
            text: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "chat");
        assert_eq!(json["text"], "hi");
    }
}
