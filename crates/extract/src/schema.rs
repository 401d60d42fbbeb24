use serde::{Deserialize, Serialize};

/// Keys the extraction prompt asks for, in scorer input order.
pub const FEATURE_KEYS: [&str; 7] = ["N", "P", "K", "temperature", "humidity", "ph", "rainfall"];

/// The seven agronomic inputs consumed by the crop scorer.
///
/// No range validation: providers may return out-of-range values and
/// the scorer takes them as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructuredFeatures {
    #[serde(rename = "N")]
    pub nitrogen: f64,
    #[serde(rename = "P")]
    pub phosphorus: f64,
    #[serde(rename = "K")]
    pub potassium: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub ph: f64,
    pub rainfall: f64,
}

impl StructuredFeatures {
    /// Ordered as `[N, P, K, temperature, humidity, ph, rainfall]`.
    pub fn to_vector(&self) -> [f64; 7] {
        [
            self.nitrogen,
            self.phosphorus,
            self.potassium,
            self.temperature,
            self.humidity,
            self.ph,
            self.rainfall,
        ]
    }

    pub fn from_vector(values: [f64; 7]) -> Self {
        let [nitrogen, phosphorus, potassium, temperature, humidity, ph, rainfall] = values;
        Self {
            nitrogen,
            phosphorus,
            potassium,
            temperature,
            humidity,
            ph,
            rainfall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_order_matches_keys() {
        let features = StructuredFeatures::from_vector([90.0, 42.0, 43.0, 20.5, 80.0, 6.8, 120.0]);
        assert_eq!(features.nitrogen, 90.0);
        assert_eq!(features.rainfall, 120.0);

        let json = serde_json::to_value(features).unwrap();
        for (key, value) in FEATURE_KEYS.iter().zip(features.to_vector()) {
            assert_eq!(json[*key].as_f64(), Some(value), "key {}", key);
        }
    }
}
