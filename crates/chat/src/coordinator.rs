use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use extract::{
    CallError, Extractor, ProviderError, ProviderErrorKind, StructuredFeatures, TextProvider, run_with_deadline,
};
use recommend::{Scorer, TOP_K};

use crate::responder::LocalResponder;
use crate::response::{FallbackReason, Response, Tier};

/// Deadlines for the chat fallback tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackDeadlines {
    pub secondary: Duration,
    pub tertiary: Duration,
}

impl Default for FallbackDeadlines {
    fn default() -> Self {
        Self {
            secondary: Duration::from_secs(10),
            tertiary: Duration::from_secs(15),
        }
    }
}

/// One attempted step of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Relevance,
    Extraction,
    Scoring,
    PrimaryChat,
    Secondary,
    Tertiary,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: Step,
    /// `"ok"` or the failure label.
    pub outcome: &'static str,
}

/// Ordered record of what one request attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallTrace {
    pub steps: Vec<StepRecord>,
}

impl CallTrace {
    fn ok(&mut self, step: Step) {
        self.steps.push(StepRecord { step, outcome: "ok" });
    }

    fn failed(&mut self, step: Step, error: &CallError) {
        self.steps.push(StepRecord {
            step,
            outcome: error.label(),
        });
    }

    pub fn attempted(&self, step: Step) -> bool {
        self.steps.iter().any(|r| r.step == step)
    }

    pub fn step_names(&self) -> Vec<Step> {
        self.steps.iter().map(|r| r.step).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub response: Response,
    pub trace: CallTrace,
}

/// Drives one utterance through relevance → extraction or chat → fallback tiers.
///
/// The chain only moves forward: every step runs at most once per request,
/// so a request makes at most four remote calls and always ends in exactly
/// one [`Response`].
pub struct Coordinator {
    primary: Extractor,
    secondary: Arc<dyn TextProvider>,
    tertiary: Arc<dyn TextProvider>,
    scorer: Arc<dyn Scorer>,
    responder: LocalResponder,
    deadlines: FallbackDeadlines,
}

impl Coordinator {
    pub fn new(
        primary: Extractor,
        secondary: Arc<dyn TextProvider>,
        tertiary: Arc<dyn TextProvider>,
        scorer: Arc<dyn Scorer>,
        deadlines: FallbackDeadlines,
    ) -> Self {
        Self {
            primary,
            secondary,
            tertiary,
            scorer,
            responder: LocalResponder::new(),
            deadlines,
        }
    }

    pub fn primary_name(&self) -> &str {
        self.primary.provider_name()
    }

    pub fn secondary_name(&self) -> &str {
        self.secondary.name()
    }

    pub fn tertiary_name(&self) -> &str {
        self.tertiary.name()
    }

    pub async fn handle(&self, utterance: &str) -> Response {
        self.handle_traced(utterance).await.response
    }

    pub async fn handle_traced(&self, utterance: &str) -> Outcome {
        let started = Instant::now();
        let mut trace = CallTrace::default();

        let response = self.run_chain(utterance, &mut trace).await;

        info!(
            kind = response.kind(),
            steps = ?trace.step_names(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request handled"
        );

        Outcome { response, trace }
    }

    async fn run_chain(&self, utterance: &str, trace: &mut CallTrace) -> Response {
        // Step 1: is this about crops at all?
        let reason = match self.primary.classify_relevance(utterance).await {
            Err(e) => {
                trace.failed(Step::Relevance, &e);
                warn!(error = %e, "Relevance check failed, skipping extraction");
                FallbackReason::PrimaryUnavailable
            }
            Ok(true) => {
                trace.ok(Step::Relevance);

                // Step 2: structured features and a recommendation
                match self.recommend(utterance, trace).await {
                    Some(response) => return response,
                    None => FallbackReason::ExtractionFailed,
                }
            }
            Ok(false) => {
                trace.ok(Step::Relevance);

                // Step 2': plain chat with the primary provider
                match self.primary.converse(utterance).await {
                    Ok(text) => {
                        trace.ok(Step::PrimaryChat);
                        return Response::Chat { text };
                    }
                    Err(e) => {
                        trace.failed(Step::PrimaryChat, &e);
                        warn!(error = %e, "Primary chat failed");
                        FallbackReason::PrimaryChatFailed
                    }
                }
            }
        };

        // Step 3: fallback tiers
        self.fallback_chat(utterance, reason, trace).await
    }

    async fn recommend(&self, utterance: &str, trace: &mut CallTrace) -> Option<Response> {
        let features = match self.primary.extract_features(utterance).await {
            Ok(features) => {
                trace.ok(Step::Extraction);
                features
            }
            Err(e) => {
                trace.failed(Step::Extraction, &e);
                warn!(error = %e, "Feature extraction failed");
                return None;
            }
        };

        match self.score(&features) {
            Ok(crops) => {
                trace.ok(Step::Scoring);
                Some(Response::Features { features, crops })
            }
            Err(e) => {
                trace.failed(Step::Scoring, &e);
                warn!(error = %e, "Scoring failed");
                None
            }
        }
    }

    fn score(&self, features: &StructuredFeatures) -> Result<Vec<recommend::CropScore>, CallError> {
        // The scorer runs inline, so a panic in it is caught here rather
        // than by a join handle
        let scored = panic::catch_unwind(AssertUnwindSafe(|| self.scorer.score(features, TOP_K)))
            .map_err(|_| ProviderError::new(ProviderErrorKind::Internal, "scorer panicked"))?;

        let crops = scored.map_err(|e| CallError::ParseFailure(format!("scorer rejected features: {:#}", e)))?;

        if crops.is_empty() {
            return Err(CallError::ParseFailure("scorer returned no labels".to_string()));
        }
        Ok(crops)
    }

    async fn fallback_chat(&self, utterance: &str, reason: FallbackReason, trace: &mut CallTrace) -> Response {
        let tiers = [
            (Tier::Secondary, Step::Secondary, &self.secondary, self.deadlines.secondary),
            (Tier::Tertiary, Step::Tertiary, &self.tertiary, self.deadlines.tertiary),
        ];

        for (tier, step, provider, deadline) in tiers {
            match call_tier(tier, provider, deadline, utterance).await {
                Ok(text) => {
                    trace.ok(step);
                    return Response::FallbackChat {
                        text,
                        served_by: tier,
                        provider: provider.name().to_string(),
                        reason,
                    };
                }
                Err(e) => {
                    trace.failed(step, &e);
                    warn!(
                        tier = %tier,
                        provider = provider.name(),
                        kind = e.label(),
                        error = %e,
                        "Fallback tier failed"
                    );
                }
            }
        }

        // Step 4: nothing remote answered
        trace.ok(Step::Local);
        Response::FallbackChat {
            text: self.responder.respond_offline(utterance),
            served_by: Tier::Local,
            provider: "local".to_string(),
            reason,
        }
    }
}

async fn call_tier(
    tier: Tier,
    provider: &Arc<dyn TextProvider>,
    deadline: Duration,
    utterance: &str,
) -> Result<String, CallError> {
    let provider = Arc::clone(provider);
    let prompt = extract::prompt::build_chat_prompt(utterance);
    let operation = format!("{}_chat", tier);

    let text = run_with_deadline(&operation, deadline, async move { provider.generate(&prompt).await }).await?;

    let text = text.trim();
    if text.is_empty() {
        return Err(CallError::UnrecognizedPayload(format!("{} tier returned an empty reply", tier)));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{MockProvider, PrimaryDeadlines};
    use recommend::StaticScorer;

    const EXAMPLE: &str = "N=90, P=42, K=43, temp 20.5C, humidity 80%, ph 6.8, rainfall 120mm";
    const EXAMPLE_JSON: &str =
        r#"{"N": 90, "P": 42, "K": 43, "temperature": 20.5, "humidity": 80, "ph": 6.8, "rainfall": 120}"#;
    const SLOW: Duration = Duration::from_secs(3);

    struct Harness {
        primary: MockProvider,
        secondary: MockProvider,
        tertiary: MockProvider,
        coordinator: Coordinator,
    }

    fn harness_with_scorer(
        primary: MockProvider,
        secondary: MockProvider,
        tertiary: MockProvider,
        scorer: Arc<dyn Scorer>,
    ) -> Harness {
        let deadline = Duration::from_millis(150);
        let extractor = Extractor::new(
            Arc::new(primary.clone()),
            PrimaryDeadlines {
                relevance: deadline,
                extraction: deadline,
                chat: deadline,
            },
        );
        let coordinator = Coordinator::new(
            extractor,
            Arc::new(secondary.clone()),
            Arc::new(tertiary.clone()),
            scorer,
            FallbackDeadlines {
                secondary: deadline,
                tertiary: deadline,
            },
        );

        Harness {
            primary,
            secondary,
            tertiary,
            coordinator,
        }
    }

    fn harness(primary: MockProvider, secondary: MockProvider, tertiary: MockProvider) -> Harness {
        let scorer = Arc::new(StaticScorer::new(&["rice", "maize", "banana", "jute"]));
        harness_with_scorer(primary, secondary, tertiary, scorer)
    }

    #[tokio::test]
    async fn test_structured_input_yields_recommendation() {
        let h = harness(
            MockProvider::new("primary").with_reply("yes").with_reply(EXAMPLE_JSON),
            MockProvider::new("secondary"),
            MockProvider::new("tertiary"),
        );

        let outcome = h.coordinator.handle_traced(EXAMPLE).await;
        let Response::Features { features, crops } = &outcome.response else {
            panic!("expected features, got {:?}", outcome.response);
        };

        assert_eq!(
            features.to_vector(),
            [90.0, 42.0, 43.0, 20.5, 80.0, 6.8, 120.0]
        );
        let labels: Vec<&str> = crops.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["rice", "maize", "banana"]);

        let rendered = outcome.response.render();
        assert!(rendered.contains("rice, maize, banana"));
        assert!(rendered.contains("- Temperature: 20.5°C"));
        assert!(rendered.contains("- Rainfall: 120 mm"));

        assert_eq!(
            outcome.trace.step_names(),
            vec![Step::Relevance, Step::Extraction, Step::Scoring]
        );
        assert_eq!(h.secondary.call_count(), 0);
        assert_eq!(h.tertiary.call_count(), 0);
    }

    #[tokio::test]
    async fn test_relevance_timeout_skips_extraction() {
        let h = harness(
            MockProvider::new("primary")
                .with_slow_reply("yes", SLOW)
                .with_reply(EXAMPLE_JSON),
            MockProvider::new("secondary").with_reply("Happy to help with your farm."),
            MockProvider::new("tertiary"),
        );

        let started = Instant::now();
        let outcome = h.coordinator.handle_traced(EXAMPLE).await;
        assert!(started.elapsed() < SLOW);

        assert_eq!(h.primary.call_count(), 1);
        assert!(!outcome.trace.attempted(Step::Extraction));
        assert_eq!(
            outcome.response,
            Response::FallbackChat {
                text: "Happy to help with your farm.".to_string(),
                served_by: Tier::Secondary,
                provider: "secondary".to_string(),
                reason: FallbackReason::PrimaryUnavailable,
            }
        );
        assert_eq!(outcome.trace.steps[0].outcome, "timeout");
    }

    #[tokio::test]
    async fn test_relevance_provider_error_goes_to_secondary() {
        let h = harness(
            MockProvider::new("primary").with_provider_error("status 503: overloaded"),
            MockProvider::new("secondary").with_reply("Hi!"),
            MockProvider::new("tertiary"),
        );

        let response = h.coordinator.handle("hello").await;
        assert!(matches!(
            response,
            Response::FallbackChat {
                served_by: Tier::Secondary,
                reason: FallbackReason::PrimaryUnavailable,
                ..
            }
        ));
        assert_eq!(h.primary.call_count(), 1);
    }

    #[tokio::test]
    async fn test_irrelevant_input_is_answered_by_primary_chat() {
        let h = harness(
            MockProvider::new("primary").with_reply("no").with_reply("Why did the scarecrow win an award?"),
            MockProvider::new("secondary"),
            MockProvider::new("tertiary"),
        );

        let outcome = h.coordinator.handle_traced("tell me a joke").await;
        assert_eq!(
            outcome.response,
            Response::Chat {
                text: "Why did the scarecrow win an award?".to_string()
            }
        );
        assert_eq!(h.primary.calls()[1], "tell me a joke");
        assert_eq!(outcome.trace.step_names(), vec![Step::Relevance, Step::PrimaryChat]);
        assert_eq!(h.secondary.call_count(), 0);
    }

    #[tokio::test]
    async fn test_primary_chat_timeout_goes_to_secondary() {
        let h = harness(
            MockProvider::new("primary").with_reply("no").with_slow_reply("late", SLOW),
            MockProvider::new("secondary").with_reply("Here is a joke."),
            MockProvider::new("tertiary"),
        );

        let response = h.coordinator.handle("tell me a joke").await;
        assert_eq!(
            response,
            Response::FallbackChat {
                text: "Here is a joke.".to_string(),
                served_by: Tier::Secondary,
                provider: "secondary".to_string(),
                reason: FallbackReason::PrimaryChatFailed,
            }
        );
        assert_eq!(h.primary.call_count(), 2);
    }

    #[tokio::test]
    async fn test_extraction_failures_go_to_secondary() {
        for primary in [
            MockProvider::new("primary").with_reply("yes").with_reply("I'd need more details."),
            MockProvider::new("primary").with_reply("yes").with_slow_reply(EXAMPLE_JSON, SLOW),
        ] {
            let h = harness(
                primary,
                MockProvider::new("secondary").with_reply("Tell me more about your soil."),
                MockProvider::new("tertiary"),
            );

            let response = h.coordinator.handle("what should I grow?").await;
            assert!(matches!(
                response,
                Response::FallbackChat {
                    served_by: Tier::Secondary,
                    reason: FallbackReason::ExtractionFailed,
                    ..
                }
            ));
            // Extraction is never retried
            assert_eq!(h.primary.call_count(), 2);
        }
    }

    #[tokio::test]
    async fn test_scorer_failure_goes_to_secondary() {
        struct Broken;
        impl Scorer for Broken {
            fn probabilities(&self, _: &StructuredFeatures) -> anyhow::Result<Vec<recommend::CropScore>> {
                anyhow::bail!("model not loaded")
            }
        }

        let h = harness_with_scorer(
            MockProvider::new("primary").with_reply("yes").with_reply(EXAMPLE_JSON),
            MockProvider::new("secondary").with_reply("Try again later."),
            MockProvider::new("tertiary"),
            Arc::new(Broken),
        );

        let outcome = h.coordinator.handle_traced(EXAMPLE).await;
        assert!(matches!(
            outcome.response,
            Response::FallbackChat {
                reason: FallbackReason::ExtractionFailed,
                ..
            }
        ));
        assert!(outcome.trace.attempted(Step::Scoring));
    }

    #[tokio::test]
    async fn test_huge_extracted_value_still_recommends() {
        let h = harness_with_scorer(
            MockProvider::new("primary").with_reply("yes").with_reply(
                r#"{"N": 1e200, "P": 42, "K": 43, "temperature": 20.5, "humidity": 80, "ph": 6.8, "rainfall": 120}"#,
            ),
            MockProvider::new("secondary"),
            MockProvider::new("tertiary"),
            Arc::new(recommend::GaussianNb::bundled().unwrap()),
        );

        let outcome = h.coordinator.handle_traced("N is enormous").await;
        let Response::Features { features, crops } = &outcome.response else {
            panic!("expected features, got {:?}", outcome.response);
        };
        assert_eq!(features.nitrogen, 1e200);
        assert_eq!(crops.len(), TOP_K);
        assert_eq!(
            outcome.trace.step_names(),
            vec![Step::Relevance, Step::Extraction, Step::Scoring]
        );
        assert_eq!(h.secondary.call_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_scorer_goes_to_secondary() {
        struct Exploding;
        impl Scorer for Exploding {
            fn probabilities(&self, _: &StructuredFeatures) -> anyhow::Result<Vec<recommend::CropScore>> {
                panic!("index out of bounds")
            }
        }

        let h = harness_with_scorer(
            MockProvider::new("primary").with_reply("yes").with_reply(EXAMPLE_JSON),
            MockProvider::new("secondary").with_reply("Let me answer that instead."),
            MockProvider::new("tertiary"),
            Arc::new(Exploding),
        );

        let outcome = h.coordinator.handle_traced(EXAMPLE).await;
        assert_eq!(
            outcome.response,
            Response::FallbackChat {
                text: "Let me answer that instead.".to_string(),
                served_by: Tier::Secondary,
                provider: "secondary".to_string(),
                reason: FallbackReason::ExtractionFailed,
            }
        );
        let scoring = outcome.trace.steps.iter().find(|r| r.step == Step::Scoring).unwrap();
        assert_eq!(scoring.outcome, "internal");
    }

    #[tokio::test]
    async fn test_tertiary_timeout_falls_to_local() {
        let h = harness(
            MockProvider::new("primary").with_reply("no").with_provider_error("503"),
            MockProvider::new("secondary").with_provider_error("429 quota"),
            MockProvider::new("tertiary").with_slow_reply("too late", SLOW),
        );

        let started = Instant::now();
        let outcome = h.coordinator.handle_traced("thanks a lot").await;
        assert!(started.elapsed() < SLOW);

        assert!(matches!(
            outcome.response,
            Response::FallbackChat {
                served_by: Tier::Local,
                reason: FallbackReason::PrimaryChatFailed,
                ..
            }
        ));
        let tertiary = outcome.trace.steps.iter().find(|r| r.step == Step::Tertiary).unwrap();
        assert_eq!(tertiary.outcome, "timeout");
        assert_eq!(h.tertiary.call_count(), 1);
    }

    #[tokio::test]
    async fn test_secondary_quota_goes_to_tertiary() {
        let h = harness(
            MockProvider::new("primary").with_reply("no").with_provider_error("boom"),
            MockProvider::new("secondary").with_provider_error("429 You exceeded your current quota"),
            MockProvider::new("tertiary").with_reply("Maize does well in loam."),
        );

        let outcome = h.coordinator.handle_traced("hey").await;
        assert_eq!(
            outcome.response,
            Response::FallbackChat {
                text: "Maize does well in loam.".to_string(),
                served_by: Tier::Tertiary,
                provider: "tertiary".to_string(),
                reason: FallbackReason::PrimaryChatFailed,
            }
        );
        let secondary = outcome.trace.steps.iter().find(|r| r.step == Step::Secondary).unwrap();
        assert_eq!(secondary.outcome, "quota");
    }

    #[tokio::test]
    async fn test_blank_secondary_reply_advances() {
        let h = harness(
            MockProvider::new("primary").with_provider_error("down"),
            MockProvider::new("secondary").with_reply("   "),
            MockProvider::new("tertiary").with_reply("Hello from the tertiary tier."),
        );

        let response = h.coordinator.handle("hi").await;
        assert!(matches!(response, Response::FallbackChat { served_by: Tier::Tertiary, .. }));
    }

    #[tokio::test]
    async fn test_all_remote_tiers_fail_uses_local_responder() {
        let utterance = "Which crop suits sandy soil?";
        let h = harness(
            MockProvider::new("primary").with_slow_reply("yes", SLOW),
            MockProvider::new("secondary").with_slow_reply("late", SLOW),
            MockProvider::new("tertiary")
                .with_error(CallError::UnrecognizedPayload("{\"foo\": 1}".to_string())),
        );

        let outcome = h.coordinator.handle_traced(utterance).await;
        let expected = LocalResponder::new().respond_offline(utterance);

        assert_eq!(
            outcome.response,
            Response::FallbackChat {
                text: expected,
                served_by: Tier::Local,
                provider: "local".to_string(),
                reason: FallbackReason::PrimaryUnavailable,
            }
        );
        assert_eq!(
            outcome.trace.step_names(),
            vec![Step::Relevance, Step::Secondary, Step::Tertiary, Step::Local]
        );

        // Every tier was tried exactly once
        assert_eq!(h.primary.call_count(), 1);
        assert_eq!(h.secondary.call_count(), 1);
        assert_eq!(h.tertiary.call_count(), 1);
    }

    #[tokio::test]
    async fn test_local_responder_not_used_while_a_tier_answers() {
        let h = harness(
            MockProvider::new("primary").with_provider_error("down"),
            MockProvider::new("secondary").with_provider_error("down"),
            MockProvider::new("tertiary").with_reply("[tertiary] hello"),
        );

        let outcome = h.coordinator.handle_traced("hi").await;
        assert!(!outcome.trace.attempted(Step::Local));
        assert!(!outcome.response.render().is_empty());
    }
}
