pub mod deadline;
pub mod error;
pub mod llm;
pub mod mock;
pub mod normalizer;
pub mod prompt;
pub mod schema;

pub use deadline::run_with_deadline;
pub use error::{CallError, ProviderError, ProviderErrorKind};
pub use llm::{GeminiClient, OllamaClient, TextProvider, UnconfiguredProvider};
pub use mock::{MockProvider, StubServer};
pub use schema::{FEATURE_KEYS, StructuredFeatures};

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

/// Reference deadline for every primary-provider call.
pub const DEFAULT_PRIMARY_DEADLINE: Duration = Duration::from_secs(5);

/// Deadlines for the three kinds of primary-provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryDeadlines {
    pub relevance: Duration,
    pub extraction: Duration,
    pub chat: Duration,
}

impl Default for PrimaryDeadlines {
    fn default() -> Self {
        Self {
            relevance: DEFAULT_PRIMARY_DEADLINE,
            extraction: DEFAULT_PRIMARY_DEADLINE,
            chat: DEFAULT_PRIMARY_DEADLINE,
        }
    }
}

/// Adapters over the primary text-understanding provider.
///
/// Each call runs under its own deadline and returns a tagged outcome;
/// nothing is retried here.
#[derive(Clone)]
pub struct Extractor {
    provider: Arc<dyn TextProvider>,
    deadlines: PrimaryDeadlines,
}

impl Extractor {
    pub fn new(provider: Arc<dyn TextProvider>, deadlines: PrimaryDeadlines) -> Self {
        Self { provider, deadlines }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Ask the primary provider whether the utterance is about crops or farming.
    pub async fn classify_relevance(&self, utterance: &str) -> Result<bool, CallError> {
        let prompt = prompt::build_relevance_prompt(utterance);
        let answer = self.call("relevance", self.deadlines.relevance, prompt).await?;

        let relevant = normalizer::parse_relevance(&answer);
        debug!(answer = %answer.trim(), relevant, "Relevance answer");
        Ok(relevant)
    }

    /// Turn free text into the seven structured features.
    pub async fn extract_features(&self, utterance: &str) -> Result<StructuredFeatures, CallError> {
        let prompt = prompt::build_extraction_prompt(utterance);
        let raw = self.call("extraction", self.deadlines.extraction, prompt).await?;

        debug!(raw = %raw, "Raw extraction output");
        normalizer::parse_features(&raw)
    }

    /// Plain chat reply from the primary provider.
    pub async fn converse(&self, utterance: &str) -> Result<String, CallError> {
        let prompt = prompt::build_chat_prompt(utterance);
        let reply = self.call("primary_chat", self.deadlines.chat, prompt).await?;

        let reply = reply.trim();
        if reply.is_empty() {
            return Err(CallError::UnrecognizedPayload(format!(
                "{} returned an empty chat reply",
                self.provider.name()
            )));
        }
        Ok(reply.to_string())
    }

    async fn call(&self, operation: &str, deadline: Duration, prompt: String) -> Result<String, CallError> {
        let provider = Arc::clone(&self.provider);
        run_with_deadline(operation, deadline, async move { provider.generate(&prompt).await }).await
    }
}
