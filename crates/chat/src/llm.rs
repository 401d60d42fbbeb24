//! Chat-capable fallback providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use extract::llm::post_json;
use extract::{CallError, ProviderError, ProviderErrorKind, TextProvider};

/// OpenAI-compatible `/v1/chat/completions`; the secondary tier.
#[derive(Clone)]
pub struct OpenAiChatClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAiChatClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    pub fn new(base_url: String, model: String, api_key: String) -> Self {
        Self {
            base_url,
            model,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn parse_reply(body: &str) -> Result<String, CallError> {
        let reply: ChatResponse = serde_json::from_str(body)
            .map_err(|e| CallError::UnrecognizedPayload(format!("openai reply: {}", e)))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CallError::UnrecognizedPayload("openai reply has no message content".to_string()))
    }
}

#[async_trait]
impl TextProvider for OpenAiChatClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> Result<String, CallError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let builder = self.client.post(&url).bearer_auth(&self.api_key);
        let body = post_json(self.name(), builder, &request).await?;

        Self::parse_reply(&body)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Generation {
    pub generated_text: String,
}

/// Every reply shape the inference endpoint is known to produce.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InferencePayload {
    Batch(Vec<Generation>),
    Single(Generation),
    Failure { error: String },
}

impl InferencePayload {
    pub fn parse(body: &str) -> Result<Self, CallError> {
        serde_json::from_str(body)
            .map_err(|_| CallError::UnrecognizedPayload(format!("inference reply: {}", body.trim())))
    }

    /// Generated text, with the echoed prompt removed when the model
    /// returns it as a prefix.
    pub fn into_text(self, prompt: &str) -> Result<String, CallError> {
        let generated = match self {
            InferencePayload::Single(generation) => generation.generated_text,
            InferencePayload::Batch(generations) => generations
                .into_iter()
                .next()
                .map(|g| g.generated_text)
                .ok_or_else(|| CallError::UnrecognizedPayload("empty inference batch".to_string()))?,
            InferencePayload::Failure { error } => {
                return Err(ProviderError::classify(
                    format!("inference error: {}", error),
                    ProviderErrorKind::Upstream,
                )
                .into());
            }
        };

        let text = generated
            .strip_prefix(prompt)
            .unwrap_or(generated.as_str())
            .trim();

        if text.is_empty() {
            return Err(CallError::UnrecognizedPayload("inference reply has no text".to_string()));
        }
        Ok(text.to_string())
    }
}

/// Hosted inference endpoint (`POST {base}/models/{model}`); the tertiary tier.
#[derive(Clone)]
pub struct InferenceClient {
    base_url: String,
    model: String,
    api_token: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

impl InferenceClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api-inference.huggingface.co";
    pub const DEFAULT_MODEL: &'static str = "google/flan-t5-large";

    pub fn new(base_url: String, model: String, api_token: String) -> Self {
        Self {
            base_url,
            model,
            api_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TextProvider for InferenceClient {
    fn name(&self) -> &str {
        "inference"
    }

    async fn generate(&self, prompt: &str) -> Result<String, CallError> {
        let url = format!("{}/models/{}", self.base_url.trim_end_matches('/'), self.model);

        // Error statuses carry `{"error": ...}`; the raw body is kept in the
        // provider error so quota markers still classify
        let builder = self.client.post(&url).bearer_auth(&self.api_token);
        let body = post_json(self.name(), builder, &InferenceRequest { inputs: prompt }).await?;

        InferencePayload::parse(&body)?.into_text(prompt)
    }
}
