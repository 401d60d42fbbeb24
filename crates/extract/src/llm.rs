use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CallError, ProviderError, ProviderErrorKind};

/// A remote text-generation service.
///
/// Implementations translate a plain prompt into the provider's wire format
/// and its reply back into text. They never enforce deadlines themselves;
/// callers wrap them with [`crate::deadline::run_with_deadline`].
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Provider name used in logs and fallback notes.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, CallError>;
}

/// Send a JSON body and return the raw response text, mapping transport
/// failures and non-success statuses to provider errors.
pub async fn post_json<B: Serialize + ?Sized>(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &B,
) -> Result<String, CallError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| ProviderError::transport(provider, e))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ProviderError::transport(provider, e))?;

    if !status.is_success() {
        return Err(ProviderError::from_status(provider, status.as_u16(), &text).into());
    }

    Ok(text)
}

/// Google Generative Language API (`generateContent`).
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPartOut<'a>>,
}

#[derive(Serialize)]
struct GeminiPartOut<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPartIn>,
}

#[derive(Deserialize)]
struct GeminiPartIn {
    text: Option<String>,
}

impl GeminiClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";
    pub const DEFAULT_MODEL: &'static str = "gemini-1.5-flash";

    pub fn new(base_url: String, model: String, api_key: String) -> Self {
        Self {
            base_url,
            model,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_key(api_key: String) -> Self {
        Self::new(
            Self::DEFAULT_BASE_URL.to_string(),
            Self::DEFAULT_MODEL.to_string(),
            api_key,
        )
    }

    fn parse_reply(body: &str) -> Result<String, CallError> {
        let reply: GeminiResponse = serde_json::from_str(body)
            .map_err(|e| CallError::UnrecognizedPayload(format!("gemini reply: {}", e)))?;

        // First part of the first candidate
        reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .ok_or_else(|| CallError::UnrecognizedPayload("gemini reply has no candidate text".to_string()))
    }
}

#[async_trait]
impl TextProvider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String, CallError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPartOut { text: prompt }],
            }],
        };

        // Key goes in a header so it never shows up in URL-bearing error text
        let builder = self.client.post(&url).header("x-goog-api-key", &self.api_key);
        let body = post_json(self.name(), builder, &request).await?;

        Self::parse_reply(&body)
    }
}

/// Local Ollama server, handy as an offline primary during development.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:11434";
    pub const DEFAULT_MODEL: &'static str = "llama3";

    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_URL.to_string(), Self::DEFAULT_MODEL.to_string())
    }
}

#[async_trait]
impl TextProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str) -> Result<String, CallError> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let body = post_json(self.name(), self.client.post(&url), &request).await?;

        let ollama_response: OllamaResponse = serde_json::from_str(&body)
            .map_err(|e| CallError::UnrecognizedPayload(format!("ollama reply: {}", e)))?;

        Ok(ollama_response.response)
    }
}

/// Placeholder for a tier whose credentials are missing.
///
/// Always fails with an unauthorized provider error so the fallback chain
/// moves on exactly as it would for a rejected key.
#[derive(Debug, Clone)]
pub struct UnconfiguredProvider {
    name: String,
}

impl UnconfiguredProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl TextProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _prompt: &str) -> Result<String, CallError> {
        Err(ProviderError::new(
            ProviderErrorKind::Unauthorized,
            format!("{} has no credentials configured", self.name),
        )
        .into())
    }
}
