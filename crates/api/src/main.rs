mod config;
mod metrics;
mod routes;
mod sessions;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat::{Coordinator, InferenceClient, OpenAiChatClient};
use extract::{Extractor, GeminiClient, OllamaClient, TextProvider, UnconfiguredProvider};
use recommend::GaussianNb;

use crate::config::{AppConfig, PrimaryBackend};
use crate::metrics::Metrics;
use crate::routes::{AppState, ProviderStatus};
use crate::sessions::SessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(config.log.json);

    let state = build_state(&config)?;
    info!(
        primary = %state.primary.provider,
        secondary = %state.secondary.provider,
        tertiary = %state.tertiary.provider,
        model_classes = state.model_classes,
        "Coordinator ready"
    );

    let app = routes::build_router(Arc::new(state));

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    info!("Server listening on http://{}", address);

    axum::serve(listener, app).await.context("Server stopped unexpectedly")?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn or_default(value: &Option<String>, default: &str) -> String {
    value.clone().unwrap_or_else(|| default.to_string())
}

fn status(provider: &dyn TextProvider, configured: bool) -> ProviderStatus {
    ProviderStatus {
        provider: provider.name().to_string(),
        configured,
    }
}

fn primary_provider(config: &AppConfig) -> (Arc<dyn TextProvider>, bool) {
    let primary = &config.primary;
    match primary.backend {
        PrimaryBackend::Gemini => match primary.key() {
            Some(key) => (
                Arc::new(GeminiClient::new(
                    or_default(&primary.base_url, GeminiClient::DEFAULT_BASE_URL),
                    or_default(&primary.model, GeminiClient::DEFAULT_MODEL),
                    key.to_string(),
                )),
                true,
            ),
            None => (Arc::new(UnconfiguredProvider::new("gemini")), false),
        },
        PrimaryBackend::Ollama => (
            Arc::new(OllamaClient::new(
                or_default(&primary.base_url, OllamaClient::DEFAULT_BASE_URL),
                or_default(&primary.model, OllamaClient::DEFAULT_MODEL),
            )),
            true,
        ),
    }
}

fn secondary_provider(config: &AppConfig) -> (Arc<dyn TextProvider>, bool) {
    let secondary = &config.secondary;
    match secondary.key() {
        Some(key) => (
            Arc::new(OpenAiChatClient::new(
                or_default(&secondary.base_url, OpenAiChatClient::DEFAULT_BASE_URL),
                or_default(&secondary.model, OpenAiChatClient::DEFAULT_MODEL),
                key.to_string(),
            )),
            true,
        ),
        None => (Arc::new(UnconfiguredProvider::new("openai")), false),
    }
}

fn tertiary_provider(config: &AppConfig) -> (Arc<dyn TextProvider>, bool) {
    let tertiary = &config.tertiary;
    match tertiary.token() {
        Some(token) => (
            Arc::new(InferenceClient::new(
                or_default(&tertiary.base_url, InferenceClient::DEFAULT_BASE_URL),
                or_default(&tertiary.model, InferenceClient::DEFAULT_MODEL),
                token.to_string(),
            )),
            true,
        ),
        None => (Arc::new(UnconfiguredProvider::new("inference")), false),
    }
}

fn build_state(config: &AppConfig) -> Result<AppState> {
    let model = match &config.model_path {
        Some(path) => GaussianNb::load(path)?,
        None => GaussianNb::bundled()?,
    };
    let model_classes = model.labels().count();

    let (primary, primary_ok) = primary_provider(config);
    let (secondary, secondary_ok) = secondary_provider(config);
    let (tertiary, tertiary_ok) = tertiary_provider(config);

    let primary_status = status(primary.as_ref(), primary_ok);
    let secondary_status = status(secondary.as_ref(), secondary_ok);
    let tertiary_status = status(tertiary.as_ref(), tertiary_ok);

    let coordinator = Coordinator::new(
        Extractor::new(primary, config.deadlines.primary()),
        secondary,
        tertiary,
        Arc::new(model),
        config.deadlines.fallback(),
    );

    Ok(AppState {
        coordinator,
        sessions: SessionStore::new(config.sessions.max_sessions),
        metrics: Metrics::new(),
        primary: primary_status,
        secondary: secondary_status,
        tertiary: tertiary_status,
        model_classes,
    })
}
