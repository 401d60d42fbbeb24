use std::fmt;
use std::time::Duration;

/// Outcome of a failed provider call.
///
/// Adapters return this instead of raising; the coordinator decides
/// whether a given failure advances the fallback chain.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    #[error("call exceeded its {}ms deadline", .deadline.as_millis())]
    Timeout { deadline: Duration },

    #[error("malformed structured payload: {0}")]
    ParseFailure(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("unrecognized payload shape: {0}")]
    UnrecognizedPayload(String),
}

impl CallError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }

    /// Short label used in structured log fields.
    pub fn label(&self) -> &'static str {
        match self {
            CallError::Timeout { .. } => "timeout",
            CallError::ParseFailure(_) => "parse_failure",
            CallError::Provider(e) => e.kind.as_str(),
            CallError::UnrecognizedPayload(_) => "unrecognized_payload",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Quota exhausted or rate limited.
    Quota,
    /// Missing, invalid or rejected credentials.
    Unauthorized,
    /// Connection, DNS or body read failure.
    Transport,
    /// Non-success status the other kinds don't cover.
    Upstream,
    /// The worker running the call died (panic or cancellation).
    Internal,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Quota => "quota",
            ProviderErrorKind::Unauthorized => "unauthorized",
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Upstream => "upstream",
            ProviderErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("provider error ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

const QUOTA_MARKERS: &[&str] = &["429", "quota", "rate limit", "rate_limit", "resource_exhausted"];
const AUTH_MARKERS: &[&str] = &["401", "403", "api key", "api_key", "unauthorized"];

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Best-effort classification from the error text alone.
    ///
    /// Providers don't share an error taxonomy, so this is a substring
    /// heuristic: some quota errors will land in `fallback`. Every kind
    /// is routed the same way by the coordinator.
    pub fn classify(message: impl Into<String>, fallback: ProviderErrorKind) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();

        let kind = if QUOTA_MARKERS.iter().any(|m| lowered.contains(m)) {
            ProviderErrorKind::Quota
        } else if AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
            ProviderErrorKind::Unauthorized
        } else {
            fallback
        };

        Self { kind, message }
    }

    /// Error for a non-success HTTP status with the response body attached.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        Self::classify(
            format!("{} request failed: status {}: {}", provider, status, body.trim()),
            ProviderErrorKind::Upstream,
        )
    }

    /// Not classified: the text carries the request URL, whose port
    /// digits can look like a status code.
    pub fn transport(provider: &str, err: impl fmt::Display) -> Self {
        Self::new(
            ProviderErrorKind::Transport,
            format!("{} transport error: {}", provider, err),
        )
    }

    pub fn is_quota(&self) -> bool {
        self.kind == ProviderErrorKind::Quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_markers() {
        let err = ProviderError::classify("HTTP 429 Too Many Requests", ProviderErrorKind::Upstream);
        assert!(err.is_quota());

        let err = ProviderError::classify(
            "You exceeded your current Quota, please check your plan",
            ProviderErrorKind::Upstream,
        );
        assert!(err.is_quota());

        let err = ProviderError::from_status("gemini", 429, "RESOURCE_EXHAUSTED");
        assert_eq!(err.kind, ProviderErrorKind::Quota);
    }

    #[test]
    fn test_auth_and_default_kinds() {
        let err = ProviderError::from_status("openai", 401, "Incorrect API key provided");
        assert_eq!(err.kind, ProviderErrorKind::Unauthorized);

        let err = ProviderError::from_status("openai", 500, "internal error");
        assert_eq!(err.kind, ProviderErrorKind::Upstream);

        let err = ProviderError::transport("ollama", "connection refused");
        assert_eq!(err.kind, ProviderErrorKind::Transport);

        let err = ProviderError::transport("openai", "error sending request for url (http://127.0.0.1:42913/)");
        assert_eq!(err.kind, ProviderErrorKind::Transport);
    }

    #[test]
    fn test_labels() {
        let timeout = CallError::Timeout {
            deadline: Duration::from_secs(5),
        };
        assert!(timeout.is_timeout());
        assert_eq!(timeout.label(), "timeout");
        assert_eq!(timeout.to_string(), "call exceeded its 5000ms deadline");

        let quota: CallError = ProviderError::classify("quota", ProviderErrorKind::Upstream).into();
        assert_eq!(quota.label(), "quota");
    }
}
