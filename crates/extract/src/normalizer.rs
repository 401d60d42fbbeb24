use serde_json::Value;

use crate::error::CallError;
use crate::schema::{FEATURE_KEYS, StructuredFeatures};

const FENCE: &str = "```";

/// Strip a markdown code fence wrapped around provider output.
///
/// Handles a leading fence with an optional info string (```` ```json ````)
/// and a trailing fence independently; text without fences is only trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
    let mut content = raw.trim();

    if let Some(rest) = content.strip_prefix(FENCE) {
        // Drop the info string, if any, up to the first newline
        content = match rest.find('\n') {
            Some(idx) if !rest[..idx].contains('{') => &rest[idx + 1..],
            _ => rest,
        };
    }

    if let Some(rest) = content.trim_end().strip_suffix(FENCE) {
        content = rest;
    }

    content.trim()
}

/// Parse the provider's extraction output into a feature record.
///
/// Every required key must be present and coercible to a finite number
/// (JSON numbers, or strings holding one). Extra keys are ignored.
pub fn parse_features(raw: &str) -> Result<StructuredFeatures, CallError> {
    let content = strip_code_fence(raw);

    let value: Value = serde_json::from_str(content)
        .map_err(|e| CallError::ParseFailure(format!("invalid JSON ({}): {}", e, content)))?;

    let object = value
        .as_object()
        .ok_or_else(|| CallError::ParseFailure(format!("expected a JSON object, got: {}", content)))?;

    let mut values = [0.0_f64; 7];
    for (slot, key) in values.iter_mut().zip(FEATURE_KEYS) {
        let field = object
            .get(key)
            .ok_or_else(|| CallError::ParseFailure(format!("missing key `{}`", key)))?;
        *slot = coerce_number(key, field)?;
    }

    Ok(StructuredFeatures::from_vector(values))
}

fn coerce_number(key: &str, value: &Value) -> Result<f64, CallError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(CallError::ParseFailure(format!(
            "value for `{}` is not numeric: {}",
            key, value
        ))),
    }
}

/// Lenient yes/no parse: anything not starting with "yes" is a no.
pub fn parse_relevance(answer: &str) -> bool {
    answer.trim().to_lowercase().starts_with("yes")
}
