pub fn build_relevance_prompt(user_input: &str) -> String {
    format!(
        r#"Is the following message a crop or farming related question?

Message: "{}"

Respond with only one word: "yes" or "no""#,
        user_input
    )
}

pub fn build_extraction_prompt(user_input: &str) -> String {
    format!(
        r#"Convert the following user request into structured features for crop recommendation.

Text: "{}"

Return ONLY a valid JSON object with these fields:
N, P, K, temperature, humidity, ph, rainfall

RULES:
- Only include the JSON object, no markdown, no explanations
- Each value must be a number
- If the input is vague (e.g. "moderate weather"), use your best estimate instead of refusing
- Typical ranges: N, P, K 0-140; temperature 10-50 (°C); humidity 10-100 (%); ph 3.5-9.5; rainfall 0-300 (mm)
- Example valid format:
{{"N": 90, "P": 42, "K": 43, "temperature": 20.5, "humidity": 80.0, "ph": 6.8, "rainfall": 120}}

JSON OUTPUT:"#,
        user_input
    )
}

/// Chat mode sends the utterance as-is.
pub fn build_chat_prompt(user_input: &str) -> String {
    user_input.trim().to_string()
}
