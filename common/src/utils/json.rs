use serde_json::Value;
use tracing::warn;

use crate::error::AppError;

use super::llm::LanguageModel;

/// Expected top-level shape of an LLM JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
}

impl JsonShape {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// Pull the payload out of a model response: the first ```json fenced block
/// when present, otherwise the outermost braces/brackets.
pub fn extract_json_block(response: &str) -> Option<String> {
    if let Some(start) = response.find("```json") {
        let after_fence = &response[start + "```json".len()..];
        let end = after_fence.find("```")?;
        return Some(after_fence[..end].trim().to_string());
    }

    // No fence; fall back to the widest brace/bracket span.
    let object_start = response.find('{');
    let array_start = response.find('[');
    let start = match (object_start, array_start) {
        (Some(o), Some(a)) => Some(o.min(a)),
        (Some(o), None) => Some(o),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }?;
    let end = response.rfind(['}', ']'])?;
    if end < start {
        return None;
    }
    Some(response[start..=end].trim().to_string())
}

/// Strip control characters that models occasionally emit inside string
/// literals; ordinary JSON whitespace survives.
pub fn sanitize_json(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c >= ' ' || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

fn try_parse(response: &str, shape: JsonShape) -> Result<Value, AppError> {
    let block = extract_json_block(response)
        .ok_or_else(|| AppError::JsonParse("no JSON payload found in response".into()))?;
    let value: Value = serde_json::from_str(&sanitize_json(&block))
        .map_err(|e| AppError::JsonParse(format!("invalid JSON: {e}")))?;

    if shape.matches(&value) {
        Ok(value)
    } else {
        Err(AppError::JsonParse(format!(
            "expected a JSON {}, got {value}",
            shape.describe()
        )))
    }
}

/// Parse an LLM response into JSON of the expected shape, asking the model to
/// repair its own output once before giving up.
pub async fn parse_llm_json(
    llm: &dyn LanguageModel,
    response: &str,
    shape: JsonShape,
) -> Result<Value, AppError> {
    match try_parse(response, shape) {
        Ok(value) => Ok(value),
        Err(first_error) => {
            warn!(error = %first_error, "LLM JSON parse failed, attempting repair pass");

            let repair_prompt = format!(
                "The following response should contain a single valid JSON {shape} but it does not parse. \
Fix any syntax errors (unescaped characters, trailing commas, truncation) without changing the data, \
and return only the corrected JSON surrounded by ```json and ```.\n\n<response>\n{response}\n</response>",
                shape = shape.describe(),
            );
            let repaired = llm.generate(&repair_prompt, 16_384).await?;

            try_parse(&repaired, shape).map_err(|second_error| {
                AppError::JsonParse(format!(
                    "repair pass failed: {second_error} (original error: {first_error})"
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::llm::ScriptedModel;
    use serde_json::json;

    #[test]
    fn extracts_fenced_blocks_first() {
        let response = "Here you go:\n```json\n{\"a\": 1}\n```\ntrailing prose {not json}";
        assert_eq!(extract_json_block(response), Some("{\"a\": 1}".to_string()));
    }

    #[test]
    fn falls_back_to_outer_braces() {
        let response = "The result is {\"a\": [1, 2]} as requested";
        assert_eq!(
            extract_json_block(response),
            Some("{\"a\": [1, 2]}".to_string())
        );
        assert!(extract_json_block("no json here").is_none());
    }

    #[test]
    fn sanitize_removes_stray_control_characters() {
        let raw = "{\"a\": \"line\u{0000}break\u{0007}\"}";
        let cleaned = sanitize_json(raw);
        let value: Value = serde_json::from_str(&cleaned).expect("sanitized JSON parses");
        assert_eq!(value, json!({"a": "linebreak"}));
    }

    #[tokio::test]
    async fn shape_mismatch_is_an_error() {
        let llm = ScriptedModel::new().fallback("```json\n[1]\n```");
        let err = parse_llm_json(&llm, "```json\n[1, 2]\n```", JsonShape::Object)
            .await
            .expect_err("array is not an object");
        assert!(matches!(err, AppError::JsonParse(_)));
    }

    #[tokio::test]
    async fn repair_pass_fixes_broken_payloads() {
        let llm = ScriptedModel::new().route(
            "does not parse",
            "```json\n{\"fixed\": true}\n```",
        );

        let value = parse_llm_json(&llm, "```json\n{\"fixed\": tru\n```", JsonShape::Object)
            .await
            .expect("repaired");
        assert_eq!(value, json!({"fixed": true}));
    }

    #[tokio::test]
    async fn second_failure_surfaces_json_parse_error() {
        let llm = ScriptedModel::new().fallback("still not json");
        let err = parse_llm_json(&llm, "garbage", JsonShape::Array)
            .await
            .expect_err("double failure");
        assert!(matches!(err, AppError::JsonParse(_)));
    }
}
