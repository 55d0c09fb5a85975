//! Defensive JSON extraction from model responses.
//!
//! Models are asked for bare JSON objects, but in practice responses
//! arrive wrapped in markdown fences, prefixed with prose, or carrying
//! small syntax defects (trailing commas, smart quotes). This module
//! normalizes all of that before the structured parse; anything it cannot
//! recover is a parse failure that feeds the retry loop.

use super::client::truncate_str;
use serde_json::Value;

/// Strip markdown code fences from a response.
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Extract the outermost `{...}` fragment, if any.
fn extract_object_fragment(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Repair common JSON defects in model output.
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Trailing commas before a closing bracket.
    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");

    // Smart quotes to regular quotes.
    fixed = fixed.replace(['\u{201C}', '\u{201D}'], "\"");
    fixed = fixed.replace(['\u{2018}', '\u{2019}'], "'");

    // Control characters that slipped into string bodies.
    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Parse a model response into a JSON object.
///
/// Returns a readable error (with a response preview) suitable for retry
/// telemetry when nothing object-shaped can be recovered.
pub fn parse_object(response: &str) -> Result<Value, String> {
    let clean = strip_markdown_fences(response);
    let fragment = extract_object_fragment(clean).unwrap_or(clean);

    let attempt = serde_json::from_str::<Value>(fragment)
        .or_else(|_| serde_json::from_str::<Value>(&fix_json_issues(fragment)));

    match attempt {
        Ok(Value::Object(map)) => Ok(Value::Object(map)),
        Ok(other) => Err(format!(
            "expected a JSON object, got {}",
            value_kind(&other)
        )),
        Err(e) => Err(format!(
            "response is not valid JSON ({}). Preview: {}",
            e,
            truncate_str(response, 200)
        )),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_object() {
        let value = parse_object(r#"{"summary": "ok"}"#).unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[test]
    fn strips_json_fences() {
        let value = parse_object("```json\n{\"summary\": \"ok\"}\n```").unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let value =
            parse_object("Here is the analysis you asked for:\n{\"summary\": \"ok\"}\nDone!")
                .unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[test]
    fn repairs_trailing_commas_and_smart_quotes() {
        let raw = "{\u{201C}summary\u{201D}: \u{201C}ok\u{201D}, \"items\": [1, 2,]}";
        let value = parse_object(raw).unwrap();
        assert_eq!(value["summary"], "ok");
        assert_eq!(value["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn rejects_non_object_json() {
        let err = parse_object("[1, 2, 3]").unwrap_err();
        assert!(err.contains("an array"), "unexpected: {err}");
    }

    #[test]
    fn rejects_garbage_with_preview() {
        let err = parse_object("I could not produce JSON today.").unwrap_err();
        assert!(err.contains("Preview"), "unexpected: {err}");
    }
}
