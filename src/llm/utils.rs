use crate::error::{IngestError, Result};
use serde_json::Value;

/// Parses a model reply into JSON, tolerating code fences and surrounding prose.
pub fn parse_json_response(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let cleaned = clean_json_output(trimmed);
    serde_json::from_str(&cleaned).map_err(|e| {
        IngestError::OracleError(format!("response is not valid JSON ({}): {}", e, preview(trimmed)))
    })
}

fn clean_json_output(raw: &str) -> String {
    let array = raw.find('[').zip(raw.rfind(']'));
    let object = raw.find('{').zip(raw.rfind('}'));

    // Whichever container opens first is the outermost value.
    let span = match (array, object) {
        (Some(a), Some(o)) => Some(if a.0 < o.0 { a } else { o }),
        (a, o) => a.or(o),
    };

    match span {
        Some((start, end)) if start < end => raw[start..=end].to_string(),
        _ => raw.to_string(),
    }
}

fn preview(raw: &str) -> String {
    let mut preview: String = raw.chars().take(120).collect();
    if raw.chars().count() > 120 {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_plain_json() {
        let value = parse_json_response(r#"{"date": "2024-11-30"}"#).unwrap();
        assert_eq!(value["date"], "2024-11-30");
    }

    #[test]
    fn test_strips_code_fences_and_prose() {
        let raw = "Here you go:\n```json\n[{\"name\": \"HDFC Bank\", \"currentValue\": 100}]\n```";
        let value = parse_json_response(raw).unwrap();
        assert_eq!(value[0]["name"], "HDFC Bank");

        let raw = "```json\n{\"assets\": [{\"name\": \"A\"}]}\n```";
        let value = parse_json_response(raw).unwrap();
        assert_eq!(value["assets"][0]["name"], "A");
    }

    #[test]
    fn test_rejects_non_json() {
        assert!(matches!(
            parse_json_response("I could not find any holdings."),
            Err(IngestError::OracleError(_))
        ));
    }
}
