//! Defensive parsing of model output into [`GeneratedFields`].
//!
//! Models asked for JSON usually return it, but occasionally wrap it in a
//! markdown fence or surround it with prose. Strategies, in order:
//! 1. Direct parse
//! 2. Fenced code block (```` ```json ````)
//! 3. First `{` to last `}`

use serde::de::DeserializeOwned;

use crate::error::{GenerationError, Result};
use crate::types::{GeneratedFields, GenerationMode, MetadataFields, PromptFields};

/// Parse response text into the shape expected for `mode`.
pub fn parse_fields(text: &str, mode: GenerationMode) -> Result<GeneratedFields> {
    match mode {
        GenerationMode::Metadata => parse_json::<MetadataFields>(text).map(GeneratedFields::Metadata),
        GenerationMode::Prompt => parse_json::<PromptFields>(text).map(GeneratedFields::Prompt),
    }
}

/// Parse text as `T`, tolerating fences and surrounding chatter.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::InvalidResponse("empty response text".to_string()));
    }

    if let Ok(val) = serde_json::from_str::<T>(trimmed) {
        return Ok(val);
    }

    if let Some(block) = extract_json_block(trimmed) {
        if let Ok(val) = serde_json::from_str::<T>(&block) {
            return Ok(val);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(val) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                return Ok(val);
            }
        }
    }

    let preview: String = trimmed.chars().take(200).collect();
    Err(GenerationError::InvalidResponse(format!(
        "could not parse model output: {}",
        preview
    )))
}

fn extract_json_block(text: &str) -> Option<String> {
    for marker in ["```json", "```JSON", "```"] {
        if let Some(start) = text.find(marker) {
            let content_start = start + marker.len();
            if let Some(end) = text[content_start..].find("```") {
                return Some(text[content_start..content_start + end].trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata_direct() {
        let text = r#"{"title":"Red apple","description":"A red apple","keywords":["apple","fruit"],"category":"Food"}"#;
        let fields = parse_fields(text, GenerationMode::Metadata).unwrap();
        assert_eq!(fields.title(), Some("Red apple"));
        assert_eq!(fields.keywords(), ["apple", "fruit"]);
        assert_eq!(fields.category(), Some("Food"));
    }

    #[test]
    fn test_parse_prompt_fenced() {
        let text = "Here you go:\n```json\n{\"description\": \"calm lake at dawn\"}\n```";
        let fields = parse_fields(text, GenerationMode::Prompt).unwrap();
        assert_eq!(fields, GeneratedFields::Prompt(PromptFields {
            description: "calm lake at dawn".into()
        }));
    }

    #[test]
    fn test_parse_embedded_object() {
        let text = "Sure! {\"description\": \"x\"} Hope that helps.";
        let fields = parse_fields(text, GenerationMode::Prompt).unwrap();
        assert_eq!(fields.description(), "x");
    }

    #[test]
    fn test_missing_fields_default() {
        let fields = parse_fields(r#"{"title": "Only title"}"#, GenerationMode::Metadata).unwrap();
        assert_eq!(fields.title(), Some("Only title"));
        assert!(fields.keywords().is_empty());
    }

    #[test]
    fn test_parse_failure() {
        assert!(matches!(
            parse_fields("no json here", GenerationMode::Metadata),
            Err(GenerationError::InvalidResponse(_))
        ));
        assert!(parse_fields("   ", GenerationMode::Prompt).is_err());
    }
}
