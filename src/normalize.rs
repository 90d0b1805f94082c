use crate::config::ControlSettings;
use crate::types::{GeneratedFields, MetadataFields};

/// Apply post-processing to a successful generation.
///
/// Prompt-mode output is returned unchanged. Metadata output gets a
/// sentence-case title with the enabled advanced-title phrases appended, and
/// a cleaned, de-duplicated keyword list capped at `keywords_count`.
pub fn finalize(fields: GeneratedFields, controls: &ControlSettings) -> GeneratedFields {
    match fields {
        GeneratedFields::Metadata(m) => GeneratedFields::Metadata(finalize_metadata(m, controls)),
        prompt @ GeneratedFields::Prompt(_) => prompt,
    }
}

fn finalize_metadata(mut meta: MetadataFields, controls: &ControlSettings) -> MetadataFields {
    let phrases = controls.advance_title.phrases();

    let mut title = sentence_case(&meta.title);
    if !phrases.is_empty() {
        title.push(' ');
        title.push_str(&phrases.join(", "));
    }
    meta.title = title;

    let mut keywords: Vec<String> = meta
        .keywords
        .iter()
        .map(|kw| kw.trim().to_lowercase())
        .filter(|kw| !kw.is_empty())
        .collect();
    for phrase in &phrases {
        keywords.push(phrase.to_lowercase());
    }
    meta.keywords = dedupe(keywords);
    meta.keywords.truncate(controls.keywords_count);
    meta
}

/// First character upper-cased, the rest lower-cased.
pub fn sentence_case(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
