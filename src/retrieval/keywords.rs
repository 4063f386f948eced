//! Query keyword extraction for the keyword retrieval lanes.
//!
//! Generic corpus terms ("emergency", "protocol") would dominate keyword
//! matching, so the stop set includes domain boilerplate on top of common
//! English function words.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Cap on distinctive tokens kept from one query.
const MAX_KEYWORDS: usize = 20;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Common English function words
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "how",
        "in", "is", "it", "its", "of", "on", "or", "should", "that", "the", "their", "this",
        "to", "was", "were", "what", "when", "where", "which", "who", "will", "with",
        // Domain boilerplate that matches nearly every section
        "emergency", "protocol", "plan", "crisis", "management", "section", "document",
        "procedure", "guideline",
    ]
    .into_iter()
    .collect()
});

/// Extract at most [`MAX_KEYWORDS`] distinctive lowercase tokens from a
/// query, preserving first-seen order.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut keywords = Vec::new();

    for raw in query.split(|c: char| !c.is_alphanumeric()) {
        if keywords.len() >= MAX_KEYWORDS {
            break;
        }
        let token = raw.to_lowercase();
        if token.len() < 2 || STOP_WORDS.contains(token.as_str()) {
            continue;
        }
        if seen.insert(token.clone()) {
            keywords.push(token);
        }
    }

    keywords
}

/// Fraction of keywords present in `text`, in [0, 1].
pub fn keyword_overlap(keywords: &[String], text: &str) -> f32 {
    if keywords.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let matched = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
    matched as f32 / keywords.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_removed() {
        let keywords = extract_keywords("What is the emergency protocol for hospital evacuation");
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"emergency".to_string()));
        assert!(!keywords.contains(&"protocol".to_string()));
        assert!(keywords.contains(&"hospital".to_string()));
        assert!(keywords.contains(&"evacuation".to_string()));
    }

    #[test]
    fn test_dedupe_preserves_order() {
        let keywords = extract_keywords("triage triage beds Triage beds");
        assert_eq!(keywords, vec!["triage", "beds"]);
    }

    #[test]
    fn test_cap_at_twenty() {
        let query: String = (0..40).map(|i| format!("term{} ", i)).collect();
        assert_eq!(extract_keywords(&query).len(), 20);
    }

    #[test]
    fn test_overlap_fraction() {
        let keywords = vec!["triage".to_string(), "beds".to_string()];
        assert_eq!(keyword_overlap(&keywords, "Triage capacity and surge beds"), 1.0);
        assert_eq!(keyword_overlap(&keywords, "Surge beds only"), 0.5);
        assert_eq!(keyword_overlap(&keywords, "Unrelated text"), 0.0);
        assert_eq!(keyword_overlap(&[], "anything"), 0.0);
    }
}
