//! Canonical Subject-Aspect-Qualifier titles
//!
//! The SAQ title is the primary deduplication key: at most one active memory
//! per title. Construction is deterministic: caller-supplied titles are
//! sanitized, otherwise the title is derived from the content's leading
//! noun-like cluster, the classifying sublayer, and the most salient tag or
//! entity, with a hash-suffixed fallback when nothing usable exists.

use crate::memory::{Sublayer, MAX_TITLE_CHARS};

/// Filler words stripped from every title segment
const BANNED_FILLERS: &[&str] = &["really", "very", "favorite", "update", "new"];

/// Words too generic to anchor a subject segment
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "i", "we", "you", "he", "she", "it", "they", "my", "our", "your", "is",
    "are", "was", "were", "be", "been", "to", "of", "in", "on", "for", "and", "or", "that",
    "this", "with", "at", "by", "from", "as", "have", "has", "had", "do", "does", "did", "not",
    "prefer", "like", "use", "uses", "using",
];

/// A validated canonical title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaqTitle(String);

impl SaqTitle {
    /// The canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Sanitize a caller-supplied title: strip filler words, collapse
    /// separators, clamp length. Returns `None` when nothing survives.
    pub fn sanitize(raw: &str) -> Option<SaqTitle> {
        let cleaned: Vec<String> = raw
            .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
            .map(strip_segment)
            .filter(|s| !s.is_empty())
            .collect();
        if cleaned.is_empty() {
            return None;
        }
        Some(SaqTitle(clamp(&cleaned.join("-"))))
    }

    /// Derive a title from content, sublayer, and the most salient
    /// tag/entity qualifier.
    pub fn derive(
        content: &str,
        sublayer: Sublayer,
        tags: &[String],
        entity_names: &[String],
        content_hash: &str,
    ) -> SaqTitle {
        let subject = leading_noun_cluster(content);
        let aspect = title_case(sublayer.as_str());
        let qualifier = salient_qualifier(tags, entity_names);

        let mut segments: Vec<String> = Vec::with_capacity(3);
        if let Some(s) = subject {
            segments.push(s);
        }
        segments.push(aspect);
        if let Some(q) = qualifier {
            segments.push(q);
        }

        if segments.len() < 2 {
            return Self::fallback(sublayer, content_hash);
        }
        SaqTitle(clamp(&segments.join("-")))
    }

    /// Deterministic fallback: `{sublayer}-{first-8-chars-of-hash}`
    pub fn fallback(sublayer: Sublayer, content_hash: &str) -> SaqTitle {
        let prefix: String = content_hash.chars().take(8).collect();
        SaqTitle(clamp(&format!("{}-{}", sublayer.as_str(), prefix)))
    }
}

impl std::fmt::Display for SaqTitle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First noun-like token cluster of the content: up to two consecutive
/// capitalized tokens, else the first non-stopword token, TitleCased.
fn leading_noun_cluster(content: &str) -> Option<String> {
    let words: Vec<&str> = content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    // Prefer a run of capitalized words ("Project Omega" -> "ProjectOmega")
    let mut run: Vec<&str> = Vec::new();
    for word in &words {
        let capitalized = word.chars().next().is_some_and(|c| c.is_uppercase());
        if capitalized && !is_stopword(word) && !is_filler(word) {
            run.push(word);
            if run.len() == 2 {
                break;
            }
        } else if !run.is_empty() {
            break;
        }
    }
    if !run.is_empty() {
        return Some(run.iter().map(|w| title_case(w)).collect());
    }

    words
        .iter()
        .find(|w| !is_stopword(w) && !is_filler(w) && w.len() > 2)
        .map(|w| title_case(w))
}

/// Most salient qualifier: the longest tag (ties broken lexicographically),
/// else the first entity name.
fn salient_qualifier(tags: &[String], entity_names: &[String]) -> Option<String> {
    let mut candidates: Vec<&String> = tags.iter().collect();
    candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    if let Some(tag) = candidates.first() {
        let seg = strip_segment(tag);
        if !seg.is_empty() {
            return Some(seg);
        }
    }
    entity_names.iter().find_map(|name| {
        let seg = strip_segment(name);
        (!seg.is_empty()).then_some(seg)
    })
}

fn is_filler(word: &str) -> bool {
    BANNED_FILLERS.contains(&word.to_lowercase().as_str())
}

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_lowercase().as_str())
}

/// Drop filler words from a segment and TitleCase what remains,
/// keeping only alphanumeric characters.
fn strip_segment(segment: &str) -> String {
    segment
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !is_filler(w))
        .map(title_case)
        .collect()
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Clamp to the title length budget on a char boundary
fn clamp(s: &str) -> String {
    if s.chars().count() <= MAX_TITLE_CHARS {
        s.to_string()
    } else {
        s.chars().take(MAX_TITLE_CHARS).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::content_hash;

    #[test]
    fn test_sanitize_keeps_caller_title() {
        let title = SaqTitle::sanitize("Self-Pref-DarkMode").unwrap();
        assert_eq!(title.as_str(), "Self-Pref-DarkMode");
    }

    #[test]
    fn test_sanitize_strips_fillers() {
        let title = SaqTitle::sanitize("My-Really-Favorite-Editor").unwrap();
        assert_eq!(title.as_str(), "My-Editor");
    }

    #[test]
    fn test_sanitize_clamps_length() {
        let long = "Subject-Aspect-QualifierThatRunsFarTooLong";
        let title = SaqTitle::sanitize(long).unwrap();
        assert!(title.as_str().chars().count() <= MAX_TITLE_CHARS);
    }

    #[test]
    fn test_sanitize_rejects_pure_filler() {
        assert!(SaqTitle::sanitize("really very new").is_none());
        assert!(SaqTitle::sanitize("  ").is_none());
    }

    #[test]
    fn test_derive_uses_capitalized_cluster() {
        let hash = content_hash("We discussed Project Omega at length");
        let title = SaqTitle::derive(
            "We discussed Project Omega at length",
            Sublayer::Fact,
            &[],
            &[],
            &hash,
        );
        assert!(title.as_str().starts_with("ProjectOmega-Fact"));
    }

    #[test]
    fn test_derive_prefers_longest_tag_qualifier() {
        let hash = content_hash("dark mode everywhere");
        let title = SaqTitle::derive(
            "dark mode everywhere",
            Sublayer::Preference,
            &["ui".to_string(), "editors".to_string()],
            &[],
            &hash,
        );
        assert!(title.as_str().contains("Preference"));
        assert!(title.as_str().contains("Editors"));
    }

    #[test]
    fn test_derive_is_deterministic() {
        let hash = content_hash("tokio runtimes panic on nested block_on");
        let a = SaqTitle::derive(
            "tokio runtimes panic on nested block_on",
            Sublayer::Failure,
            &["tokio".to_string()],
            &[],
            &hash,
        );
        let b = SaqTitle::derive(
            "tokio runtimes panic on nested block_on",
            Sublayer::Failure,
            &["tokio".to_string()],
            &[],
            &hash,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_fallback_shape() {
        let hash = content_hash("???");
        let title = SaqTitle::fallback(Sublayer::Fact, &hash);
        assert!(title.as_str().starts_with("fact-"));
        assert_eq!(title.as_str().len(), "fact-".len() + 8);
    }
}
