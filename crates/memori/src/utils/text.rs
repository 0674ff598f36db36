//! Text processing utilities: normalization, tokenization, keyword
//! extraction, and the similarity primitives used by dedup.

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
    static ref PUNCTUATION_REGEX: Regex = Regex::new(r"[^\w\s]").unwrap();
    static ref WORD_REGEX: Regex = Regex::new(r"\b[a-zA-Z]{3,}\b").unwrap();
    static ref STOP_WORDS: HashSet<&'static str> = [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
        "of", "with", "by", "from", "up", "about", "into", "through",
        "during", "before", "after", "above", "below", "between", "among",
        "is", "am", "are", "was", "were", "be", "been", "being", "have",
        "has", "had", "do", "does", "did", "will", "would", "could",
        "should", "may", "might", "must", "can", "this", "that", "these",
        "those", "i", "you", "he", "she", "it", "we", "they", "me", "him",
        "her", "us", "them", "my", "your", "his", "its", "our", "their",
    ]
    .into_iter()
    .collect();
}

/// Case-insensitive text operations, mirroring the upstream codebase's
/// `TextUtils` helper struct.
pub struct TextUtils;

impl TextUtils {
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.is_match(text) {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    pub fn truncate_with_ellipsis(text: &str, max_len: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_len {
            Cow::Borrowed(text)
        } else if max_len <= 3 {
            Cow::Owned("...".to_string())
        } else {
            let truncated: String = text.chars().take(max_len - 3).collect();
            Cow::Owned(format!("{truncated}..."))
        }
    }

    /// Extract up to `max_keywords` significant words, longest first, the
    /// way `StringUtils.extract_keywords` does in the source implementation.
    pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut seen = HashSet::new();
        let mut keywords: Vec<String> = WORD_REGEX
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .filter(|w| !STOP_WORDS.contains(w.as_str()))
            .filter(|w| seen.insert(w.clone()))
            .collect();
        keywords.sort_by_key(|b| std::cmp::Reverse(b.len()));
        keywords.truncate(max_keywords);
        keywords
    }
}

/// Split text into lowercase alphanumeric tokens (used for entity lookup
/// and keyword-like search in the Retrieval Engine).
pub fn tokenize(text: &str) -> Vec<String> {
    WORD_REGEX
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| !STOP_WORDS.contains(w.as_str()))
        .collect()
}

/// Normalize a string for the dedup similarity comparison: trimmed,
/// lowercased, punctuation-stripped.
pub fn normalize_similarity_key(text: &str) -> String {
    let lower = text.trim().to_lowercase();
    let stripped = PUNCTUATION_REGEX.replace_all(&lower, "");
    WHITESPACE_REGEX.replace_all(&stripped, " ").trim().to_string()
}

/// Token-set Jaccard similarity over whitespace-split tokens of the
/// normalized strings.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_similarity_key(a);
    let nb = normalize_similarity_key(b);
    let set_a: HashSet<&str> = na.split_whitespace().collect();
    let set_b: HashSet<&str> = nb.split_whitespace().collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_identical_strings_is_one() {
        assert_eq!(jaccard_similarity("User name is Bob", "user name is bob"), 1.0);
    }

    #[test]
    fn jaccard_punctuation_insensitive() {
        let a = "User name is Bob.";
        let b = "user name is bob";
        assert!(jaccard_similarity(a, b) >= 0.85);
    }

    #[test]
    fn jaccard_unrelated_strings_is_low() {
        let sim = jaccard_similarity("likes pizza and hiking", "works remotely from Berlin");
        assert!(sim < 0.3, "unexpected similarity: {sim}");
    }

    #[test]
    fn extract_keywords_drops_stopwords() {
        let kws = TextUtils::extract_keywords("the quick brown fox jumps over the lazy dog", 10);
        assert!(!kws.contains(&"the".to_string()));
        assert!(kws.contains(&"quick".to_string()));
    }

    #[test]
    fn tokenize_lowercases_and_strips_stopwords() {
        let toks = tokenize("Tell me about Kubernetes and PyTorch");
        assert!(toks.contains(&"kubernetes".to_string()));
        assert!(toks.contains(&"pytorch".to_string()));
        assert!(!toks.contains(&"and".to_string()));
    }
}
