//! Tokenizer for the fulltext index.
//!
//! Lowercases, splits on anything that is not alphanumeric, and drops
//! stopwords and single-character fragments. The same function runs at index
//! time and at query time so postings and query tokens always line up.

/// Common English stopwords. Kept short on purpose: titles and note bodies
/// in a personal store are tiny, over-aggressive filtering hurts recall.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "the", "to", "with",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Splits `text` into index tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .filter(|t| !is_stopword(t))
        .collect()
}
