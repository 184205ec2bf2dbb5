//! Deterministic token estimation.

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimates the token count of `text` as its character count divided by
/// four, rounded up. Empty text is zero tokens.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}
