//! Token estimation for upstreams that omit usage. Falls back to the
//! o200k vocabulary for models tiktoken does not recognize.

use tiktoken_rs::{get_bpe_from_model, o200k_base};

pub fn estimate_tokens(model: &str, text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    match get_bpe_from_model(model).or_else(|_| o200k_base()) {
        Ok(bpe) => bpe.encode_ordinary(text).len() as u64,
        Err(err) => {
            // Crude fallback, roughly four bytes per token.
            tracing::warn!(error = %err, "tokenizer unavailable, estimating by length");
            (text.len() as u64).div_ceil(4)
        }
    }
}

/// Prompt estimate across chat messages, with a small per-message
/// framing overhead.
pub fn estimate_prompt_tokens(model: &str, message_texts: &[String]) -> u64 {
    let body: u64 = message_texts
        .iter()
        .map(|text| estimate_tokens(model, text))
        .sum();
    body + 4 * message_texts.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(estimate_tokens("gpt-4", ""), 0);
    }

    #[test]
    fn estimates_grow_with_text() {
        let short = estimate_tokens("gpt-4", "hello");
        let long = estimate_tokens("gpt-4", "hello world, this is a longer sentence.");
        assert!(short >= 1);
        assert!(long > short);
    }

    #[test]
    fn unknown_models_still_estimate() {
        assert!(estimate_tokens("qwen-max", "some text to count") > 0);
    }

    #[test]
    fn prompt_estimate_includes_framing() {
        let msgs = vec!["hi".to_string(), "there".to_string()];
        assert!(estimate_prompt_tokens("gpt-4", &msgs) >= 8);
    }
}
