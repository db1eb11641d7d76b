use unicode_segmentation::UnicodeSegmentation;

const TOKENS_PER_WORD: f32 = 1.3;

/// Heuristic token count: the larger of the character-based and word-based estimates.
pub fn estimate_tokens(text: &str, chars_per_token: f32) -> u32 {
	if text.is_empty() {
		return 0;
	}

	let chars = text.chars().count() as f32;
	let words = text.unicode_words().count() as f32;
	let by_chars = if chars_per_token > 0.0 { chars / chars_per_token } else { chars };
	let by_words = words * TOKENS_PER_WORD;

	by_chars.max(by_words).ceil() as u32
}

/// Cuts `text` on a word boundary so that its estimate stays within `max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: u32, chars_per_token: f32) -> String {
	if estimate_tokens(text, chars_per_token) <= max_tokens {
		return text.to_string();
	}

	let mut end = 0;

	for (idx, word) in text.split_word_bound_indices() {
		let candidate = idx + word.len();

		if estimate_tokens(&text[..candidate], chars_per_token) > max_tokens {
			break;
		}

		end = candidate;
	}

	text[..end].trim_end().to_string()
}

/// Cuts `text` to at most `max_chars` characters, preferring the last whitespace inside the
/// limit.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
	if text.chars().count() <= max_chars {
		return text.to_string();
	}

	let byte_end = text.char_indices().nth(max_chars).map(|(idx, _)| idx).unwrap_or(text.len());
	let head = &text[..byte_end];
	let cut = head.rfind(char::is_whitespace).filter(|idx| *idx > byte_end / 2).unwrap_or(byte_end);

	head[..cut].trim_end().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_text_costs_nothing() {
		assert_eq!(estimate_tokens("", 4.0), 0);
	}

	#[test]
	fn takes_the_larger_estimate() {
		// 11 characters, 6 words: chars give 2.75, words give 7.8.
		assert_eq!(estimate_tokens("a b c d e f", 4.0), 8);
		// 40 characters, 1 word.
		assert_eq!(estimate_tokens(&"x".repeat(40), 4.0), 10);
	}

	#[test]
	fn truncation_respects_the_budget() {
		let text = "The tenant must give one month written notice before leaving the premises.";
		let cut = truncate_to_tokens(text, 6, 4.0);

		assert!(estimate_tokens(&cut, 4.0) <= 6);
		assert!(text.starts_with(&cut));
		assert!(!cut.is_empty());
	}

	#[test]
	fn char_truncation_prefers_whitespace() {
		assert_eq!(truncate_chars("alpha beta gamma", 12), "alpha beta");
		assert_eq!(truncate_chars("short", 12), "short");
	}
}
