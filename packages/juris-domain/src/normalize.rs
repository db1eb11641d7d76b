use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::statute;

static FOLLOW_UP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
	crate::compile_patterns(&[
		r"(?i)^(?:and\s+)?(?:what|how)\s+about\s+(.+?)[?.!]*$",
		r"(?i)^and\s+(.+?)[?.!]*$",
		r"(?i)^(?:same\s+(?:question\s+)?for|likewise\s+for)\s+(.+?)[?.!]*$",
	])
});

/// Canonical query text: NFKC, typographic quotes folded, whitespace collapsed, trimmed.
pub fn normalize_query(raw: &str) -> String {
	let folded: String = raw
		.nfkc()
		.map(|ch| match ch {
			'\u{2018}' | '\u{2019}' => '\'',
			'\u{201C}' | '\u{201D}' => '"',
			'\u{2013}' | '\u{2014}' => '-',
			_ => ch,
		})
		.collect();

	folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased form used by every pattern table.
pub fn match_key(normalized: &str) -> String {
	normalized.to_lowercase()
}

/// Rewrites an elliptical follow-up ("what about section 13?") into a standalone question using the
/// previous user turn. Returns `None` when the query is not a follow-up or there is no prior turn.
pub fn rewrite_follow_up(query: &str, previous_user_turn: Option<&str>) -> Option<String> {
	let previous = previous_user_turn.map(str::trim).filter(|turn| !turn.is_empty())?;
	let subject = FOLLOW_UP_PATTERNS
		.iter()
		.find_map(|pattern| pattern.captures(query))
		.and_then(|caps| caps.get(1))
		.map(|m| m.as_str().trim().to_string())?;

	if subject.is_empty() {
		return None;
	}

	if let Some(section) = statute::detect_section(&subject)
		&& statute::detect_reference(&subject).is_none()
		&& let Some(prior) = statute::detect_reference(previous)
	{
		return Some(format!("section {section} of the {}", prior.statute));
	}

	Some(format!("{subject} (in the context of: {previous})"))
}
