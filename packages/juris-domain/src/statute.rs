use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const SECTION_TOKEN: &str = r"(\d+[a-z]?(?:\([0-9a-z]+\))*)";
const STATUTE_SUFFIX: &str = r"(?:act|code|regulations?|ordinance|constitution|rules)";
const LEADING_STOPWORDS: &[&str] = &[
	"a", "according", "and", "about", "an", "by", "does", "explain", "how", "in", "is", "of",
	"say", "says", "tell", "the", "to", "under", "what", "whats", "what's", "which", "me",
];

static SECTION_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
	Regex::new(&format!(r"(?i)\b(?:section|sec\.?|s\.)\s*{SECTION_TOKEN}")).ok()
});
static REFERENCE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
	let section_of = format!(
		r"(?i)\b(?:section|sec\.?|s\.)\s*{SECTION_TOKEN}\s+of\s+(?:the\s+)?([a-z][a-z'\s-]*?\b{STATUTE_SUFFIX})\b"
	);
	let statute_section = format!(
		r"(?i)\b([a-z][a-z'\s-]*?\b{STATUTE_SUFFIX})\s*,?\s+(?:section|sec\.?|s\.)\s*{SECTION_TOKEN}"
	);

	[section_of, statute_section].iter().filter_map(|pattern| Regex::new(pattern).ok()).collect()
});

/// An explicit "section N of statute S" mention.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatuteReference {
	/// Lowercased statute phrase as written by the user.
	pub statute: String,
	pub section: String,
}

/// One alias row from the statute alias index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatuteAlias {
	pub statute_id: String,
	pub alias: String,
	pub title: String,
	pub chapter: Option<String>,
}

pub fn detect_reference(text: &str) -> Option<StatuteReference> {
	let lowered = text.to_lowercase();

	for (idx, pattern) in REFERENCE_PATTERNS.iter().enumerate() {
		let Some(caps) = pattern.captures(&lowered) else {
			continue;
		};
		let (section, statute) =
			if idx == 0 { (caps.get(1), caps.get(2)) } else { (caps.get(2), caps.get(1)) };
		let (Some(section), Some(statute)) = (section, statute) else {
			continue;
		};
		let statute = strip_leading_stopwords(statute.as_str());

		if statute.is_empty() {
			continue;
		}

		return Some(StatuteReference { statute, section: section.as_str().to_string() });
	}

	None
}

pub fn detect_section(text: &str) -> Option<String> {
	let pattern = SECTION_PATTERN.as_ref()?;

	pattern
		.captures(&text.to_lowercase())
		.and_then(|caps| caps.get(1))
		.map(|m| m.as_str().to_string())
}

/// Leading numeric part of a section label: `12(1)(a)` becomes `12`, `7a` stays `7a`.
pub fn section_root(section: &str) -> &str {
	let end = section.find('(').unwrap_or(section.len());

	section[..end].trim()
}

/// Longest alias that occurs in `phrase` as whole words, compared case-insensitively.
pub fn resolve_alias<'a>(phrase: &str, aliases: &'a [StatuteAlias]) -> Option<&'a StatuteAlias> {
	let haystack = phrase.to_lowercase();

	aliases
		.iter()
		.filter(|alias| !alias.alias.trim().is_empty())
		.filter(|alias| contains_words(&haystack, &alias.alias.to_lowercase()))
		.max_by_key(|alias| alias.alias.chars().count())
}

pub(crate) fn contains_words(haystack: &str, needle: &str) -> bool {
	let needle = needle.trim();

	if needle.is_empty() {
		return false;
	}

	haystack.match_indices(needle).any(|(start, _)| {
		let end = start + needle.len();
		let before_ok =
			haystack[..start].chars().next_back().is_none_or(|ch| !ch.is_alphanumeric());
		let after_ok = haystack[end..].chars().next().is_none_or(|ch| !ch.is_alphanumeric());

		before_ok && after_ok
	})
}

fn strip_leading_stopwords(phrase: &str) -> String {
	let words: Vec<&str> = phrase.split_whitespace().collect();
	let start =
		words.iter().position(|word| !LEADING_STOPWORDS.contains(word)).unwrap_or(words.len());

	words[start..].join(" ")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn alias(statute_id: &str, alias: &str) -> StatuteAlias {
		StatuteAlias {
			statute_id: statute_id.to_string(),
			alias: alias.to_string(),
			title: format!("{alias} title"),
			chapter: None,
		}
	}

	#[test]
	fn patterns_compile() {
		assert!(SECTION_PATTERN.is_some());
		assert_eq!(REFERENCE_PATTERNS.len(), 2);
	}

	#[test]
	fn detects_section_of_form() {
		let reference = detect_reference("What does section 12(1) of the Labour Act say?")
			.expect("Expected a reference.");

		assert_eq!(reference.statute, "labour act");
		assert_eq!(reference.section, "12(1)");
	}

	#[test]
	fn detects_statute_section_form() {
		let reference = detect_reference("what does the employment act section 7 require")
			.expect("Expected a reference.");

		assert_eq!(reference.statute, "employment act");
		assert_eq!(reference.section, "7");
	}

	#[test]
	fn plain_question_has_no_reference() {
		assert!(detect_reference("can my landlord evict me without notice").is_none());
	}

	#[test]
	fn section_root_drops_subsections() {
		assert_eq!(section_root("12(1)(a)"), "12");
		assert_eq!(section_root("7a"), "7a");
	}

	#[test]
	fn resolves_longest_whole_word_alias() {
		let aliases = vec![alias("s1", "labour act"), alias("s2", "act"), alias("s3", "labour")];
		let resolved = resolve_alias("the labour act", &aliases).expect("Expected an alias.");

		assert_eq!(resolved.statute_id, "s1");
		assert!(resolve_alias("the labourers act", &aliases[..1]).is_none());
	}
}
