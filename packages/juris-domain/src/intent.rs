use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::statute;

/// Confidence assigned when no rule fires and the query falls through to the default category.
pub const DEFAULT_RULE_CONFIDENCE: f32 = 0.4;

const COMPARISON_MARKERS: &[&str] = &[
	"compare",
	"comparison",
	"difference between",
	"differ from",
	"versus",
	" vs ",
	"as opposed to",
	"distinguish",
];
const EXPERT_MARKERS: &[&str] = &[
	"constitutional",
	"precedent",
	"ratio decidendi",
	"obiter",
	"ultra vires",
	"interpretation of",
	"conflict between",
	"retrospective",
	"jurisdiction",
	"supremacy",
];
const CONDITION_MARKERS: &[&str] = &[" if ", " unless ", " provided that ", " whether ", " when "];

type RuleRow = (IntentCategory, f32, &'static str, &'static [&'static str]);

/// Ordered rule table: category, confidence, rule name, patterns.
const RULE_TABLE: &[RuleRow] = &[
	(
		IntentCategory::Conversational,
		0.95,
		"conversational",
		&[
			r"^(?:hi|hello|hey|good (?:morning|afternoon|evening))\b[\s!.,]*$",
			r"^(?:thanks|thank you|thx|cheers)\b",
			r"^(?:ok|okay|great|cool|got it|bye|goodbye)[\s!.]*$",
			r"^(?:who|what) are you\b",
		],
	),
	(
		IntentCategory::Summarize,
		0.9,
		"summarize",
		&[
			r"\b(?:summari[sz]e|summary of|give me an overview|overview of)\b",
			r"\b(?:tl;?dr|in a nutshell|key points of)\b",
		],
	),
	(
		IntentCategory::Disambiguate,
		0.8,
		"disambiguate",
		&[
			r"^(?:which|what) (?:one|act|law|section)\??$",
			r"^(?:the )?(?:other|first|second|last) one\??$",
			r"\bdid you mean\b",
			r"\bwhich (?:of these|of the two)\b",
		],
	),
	(
		IntentCategory::InformationalQa,
		0.8,
		"legal_keyword",
		&[
			r"\b(?:section|sec\.|act|statute|regulation|clause|article|ordinance)\b",
			r"\b(?:court|tribunal|judge|judgment|ruling|appeal|precedent)\b",
			r"\b(?:lawful|unlawful|legal|illegal|liable|liability|rights?|obligations?)\b",
			r"\b(?:contract|lease|tenant|landlord|employer|employee|dismissal|notice period)\b",
			r"\b(?:penalty|offence|offense|fine|sentence|bail|damages|compensation)\b",
		],
	),
];

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
	RULE_TABLE
		.iter()
		.map(|&(category, confidence, name, patterns)| Rule {
			category,
			confidence,
			name,
			patterns: crate::compile_patterns(patterns),
		})
		.collect()
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
	InformationalQa,
	Conversational,
	Summarize,
	Disambiguate,
}
impl IntentCategory {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::InformationalQa => "informational_qa",
			Self::Conversational => "conversational",
			Self::Summarize => "summarize",
			Self::Disambiguate => "disambiguate",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"informational_qa" | "informational" | "qa" => Some(Self::InformationalQa),
			"conversational" => Some(Self::Conversational),
			"summarize" | "summarise" => Some(Self::Summarize),
			"disambiguate" => Some(Self::Disambiguate),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
	Simple,
	Moderate,
	Complex,
	Expert,
}
impl ComplexityTier {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Simple => "simple",
			Self::Moderate => "moderate",
			Self::Complex => "complex",
			Self::Expert => "expert",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"simple" => Some(Self::Simple),
			"moderate" => Some(Self::Moderate),
			"complex" => Some(Self::Complex),
			"expert" => Some(Self::Expert),
			_ => None,
		}
	}

	pub fn retrieval_params(self) -> RetrievalParams {
		let (initial_k, rerank_k) = match self {
			Self::Simple => (15, 5),
			Self::Moderate => (25, 8),
			Self::Complex => (40, 12),
			Self::Expert => (50, 15),
		};

		RetrievalParams { initial_k, rerank_k }
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalParams {
	pub initial_k: u32,
	pub rerank_k: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
	pub category: IntentCategory,
	pub confidence: f32,
	/// Name of the rule that fired, or `default` when nothing matched.
	pub rule: String,
}

struct Rule {
	category: IntentCategory,
	confidence: f32,
	name: &'static str,
	patterns: Vec<Regex>,
}

/// Classifies a lowercased, normalized query with the ordered rule table. The first rule with a
/// matching pattern wins.
pub fn classify_by_rules(match_key: &str) -> RuleMatch {
	let text = match_key.trim();

	for rule in RULES.iter() {
		if rule.patterns.iter().any(|pattern| pattern.is_match(text)) {
			return RuleMatch {
				category: rule.category,
				confidence: rule.confidence,
				rule: rule.name.to_string(),
			};
		}
	}

	RuleMatch {
		category: IntentCategory::InformationalQa,
		confidence: DEFAULT_RULE_CONFIDENCE,
		rule: "default".to_string(),
	}
}

pub fn estimate_complexity(match_key: &str) -> ComplexityTier {
	let padded = format!(" {} ", match_key.trim());
	let words = padded.split_whitespace().count();
	let mut score = match words {
		0..=8 => 0,
		9..=18 => 1,
		19..=35 => 2,
		_ => 3,
	};

	if COMPARISON_MARKERS.iter().any(|marker| padded.contains(marker)) {
		score += 2;
	}
	if CONDITION_MARKERS.iter().filter(|marker| padded.contains(*marker)).count() >= 2 {
		score += 1;
	}

	let section_mentions = padded.matches("section ").count() + padded.matches(" act").count();

	if section_mentions >= 3 {
		score += 2;
	} else if section_mentions == 2 {
		score += 1;
	}
	if statute::detect_reference(match_key).is_some() && words <= 12 && score > 0 {
		score -= 1;
	}

	let expert_hits = EXPERT_MARKERS.iter().filter(|marker| padded.contains(*marker)).count();

	score += 2 * expert_hits.min(3);

	match score {
		0..=1 => ComplexityTier::Simple,
		2..=3 => ComplexityTier::Moderate,
		4..=5 => ComplexityTier::Complex,
		_ => ComplexityTier::Expert,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rule_table_compiles_in_full() {
		for (rule, row) in RULES.iter().zip(RULE_TABLE) {
			assert_eq!(rule.patterns.len(), row.3.len(), "Rule {} lost a pattern.", rule.name);
		}
	}

	#[test]
	fn greeting_is_conversational() {
		let matched = classify_by_rules("hello!");

		assert_eq!(matched.category, IntentCategory::Conversational);
		assert_eq!(matched.confidence, 0.95);
	}

	#[test]
	fn summarize_beats_legal_keywords() {
		let matched = classify_by_rules("summarize section 4 of the tenancy act");

		assert_eq!(matched.category, IntentCategory::Summarize);
	}

	#[test]
	fn legal_keyword_is_informational() {
		let matched = classify_by_rules("can my employer cut my salary");

		assert_eq!(matched.category, IntentCategory::InformationalQa);
		assert_eq!(matched.rule, "legal_keyword");
	}

	#[test]
	fn unmatched_query_uses_low_confidence_default() {
		let matched = classify_by_rules("how long do i have");

		assert_eq!(matched.category, IntentCategory::InformationalQa);
		assert_eq!(matched.confidence, DEFAULT_RULE_CONFIDENCE);
		assert_eq!(matched.rule, "default");
	}

	#[test]
	fn tiers_map_to_retrieval_params() {
		let params = [
			ComplexityTier::Simple,
			ComplexityTier::Moderate,
			ComplexityTier::Complex,
			ComplexityTier::Expert,
		]
		.map(|tier| {
			let params = tier.retrieval_params();

			(params.initial_k, params.rerank_k)
		});

		assert_eq!(params, [(15, 5), (25, 8), (40, 12), (50, 15)]);
	}

	#[test]
	fn short_question_is_simple() {
		assert_eq!(estimate_complexity("what is a lease"), ComplexityTier::Simple);
	}

	#[test]
	fn comparison_across_statutes_is_harder() {
		let tier = estimate_complexity(
			"compare the notice requirements in section 12 of the labour act versus section 4 of the tenancy act",
		);

		assert!(tier >= ComplexityTier::Complex, "Unexpected tier: {tier:?}");
	}

	#[test]
	fn constitutional_precedent_is_expert() {
		let tier = estimate_complexity(
			"is there precedent on the constitutional supremacy of the bill of rights over the labour act",
		);

		assert_eq!(tier, ComplexityTier::Expert);
	}
}
