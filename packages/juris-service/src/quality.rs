use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use juris_providers::generation::GenerationRequest;

use crate::{
	Error, JurisService,
	state::{
		Answer, CheckKind, CheckOutcome, CheckStatus, ContextEntry, CorrectionPhase,
		QualityVerdict, StateDelta,
	},
};

const PREFERRED_SOURCE_KINDS: [&str; 4] = ["statute", "case_law", "regulation", "commentary"];
const CASE_LAW_CUES: [&str; 6] = ["case", "court", "precedent", "ruling", "judgment", "held"];
const STOPWORDS: [&str; 18] = [
	"about", "after", "also", "been", "does", "from", "have", "that", "their", "there", "these",
	"they", "this", "under", "what", "when", "where", "which",
];
const LOW_SCORE: f32 = 0.6;
const UNQUOTED_CREDIT: f32 = 0.75;
const HOMOGENEITY_MIN_ENTRIES: usize = 3;
const HOMOGENEITY_PENALTY: f32 = 0.2;
const MISSING_CASE_LAW_PENALTY: f32 = 0.25;
const COHERENCE_FALLBACK_SCORE: f32 = 0.7;

const RELEVANCE_SYSTEM: &str = "You judge whether an answer addresses the legal question it was \
given. Score from 0 (off-topic) to 1 (directly and completely answers the question). List \
concrete issues, if any.";
const COHERENCE_SYSTEM: &str = "You judge the internal logic of a legal answer. Score from 0 \
(contradictory or incoherent) to 1 (clear, consistent reasoning). List concrete issues, if any.";

impl JurisService {
	/// Runs the four checks concurrently and aggregates them into a fresh verdict.
	pub async fn quality_gate(
		&self,
		query: &str,
		answer: &Answer,
		entries: &[ContextEntry],
	) -> StateDelta {
		let (attribution, relevance, coherence, hierarchy) = tokio::join!(
			async { check_attribution(answer, entries) },
			self.check_relevance(query, answer),
			self.check_coherence(query, answer),
			async { check_hierarchy(query, answer, entries) },
		);
		let verdict = aggregate(&self.cfg.quality, answer, vec![
			attribution,
			relevance,
			coherence,
			hierarchy,
		]);

		StateDelta {
			verdict: Some(verdict),
			phase: Some(CorrectionPhase::QualityChecked),
			..Default::default()
		}
	}

	async fn check_relevance(&self, query: &str, answer: &Answer) -> CheckOutcome {
		match self.judge(RELEVANCE_SYSTEM, query, answer).await {
			Ok((score, issues)) => {
				let issues = if score < LOW_SCORE && issues.is_empty() {
					vec!["Answer relevance to the question is low.".to_string()]
				} else {
					issues
				};

				outcome(CheckKind::Relevance, score, CheckStatus::Ok, issues)
			},
			Err(err) => {
				let status = judge_failure_status(&err);
				let score = lexical_relevance(query, &answer.text);
				let issues = if score < LOW_SCORE {
					vec!["Answer does not address the key terms of the question.".to_string()]
				} else {
					Vec::new()
				};

				warn!(
					error = %err,
					check = "relevance",
					"Relevance judge failed; using term overlap."
				);

				outcome(CheckKind::Relevance, score, status, issues)
			},
		}
	}

	async fn check_coherence(&self, query: &str, answer: &Answer) -> CheckOutcome {
		match self.judge(COHERENCE_SYSTEM, query, answer).await {
			Ok((score, issues)) => {
				let issues = if score < LOW_SCORE && issues.is_empty() {
					vec!["Logical coherence issues in the reasoning.".to_string()]
				} else {
					issues
				};

				outcome(CheckKind::Coherence, score, CheckStatus::Ok, issues)
			},
			Err(err) => {
				let status = judge_failure_status(&err);
				let score =
					if answer.text.trim().is_empty() { 0.0 } else { COHERENCE_FALLBACK_SCORE };

				warn!(
					error = %err,
					check = "coherence",
					"Coherence judge failed; using neutral score."
				);

				outcome(CheckKind::Coherence, score, status, Vec::new())
			},
		}
	}

	async fn judge(
		&self,
		system: &str,
		query: &str,
		answer: &Answer,
	) -> crate::Result<(f32, Vec<String>)> {
		let request = GenerationRequest {
			system: system.to_string(),
			user: format!("Question: {query}\n\nAnswer:\n{}", answer.text),
			schema: judge_schema(),
		};
		let value = crate::generate_checked(
			self,
			"Quality check",
			self.cfg.timeouts.quality_check_ms,
			&request,
		)
		.await?;

		parse_judgement(&value)
	}
}

/// Combines check outcomes. A verdict passes only when the weighted confidence reaches the
/// threshold, the answer is a real generated answer, and every judge answered in schema.
pub fn aggregate(
	cfg: &juris_config::Quality,
	answer: &Answer,
	checks: Vec<CheckOutcome>,
) -> QualityVerdict {
	let weight = |kind: CheckKind| match kind {
		CheckKind::Attribution => cfg.attribution_weight,
		CheckKind::Relevance => cfg.relevance_weight,
		CheckKind::Coherence => cfg.coherence_weight,
		CheckKind::Hierarchy => cfg.hierarchy_weight,
	};
	let total_weight: f32 = checks.iter().map(|check| weight(check.kind)).sum();
	let raw_confidence = if total_weight > 0.0 {
		checks.iter().map(|check| weight(check.kind) * check.score).sum::<f32>() / total_weight
	} else if checks.is_empty() {
		0.0
	} else {
		checks.iter().map(|check| check.score).sum::<f32>() / checks.len() as f32
	};
	let confidence = raw_confidence.clamp(0.0, 1.0);
	let mut issues: Vec<String> = Vec::new();
	let mut recommendations: Vec<String> = Vec::new();

	for check in &checks {
		for issue in &check.issues {
			if !issues.contains(issue) {
				issues.push(issue.clone());
			}
		}
		for recommendation in &check.recommendations {
			if !recommendations.contains(recommendation) {
				recommendations.push(recommendation.clone());
			}
		}
	}

	let blocking = answer.degraded || answer.text.trim().is_empty();

	if blocking {
		issues.push("Answer was not generated from the retrieved sources.".to_string());
	}

	let schema_invalid = checks.iter().any(|check| check.status == CheckStatus::SchemaInvalid);
	let passed = confidence >= cfg.pass_threshold && !blocking && !schema_invalid;

	QualityVerdict { passed, confidence, issues, recommendations, checks }
}

/// Deterministic: are there citations, and do quoted passages occur in the cited source?
pub fn check_attribution(answer: &Answer, entries: &[ContextEntry]) -> CheckOutcome {
	if entries.is_empty() {
		return outcome_with(
			CheckKind::Attribution,
			0.0,
			vec!["Insufficient sources were retrieved to support the answer.".to_string()],
			vec!["Retrieve authorities that address the question directly.".to_string()],
		);
	}
	if answer.citations.is_empty() {
		return outcome_with(
			CheckKind::Attribution,
			0.0,
			vec!["Answer lacks citations to the retrieved sources.".to_string()],
			vec!["Cite the specific provisions that support each claim.".to_string()],
		);
	}

	let mut credit = 0.0_f32;
	let mut unverified = 0;

	for citation in &answer.citations {
		let Some(entry) = (citation.marker as usize).checked_sub(1).and_then(|idx| entries.get(idx))
		else {
			continue;
		};

		match citation.quote.as_deref() {
			Some(quote) if contains_normalized(&entry.text, quote) => credit += 1.0,
			Some(_) => unverified += 1,
			None => credit += UNQUOTED_CREDIT,
		}
	}

	let verified = credit / answer.citations.len() as f32;
	let distinct: HashSet<&str> =
		answer.citations.iter().map(|citation| citation.doc_id.as_str()).collect();
	let coverage = (distinct.len() as f32 / entries.len().min(3) as f32).min(1.0);
	let score = 0.7 * verified + 0.3 * coverage;
	let (issues, recommendations) = if unverified > 0 {
		(
			vec![format!("{unverified} quoted passage(s) could not be found in the cited source.")],
			vec!["Quote the cited provisions verbatim.".to_string()],
		)
	} else {
		(Vec::new(), Vec::new())
	};

	outcome_with(CheckKind::Attribution, score, issues, recommendations)
}

/// Deterministic: authority of the sources relied on, their diversity, and case law when the
/// question asks for it.
pub fn check_hierarchy(query: &str, answer: &Answer, entries: &[ContextEntry]) -> CheckOutcome {
	if entries.is_empty() {
		return outcome(CheckKind::Hierarchy, 0.0, CheckStatus::Ok, Vec::new());
	}

	let cited: HashSet<&str> =
		answer.citations.iter().map(|citation| citation.doc_id.as_str()).collect();
	let relied_on: Vec<&ContextEntry> = if cited.is_empty() {
		entries.iter().collect()
	} else {
		entries.iter().filter(|entry| cited.contains(entry.doc_id.as_str())).collect()
	};
	let relied_on = if relied_on.is_empty() { entries.iter().collect() } else { relied_on };
	let mut score = relied_on.iter().map(|entry| authority(&entry.source_kind)).sum::<f32>()
		/ relied_on.len() as f32;
	let mut issues = Vec::new();
	let mut recommendations = Vec::new();
	let kinds: HashSet<&str> = entries.iter().map(|entry| entry.source_kind.as_str()).collect();

	if entries.len() >= HOMOGENEITY_MIN_ENTRIES && kinds.len() == 1 {
		let only = kinds.iter().next().copied().unwrap_or_default();

		score -= HOMOGENEITY_PENALTY;
		issues.push(format!("Sources lack diversity: only {only} material was used."));

		if let Some(kind) = underrepresented_source(entries) {
			recommendations.push(format!("Add {kind} sources."));
		}
	}

	let lowered = query.to_lowercase();

	if CASE_LAW_CUES.iter().any(|cue| lowered.contains(cue)) && !kinds.contains("case_law") {
		score -= MISSING_CASE_LAW_PENALTY;
		issues.push("No case law precedents support the answer.".to_string());
		recommendations.push("Retrieve judgments that apply the provision.".to_string());
	}

	outcome_with(CheckKind::Hierarchy, score.clamp(0.0, 1.0), issues, recommendations)
}

/// The first preferred source kind that no context entry carries.
pub fn underrepresented_source(entries: &[ContextEntry]) -> Option<&'static str> {
	let present: HashSet<&str> = entries.iter().map(|entry| entry.source_kind.as_str()).collect();

	PREFERRED_SOURCE_KINDS.into_iter().find(|kind| !present.contains(kind))
}

/// Share of the question's content words that appear in the answer.
pub fn lexical_relevance(query: &str, answer: &str) -> f32 {
	let answer = answer.to_lowercase();
	let terms: HashSet<String> = query
		.to_lowercase()
		.split(|ch: char| !ch.is_alphanumeric())
		.filter(|word| word.chars().count() > 3 && !STOPWORDS.contains(word))
		.map(str::to_string)
		.collect();

	if terms.is_empty() {
		return if answer.trim().is_empty() { 0.0 } else { 1.0 };
	}

	terms.iter().filter(|term| answer.contains(term.as_str())).count() as f32 / terms.len() as f32
}

fn authority(source_kind: &str) -> f32 {
	match source_kind {
		"statute" => 1.0,
		"case_law" => 0.9,
		"regulation" => 0.85,
		"commentary" => 0.6,
		_ => 0.5,
	}
}

fn judge_schema() -> Value {
	serde_json::json!({
		"type": "object",
		"required": ["score", "issues"],
		"properties": {
			"score": { "type": "number" },
			"issues": { "type": "array", "items": { "type": "string" } }
		}
	})
}

fn parse_judgement(value: &Value) -> crate::Result<(f32, Vec<String>)> {
	let score = value.get("score").and_then(|v| v.as_f64()).ok_or_else(|| Error::Schema {
		message: "Judge reply is missing a numeric score.".to_string(),
	})?;
	let issues = value
		.get("issues")
		.and_then(|v| v.as_array())
		.into_iter()
		.flatten()
		.filter_map(|v| v.as_str())
		.map(str::trim)
		.filter(|issue| !issue.is_empty())
		.map(str::to_string)
		.collect();

	Ok(((score as f32).clamp(0.0, 1.0), issues))
}

fn judge_failure_status(err: &Error) -> CheckStatus {
	match err {
		Error::Schema { .. } => CheckStatus::SchemaInvalid,
		_ => CheckStatus::Fallback,
	}
}

fn contains_normalized(haystack: &str, needle: &str) -> bool {
	let squash =
		|text: &str| text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
	let needle = squash(needle.trim_matches(|ch: char| ch == '"' || ch.is_whitespace()));

	!needle.is_empty() && squash(haystack).contains(&needle)
}

fn outcome(kind: CheckKind, score: f32, status: CheckStatus, issues: Vec<String>) -> CheckOutcome {
	CheckOutcome { kind, score, status, issues, recommendations: Vec::new() }
}

fn outcome_with(
	kind: CheckKind,
	score: f32,
	issues: Vec<String>,
	recommendations: Vec<String>,
) -> CheckOutcome {
	CheckOutcome { kind, score, status: CheckStatus::Ok, issues, recommendations }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::Citation;

	fn entry(doc_id: &str, source_kind: &str, text: &str) -> ContextEntry {
		ContextEntry {
			doc_id: doc_id.to_string(),
			chunk_id: format!("{doc_id}:0"),
			title: doc_id.to_string(),
			section: None,
			source_kind: source_kind.to_string(),
			citation: None,
			text: text.to_string(),
			tokens: 10,
		}
	}

	fn answer(citations: Vec<Citation>) -> Answer {
		Answer { text: "An employer must give notice [1].".to_string(), citations, degraded: false }
	}

	fn cite(marker: u32, doc_id: &str, quote: Option<&str>) -> Citation {
		Citation {
			marker,
			doc_id: doc_id.to_string(),
			title: doc_id.to_string(),
			source_kind: "statute".to_string(),
			quote: quote.map(str::to_string),
		}
	}

	fn check(kind: CheckKind, score: f32, status: CheckStatus) -> CheckOutcome {
		outcome(kind, score, status, Vec::new())
	}

	#[test]
	fn verified_quotes_score_higher_than_unverified() {
		let entries = vec![entry("a", "statute", "An employer shall give one month's notice.")];
		let quoted = answer(vec![cite(1, "a", Some("give one month's notice"))]);
		let good = check_attribution(&quoted, &entries);
		let bad = check_attribution(&answer(vec![cite(1, "a", Some("three months"))]), &entries);

		assert!(good.score > bad.score);
		assert!(good.issues.is_empty());
		assert_eq!(bad.issues.len(), 1);
	}

	#[test]
	fn missing_citations_is_a_citation_issue() {
		let entries = vec![entry("a", "statute", "text")];
		let result = check_attribution(&answer(Vec::new()), &entries);

		assert_eq!(result.score, 0.0);
		assert!(juris_domain::issues::has_source_insufficiency(&result.issues));
	}

	#[test]
	fn homogeneous_sources_are_flagged_with_alternative() {
		let entries = vec![
			entry("a", "statute", "x"),
			entry("b", "statute", "y"),
			entry("c", "statute", "z"),
		];
		let result = check_hierarchy("notice period for dismissal", &answer(Vec::new()), &entries);

		assert_eq!(underrepresented_source(&entries), Some("case_law"));
		assert!(result.issues.iter().any(|issue| issue.contains("diversity")));
		assert!(result.score < 1.0);
	}

	#[test]
	fn weighted_confidence_and_threshold() {
		let cfg = juris_config::Quality::default();
		let checks = vec![
			check(CheckKind::Attribution, 1.0, CheckStatus::Ok),
			check(CheckKind::Relevance, 1.0, CheckStatus::Ok),
			check(CheckKind::Coherence, 1.0, CheckStatus::Ok),
			check(CheckKind::Hierarchy, 1.0, CheckStatus::Ok),
		];
		let verdict = aggregate(&cfg, &answer(Vec::new()), checks);

		assert!(verdict.passed);
		assert!((verdict.confidence - 1.0).abs() < 1e-6);
	}

	#[test]
	fn schema_invalid_judge_fails_the_verdict() {
		let cfg = juris_config::Quality::default();
		let checks = vec![
			check(CheckKind::Attribution, 1.0, CheckStatus::Ok),
			check(CheckKind::Relevance, 1.0, CheckStatus::SchemaInvalid),
		];
		let verdict = aggregate(&cfg, &answer(Vec::new()), checks);

		assert!(!verdict.passed);
	}

	#[test]
	fn degraded_answer_never_passes() {
		let cfg = juris_config::Quality::default();
		let mut degraded = answer(Vec::new());

		degraded.degraded = true;

		let verdict =
			aggregate(&cfg, &degraded, vec![check(CheckKind::Attribution, 1.0, CheckStatus::Ok)]);

		assert!(!verdict.passed);
	}

	#[test]
	fn lexical_relevance_counts_content_words() {
		let score = lexical_relevance(
			"What notice period applies to dismissal?",
			"The notice period is one month.",
		);

		assert!((score - 0.5).abs() < 1e-6);
	}
}
