use serde_json::Value;
use tracing::{info, warn};

use juris_config::MAX_CORRECTION_ITERATIONS;
use juris_domain::issues::{self, IssueKind};
use juris_providers::generation::GenerationRequest;

use crate::{
	Error, JurisService, Result, SearchFilter,
	fusion::{self, FusionParams},
	quality,
	retrieval::SearchPlan,
	state::{
		Answer, ContextEntry, CorrectionDecision, CorrectionPhase, NodeError, QualityVerdict,
		RetrievalCandidate, StateDelta,
	},
	synthesis::Guidance,
};

const NODE_REFINE: &str = "refine";
const NODE_RETRIEVE_MORE: &str = "retrieve_more";

const CRITIC_SYSTEM: &str = "You review a legal answer that failed quality checks. Explain how \
to revise it: give overall instructions, the fixes that matter most, and content worth adding. \
Do not rewrite the answer yourself.";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrectionPolicy {
	pub max_iterations: u32,
	pub fixable_min: f32,
	pub fixable_max: f32,
}
impl CorrectionPolicy {
	pub fn from_config(cfg: &juris_config::Correction) -> Self {
		Self {
			max_iterations: cfg.max_iterations.min(MAX_CORRECTION_ITERATIONS),
			fixable_min: cfg.fixable_min,
			fixable_max: cfg.fixable_max,
		}
	}
}

impl Default for CorrectionPolicy {
	fn default() -> Self {
		Self::from_config(&juris_config::Correction::default())
	}
}

/// The correction decision, evaluated in a fixed priority order:
///
/// 1. the iteration ceiling fails the answer unconditionally;
/// 2. a passed verdict passes;
/// 3. any source-insufficiency issue asks for more retrieval;
/// 4. a confidence inside the fixable band with issues asks for refinement;
/// 5. everything else passes.
pub fn decide(
	verdict: &QualityVerdict,
	iteration: u32,
	policy: &CorrectionPolicy,
) -> CorrectionDecision {
	if iteration >= policy.max_iterations {
		return CorrectionDecision::Fail;
	}
	if verdict.passed {
		return CorrectionDecision::Pass;
	}
	if issues::has_source_insufficiency(&verdict.issues) {
		return CorrectionDecision::RetrieveMore;
	}
	if (policy.fixable_min..policy.fixable_max).contains(&verdict.confidence)
		&& !verdict.issues.is_empty()
	{
		return CorrectionDecision::Refine;
	}

	CorrectionDecision::Pass
}

/// Joins gap results with the current candidates by rank, so fresh sources can displace
/// existing ones before the rerank cut. A chunk found again keeps its existing entry.
pub fn merge_candidates(
	existing: &[RetrievalCandidate],
	fresh: &[RetrievalCandidate],
	params: &FusionParams,
) -> Vec<RetrievalCandidate> {
	fusion::fuse_ranked(&[existing, fresh], params)
}

impl JurisService {
	pub fn decide_next(&self, verdict: &QualityVerdict, iteration: u32) -> StateDelta {
		let policy = CorrectionPolicy::from_config(&self.cfg.correction);
		let decision = decide(verdict, iteration, &policy);

		info!(
			decision = decision.as_str(),
			iteration,
			confidence = verdict.confidence,
			issues = verdict.issues.len(),
			"Correction decision made."
		);

		StateDelta {
			decision: Some(decision),
			phase: Some(CorrectionPhase::from(decision)),
			..Default::default()
		}
	}

	/// Critic pass followed by re-synthesis. Any failure leaves the previous answer in place and
	/// only advances the iteration counter.
	pub async fn refine(
		&self,
		query: &str,
		answer: &Answer,
		verdict: &QualityVerdict,
		entries: &[ContextEntry],
		iteration: u32,
	) -> StateDelta {
		let next_iteration = iteration + 1;
		let guidance = match self.critique(query, answer, verdict).await {
			Ok(guidance) => guidance,
			Err(err) => {
				warn!(error = %err, node = NODE_REFINE, "Critic failed; keeping previous answer.");

				return loop_failure(NODE_REFINE, next_iteration, err);
			},
		};

		match self.compose_answer(query, entries, Some(answer), Some(&guidance)).await {
			Ok(refined) => StateDelta {
				answer: Some(refined),
				iteration: Some(next_iteration),
				instructions: Some(guidance.instructions),
				priority_fixes: Some(guidance.priority_fixes),
				suggested_additions: Some(guidance.suggested_additions),
				phase: Some(CorrectionPhase::Synthesized),
				..Default::default()
			},
			Err(err) => {
				warn!(
					error = %err,
					node = NODE_REFINE,
					"Refined synthesis failed; keeping previous answer."
				);

				loop_failure(NODE_REFINE, next_iteration, err)
			},
		}
	}

	/// Gap retrieval for source problems. Results are re-fused with the existing candidates and
	/// the graph re-enters at reranking.
	pub async fn retrieve_more(
		&self,
		query: &str,
		verdict: &QualityVerdict,
		existing: &[RetrievalCandidate],
		entries: &[ContextEntry],
		iteration: u32,
	) -> StateDelta {
		let next_iteration = iteration + 1;
		let homogeneous = verdict
			.issues
			.iter()
			.any(|issue| IssueKind::classify(issue) == IssueKind::SourceHomogeneity);
		let underrepresented =
			if homogeneous { quality::underrepresented_source(entries) } else { None };
		let gap_query = issues::build_gap_query(query, &verdict.issues, underrepresented);
		let filter = underrepresented.map(SearchFilter::source_kind);
		let gap_k = self.cfg.correction.gap_top_k;
		let plan = SearchPlan { branch_k: gap_k, top_k: gap_k, filter: filter.as_ref() };
		let mut errors = Vec::new();
		let fresh = self.search_fused(std::slice::from_ref(&gap_query), plan, &mut errors).await;

		if fresh.is_empty() && !errors.is_empty() {
			warn!(node = NODE_RETRIEVE_MORE, "Gap retrieval failed; keeping existing candidates.");
			errors.push(NodeError::new(NODE_RETRIEVE_MORE, "Gap retrieval returned nothing."));

			return StateDelta { iteration: Some(next_iteration), errors, ..Default::default() };
		}

		info!(
			gap_query = %gap_query,
			fresh = fresh.len(),
			existing = existing.len(),
			"Gap retrieval finished."
		);

		let params = FusionParams::from_config(
			&self.cfg.retrieval,
			self.cfg.retrieval.top_k.saturating_add(gap_k),
		);

		StateDelta {
			candidates: Some(merge_candidates(existing, &fresh, &params)),
			iteration: Some(next_iteration),
			phase: Some(CorrectionPhase::RetrieveMore),
			errors,
			..Default::default()
		}
	}

	async fn critique(
		&self,
		query: &str,
		answer: &Answer,
		verdict: &QualityVerdict,
	) -> Result<Guidance> {
		let mut user = format!(
			"Question: {query}\n\nAnswer:\n{}\n\nQuality confidence: {:.2}\nIssues:",
			answer.text, verdict.confidence
		);

		for issue in &verdict.issues {
			user.push_str(&format!("\n- {issue}"));
		}
		for recommendation in &verdict.recommendations {
			user.push_str(&format!("\nRecommendation: {recommendation}"));
		}

		let request =
			GenerationRequest { system: CRITIC_SYSTEM.to_string(), user, schema: critic_schema() };
		let value =
			crate::generate_checked(self, "Critic", self.cfg.timeouts.critic_ms, &request).await?;

		parse_guidance(&value)
	}
}

fn loop_failure(node: &str, iteration: u32, err: Error) -> StateDelta {
	StateDelta {
		iteration: Some(iteration),
		errors: vec![NodeError::new(node, err.to_string())],
		..Default::default()
	}
}

fn critic_schema() -> Value {
	serde_json::json!({
		"type": "object",
		"required": ["instructions", "priority_fixes", "suggested_additions"],
		"properties": {
			"instructions": { "type": "string" },
			"priority_fixes": { "type": "array", "items": { "type": "string" } },
			"suggested_additions": { "type": "array", "items": { "type": "string" } }
		}
	})
}

fn parse_guidance(value: &Value) -> Result<Guidance> {
	let strings = |key: &str| -> Vec<String> {
		value
			.get(key)
			.and_then(|v| v.as_array())
			.into_iter()
			.flatten()
			.filter_map(|v| v.as_str())
			.map(str::trim)
			.filter(|item| !item.is_empty())
			.map(str::to_string)
			.collect()
	};
	let instructions = value
		.get("instructions")
		.and_then(|v| v.as_str())
		.map(str::trim)
		.filter(|text| !text.is_empty())
		.ok_or_else(|| Error::Schema {
			message: "Critic reply has empty instructions.".to_string(),
		})?;

	Ok(Guidance {
		instructions: instructions.to_string(),
		priority_fixes: strings("priority_fixes"),
		suggested_additions: strings("suggested_additions"),
	})
}
