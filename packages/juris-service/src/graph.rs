use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use juris_domain::intent::IntentCategory;

use crate::{
	Error, JurisService, Result,
	cache::CachedAnswer,
	state::{
		AgentState, AnswerRequest, Citation, ContextEntry, CorrectionDecision, IntentResult,
		NodeError, NodeTiming, QualityVerdict, RetrievalPath, StateDelta,
	},
	synthesis,
};

/// Upper bound on scheduled nodes per query.
const MAX_STEPS: usize = 48;
const NODE_FINALIZE: &str = "finalize";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Node {
	Normalize,
	ClassifyIntent,
	CacheLookup,
	Retrieve,
	Rerank,
	Bundle,
	Synthesize,
	Summarize,
	Converse,
	QualityGate,
	Decide,
	Refine,
	RetrieveMore,
	Finalize,
}
impl Node {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Normalize => "normalize",
			Self::ClassifyIntent => "classify_intent",
			Self::CacheLookup => "cache_lookup",
			Self::Retrieve => "retrieve",
			Self::Rerank => "rerank",
			Self::Bundle => "bundle",
			Self::Synthesize => "synthesize",
			Self::Summarize => "summarize",
			Self::Converse => "converse",
			Self::QualityGate => "quality_gate",
			Self::Decide => "decide",
			Self::Refine => "refine",
			Self::RetrieveMore => "retrieve_more",
			Self::Finalize => "finalize",
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnswerResponse {
	pub query_id: Uuid,
	pub answer: String,
	pub citations: Vec<Citation>,
	pub degraded: bool,
	/// Set when the answer did not pass review or is an extractive fallback.
	pub flagged: bool,
	pub decision: CorrectionDecision,
	pub iterations: u32,
	pub intent: Option<IntentResult>,
	pub retrieval_path: Option<RetrievalPath>,
	pub variants: Vec<String>,
	pub sources: Vec<ContextEntry>,
	pub verdict: Option<QualityVerdict>,
	pub errors: Vec<NodeError>,
	pub timings: Vec<NodeTiming>,
	pub cache_hit: bool,
}

/// The edge taken after `node` completed, given the state it produced.
pub fn next_node(node: Node, state: &AgentState, quality_enabled: bool) -> Node {
	let category = state.intent.as_ref().map(|intent| intent.category);

	match node {
		Node::Normalize => Node::ClassifyIntent,
		Node::ClassifyIntent => match category.unwrap_or(IntentCategory::InformationalQa) {
			IntentCategory::InformationalQa => Node::CacheLookup,
			IntentCategory::Summarize => Node::Retrieve,
			IntentCategory::Conversational | IntentCategory::Disambiguate => Node::Converse,
		},
		Node::CacheLookup =>
			if state.cache_hit {
				Node::Finalize
			} else {
				Node::Retrieve
			},
		Node::Retrieve =>
			if state.reranked.is_some() {
				Node::Bundle
			} else {
				Node::Rerank
			},
		Node::Rerank => Node::Bundle,
		Node::Bundle =>
			if category == Some(IntentCategory::Summarize) {
				Node::Summarize
			} else {
				Node::Synthesize
			},
		Node::Synthesize => {
			let looping = state.refinement.iteration > 0;

			if !quality_enabled || (looping && state.deadline_exhausted()) {
				Node::Finalize
			} else {
				Node::QualityGate
			}
		},
		Node::QualityGate => Node::Decide,
		Node::Decide => {
			if state.deadline_exhausted() {
				return Node::Finalize;
			}

			match state.refinement.last_decision {
				Some(CorrectionDecision::Refine) => Node::Refine,
				Some(CorrectionDecision::RetrieveMore) => Node::RetrieveMore,
				_ => Node::Finalize,
			}
		},
		Node::Refine => Node::QualityGate,
		Node::RetrieveMore => Node::Rerank,
		Node::Summarize | Node::Converse | Node::Finalize => Node::Finalize,
	}
}

impl JurisService {
	/// Runs one query through the graph. Upstream failures degrade the answer instead of
	/// failing the call; only invalid requests and contract violations are errors.
	pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerResponse> {
		if request.query.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "query must be non-empty.".to_string() });
		}

		let started = Instant::now();
		let mut state = AgentState::new(request, self.cfg.state.soft_deadline_ms);
		let mut node = Node::Normalize;
		let mut steps = 0;

		while node != Node::Finalize {
			if steps == MAX_STEPS {
				warn!(query_id = %state.query_id, node = node.as_str(), "Step limit reached.");
				state.errors.push(NodeError::new(NODE_FINALIZE, "Step limit reached."));

				break;
			}

			let node_started = Instant::now();
			let mut delta = self.run_node(node, &state).await?;

			delta.timings.push(NodeTiming {
				node: node.as_str().to_string(),
				elapsed_ms: node_started.elapsed().as_millis() as u64,
			});
			state.apply(delta, &self.cfg.state);
			state.elapsed_ms = started.elapsed().as_millis() as u64;
			steps += 1;
			node = next_node(node, &state, self.cfg.quality.enabled);
		}

		let response = self.finalize(state).await;

		info!(
			query_id = %response.query_id,
			decision = response.decision.as_str(),
			iterations = response.iterations,
			cache_hit = response.cache_hit,
			flagged = response.flagged,
			elapsed_ms = started.elapsed().as_millis() as u64,
			"Query answered."
		);

		Ok(response)
	}

	/// Executes one node against its narrow view of the state.
	pub async fn run_node(&self, node: Node, state: &AgentState) -> Result<StateDelta> {
		let name = node.as_str();
		let delta = match node {
			Node::Normalize => self.normalize_query(&state.raw_query, &state.context),
			Node::ClassifyIntent => {
				let query = require(state.effective_query(), name, "normalized_query")?;

				self.classify_intent(query).await
			},
			Node::CacheLookup => {
				let query = require(state.effective_query(), name, "normalized_query")?;
				let intent = require(state.intent.as_ref(), name, "intent")?;

				self.cache_lookup(query, intent).await
			},
			Node::Retrieve => {
				let query = require(state.effective_query(), name, "normalized_query")?;
				let intent = require(state.intent.as_ref(), name, "intent")?;

				self.retrieve(query, intent, state.statute_hint.as_ref()).await
			},
			Node::Rerank => {
				let query = require(state.effective_query(), name, "normalized_query")?;
				let intent = require(state.intent.as_ref(), name, "intent")?;
				let candidates = require(state.candidates.as_deref(), name, "candidates")?;

				self.rerank(query, candidates, intent.params.rerank_k, state.deadline_exhausted())
					.await
			},
			Node::Bundle => {
				let reranked = require(state.reranked.as_deref(), name, "reranked")?;

				self.bundle_context(reranked).await
			},
			Node::Synthesize => {
				let query = require(state.effective_query(), name, "normalized_query")?;
				let entries = require(state.context_entries.as_deref(), name, "context_entries")?;

				self.synthesize(query, entries, state.answer.as_ref()).await
			},
			Node::Summarize => {
				let query = require(state.effective_query(), name, "normalized_query")?;
				let entries = require(state.context_entries.as_deref(), name, "context_entries")?;

				self.summarize(query, entries).await
			},
			Node::Converse => {
				let query = require(state.effective_query(), name, "normalized_query")?;
				let intent = require(state.intent.as_ref(), name, "intent")?;

				self.converse(query, intent.category).await
			},
			Node::QualityGate => {
				let query = require(state.effective_query(), name, "normalized_query")?;
				let answer = require(state.answer.as_ref(), name, "answer")?;
				let entries = require(state.context_entries.as_deref(), name, "context_entries")?;

				self.quality_gate(query, answer, entries).await
			},
			Node::Decide => {
				let verdict = require(state.verdict.as_ref(), name, "verdict")?;

				self.decide_next(verdict, state.refinement.iteration)
			},
			Node::Refine => {
				let query = require(state.effective_query(), name, "normalized_query")?;
				let answer = require(state.answer.as_ref(), name, "answer")?;
				let verdict = require(state.verdict.as_ref(), name, "verdict")?;
				let entries = require(state.context_entries.as_deref(), name, "context_entries")?;

				self.refine(query, answer, verdict, entries, state.refinement.iteration).await
			},
			Node::RetrieveMore => {
				let query = require(state.effective_query(), name, "normalized_query")?;
				let verdict = require(state.verdict.as_ref(), name, "verdict")?;
				let candidates = require(state.candidates.as_deref(), name, "candidates")?;
				let entries = require(state.context_entries.as_deref(), name, "context_entries")?;

				self.retrieve_more(query, verdict, candidates, entries, state.refinement.iteration)
					.await
			},
			Node::Finalize => StateDelta::default(),
		};

		Ok(delta)
	}

	async fn finalize(&self, mut state: AgentState) -> AnswerResponse {
		let answer = match state.answer.take() {
			Some(answer) => answer,
			None => synthesis::fallback_answer(state.context_entries.as_deref().unwrap_or(&[])),
		};
		let decision = match state.refinement.last_decision {
			Some(decision) if decision.is_terminal() => decision,
			Some(decision) => {
				state.errors.push(NodeError::new(
					NODE_FINALIZE,
					format!("Correction loop stopped with {} pending.", decision.as_str()),
				));

				CorrectionDecision::Fail
			},
			None if answer.degraded => CorrectionDecision::Fail,
			None => CorrectionDecision::Pass,
		};
		let sources = state.context_entries.take().unwrap_or_default();
		let cacheable = !state.cache_hit
			&& decision == CorrectionDecision::Pass
			&& !answer.degraded
			&& state.verdict.as_ref().is_some_and(|verdict| verdict.passed);

		if cacheable
			&& let (Some(query), Some(intent), Some(verdict)) =
				(state.effective_query(), state.intent.as_ref(), state.verdict.as_ref())
		{
			let cached = CachedAnswer {
				answer: answer.clone(),
				verdict: verdict.clone(),
				sources: sources.clone(),
			};

			if let Some(error) = self.store_answer(query, intent, &cached).await {
				state.errors.push(error);
			}
		}

		AnswerResponse {
			query_id: state.query_id,
			flagged: decision == CorrectionDecision::Fail || answer.degraded,
			answer: answer.text,
			citations: answer.citations,
			degraded: answer.degraded,
			decision,
			iterations: state.refinement.iteration,
			intent: state.intent,
			retrieval_path: state.retrieval_path,
			variants: state.variants,
			sources,
			verdict: state.verdict,
			errors: state.errors,
			timings: state.timings,
			cache_hit: state.cache_hit,
		}
	}
}

fn require<T>(value: Option<T>, node: &'static str, field: &'static str) -> Result<T> {
	value.ok_or(Error::Contract { node, field })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{intent::default_intent, state::Answer};

	fn state() -> AgentState {
		AgentState::new(
			AnswerRequest {
				query: "What notice must an employer give?".to_string(),
				context: Vec::new(),
				statute_hint: None,
			},
			60_000,
		)
	}

	#[test]
	fn intent_fans_out_by_category() {
		let mut state = state();

		state.intent = Some(default_intent());

		assert_eq!(next_node(Node::ClassifyIntent, &state, true), Node::CacheLookup);

		for (category, expected) in [
			(IntentCategory::Summarize, Node::Retrieve),
			(IntentCategory::Conversational, Node::Converse),
			(IntentCategory::Disambiguate, Node::Converse),
		] {
			if let Some(intent) = state.intent.as_mut() {
				intent.category = category;
			}

			assert_eq!(next_node(Node::ClassifyIntent, &state, true), expected);
		}
	}

	#[test]
	fn shortcut_results_skip_reranking() {
		let mut state = state();

		assert_eq!(next_node(Node::Retrieve, &state, true), Node::Rerank);

		state.reranked = Some(Vec::new());

		assert_eq!(next_node(Node::Retrieve, &state, true), Node::Bundle);
	}

	#[test]
	fn decisions_route_the_correction_loop() {
		let mut state = state();

		for (decision, expected) in [
			(CorrectionDecision::Refine, Node::Refine),
			(CorrectionDecision::RetrieveMore, Node::RetrieveMore),
			(CorrectionDecision::Pass, Node::Finalize),
			(CorrectionDecision::Fail, Node::Finalize),
		] {
			state.refinement.last_decision = Some(decision);

			assert_eq!(next_node(Node::Decide, &state, true), expected);
		}

		assert_eq!(next_node(Node::Refine, &state, true), Node::QualityGate);
		assert_eq!(next_node(Node::RetrieveMore, &state, true), Node::Rerank);
	}

	#[test]
	fn exhausted_deadline_leaves_the_loop() {
		let mut state = state();

		state.refinement.last_decision = Some(CorrectionDecision::Refine);
		state.refinement.iteration = 1;
		state.elapsed_ms = state.soft_deadline_ms;

		assert_eq!(next_node(Node::Decide, &state, true), Node::Finalize);
		assert_eq!(next_node(Node::Synthesize, &state, true), Node::Finalize);
	}

	#[test]
	fn disabled_quality_gate_finalizes_after_synthesis() {
		let mut state = state();

		state.answer =
			Some(Answer { text: "Notice.".to_string(), citations: Vec::new(), degraded: false });

		assert_eq!(next_node(Node::Synthesize, &state, true), Node::QualityGate);
		assert_eq!(next_node(Node::Synthesize, &state, false), Node::Finalize);
	}

	#[test]
	fn missing_input_is_a_contract_error() {
		let err = require::<&str>(None, "bundle", "reranked").unwrap_err();

		assert!(matches!(err, Error::Contract { node: "bundle", field: "reranked" }));
	}
}
