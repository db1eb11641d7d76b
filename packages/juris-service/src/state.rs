use serde::{Deserialize, Serialize};
use uuid::Uuid;

use juris_config::{MAX_CORRECTION_ITERATIONS, StateLimits};
use juris_domain::{
	intent::{ComplexityTier, IntentCategory, RetrievalParams},
	tokens,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
	/// `user` or `assistant`.
	pub role: String,
	pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatuteHint {
	pub statute: String,
	pub section: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnswerRequest {
	pub query: String,
	#[serde(default)]
	pub context: Vec<ConversationTurn>,
	#[serde(default)]
	pub statute_hint: Option<StatuteHint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
	Rule,
	Classifier,
	Fallback,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
	pub category: IntentCategory,
	pub complexity: ComplexityTier,
	pub confidence: f32,
	pub params: RetrievalParams,
	pub source: IntentSource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
	Dense,
	Sparse,
	Shortcut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
	Shortcut,
	Fusion,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
	pub chunk_id: String,
	pub doc_id: String,
	/// Dense similarity when a dense branch saw the chunk, otherwise the best lexical score.
	pub raw_score: f32,
	/// Raw score mapped into 0..=1 for the list it came from.
	pub confidence: f32,
	pub fused_score: f32,
	/// Best dense similarity across variants. `None` for lexical-only and shortcut hits.
	pub similarity: Option<f32>,
	pub rerank_score: Option<f32>,
	pub source: CandidateSource,
	pub title: Option<String>,
	pub section: Option<String>,
	pub source_kind: Option<String>,
	pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
	pub doc_id: String,
	pub chunk_id: String,
	pub title: String,
	pub section: Option<String>,
	pub source_kind: String,
	pub citation: Option<String>,
	pub text: String,
	pub tokens: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
	/// 1-based position of the cited entry in the bundled context.
	pub marker: u32,
	pub doc_id: String,
	pub title: String,
	pub source_kind: String,
	pub quote: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Answer {
	pub text: String,
	pub citations: Vec<Citation>,
	/// Set when generation failed and the text was assembled from sources or a notice.
	pub degraded: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
	Attribution,
	Relevance,
	Coherence,
	Hierarchy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
	Ok,
	/// The judge failed or timed out and a deterministic estimate was used.
	Fallback,
	/// The judge answered with output that did not match its schema.
	SchemaInvalid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
	pub kind: CheckKind,
	pub score: f32,
	pub status: CheckStatus,
	pub issues: Vec<String>,
	pub recommendations: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
	pub passed: bool,
	pub confidence: f32,
	pub issues: Vec<String>,
	pub recommendations: Vec<String>,
	pub checks: Vec<CheckOutcome>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionDecision {
	Pass,
	Refine,
	RetrieveMore,
	Fail,
}
impl CorrectionDecision {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pass => "PASS",
			Self::Refine => "REFINE",
			Self::RetrieveMore => "RETRIEVE_MORE",
			Self::Fail => "FAIL",
		}
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Pass | Self::Fail)
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionPhase {
	#[default]
	Initial,
	Synthesized,
	QualityChecked,
	Pass,
	Refine,
	RetrieveMore,
	Fail,
}
impl From<CorrectionDecision> for CorrectionPhase {
	fn from(decision: CorrectionDecision) -> Self {
		match decision {
			CorrectionDecision::Pass => Self::Pass,
			CorrectionDecision::Refine => Self::Refine,
			CorrectionDecision::RetrieveMore => Self::RetrieveMore,
			CorrectionDecision::Fail => Self::Fail,
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Refinement {
	pub iteration: u32,
	pub instructions: Option<String>,
	pub priority_fixes: Vec<String>,
	pub suggested_additions: Vec<String>,
	pub phase: CorrectionPhase,
	pub last_decision: Option<CorrectionDecision>,
}

/// A non-fatal failure recorded by the node that absorbed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
	pub node: String,
	pub message: String,
}
impl NodeError {
	pub fn new(node: &str, message: impl Into<String>) -> Self {
		Self { node: node.to_string(), message: message.into() }
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTiming {
	pub node: String,
	pub elapsed_ms: u64,
}

/// Everything one query accumulates on its way through the graph. Owned by that query's
/// execution only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentState {
	pub query_id: Uuid,
	pub raw_query: String,
	pub normalized_query: Option<String>,
	pub rewritten_query: Option<String>,
	pub context: Vec<ConversationTurn>,
	pub statute_hint: Option<StatuteHint>,
	pub intent: Option<IntentResult>,
	pub retrieval_path: Option<RetrievalPath>,
	pub variants: Vec<String>,
	pub candidates: Option<Vec<RetrievalCandidate>>,
	pub reranked: Option<Vec<RetrievalCandidate>>,
	pub context_entries: Option<Vec<ContextEntry>>,
	pub answer: Option<Answer>,
	pub verdict: Option<QualityVerdict>,
	pub refinement: Refinement,
	pub cache_hit: bool,
	pub errors: Vec<NodeError>,
	pub timings: Vec<NodeTiming>,
	pub soft_deadline_ms: u64,
	pub elapsed_ms: u64,
}
impl AgentState {
	pub fn new(request: AnswerRequest, soft_deadline_ms: u64) -> Self {
		Self {
			query_id: Uuid::new_v4(),
			raw_query: request.query,
			normalized_query: None,
			rewritten_query: None,
			context: request.context,
			statute_hint: request.statute_hint,
			intent: None,
			retrieval_path: None,
			variants: Vec::new(),
			candidates: None,
			reranked: None,
			context_entries: None,
			answer: None,
			verdict: None,
			refinement: Refinement::default(),
			cache_hit: false,
			errors: Vec::new(),
			timings: Vec::new(),
			soft_deadline_ms,
			elapsed_ms: 0,
		}
	}

	/// The query retrieval and synthesis work from: the rewritten follow-up when there is one.
	pub fn effective_query(&self) -> Option<&str> {
		self.rewritten_query.as_deref().or(self.normalized_query.as_deref())
	}

	pub fn deadline_exhausted(&self) -> bool {
		self.elapsed_ms >= self.soft_deadline_ms
	}

	/// Folds a node's delta into the state. Present keys overwrite, errors and timings append,
	/// and the refinement iteration never moves backwards or past the hard cap.
	pub fn apply(&mut self, delta: StateDelta, limits: &StateLimits) {
		let StateDelta {
			normalized_query,
			rewritten_query,
			intent,
			retrieval_path,
			variants,
			candidates,
			reranked,
			context_entries,
			answer,
			verdict,
			iteration,
			instructions,
			priority_fixes,
			suggested_additions,
			phase,
			decision,
			cache_hit,
			errors,
			timings,
		} = delta;

		if let Some(value) = normalized_query {
			self.normalized_query = Some(value);
		}
		if let Some(value) = rewritten_query {
			self.rewritten_query = Some(value);
		}
		if let Some(value) = intent {
			self.intent = Some(value);
		}
		if let Some(value) = retrieval_path {
			self.retrieval_path = Some(value);
		}
		if let Some(value) = variants {
			self.variants = value;
		}
		if let Some(value) = candidates {
			self.candidates = Some(value);
		}
		if let Some(value) = reranked {
			self.reranked = Some(value);
		}
		if let Some(value) = context_entries {
			self.context_entries = Some(value);
		}
		if let Some(value) = answer {
			self.answer = Some(value);
		}
		if let Some(value) = verdict {
			self.verdict = Some(value);
		}
		if let Some(value) = iteration {
			self.refinement.iteration =
				self.refinement.iteration.max(value).min(MAX_CORRECTION_ITERATIONS);
		}
		if let Some(value) = instructions {
			self.refinement.instructions = Some(value);
		}
		if let Some(value) = priority_fixes {
			self.refinement.priority_fixes = value;
		}
		if let Some(value) = suggested_additions {
			self.refinement.suggested_additions = value;
		}
		if let Some(value) = phase {
			self.refinement.phase = value;
		}
		if let Some(value) = decision {
			self.refinement.last_decision = Some(value);
		}
		if let Some(value) = cache_hit {
			self.cache_hit = value;
		}

		self.errors.extend(errors);
		self.timings.extend(timings);
		self.enforce_size_bound(limits);
	}

	/// Truncates long text fields, then sheds the lowest-ranked candidates until the encoded
	/// state fits `max_state_bytes`.
	pub fn enforce_size_bound(&mut self, limits: &StateLimits) {
		let max_chars = limits.max_text_chars as usize;

		self.truncate_text_fields(max_chars);

		let max_bytes = limits.max_state_bytes as usize;

		while self.encoded_len() > max_bytes {
			if !self.shed_one() {
				break;
			}
		}
	}

	pub fn encoded_len(&self) -> usize {
		serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
	}

	fn truncate_text_fields(&mut self, max_chars: usize) {
		let cap = |text: &mut String| {
			if text.chars().count() > max_chars {
				*text = tokens::truncate_chars(text, max_chars);
			}
		};

		cap(&mut self.raw_query);

		if let Some(answer) = self.answer.as_mut() {
			cap(&mut answer.text);
		}
		if let Some(instructions) = self.refinement.instructions.as_mut() {
			cap(instructions);
		}

		for candidate in self.candidates.iter_mut().chain(self.reranked.iter_mut()).flatten() {
			cap(&mut candidate.text);
		}
		for entry in self.context_entries.iter_mut().flatten() {
			cap(&mut entry.text);
		}
	}

	fn shed_one(&mut self) -> bool {
		if let Some(candidates) = self.candidates.as_mut()
			&& candidates.pop().is_some()
		{
			return true;
		}
		if let Some(reranked) = self.reranked.as_mut()
			&& reranked.len() > 1
		{
			reranked.pop();

			return true;
		}
		if self.variants.len() > 1 {
			self.variants.pop();

			return true;
		}
		if let Some(entries) = self.context_entries.as_mut()
			&& entries.len() > 1
		{
			entries.pop();

			return true;
		}

		false
	}
}

/// The keys one node computed. Absent keys leave the running state untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
	pub normalized_query: Option<String>,
	pub rewritten_query: Option<String>,
	pub intent: Option<IntentResult>,
	pub retrieval_path: Option<RetrievalPath>,
	pub variants: Option<Vec<String>>,
	pub candidates: Option<Vec<RetrievalCandidate>>,
	pub reranked: Option<Vec<RetrievalCandidate>>,
	pub context_entries: Option<Vec<ContextEntry>>,
	pub answer: Option<Answer>,
	pub verdict: Option<QualityVerdict>,
	pub iteration: Option<u32>,
	pub instructions: Option<String>,
	pub priority_fixes: Option<Vec<String>>,
	pub suggested_additions: Option<Vec<String>>,
	pub phase: Option<CorrectionPhase>,
	pub decision: Option<CorrectionDecision>,
	pub cache_hit: Option<bool>,
	pub errors: Vec<NodeError>,
	pub timings: Vec<NodeTiming>,
}
impl StateDelta {
	pub fn error(node: &str, message: impl Into<String>) -> Self {
		Self { errors: vec![NodeError::new(node, message)], ..Default::default() }
	}
}
