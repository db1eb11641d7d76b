use tracing::{debug, warn};

use crate::{
	JurisService,
	state::{NodeError, RetrievalCandidate, StateDelta},
};

const NODE: &str = "rerank";

impl JurisService {
	/// Reorders the fused candidates by provider relevance and keeps the intent's rerank-k.
	/// When `skip_provider` is set (deadline exhausted) the fused order is kept.
	pub async fn rerank(
		&self,
		query: &str,
		candidates: &[RetrievalCandidate],
		rerank_k: u32,
		skip_provider: bool,
	) -> StateDelta {
		let mut errors = Vec::new();
		let keep = rerank_k as usize;
		let reranked = if skip_provider {
			debug!(node = NODE, "Soft deadline reached; keeping fused order.");

			candidates.iter().take(keep).cloned().collect()
		} else {
			self.rerank_candidates(query, candidates.to_vec(), keep, &mut errors).await
		};

		StateDelta { reranked: Some(reranked), errors, ..Default::default() }
	}

	/// Stable reorder by rerank score. Disabled, failed or timed-out reranking keeps the input
	/// order; either way the result holds at most `keep` candidates.
	pub(crate) async fn rerank_candidates(
		&self,
		query: &str,
		mut candidates: Vec<RetrievalCandidate>,
		keep: usize,
		errors: &mut Vec<NodeError>,
	) -> Vec<RetrievalCandidate> {
		if !self.cfg.rerank.enabled || candidates.len() <= 1 {
			candidates.truncate(keep);

			return candidates;
		}

		let docs: Vec<String> = candidates.iter().map(|candidate| candidate.text.clone()).collect();

		match crate::bounded(
			"Rerank",
			self.cfg.timeouts.rerank_ms,
			self.providers.rerank.rerank(&self.cfg.providers.rerank, query, &docs),
		)
		.await
		{
			Ok(scores) if scores.len() == candidates.len() => {
				apply_rerank_scores(&mut candidates, &scores);
			},
			Ok(scores) => {
				let message = format!(
					"Rerank returned {} scores for {} candidates; keeping fused order.",
					scores.len(),
					candidates.len()
				);

				warn!(node = NODE, "{message}");
				errors.push(NodeError::new(NODE, message));
			},
			Err(err) => {
				warn!(error = %err, node = NODE, "Rerank failed; keeping fused order.");
				errors.push(NodeError::new(NODE, err.to_string()));
			},
		}

		candidates.truncate(keep);

		candidates
	}
}

/// Attaches scores and sorts descending. The sort is stable, so equal scores keep fused order.
pub fn apply_rerank_scores(candidates: &mut [RetrievalCandidate], scores: &[f32]) {
	for (candidate, score) in candidates.iter_mut().zip(scores) {
		candidate.rerank_score = Some(*score);
	}

	candidates.sort_by(|a, b| {
		let a = a.rerank_score.unwrap_or(f32::NEG_INFINITY);
		let b = b.rerank_score.unwrap_or(f32::NEG_INFINITY);

		b.total_cmp(&a)
	});
}
