use std::{
	cmp::Ordering,
	collections::{HashMap, hash_map::Entry},
};

use crate::{
	SearchHit,
	state::{CandidateSource, RetrievalCandidate},
};

/// One ranked list from one branch of one query variant. Position 0 is rank 1.
#[derive(Clone, Debug)]
pub struct RankedList {
	pub source: CandidateSource,
	pub hits: Vec<SearchHit>,
}

#[derive(Clone, Copy, Debug)]
pub struct FusionParams {
	pub rrf_k: f32,
	pub min_similarity: f32,
	pub max_per_doc: u32,
	pub top_k: u32,
}
impl FusionParams {
	pub fn from_config(cfg: &juris_config::Retrieval, top_k: u32) -> Self {
		Self {
			rrf_k: cfg.rrf_k,
			min_similarity: cfg.min_similarity,
			max_per_doc: cfg.max_per_doc,
			top_k,
		}
	}
}

struct Accumulated {
	candidate: RetrievalCandidate,
	best_lexical: Option<f32>,
}

/// Reciprocal Rank Fusion over every list, followed by the dense similarity gate, the
/// per-document cap and the `top_k` cut.
///
/// The output order is a pure function of the input lists: fused score descending, then
/// normalized confidence descending, then chunk id ascending.
pub fn fuse(lists: &[RankedList], params: &FusionParams) -> Vec<RetrievalCandidate> {
	let mut merged: HashMap<String, Accumulated> = HashMap::new();

	for list in lists {
		let max_score = list.hits.iter().map(|hit| hit.score).fold(0.0_f32, f32::max);

		for (idx, hit) in list.hits.iter().enumerate() {
			let contribution = rrf_contribution(params.rrf_k, idx);
			let confidence = normalized_confidence(list.source, hit.score, max_score);

			match merged.entry(hit.chunk_id.clone()) {
				Entry::Occupied(mut slot) => {
					let acc = slot.get_mut();

					acc.candidate.fused_score += contribution;
					acc.candidate.confidence = acc.candidate.confidence.max(confidence);

					absorb_score(acc, list.source, hit.score);
					fill_metadata(&mut acc.candidate, hit);
				},
				Entry::Vacant(slot) => {
					let mut acc = Accumulated {
						candidate: RetrievalCandidate {
							chunk_id: hit.chunk_id.clone(),
							doc_id: hit.doc_id.clone(),
							raw_score: hit.score,
							confidence,
							fused_score: contribution,
							similarity: None,
							rerank_score: None,
							source: list.source,
							title: hit.title.clone(),
							section: hit.section.clone(),
							source_kind: hit.source_kind.clone(),
							text: hit.text.clone(),
						},
						best_lexical: None,
					};

					absorb_score(&mut acc, list.source, hit.score);
					slot.insert(acc);
				},
			}
		}
	}

	let mut candidates: Vec<RetrievalCandidate> = merged
		.into_values()
		.map(|acc| {
			let mut candidate = acc.candidate;

			candidate.raw_score = candidate.similarity.or(acc.best_lexical).unwrap_or(0.0);

			candidate
		})
		.collect();

	candidates.sort_by(compare_fused);
	candidates.retain(|candidate| {
		candidate.similarity.is_none_or(|similarity| similarity >= params.min_similarity)
	});

	let mut capped = cap_per_document(candidates, params.max_per_doc);

	capped.truncate(params.top_k as usize);

	capped
}

/// Fuses already ranked candidate lists by position alone. A later list competes with earlier
/// ones instead of trailing them; a chunk present in several lists keeps the copy from the first
/// list and sums its contributions. The per-document cap and `top_k` cut apply afterwards.
pub fn fuse_ranked(
	lists: &[&[RetrievalCandidate]],
	params: &FusionParams,
) -> Vec<RetrievalCandidate> {
	let mut merged: HashMap<String, RetrievalCandidate> = HashMap::new();

	for list in lists {
		for (idx, candidate) in list.iter().enumerate() {
			let contribution = rrf_contribution(params.rrf_k, idx);

			match merged.entry(candidate.chunk_id.clone()) {
				Entry::Occupied(mut slot) => slot.get_mut().fused_score += contribution,
				Entry::Vacant(slot) => {
					let mut candidate = candidate.clone();

					candidate.fused_score = contribution;
					slot.insert(candidate);
				},
			}
		}
	}

	let mut candidates: Vec<RetrievalCandidate> = merged.into_values().collect();

	candidates.sort_by(compare_fused);

	let mut capped = cap_per_document(candidates, params.max_per_doc);

	capped.truncate(params.top_k as usize);

	capped
}

/// Keeps at most `max_per_doc` candidates per parent document, preserving order.
pub fn cap_per_document(
	candidates: Vec<RetrievalCandidate>,
	max_per_doc: u32,
) -> Vec<RetrievalCandidate> {
	let mut per_doc: HashMap<String, u32> = HashMap::new();

	candidates
		.into_iter()
		.filter(|candidate| {
			let seen = per_doc.entry(candidate.doc_id.clone()).or_insert(0);

			if *seen >= max_per_doc {
				return false;
			}

			*seen += 1;

			true
		})
		.collect()
}

pub(crate) fn compare_fused(a: &RetrievalCandidate, b: &RetrievalCandidate) -> Ordering {
	b.fused_score
		.total_cmp(&a.fused_score)
		.then_with(|| b.confidence.total_cmp(&a.confidence))
		.then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

fn rrf_contribution(rrf_k: f32, idx: usize) -> f32 {
	1.0 / (rrf_k + (idx + 1) as f32)
}

fn absorb_score(acc: &mut Accumulated, source: CandidateSource, score: f32) {
	match source {
		CandidateSource::Dense => {
			acc.candidate.similarity =
				Some(acc.candidate.similarity.map_or(score, |current| current.max(score)));
			acc.candidate.source = CandidateSource::Dense;
		},
		CandidateSource::Sparse | CandidateSource::Shortcut => {
			acc.best_lexical = Some(acc.best_lexical.map_or(score, |current| current.max(score)));
		},
	}
}

fn fill_metadata(candidate: &mut RetrievalCandidate, hit: &SearchHit) {
	if candidate.title.is_none() {
		candidate.title = hit.title.clone();
	}
	if candidate.section.is_none() {
		candidate.section = hit.section.clone();
	}
	if candidate.source_kind.is_none() {
		candidate.source_kind = hit.source_kind.clone();
	}
	if candidate.text.is_empty() {
		candidate.text = hit.text.clone();
	}
}

fn normalized_confidence(source: CandidateSource, score: f32, max_score: f32) -> f32 {
	let value = match source {
		CandidateSource::Dense | CandidateSource::Shortcut => score,
		CandidateSource::Sparse if max_score > 0.0 => score / max_score,
		CandidateSource::Sparse => 0.0,
	};

	value.clamp(0.0, 1.0)
}
