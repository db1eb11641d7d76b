use std::sync::Arc;

use futures::future;
use tracing::{debug, warn};

use juris_domain::{
	reformulate,
	statute::{self, StatuteAlias},
};

use crate::{
	JurisService, Result, SearchFilter, SearchHit,
	fusion::{self, FusionParams, RankedList},
	state::{
		CandidateSource, IntentResult, NodeError, RetrievalCandidate, RetrievalPath, StateDelta,
		StatuteHint,
	},
};

const NODE: &str = "retrieve";

/// Where a shortcut lookup points: the resolved statute and the section label to fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortcutTarget<'a> {
	pub alias: &'a StatuteAlias,
	pub section: String,
}

/// Per-query knobs for one fused search.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SearchPlan<'a> {
	pub(crate) branch_k: u32,
	pub(crate) top_k: u32,
	pub(crate) filter: Option<&'a SearchFilter>,
}

type BranchResults = (Result<Vec<SearchHit>>, Option<Result<Vec<SearchHit>>>);

impl JurisService {
	/// Shortcut lookup when the query names a statute and a section, otherwise multi-variant
	/// dense + lexical search fused with RRF.
	pub async fn retrieve(
		&self,
		query: &str,
		intent: &IntentResult,
		hint: Option<&StatuteHint>,
	) -> StateDelta {
		let mut errors = Vec::new();
		let aliases = self.load_aliases(&mut errors).await;

		if self.cfg.retrieval.shortcut.enabled
			&& let Some(target) = shortcut_target(query, hint, &aliases)
			&& let Some(candidates) = self.shortcut(&target, &mut errors).await
		{
			debug!(
				statute_id = %target.alias.statute_id,
				section = %target.section,
				count = candidates.len(),
				"Shortcut lookup answered the query."
			);

			return StateDelta {
				retrieval_path: Some(RetrievalPath::Shortcut),
				variants: Some(vec![query.to_string()]),
				reranked: Some(candidates.clone()),
				candidates: Some(candidates),
				errors,
				..Default::default()
			};
		}

		let variants = reformulate::reformulate(
			query,
			&aliases,
			self.cfg.retrieval.max_variants.max(1) as usize,
		);
		let branch_k = match self.cfg.retrieval.variant_k {
			0 => intent.params.initial_k,
			k => k,
		};
		let plan = SearchPlan { branch_k, top_k: self.cfg.retrieval.top_k, filter: None };
		let candidates = self.search_fused(&variants, plan, &mut errors).await;
		let reranked = if self.cfg.retrieval.inline_rerank {
			Some(
				self.rerank_candidates(
					query,
					candidates.clone(),
					candidates.len(),
					&mut errors,
				)
				.await,
			)
		} else {
			None
		};

		StateDelta {
			retrieval_path: Some(RetrievalPath::Fusion),
			variants: Some(variants),
			candidates: Some(candidates),
			reranked,
			errors,
			..Default::default()
		}
	}

	pub(crate) async fn load_aliases(
		&self,
		errors: &mut Vec<NodeError>,
	) -> Arc<Vec<StatuteAlias>> {
		let timeout_ms = self.cfg.timeouts.shortcut_ms;

		match self.aliases.aliases(self.backends.statutes.as_ref(), timeout_ms).await {
			Ok(aliases) => aliases,
			Err(err) => {
				warn!(error = %err, "Statute aliases unavailable; continuing without them.");
				errors.push(NodeError::new(NODE, err.to_string()));

				Arc::new(Vec::new())
			},
		}
	}

	/// Embeds every variant in one batch, runs the branches of all variants concurrently, and
	/// fuses whatever came back. Embedding failure yields an empty list.
	pub(crate) async fn search_fused(
		&self,
		variants: &[String],
		plan: SearchPlan<'_>,
		errors: &mut Vec<NodeError>,
	) -> Vec<RetrievalCandidate> {
		if variants.is_empty() {
			return Vec::new();
		}

		let vectors = match crate::bounded(
			"Query embedding",
			self.cfg.timeouts.embedding_ms,
			self.providers.embedding.embed(&self.cfg.providers.embedding, variants),
		)
		.await
		{
			Ok(vectors) if vectors.len() == variants.len() => vectors,
			Ok(vectors) => {
				let message = format!(
					"Embedding returned {} vectors for {} variants.",
					vectors.len(),
					variants.len()
				);

				warn!(node = NODE, "{message}");
				errors.push(NodeError::new(NODE, message));

				return Vec::new();
			},
			Err(err) => {
				warn!(error = %err, node = NODE, "Query embedding failed; retrieval is empty.");
				errors.push(NodeError::new(NODE, err.to_string()));

				return Vec::new();
			},
		};
		let branches = variants
			.iter()
			.zip(vectors.iter())
			.map(|(variant, vector)| self.search_variant(variant, vector, plan));
		let results = future::join_all(branches).await;
		let mut lists = Vec::with_capacity(results.len() * 2);

		for (variant, (dense, sparse)) in variants.iter().zip(results) {
			match dense {
				Ok(hits) => lists.push(RankedList { source: CandidateSource::Dense, hits }),
				Err(err) => {
					warn!(error = %err, variant = %variant, "Dense branch failed.");
					errors.push(NodeError::new(NODE, format!("Dense branch failed: {err}")));
				},
			}

			match sparse {
				Some(Ok(mut hits)) => {
					if let Some(filter) = plan.filter {
						hits.retain(|hit| filter.matches(hit));
					}

					lists.push(RankedList { source: CandidateSource::Sparse, hits });
				},
				Some(Err(err)) => {
					warn!(error = %err, variant = %variant, "Lexical branch failed.");
					errors.push(NodeError::new(NODE, format!("Lexical branch failed: {err}")));
				},
				None => {},
			}
		}

		fusion::fuse(&lists, &FusionParams::from_config(&self.cfg.retrieval, plan.top_k))
	}

	async fn search_variant(
		&self,
		variant: &str,
		vector: &[f32],
		plan: SearchPlan<'_>,
	) -> BranchResults {
		let branch_ms = self.cfg.timeouts.branch_ms;
		let dense = crate::bounded(
			"Dense search",
			branch_ms,
			self.backends.vector.search(vector, plan.branch_k, plan.filter),
		);

		if !self.cfg.retrieval.sparse_enabled {
			return (dense.await, None);
		}

		let sparse = crate::bounded(
			"Lexical search",
			branch_ms,
			self.backends.lexical.search(variant, plan.branch_k),
		);
		let (dense, sparse) = tokio::join!(dense, sparse);

		(dense, Some(sparse))
	}

	/// Direct section lookup. `None` when the lookup failed or found nothing, so the caller
	/// falls through to fusion.
	async fn shortcut(
		&self,
		target: &ShortcutTarget<'_>,
		errors: &mut Vec<NodeError>,
	) -> Option<Vec<RetrievalCandidate>> {
		let shortcut = &self.cfg.retrieval.shortcut;
		let statute_id = target.alias.statute_id.as_str();
		let mut hits = self.find_sections(statute_id, &target.section, errors).await?;
		let root = statute::section_root(&target.section);

		if hits.is_empty() && root != target.section {
			hits = self.find_sections(statute_id, root, errors).await?;
		}
		if hits.is_empty() {
			return None;
		}

		hits.truncate(shortcut.max_results as usize);

		Some(hits.into_iter().map(|hit| shortcut_candidate(hit, shortcut.score)).collect())
	}

	async fn find_sections(
		&self,
		statute_id: &str,
		section: &str,
		errors: &mut Vec<NodeError>,
	) -> Option<Vec<SearchHit>> {
		match crate::bounded(
			"Section lookup",
			self.cfg.timeouts.shortcut_ms,
			self.backends.statutes.find_sections(
				statute_id,
				section,
				self.cfg.retrieval.shortcut.max_results,
			),
		)
		.await
		{
			Ok(hits) => Some(hits),
			Err(err) => {
				warn!(error = %err, statute_id, section, "Section lookup failed; using fusion.");
				errors.push(NodeError::new(NODE, err.to_string()));

				None
			},
		}
	}
}

/// Resolves the statute and section a query (or explicit hint) points at. Both must be known
/// for the shortcut to apply.
pub fn shortcut_target<'a>(
	query: &str,
	hint: Option<&StatuteHint>,
	aliases: &'a [StatuteAlias],
) -> Option<ShortcutTarget<'a>> {
	if let Some(hint) = hint {
		let wanted = hint.statute.trim();
		let alias = aliases
			.iter()
			.find(|alias| alias.statute_id.eq_ignore_ascii_case(wanted))
			.or_else(|| statute::resolve_alias(wanted, aliases));
		let section = hint
			.section
			.as_deref()
			.map(str::trim)
			.filter(|section| !section.is_empty())
			.map(str::to_lowercase)
			.or_else(|| statute::detect_section(query));

		if let (Some(alias), Some(section)) = (alias, section) {
			return Some(ShortcutTarget { alias, section });
		}
	}

	let reference = statute::detect_reference(query)?;
	let alias = statute::resolve_alias(&reference.statute, aliases)?;

	Some(ShortcutTarget { alias, section: reference.section })
}

fn shortcut_candidate(hit: SearchHit, score: f32) -> RetrievalCandidate {
	RetrievalCandidate {
		chunk_id: hit.chunk_id,
		doc_id: hit.doc_id,
		raw_score: score,
		confidence: score,
		fused_score: score,
		similarity: None,
		rerank_score: None,
		source: CandidateSource::Shortcut,
		title: hit.title,
		section: hit.section,
		source_kind: hit.source_kind,
		text: hit.text,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn aliases() -> Vec<StatuteAlias> {
		vec![
			StatuteAlias {
				statute_id: "labour-act-2007".to_string(),
				alias: "labour act".to_string(),
				title: "Labour Act".to_string(),
				chapter: Some("5".to_string()),
			},
			StatuteAlias {
				statute_id: "rent-control-act-1997".to_string(),
				alias: "rent act".to_string(),
				title: "Rent Control Act".to_string(),
				chapter: None,
			},
		]
	}

	#[test]
	fn query_with_statute_and_section_targets_shortcut() {
		let aliases = aliases();
		let target = shortcut_target("section 12 of the Labour Act", None, &aliases)
			.expect("Expected a shortcut target.");

		assert_eq!(target.alias.statute_id, "labour-act-2007");
		assert_eq!(target.section, "12");
	}

	#[test]
	fn unknown_statute_has_no_target() {
		let aliases = aliases();

		assert!(shortcut_target("section 4 of the Mining Act", None, &aliases).is_none());
		assert!(shortcut_target("notice periods under the labour act", None, &aliases).is_none());
	}

	#[test]
	fn hint_supplies_statute_for_bare_section() {
		let aliases = aliases();
		let hint = StatuteHint { statute: "rent-control-act-1997".to_string(), section: None };
		let target = shortcut_target("what does section 4(2) say?", Some(&hint), &aliases)
			.expect("Expected a shortcut target.");

		assert_eq!(target.alias.statute_id, "rent-control-act-1997");
		assert_eq!(target.section, "4(2)");
	}
}
