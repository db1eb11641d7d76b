use std::collections::{HashMap, HashSet};

use tracing::warn;

use juris_domain::tokens;

use crate::{
	JurisService, ParentDocument,
	state::{ContextEntry, NodeError, RetrievalCandidate, StateDelta},
};

const NODE: &str = "bundle";
const UNKNOWN_SOURCE_KIND: &str = "unknown";

impl JurisService {
	/// Expands ranked candidates to their parent documents and packs them under the token
	/// budget. A failed parent fetch falls back to chunk text.
	pub async fn bundle_context(&self, candidates: &[RetrievalCandidate]) -> StateDelta {
		let mut errors = Vec::new();
		let parents = self.fetch_parents(candidates, &mut errors).await;
		let entries = assemble_entries(candidates, &parents, &self.cfg.bundle);

		StateDelta { context_entries: Some(entries), errors, ..Default::default() }
	}

	async fn fetch_parents(
		&self,
		candidates: &[RetrievalCandidate],
		errors: &mut Vec<NodeError>,
	) -> HashMap<String, ParentDocument> {
		let mut seen = HashSet::new();
		let doc_ids: Vec<String> = candidates
			.iter()
			.filter(|candidate| seen.insert(candidate.doc_id.as_str()))
			.map(|candidate| candidate.doc_id.clone())
			.collect();

		if doc_ids.is_empty() {
			return HashMap::new();
		}

		match crate::bounded(
			"Parent document fetch",
			self.cfg.timeouts.document_fetch_ms,
			self.backends.documents.fetch_parents(&doc_ids),
		)
		.await
		{
			Ok(parents) => doc_ids
				.into_iter()
				.zip(parents)
				.filter_map(|(doc_id, parent)| parent.map(|parent| (doc_id, parent)))
				.collect(),
			Err(err) => {
				warn!(error = %err, node = NODE, "Parent fetch failed; bundling chunk text.");
				errors.push(NodeError::new(NODE, err.to_string()));

				HashMap::new()
			},
		}
	}
}

/// Packs one entry per parent document, in rank order, until the next entry would break the
/// budget. Each entry is capped at `max_entry_tokens` first.
pub fn assemble_entries(
	candidates: &[RetrievalCandidate],
	parents: &HashMap<String, ParentDocument>,
	cfg: &juris_config::Bundle,
) -> Vec<ContextEntry> {
	let mut entries = Vec::new();
	let mut seen_docs = HashSet::new();
	let mut used = 0_u32;

	for candidate in candidates {
		if !seen_docs.insert(candidate.doc_id.as_str()) {
			continue;
		}

		let (title, source_kind, citation, body) = match parents.get(&candidate.doc_id) {
			Some(parent) => (
				parent.title.clone(),
				parent.source_kind.clone(),
				parent.citation.clone(),
				parent_window(&parent.content, &candidate.text, cfg),
			),
			None => (
				candidate.title.clone().unwrap_or_else(|| candidate.doc_id.clone()),
				candidate
					.source_kind
					.clone()
					.unwrap_or_else(|| UNKNOWN_SOURCE_KIND.to_string()),
				None,
				candidate.text.as_str(),
			),
		};
		let text = tokens::truncate_to_tokens(body, cfg.max_entry_tokens, cfg.chars_per_token);

		if text.is_empty() {
			continue;
		}

		let cost = tokens::estimate_tokens(&text, cfg.chars_per_token);

		if used + cost > cfg.token_budget {
			break;
		}

		used += cost;

		entries.push(ContextEntry {
			doc_id: candidate.doc_id.clone(),
			chunk_id: candidate.chunk_id.clone(),
			title,
			section: candidate.section.clone(),
			source_kind,
			citation,
			text,
			tokens: cost,
		});
	}

	entries
}

/// The parent text from its start when the chunk fits inside the entry cap that way, otherwise
/// from the chunk onwards.
fn parent_window<'a>(content: &'a str, chunk: &str, cfg: &juris_config::Bundle) -> &'a str {
	let chunk = chunk.trim();
	let Some(start) = content.find(chunk).filter(|_| !chunk.is_empty()) else {
		return content;
	};
	let through_chunk = &content[..start + chunk.len()];

	if tokens::estimate_tokens(through_chunk, cfg.chars_per_token) <= cfg.max_entry_tokens {
		content
	} else {
		&content[start..]
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::CandidateSource;

	fn cfg(token_budget: u32, max_entry_tokens: u32) -> juris_config::Bundle {
		juris_config::Bundle { token_budget, max_entry_tokens, chars_per_token: 4.0 }
	}

	fn candidate(chunk_id: &str, doc_id: &str, text: &str) -> RetrievalCandidate {
		RetrievalCandidate {
			chunk_id: chunk_id.to_string(),
			doc_id: doc_id.to_string(),
			raw_score: 0.5,
			confidence: 0.5,
			fused_score: 0.01,
			similarity: Some(0.5),
			rerank_score: None,
			source: CandidateSource::Dense,
			title: Some(format!("Title {doc_id}")),
			section: None,
			source_kind: Some("statute".to_string()),
			text: text.to_string(),
		}
	}

	#[test]
	fn one_entry_per_parent_document() {
		let candidates = vec![
			candidate("a:0", "a", "first chunk"),
			candidate("a:1", "a", "second chunk"),
			candidate("b:0", "b", "other document"),
		];
		let entries = assemble_entries(&candidates, &HashMap::new(), &cfg(1_000, 100));
		let ids: Vec<&str> = entries.iter().map(|e| e.chunk_id.as_str()).collect();

		assert_eq!(ids, vec!["a:0", "b:0"]);
	}

	#[test]
	fn stops_before_budget_is_exceeded() {
		let text = "word ".repeat(40);
		let candidates: Vec<RetrievalCandidate> =
			(0..10).map(|idx| candidate(&format!("c{idx}"), &format!("d{idx}"), &text)).collect();
		let cfg = cfg(150, 60);
		let entries = assemble_entries(&candidates, &HashMap::new(), &cfg);
		let total: u32 = entries.iter().map(|e| e.tokens).sum();

		assert!(total <= cfg.token_budget);
		assert!(entries.iter().all(|e| e.tokens <= cfg.max_entry_tokens));
		assert!(entries.len() < candidates.len());
	}

	#[test]
	fn parent_content_replaces_chunk_text() {
		let candidates = vec![candidate("a:0", "a", "Section 12")];
		let mut parents = HashMap::new();

		parents.insert(
			"a".to_string(),
			ParentDocument {
				doc_id: "a".to_string(),
				title: "Labour Act".to_string(),
				source_kind: "statute".to_string(),
				citation: Some("Act 11 of 2007".to_string()),
				content: "Part II. Section 12 requires written notice.".to_string(),
			},
		);

		let entries = assemble_entries(&candidates, &parents, &cfg(1_000, 100));

		assert_eq!(entries[0].text, "Part II. Section 12 requires written notice.");
		assert_eq!(entries[0].title, "Labour Act");
		assert_eq!(entries[0].citation.as_deref(), Some("Act 11 of 2007"));
	}

	#[test]
	fn long_parent_is_windowed_at_the_chunk() {
		let content = format!("{} Section 12 requires notice.", "preamble ".repeat(200));
		let window = parent_window(&content, "Section 12 requires notice.", &cfg(1_000, 20));

		assert!(window.starts_with("Section 12"));
	}
}
