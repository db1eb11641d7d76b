use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
	JurisService,
	state::{
		Answer, ContextEntry, CorrectionDecision, CorrectionPhase, IntentResult, NodeError,
		QualityVerdict, StateDelta,
	},
};

const NODE: &str = "cache_lookup";
const CACHE_SCHEMA_VERSION: u32 = 1;

/// What a cache hit restores.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedAnswer {
	pub answer: Answer,
	pub verdict: QualityVerdict,
	pub sources: Vec<ContextEntry>,
}

#[derive(Serialize)]
struct CacheKeyPayload<'a> {
	kind: &'static str,
	schema_version: u32,
	query: &'a str,
	category: &'static str,
	initial_k: u32,
	rerank_k: u32,
	top_k: u32,
	model: &'a str,
}

/// blake3 over the normalized query, the retrieval parameters and the answering model.
pub fn cache_key(query: &str, intent: &IntentResult, top_k: u32, model: &str) -> String {
	let payload = CacheKeyPayload {
		kind: "answer",
		schema_version: CACHE_SCHEMA_VERSION,
		query,
		category: intent.category.as_str(),
		initial_k: intent.params.initial_k,
		rerank_k: intent.params.rerank_k,
		top_k,
		model,
	};
	let encoded = serde_json::to_vec(&payload).unwrap_or_else(|_| query.as_bytes().to_vec());

	blake3::hash(&encoded).to_hex().to_string()
}

impl JurisService {
	/// Read-through lookup. Misses, failures and undecodable payloads all continue as a cold
	/// start.
	pub async fn cache_lookup(&self, query: &str, intent: &IntentResult) -> StateDelta {
		let Some(store) = self.answer_cache() else {
			return StateDelta::default();
		};
		let key = self.answer_cache_key(query, intent);
		let value = match crate::bounded("Cache read", self.cfg.timeouts.cache_ms, store.get(&key))
			.await
		{
			Ok(Some(value)) => value,
			Ok(None) => {
				debug!(cache_key = %key, "Answer cache miss.");

				return StateDelta::default();
			},
			Err(err) => {
				warn!(error = %err, cache_key = %key, "Answer cache read failed.");

				return StateDelta::error(NODE, err.to_string());
			},
		};
		let cached: CachedAnswer = match serde_json::from_value(value) {
			Ok(cached) => cached,
			Err(err) => {
				warn!(error = %err, cache_key = %key, "Cached answer could not be decoded.");

				return StateDelta::error(NODE, err.to_string());
			},
		};

		debug!(cache_key = %key, "Answer cache hit.");

		StateDelta {
			answer: Some(cached.answer),
			verdict: Some(cached.verdict),
			context_entries: Some(cached.sources),
			decision: Some(CorrectionDecision::Pass),
			phase: Some(CorrectionPhase::Pass),
			cache_hit: Some(true),
			..Default::default()
		}
	}

	/// Write-once store of a passed answer. Failures are logged and returned as a note.
	pub(crate) async fn store_answer(
		&self,
		query: &str,
		intent: &IntentResult,
		cached: &CachedAnswer,
	) -> Option<NodeError> {
		let store = self.answer_cache()?;
		let key = self.answer_cache_key(query, intent);
		let value = match serde_json::to_value(cached) {
			Ok(value) => value,
			Err(err) => return Some(NodeError::new("finalize", err.to_string())),
		};
		let ttl = Duration::from_secs(self.cfg.cache.ttl_secs);
		let write = store.set(&key, &value, ttl);

		match crate::bounded("Cache write", self.cfg.timeouts.cache_ms, write).await {
			Ok(()) => None,
			Err(err) => {
				warn!(error = %err, cache_key = %key, "Answer cache write failed.");

				Some(NodeError::new("finalize", err.to_string()))
			},
		}
	}

	fn answer_cache(&self) -> Option<&dyn crate::CacheStore> {
		if !self.cfg.cache.enabled {
			return None;
		}

		self.backends.cache.as_deref()
	}

	fn answer_cache_key(&self, query: &str, intent: &IntentResult) -> String {
		cache_key(query, intent, self.cfg.retrieval.top_k, &self.cfg.providers.llm.model)
	}
}
