use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub intent: Intent,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub rerank: Rerank,
	#[serde(default)]
	pub bundle: Bundle,
	#[serde(default)]
	pub quality: Quality,
	#[serde(default)]
	pub correction: Correction,
	#[serde(default)]
	pub cache: Cache,
	#[serde(default)]
	pub state: StateLimits,
	#[serde(default)]
	pub timeouts: Timeouts,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: ProviderConfig,
	pub llm: LlmProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	/// Attempts per call when the model returns content that does not match the schema.
	#[serde(default = "default_llm_max_attempts")]
	pub max_attempts: u32,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Intent {
	pub classifier_enabled: bool,
	/// Rule matches below this confidence are handed to the semantic classifier.
	pub min_rule_confidence: f32,
}
impl Default for Intent {
	fn default() -> Self {
		Self { classifier_enabled: true, min_rule_confidence: 0.7 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub max_variants: u32,
	/// Per-branch top-K for every variant. Zero defers to the intent's initial retrieval k.
	pub variant_k: u32,
	pub rrf_k: f32,
	/// Dense similarity floor. Candidates seen only by the lexical branch are exempt.
	pub min_similarity: f32,
	pub max_per_doc: u32,
	pub top_k: u32,
	pub sparse_enabled: bool,
	pub inline_rerank: bool,
	pub shortcut: Shortcut,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			max_variants: 4,
			variant_k: 0,
			rrf_k: 60.0,
			min_similarity: 0.25,
			max_per_doc: 3,
			top_k: 20,
			sparse_enabled: true,
			inline_rerank: false,
			shortcut: Shortcut::default(),
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Shortcut {
	pub enabled: bool,
	pub max_results: u32,
	pub score: f32,
	pub alias_ttl_secs: u64,
}
impl Default for Shortcut {
	fn default() -> Self {
		Self { enabled: true, max_results: 6, score: 0.99, alias_ttl_secs: 3_600 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Rerank {
	pub enabled: bool,
}
impl Default for Rerank {
	fn default() -> Self {
		Self { enabled: true }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Bundle {
	pub token_budget: u32,
	pub max_entry_tokens: u32,
	pub chars_per_token: f32,
}
impl Default for Bundle {
	fn default() -> Self {
		Self { token_budget: 6_000, max_entry_tokens: 1_200, chars_per_token: 4.0 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Quality {
	pub enabled: bool,
	pub pass_threshold: f32,
	pub attribution_weight: f32,
	pub relevance_weight: f32,
	pub coherence_weight: f32,
	pub hierarchy_weight: f32,
}
impl Default for Quality {
	fn default() -> Self {
		Self {
			enabled: true,
			pass_threshold: 0.8,
			attribution_weight: 0.3,
			relevance_weight: 0.3,
			coherence_weight: 0.25,
			hierarchy_weight: 0.15,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Correction {
	pub max_iterations: u32,
	pub fixable_min: f32,
	pub fixable_max: f32,
	pub gap_top_k: u32,
}
impl Default for Correction {
	fn default() -> Self {
		Self { max_iterations: 2, fixable_min: 0.6, fixable_max: 0.8, gap_top_k: 10 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub enabled: bool,
	pub ttl_secs: u64,
	pub max_payload_bytes: Option<u64>,
}
impl Default for Cache {
	fn default() -> Self {
		Self { enabled: false, ttl_secs: 86_400, max_payload_bytes: Some(262_144) }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StateLimits {
	pub max_state_bytes: u64,
	pub max_text_chars: u32,
	pub soft_deadline_ms: u64,
}
impl Default for StateLimits {
	fn default() -> Self {
		Self { max_state_bytes: 512_000, max_text_chars: 16_000, soft_deadline_ms: 60_000 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Timeouts {
	pub classifier_ms: u64,
	pub embedding_ms: u64,
	pub branch_ms: u64,
	pub shortcut_ms: u64,
	pub rerank_ms: u64,
	pub document_fetch_ms: u64,
	pub synthesis_ms: u64,
	pub quality_check_ms: u64,
	pub critic_ms: u64,
	pub cache_ms: u64,
}
impl Default for Timeouts {
	fn default() -> Self {
		Self {
			classifier_ms: 3_000,
			embedding_ms: 5_000,
			branch_ms: 5_000,
			shortcut_ms: 2_000,
			rerank_ms: 5_000,
			document_fetch_ms: 3_000,
			synthesis_ms: 30_000,
			quality_check_ms: 10_000,
			critic_ms: 10_000,
			cache_ms: 500,
		}
	}
}

fn default_llm_max_attempts() -> u32 {
	3
}
