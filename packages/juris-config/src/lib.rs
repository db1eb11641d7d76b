mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Bundle, Cache, Config, Correction, EmbeddingProviderConfig, Intent, LlmProviderConfig,
	Postgres, ProviderConfig, Providers, Qdrant, Quality, Rerank, Retrieval, Service, Shortcut,
	StateLimits, Storage, Timeouts,
};

use std::{fs, path::Path};

/// Upper bound on self-correction cycles. `correction.max_iterations` may lower it, never raise it.
pub const MAX_CORRECTION_ITERATIONS: u32 = 2;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}
	if cfg.providers.llm.max_attempts == 0 {
		return Err(Error::Validation {
			message: "providers.llm.max_attempts must be greater than zero.".to_string(),
		});
	}

	for (label, key) in [
		("embedding", &cfg.providers.embedding.api_key),
		("rerank", &cfg.providers.rerank.api_key),
		("llm", &cfg.providers.llm.api_key),
	] {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	validate_unit_interval("intent.min_rule_confidence", cfg.intent.min_rule_confidence)?;
	validate_retrieval(cfg)?;

	if cfg.bundle.token_budget == 0 {
		return Err(Error::Validation {
			message: "bundle.token_budget must be greater than zero.".to_string(),
		});
	}
	if cfg.bundle.max_entry_tokens == 0 {
		return Err(Error::Validation {
			message: "bundle.max_entry_tokens must be greater than zero.".to_string(),
		});
	}
	if !cfg.bundle.chars_per_token.is_finite() || cfg.bundle.chars_per_token <= 0.0 {
		return Err(Error::Validation {
			message: "bundle.chars_per_token must be a finite number greater than zero."
				.to_string(),
		});
	}

	validate_quality(cfg)?;
	validate_correction(cfg)?;

	if cfg.cache.ttl_secs == 0 {
		return Err(Error::Validation {
			message: "cache.ttl_secs must be greater than zero.".to_string(),
		});
	}

	if let Some(max) = cfg.cache.max_payload_bytes
		&& max == 0
	{
		return Err(Error::Validation {
			message: "cache.max_payload_bytes must be greater than zero.".to_string(),
		});
	}

	if cfg.state.max_state_bytes < 4_096 {
		return Err(Error::Validation {
			message: "state.max_state_bytes must be at least 4096.".to_string(),
		});
	}
	if cfg.state.max_text_chars == 0 {
		return Err(Error::Validation {
			message: "state.max_text_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.state.soft_deadline_ms == 0 {
		return Err(Error::Validation {
			message: "state.soft_deadline_ms must be greater than zero.".to_string(),
		});
	}

	for (label, value) in [
		("timeouts.classifier_ms", cfg.timeouts.classifier_ms),
		("timeouts.embedding_ms", cfg.timeouts.embedding_ms),
		("timeouts.branch_ms", cfg.timeouts.branch_ms),
		("timeouts.shortcut_ms", cfg.timeouts.shortcut_ms),
		("timeouts.rerank_ms", cfg.timeouts.rerank_ms),
		("timeouts.document_fetch_ms", cfg.timeouts.document_fetch_ms),
		("timeouts.synthesis_ms", cfg.timeouts.synthesis_ms),
		("timeouts.quality_check_ms", cfg.timeouts.quality_check_ms),
		("timeouts.critic_ms", cfg.timeouts.critic_ms),
		("timeouts.cache_ms", cfg.timeouts.cache_ms),
	] {
		if value == 0 {
			let message = format!("{label} must be greater than zero.");

			return Err(Error::Validation { message });
		}
	}

	Ok(())
}

fn validate_retrieval(cfg: &Config) -> Result<()> {
	let retrieval = &cfg.retrieval;

	if retrieval.max_variants == 0 {
		return Err(Error::Validation {
			message: "retrieval.max_variants must be greater than zero.".to_string(),
		});
	}
	if !retrieval.rrf_k.is_finite() || retrieval.rrf_k <= 0.0 {
		return Err(Error::Validation {
			message: "retrieval.rrf_k must be a finite number greater than zero.".to_string(),
		});
	}
	if !retrieval.min_similarity.is_finite() || !(-1.0..=1.0).contains(&retrieval.min_similarity)
	{
		return Err(Error::Validation {
			message: "retrieval.min_similarity must be in the range -1.0-1.0.".to_string(),
		});
	}
	if retrieval.max_per_doc == 0 {
		return Err(Error::Validation {
			message: "retrieval.max_per_doc must be greater than zero.".to_string(),
		});
	}
	if retrieval.top_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_k must be greater than zero.".to_string(),
		});
	}
	if retrieval.shortcut.enabled {
		if retrieval.shortcut.max_results == 0 {
			return Err(Error::Validation {
				message: "retrieval.shortcut.max_results must be greater than zero.".to_string(),
			});
		}

		validate_unit_interval("retrieval.shortcut.score", retrieval.shortcut.score)?;

		if retrieval.shortcut.alias_ttl_secs == 0 {
			return Err(Error::Validation {
				message: "retrieval.shortcut.alias_ttl_secs must be greater than zero."
					.to_string(),
			});
		}
	}

	Ok(())
}

fn validate_quality(cfg: &Config) -> Result<()> {
	let quality = &cfg.quality;

	validate_unit_interval("quality.pass_threshold", quality.pass_threshold)?;

	let weights = [
		("quality.attribution_weight", quality.attribution_weight),
		("quality.relevance_weight", quality.relevance_weight),
		("quality.coherence_weight", quality.coherence_weight),
		("quality.hierarchy_weight", quality.hierarchy_weight),
	];

	for (label, weight) in weights {
		if !weight.is_finite() || weight < 0.0 {
			return Err(Error::Validation {
				message: format!("{label} must be a finite number zero or greater."),
			});
		}
	}

	if weights.iter().map(|(_, weight)| weight).sum::<f32>() <= 0.0 {
		return Err(Error::Validation {
			message: "quality weights must not all be zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_correction(cfg: &Config) -> Result<()> {
	let correction = &cfg.correction;

	if !(1..=MAX_CORRECTION_ITERATIONS).contains(&correction.max_iterations) {
		return Err(Error::Validation {
			message: format!(
				"correction.max_iterations must be in the range 1-{MAX_CORRECTION_ITERATIONS}."
			),
		});
	}

	validate_unit_interval("correction.fixable_min", correction.fixable_min)?;
	validate_unit_interval("correction.fixable_max", correction.fixable_max)?;

	if correction.fixable_min >= correction.fixable_max {
		return Err(Error::Validation {
			message: "correction.fixable_min must be less than correction.fixable_max.".to_string(),
		});
	}
	if correction.gap_top_k == 0 {
		return Err(Error::Validation {
			message: "correction.gap_top_k must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_unit_interval(label: &str, value: f32) -> Result<()> {
	if !value.is_finite() || !(0.0..=1.0).contains(&value) {
		return Err(Error::Validation { message: format!("{label} must be in the range 0.0-1.0.") });
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.service.log_level = cfg.service.log_level.trim().to_string();

	for base in [
		&mut cfg.providers.embedding.api_base,
		&mut cfg.providers.rerank.api_base,
		&mut cfg.providers.llm.api_base,
	] {
		while base.ends_with('/') {
			base.pop();
		}
	}
}
