use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use juris_config::{Config, Error};

const SAMPLE_CONFIG_TOML: &str = include_str!("fixtures/sample_config.toml");

fn sample_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value = toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.");
	let mut table = root.as_table_mut().expect("Sample config must be a table.");

	for part in section.split('.') {
		table = table
			.entry(part.to_string())
			.or_insert(Value::Table(toml::Table::new()))
			.as_table_mut()
			.expect("Config section must be a table.");
	}

	table.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render sample config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("juris_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_payload(payload: String) -> juris_config::Result<Config> {
	let path = write_temp_config(payload);
	let result = juris_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

fn expect_validation(payload: String, needle: &str) {
	let err = load_payload(payload).expect_err("Expected validation error.");
	let message = err.to_string();

	assert!(matches!(err, Error::Validation { .. }), "Unexpected error kind: {err:?}");
	assert!(message.contains(needle), "Unexpected error message: {message}");
}

#[test]
fn sample_config_loads_and_normalizes_api_base() {
	let cfg = load_payload(SAMPLE_CONFIG_TOML.to_string()).expect("Sample config must load.");

	assert_eq!(cfg.providers.llm.api_base, "https://api.example.com/v1");
	assert_eq!(cfg.providers.llm.max_attempts, 2);
	assert_eq!(cfg.retrieval.shortcut.max_results, 6);
	assert_eq!(cfg.correction.max_iterations, 2);
}

#[test]
fn omitted_sections_fall_back_to_defaults() {
	let mut root: Value = toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.");
	let table = root.as_table_mut().expect("Sample config must be a table.");

	for section in ["intent", "retrieval", "bundle", "quality", "correction", "cache"] {
		table.remove(section);
	}

	let cfg = load_payload(toml::to_string(&root).expect("Failed to render config."))
		.expect("Config without optional sections must load.");

	assert_eq!(cfg.retrieval.rrf_k, 60.0);
	assert_eq!(cfg.correction.fixable_min, 0.6);
	assert_eq!(cfg.correction.fixable_max, 0.8);
	assert_eq!(cfg.timeouts.classifier_ms, 3_000);
	assert!(!cfg.cache.enabled);
}

#[test]
fn max_iterations_cannot_exceed_hard_cap() {
	expect_validation(
		sample_with("correction", "max_iterations", Value::Integer(3)),
		"correction.max_iterations must be in the range 1-2.",
	);
}

#[test]
fn fixable_band_must_be_ordered() {
	expect_validation(
		sample_with("correction", "fixable_min", Value::Float(0.85)),
		"correction.fixable_min must be less than correction.fixable_max.",
	);
}

#[test]
fn embedding_dimensions_must_match_collection() {
	expect_validation(
		sample_with("storage.qdrant", "vector_dim", Value::Integer(768)),
		"providers.embedding.dimensions must match storage.qdrant.vector_dim.",
	);
}

#[test]
fn max_per_doc_must_be_positive() {
	expect_validation(
		sample_with("retrieval", "max_per_doc", Value::Integer(0)),
		"retrieval.max_per_doc must be greater than zero.",
	);
}

#[test]
fn shortcut_score_must_be_unit_interval() {
	expect_validation(
		sample_with("retrieval.shortcut", "score", Value::Float(1.5)),
		"retrieval.shortcut.score must be in the range 0.0-1.0.",
	);
}

#[test]
fn missing_file_reports_read_error() {
	let path = env::temp_dir().join("juris_config_test_missing.toml");
	let err = juris_config::load(&path).expect_err("Missing file must fail.");

	assert!(matches!(err, Error::ReadConfig { .. }));
}
