use std::{
	collections::{BTreeMap, HashSet},
	fs,
	path::{Path, PathBuf},
	time::Instant,
};

use clap::Parser;
use color_eyre::eyre;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

use juris_service::{
	AnswerRequest, AnswerResponse, ConversationTurn, JurisService, StatuteHint,
	backends::connect_backends,
};

#[derive(Debug, Parser)]
#[command(
	version = juris_cli::VERSION,
	rename_all = "kebab",
	styles = juris_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[arg(long, short = 'd', value_name = "FILE")]
	pub dataset: PathBuf,
	/// Runs each query this many times; later runs exercise the answer cache.
	#[arg(long, value_name = "N", default_value_t = 1)]
	pub runs_per_query: u32,
}

#[derive(Debug, Deserialize)]
struct EvalDataset {
	name: Option<String>,
	queries: Vec<EvalQuery>,
}

#[derive(Debug, Deserialize)]
struct EvalQuery {
	id: Option<String>,
	query: String,
	#[serde(default)]
	context: Vec<ConversationTurn>,
	statute_hint: Option<StatuteHint>,
	#[serde(default)]
	expected_doc_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EvalOutput {
	dataset: EvalDatasetInfo,
	settings: EvalSettings,
	summary: EvalSummary,
	queries: Vec<QueryReport>,
}

#[derive(Debug, Serialize)]
struct EvalDatasetInfo {
	name: String,
	query_count: usize,
}

#[derive(Debug, Serialize)]
struct EvalSettings {
	config_path: String,
	runs_per_query: u32,
	max_iterations: u32,
	pass_threshold: f32,
}

#[derive(Debug, Serialize)]
struct EvalSummary {
	decisions: BTreeMap<String, usize>,
	flagged: usize,
	degraded: usize,
	cache_hits: usize,
	avg_iterations: f64,
	avg_recall: f64,
	avg_confidence: f64,
	latency_ms_p50: f64,
	latency_ms_p95: f64,
}

#[derive(Debug, Serialize)]
struct QueryReport {
	id: String,
	query: String,
	run: u32,
	decision: String,
	iterations: u32,
	flagged: bool,
	degraded: bool,
	cache_hit: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	confidence: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	recall: Option<f64>,
	latency_ms: f64,
	expected_doc_ids: Vec<String>,
	source_doc_ids: Vec<String>,
	error_count: usize,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = juris_config::load(&args.config)?;
	let filter = EnvFilter::new(config.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let dataset = load_dataset(&args.dataset)?;
	let settings = EvalSettings {
		config_path: args.config.display().to_string(),
		runs_per_query: args.runs_per_query.max(1),
		max_iterations: config.correction.max_iterations,
		pass_threshold: config.quality.pass_threshold,
	};
	let backends = connect_backends(&config).await?;
	let service = JurisService::new(config, backends);
	let mut reports = Vec::new();

	for (idx, query) in dataset.queries.iter().enumerate() {
		let id = query.id.clone().unwrap_or_else(|| format!("q{}", idx + 1));

		for run in 1..=settings.runs_per_query {
			let request = AnswerRequest {
				query: query.query.clone(),
				context: query.context.clone(),
				statute_hint: query.statute_hint.clone(),
			};
			let started = Instant::now();
			let response = service.answer(request).await?;
			let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

			info!(id = %id, run, decision = response.decision.as_str(), "Query evaluated.");
			reports.push(query_report(&id, query, run, response, latency_ms));
		}
	}

	let output = EvalOutput {
		dataset: EvalDatasetInfo {
			name: dataset.name.unwrap_or_else(|| dataset_stem(&args.dataset)),
			query_count: dataset.queries.len(),
		},
		settings,
		summary: summarize(&reports),
		queries: reports,
	};
	let json = serde_json::to_string_pretty(&output)?;

	println!("{json}");

	Ok(())
}

fn load_dataset(path: &Path) -> color_eyre::Result<EvalDataset> {
	let raw = fs::read_to_string(path)?;
	let dataset: EvalDataset = serde_json::from_str(&raw)?;

	if dataset.queries.is_empty() {
		return Err(eyre::eyre!("Dataset must include at least one query."));
	}

	Ok(dataset)
}

fn dataset_stem(path: &Path) -> String {
	path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default()
}

fn query_report(
	id: &str,
	query: &EvalQuery,
	run: u32,
	response: AnswerResponse,
	latency_ms: f64,
) -> QueryReport {
	let source_doc_ids = unique_ids(response.sources.iter().map(|entry| entry.doc_id.as_str()));
	let recall = recall(&source_doc_ids, &query.expected_doc_ids);

	QueryReport {
		id: id.to_string(),
		query: query.query.clone(),
		run,
		decision: response.decision.as_str().to_string(),
		iterations: response.iterations,
		flagged: response.flagged,
		degraded: response.degraded,
		cache_hit: response.cache_hit,
		confidence: response.verdict.as_ref().map(|verdict| verdict.confidence),
		recall,
		latency_ms,
		expected_doc_ids: query.expected_doc_ids.clone(),
		source_doc_ids,
		error_count: response.errors.len(),
	}
}

fn unique_ids<'a, I>(iter: I) -> Vec<String>
where
	I: IntoIterator<Item = &'a str>,
{
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for id in iter {
		if seen.insert(id) {
			out.push(id.to_string());
		}
	}

	out
}

/// Share of expected documents that made it into the answer's sources. `None` without
/// expectations.
fn recall(retrieved: &[String], expected: &[String]) -> Option<f64> {
	if expected.is_empty() {
		return None;
	}

	let retrieved: HashSet<&str> = retrieved.iter().map(String::as_str).collect();
	let found = expected.iter().filter(|id| retrieved.contains(id.as_str())).count();

	Some(found as f64 / expected.len() as f64)
}

fn summarize(reports: &[QueryReport]) -> EvalSummary {
	let mut decisions = BTreeMap::new();

	for report in reports {
		*decisions.entry(report.decision.clone()).or_insert(0) += 1;
	}

	let mut latencies: Vec<f64> = reports.iter().map(|report| report.latency_ms).collect();

	latencies.sort_by(f64::total_cmp);

	EvalSummary {
		decisions,
		flagged: reports.iter().filter(|report| report.flagged).count(),
		degraded: reports.iter().filter(|report| report.degraded).count(),
		cache_hits: reports.iter().filter(|report| report.cache_hit).count(),
		avg_iterations: mean(reports.iter().map(|report| report.iterations as f64)),
		avg_recall: mean(reports.iter().filter_map(|report| report.recall)),
		avg_confidence: mean(reports.iter().filter_map(|report| report.confidence.map(f64::from))),
		latency_ms_p50: percentile(&latencies, 0.50),
		latency_ms_p95: percentile(&latencies, 0.95),
	}
}

fn mean<I>(values: I) -> f64
where
	I: Iterator<Item = f64>,
{
	let (sum, count) = values.fold((0.0, 0_usize), |(sum, count), value| (sum + value, count + 1));

	if count == 0 { 0.0 } else { sum / count as f64 }
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
	if values.is_empty() {
		return 0.0;
	}

	let clamped = percentile.clamp(0.0, 1.0);
	let pos = clamped * (values.len() as f64 - 1.0);
	let lower = pos.floor() as usize;
	let upper = pos.ceil() as usize;

	if lower == upper {
		values[lower]
	} else {
		let weight = pos - lower as f64;
		values[lower] * (1.0 - weight) + values[upper] * weight
	}
}
