use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use juris_providers::generation::GenerationRequest;

use crate::{
	JurisService, Result,
	state::{Answer, Citation, ContextEntry, CorrectionPhase, NodeError, StateDelta},
};

const NODE: &str = "synthesize";
const EXCERPT_WORDS: usize = 40;
const NO_SOURCES_NOTICE: &str = "No sources relevant to this question were found. Try naming the \
statute and section you are asking about, or rephrase the question.";

const SYNTHESIS_SYSTEM: &str = "You answer legal questions using only the numbered sources \
provided. Every claim must be supported by a source. Cite sources by their number and quote the \
supporting passage verbatim. If the sources do not answer the question, say so.";

/// Critic output carried into a refinement pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Guidance {
	pub instructions: String,
	pub priority_fixes: Vec<String>,
	pub suggested_additions: Vec<String>,
}

impl JurisService {
	/// Generates a cited answer from the bundled context. When generation fails a previous answer
	/// is kept as is; without one a flagged extractive answer is produced.
	pub async fn synthesize(
		&self,
		query: &str,
		entries: &[ContextEntry],
		previous: Option<&Answer>,
	) -> StateDelta {
		match self.compose_answer(query, entries, previous, None).await {
			Ok(answer) => StateDelta {
				answer: Some(answer),
				phase: Some(CorrectionPhase::Synthesized),
				..Default::default()
			},
			Err(err) => {
				warn!(error = %err, node = NODE, "Answer synthesis failed.");

				let answer = match previous {
					Some(_) => None,
					None => Some(fallback_answer(entries)),
				};

				StateDelta {
					answer,
					phase: Some(CorrectionPhase::Synthesized),
					errors: vec![NodeError::new(NODE, err.to_string())],
					..Default::default()
				}
			},
		}
	}

	pub(crate) async fn compose_answer(
		&self,
		query: &str,
		entries: &[ContextEntry],
		previous: Option<&Answer>,
		guidance: Option<&Guidance>,
	) -> Result<Answer> {
		let mut user = format!("Question: {query}\n\nSources:\n{}", render_sources(entries));

		if let Some(guidance) = guidance {
			user.push_str(&render_guidance(guidance));

			if let Some(previous) = previous {
				user.push_str(&format!("\n\nPrevious answer to improve:\n{}", previous.text));
			}
		}

		let request = GenerationRequest {
			system: SYNTHESIS_SYSTEM.to_string(),
			user,
			schema: answer_schema("answer"),
		};
		let value = crate::generate_checked(
			self,
			"Answer synthesis",
			self.cfg.timeouts.synthesis_ms,
			&request,
		)
		.await?;

		Ok(parse_answer(&value, "answer", entries))
	}
}

pub(crate) fn answer_schema(text_key: &str) -> Value {
	serde_json::json!({
		"type": "object",
		"required": [text_key, "citations"],
		"properties": {
			text_key: { "type": "string" },
			"citations": {
				"type": "array",
				"items": {
					"type": "object",
					"properties": {
						"source": { "type": ["string", "integer"] },
						"quote": { "type": "string" }
					}
				}
			}
		}
	})
}

pub(crate) fn parse_answer(value: &Value, text_key: &str, entries: &[ContextEntry]) -> Answer {
	let text =
		value.get(text_key).and_then(|v| v.as_str()).unwrap_or_default().trim().to_string();
	let citations = resolve_citations(value.get("citations"), &text, entries);

	Answer { text, citations, degraded: false }
}

/// Numbered source listing shown to the model. Numbers are 1-based entry positions.
pub fn render_sources(entries: &[ContextEntry]) -> String {
	if entries.is_empty() {
		return "(no sources)".to_string();
	}

	entries
		.iter()
		.enumerate()
		.map(|(idx, entry)| {
			let mut header = format!("[{}] {}", idx + 1, entry.title);

			if let Some(section) = entry.section.as_deref() {
				header.push_str(&format!(", section {section}"));
			}
			if let Some(citation) = entry.citation.as_deref() {
				header.push_str(&format!(" ({citation})"));
			}

			format!("{header} [{}]\n{}", entry.source_kind, entry.text)
		})
		.collect::<Vec<_>>()
		.join("\n\n")
}

fn render_guidance(guidance: &Guidance) -> String {
	let mut out = format!("\n\nRevision instructions:\n{}", guidance.instructions);

	for (label, items) in [
		("Priority fixes", &guidance.priority_fixes),
		("Suggested additions", &guidance.suggested_additions),
	] {
		if items.is_empty() {
			continue;
		}

		out.push_str(&format!("\n{label}:"));

		for item in items {
			out.push_str(&format!("\n- {item}"));
		}
	}

	out
}

/// Maps model citations onto context entries. A source may be given as `[n]`, `n`, a title, a
/// document id or a formal citation; anything else is dropped. Inline `[n]` markers in the
/// answer text count as citations too.
pub fn resolve_citations(
	raw: Option<&Value>,
	answer_text: &str,
	entries: &[ContextEntry],
) -> Vec<Citation> {
	let mut seen = HashSet::new();
	let mut out = Vec::new();
	let items = raw.and_then(|v| v.as_array()).map(Vec::as_slice).unwrap_or_default();

	for item in items {
		let (source, quote) = match item {
			Value::Object(map) => (
				map.get("source"),
				map.get("quote")
					.and_then(|v| v.as_str())
					.map(str::trim)
					.filter(|quote| !quote.is_empty())
					.map(str::to_string),
			),
			other => (Some(other), None),
		};
		let Some(idx) = source.and_then(|source| resolve_source(source, entries)) else {
			continue;
		};

		if seen.insert(idx) {
			out.push(citation_for(idx, &entries[idx], quote));
		}
	}

	for marker in inline_markers(answer_text) {
		let Some(idx) = marker.checked_sub(1).filter(|idx| *idx < entries.len()) else {
			continue;
		};

		if seen.insert(idx) {
			out.push(citation_for(idx, &entries[idx], None));
		}
	}

	out
}

/// Extractive answer listing the best sources, or a notice when there are none.
pub fn fallback_answer(entries: &[ContextEntry]) -> Answer {
	if entries.is_empty() {
		return Answer {
			text: NO_SOURCES_NOTICE.to_string(),
			citations: Vec::new(),
			degraded: true,
		};
	}

	let mut text = "A generated answer is not available. The most relevant sources found are:"
		.to_string();
	let mut citations = Vec::new();

	for (idx, entry) in entries.iter().enumerate().take(3) {
		let excerpt =
			entry.text.split_whitespace().take(EXCERPT_WORDS).collect::<Vec<_>>().join(" ");

		text.push_str(&format!("\n[{}] {}: {excerpt}", idx + 1, entry.title));
		citations.push(citation_for(idx, entry, None));
	}

	Answer { text, citations, degraded: true }
}

fn resolve_source(source: &Value, entries: &[ContextEntry]) -> Option<usize> {
	let by_number = |n: u64| (n as usize).checked_sub(1).filter(|idx| *idx < entries.len());

	match source {
		Value::Number(number) => number.as_u64().and_then(by_number),
		Value::String(raw) => {
			let trimmed = raw.trim();
			let unbracketed = trimmed.trim_start_matches('[').trim_end_matches(']').trim();

			if let Ok(n) = unbracketed.parse::<u64>() {
				return by_number(n);
			}

			let lowered = trimmed.to_lowercase();

			entries.iter().position(|entry| {
				entry.doc_id.eq_ignore_ascii_case(trimmed)
					|| entry.title.to_lowercase() == lowered
					|| entry.citation.as_deref().is_some_and(|c| c.to_lowercase() == lowered)
			})
		},
		_ => None,
	}
}

fn citation_for(idx: usize, entry: &ContextEntry, quote: Option<String>) -> Citation {
	Citation {
		marker: idx as u32 + 1,
		doc_id: entry.doc_id.clone(),
		title: entry.title.clone(),
		source_kind: entry.source_kind.clone(),
		quote,
	}
}

fn inline_markers(text: &str) -> Vec<usize> {
	let mut out = Vec::new();
	let mut rest = text;

	while let Some(open) = rest.find('[') {
		let after = &rest[open + 1..];
		let Some(close) = after.find(']') else {
			break;
		};

		if let Ok(n) = after[..close].trim().parse::<usize>() {
			out.push(n);
		}

		rest = &after[close + 1..];
	}

	out
}
