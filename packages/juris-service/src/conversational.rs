use serde_json::Value;
use tracing::warn;

use juris_domain::intent::IntentCategory;
use juris_providers::generation::GenerationRequest;

use crate::{
	JurisService,
	state::{Answer, ContextEntry, CorrectionPhase, NodeError, StateDelta},
	synthesis,
};

const NODE_CONVERSE: &str = "converse";
const NODE_SUMMARIZE: &str = "summarize";

const REPLY_SYSTEM: &str = "You are a legal research assistant. Reply briefly and politely to \
conversational messages. Do not give legal advice in this reply.";
const CLARIFY_SYSTEM: &str = "You are a legal research assistant. The user's question is too \
vague to research. Ask one short clarifying question, for example which statute, jurisdiction or \
situation they mean.";
const SUMMARY_SYSTEM: &str = "You summarize legal sources. Use only the numbered sources \
provided, keep the structure of the law visible, and cite sources by number.";

const CANNED_REPLY: &str = "Hello. Ask me a question about a statute, a section, or a legal \
situation, and I will look up the relevant law.";
const CANNED_CLARIFICATION: &str = "Could you say more about what you need? For example, name \
the statute or section, or describe the situation you are asking about.";

impl JurisService {
	/// Brief reply for conversational messages, or a clarifying question for vague ones.
	pub async fn converse(&self, query: &str, category: IntentCategory) -> StateDelta {
		let (system, canned) = match category {
			IntentCategory::Disambiguate => (CLARIFY_SYSTEM, CANNED_CLARIFICATION),
			_ => (REPLY_SYSTEM, CANNED_REPLY),
		};
		let request = GenerationRequest {
			system: system.to_string(),
			user: query.to_string(),
			schema: reply_schema(),
		};

		match crate::generate_checked(self, "Reply", self.cfg.timeouts.synthesis_ms, &request).await
		{
			Ok(value) => {
				let text = reply_text(&value);

				if text.is_empty() {
					return canned_reply(canned, None);
				}

				StateDelta {
					answer: Some(Answer { text, citations: Vec::new(), degraded: false }),
					..Default::default()
				}
			},
			Err(err) => {
				warn!(error = %err, node = NODE_CONVERSE, "Reply failed; using canned reply.");

				canned_reply(canned, Some(NodeError::new(NODE_CONVERSE, err.to_string())))
			},
		}
	}

	/// Summary of the bundled sources. Falls back to the extractive source listing.
	pub async fn summarize(&self, query: &str, entries: &[ContextEntry]) -> StateDelta {
		let request = GenerationRequest {
			system: SUMMARY_SYSTEM.to_string(),
			user: format!(
				"Request: {query}\n\nSources:\n{}",
				synthesis::render_sources(entries)
			),
			schema: synthesis::answer_schema("summary"),
		};

		match crate::generate_checked(self, "Summary", self.cfg.timeouts.synthesis_ms, &request)
			.await
		{
			Ok(value) => StateDelta {
				answer: Some(synthesis::parse_answer(&value, "summary", entries)),
				phase: Some(CorrectionPhase::Synthesized),
				..Default::default()
			},
			Err(err) => {
				warn!(error = %err, node = NODE_SUMMARIZE, "Summary failed; listing sources.");

				StateDelta {
					answer: Some(synthesis::fallback_answer(entries)),
					phase: Some(CorrectionPhase::Synthesized),
					errors: vec![NodeError::new(NODE_SUMMARIZE, err.to_string())],
					..Default::default()
				}
			},
		}
	}
}

fn reply_schema() -> Value {
	serde_json::json!({
		"type": "object",
		"required": ["reply"],
		"properties": { "reply": { "type": "string" } }
	})
}

fn reply_text(value: &Value) -> String {
	value.get("reply").and_then(|v| v.as_str()).unwrap_or_default().trim().to_string()
}

fn canned_reply(text: &str, error: Option<NodeError>) -> StateDelta {
	StateDelta {
		answer: Some(Answer { text: text.to_string(), citations: Vec::new(), degraded: true }),
		errors: error.into_iter().collect(),
		..Default::default()
	}
}
