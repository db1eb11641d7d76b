use serde_json::Value;
use tracing::{debug, warn};

use juris_domain::{
	intent::{self, ComplexityTier, IntentCategory},
	normalize,
};
use juris_providers::generation::GenerationRequest;

use crate::{
	Error, JurisService,
	state::{ConversationTurn, IntentResult, IntentSource, NodeError, StateDelta},
};

const NODE_NORMALIZE: &str = "normalize";
const NODE_CLASSIFY: &str = "classify_intent";

const CLASSIFIER_SYSTEM: &str = "You classify questions sent to a legal research assistant. \
Pick one category: informational_qa (a question about the law), conversational (greetings, \
thanks, chit-chat), summarize (a request to summarize a statute or document), disambiguate (the \
question is too vague to answer). Rate complexity as simple, moderate, complex or expert, and \
give your confidence between 0 and 1.";

impl JurisService {
	/// Normalizes the raw query and rewrites elliptical follow-ups against the last user turn.
	pub fn normalize_query(&self, raw_query: &str, context: &[ConversationTurn]) -> StateDelta {
		let normalized = normalize::normalize_query(raw_query);
		let previous = context
			.iter()
			.rev()
			.find(|turn| turn.role == "user")
			.map(|turn| normalize::normalize_query(&turn.content));
		let rewritten = normalize::rewrite_follow_up(&normalized, previous.as_deref());

		if let Some(rewritten) = rewritten.as_deref() {
			debug!(node = NODE_NORMALIZE, rewritten, "Rewrote follow-up query.");
		}

		StateDelta {
			normalized_query: Some(normalized),
			rewritten_query: rewritten,
			..Default::default()
		}
	}

	/// Rule table first; the semantic classifier only runs when no rule matched confidently.
	/// Classifier failure, timeout or schema mismatch defaults to informational QA at moderate
	/// complexity.
	pub async fn classify_intent(&self, query: &str) -> StateDelta {
		let key = normalize::match_key(query);
		let rule = intent::classify_by_rules(&key);
		let complexity = intent::estimate_complexity(&key);

		if rule.confidence >= self.cfg.intent.min_rule_confidence
			|| !self.cfg.intent.classifier_enabled
		{
			return StateDelta {
				intent: Some(IntentResult {
					category: rule.category,
					complexity,
					confidence: rule.confidence,
					params: complexity.retrieval_params(),
					source: IntentSource::Rule,
				}),
				..Default::default()
			};
		}

		match self.classify_semantically(query).await {
			Ok(result) => StateDelta { intent: Some(result), ..Default::default() },
			Err(err) => {
				warn!(
					error = %err,
					node = NODE_CLASSIFY,
					"Intent classifier failed; using default intent."
				);

				StateDelta {
					intent: Some(default_intent()),
					errors: vec![NodeError::new(NODE_CLASSIFY, err.to_string())],
					..Default::default()
				}
			},
		}
	}

	async fn classify_semantically(&self, query: &str) -> crate::Result<IntentResult> {
		let request = GenerationRequest {
			system: CLASSIFIER_SYSTEM.to_string(),
			user: query.to_string(),
			schema: classifier_schema(),
		};
		let value = crate::generate_checked(
			self,
			"Intent classification",
			self.cfg.timeouts.classifier_ms,
			&request,
		)
		.await?;

		parse_classification(&value)
	}
}

pub fn default_intent() -> IntentResult {
	let complexity = ComplexityTier::Moderate;

	IntentResult {
		category: IntentCategory::InformationalQa,
		complexity,
		confidence: 0.0,
		params: complexity.retrieval_params(),
		source: IntentSource::Fallback,
	}
}

fn classifier_schema() -> Value {
	serde_json::json!({
		"type": "object",
		"required": ["category", "complexity", "confidence"],
		"properties": {
			"category": { "type": "string" },
			"complexity": { "type": "string" },
			"confidence": { "type": "number" }
		}
	})
}

fn parse_classification(value: &Value) -> crate::Result<IntentResult> {
	let field = |key: &str| value.get(key).and_then(|v| v.as_str()).unwrap_or_default();
	let category = IntentCategory::parse(field("category")).ok_or_else(|| Error::Schema {
		message: format!("Unknown intent category {:?}.", field("category")),
	})?;
	let complexity = ComplexityTier::parse(field("complexity")).ok_or_else(|| Error::Schema {
		message: format!("Unknown complexity tier {:?}.", field("complexity")),
	})?;
	let confidence = value
		.get("confidence")
		.and_then(|v| v.as_f64())
		.unwrap_or_default()
		.clamp(0.0, 1.0) as f32;

	Ok(IntentResult {
		category,
		complexity,
		confidence,
		params: complexity.retrieval_params(),
		source: IntentSource::Classifier,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_classifier_reply() {
		let value = serde_json::json!({
			"category": "summarize",
			"complexity": "expert",
			"confidence": 1.4
		});
		let result = parse_classification(&value).expect("parse failed");

		assert_eq!(result.category, IntentCategory::Summarize);
		assert_eq!(result.params.initial_k, 50);
		assert_eq!(result.params.rerank_k, 15);
		assert_eq!(result.confidence, 1.0);
	}

	#[test]
	fn unknown_category_is_a_schema_error() {
		let value = serde_json::json!({
			"category": "poetry",
			"complexity": "simple",
			"confidence": 0.5
		});

		assert!(matches!(parse_classification(&value), Err(Error::Schema { .. })));
	}

	#[test]
	fn default_intent_is_moderate_informational() {
		let intent = default_intent();

		assert_eq!(intent.category, IntentCategory::InformationalQa);
		assert_eq!((intent.params.initial_k, intent.params.rerank_k), (25, 8));
	}
}
