use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// One structured generation call. `schema` is a JSON Schema object; the reply must be a JSON
/// object that satisfies its `required` keys and top-level property types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationRequest {
	pub system: String,
	pub user: String,
	pub schema: Value,
}

/// Runs a chat completion and returns the parsed JSON reply. Replies that are not JSON or do
/// not satisfy the schema are retried up to `max_attempts` times; transport failures are not.
pub async fn generate(
	cfg: &juris_config::LlmProviderConfig,
	request: &GenerationRequest,
) -> Result<Value> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let system = format!(
		"{}\n\nRespond with a single JSON object that matches this JSON Schema:\n{}",
		request.system, request.schema
	);
	let messages = serde_json::json!([
		{ "role": "system", "content": system },
		{ "role": "user", "content": request.user },
	]);
	let mut last_error = None;

	for _ in 0..cfg.max_attempts.max(1) {
		let body = serde_json::json!({
			"model": cfg.model,
			"temperature": cfg.temperature,
			"response_format": { "type": "json_object" },
			"messages": messages,
		});
		let res = client
			.post(&url)
			.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
			.json(&body)
			.send()
			.await?;
		let json: Value = res.error_for_status()?.json().await?;

		match parse_generation_json(json).and_then(|value| {
			validate_schema(&value, &request.schema)?;

			Ok(value)
		}) {
			Ok(value) => return Ok(value),
			Err(err) => last_error = Some(err),
		}
	}

	Err(last_error.unwrap_or_else(|| Error::SchemaMismatch {
		message: "Generation response did not match the requested schema.".to_string(),
	}))
}

fn parse_generation_json(json: Value) -> Result<Value> {
	if let Some(content) = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
	{
		let parsed: Value = serde_json::from_str(strip_code_fence(content)).map_err(|_| {
			Error::SchemaMismatch { message: "Generation content is not valid JSON.".to_string() }
		})?;

		return Ok(parsed);
	}

	Err(Error::InvalidResponse {
		message: "Generation response is missing message content.".to_string(),
	})
}

fn strip_code_fence(content: &str) -> &str {
	let trimmed = content.trim();
	let Some(inner) = trimmed.strip_prefix("```") else {
		return trimmed;
	};
	let inner = inner.strip_prefix("json").unwrap_or(inner);

	inner.strip_suffix("```").unwrap_or(inner).trim()
}

pub fn validate_schema(value: &Value, schema: &Value) -> Result<()> {
	let Some(object) = value.as_object() else {
		return Err(Error::SchemaMismatch {
			message: "Generation reply must be a JSON object.".to_string(),
		});
	};
	let required = schema.get("required").and_then(|v| v.as_array()).into_iter().flatten();

	for key in required.filter_map(|v| v.as_str()) {
		if !object.contains_key(key) {
			return Err(Error::SchemaMismatch {
				message: format!("Generation reply is missing required key {key}."),
			});
		}
	}

	let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) else {
		return Ok(());
	};

	for (key, property) in properties {
		let (Some(field), Some(expected)) =
			(object.get(key), property.get("type").and_then(|v| v.as_str()))
		else {
			continue;
		};
		let matches = match expected {
			"string" => field.is_string(),
			"number" => field.is_number(),
			"integer" => field.is_i64() || field.is_u64(),
			"boolean" => field.is_boolean(),
			"array" => field.is_array(),
			"object" => field.is_object(),
			_ => true,
		};

		if !matches {
			return Err(Error::SchemaMismatch {
				message: format!("Generation reply field {key} must be of type {expected}."),
			});
		}
	}

	Ok(())
}
