use serde_json::Value;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Result, models::CachePayload};

/// Returns the live payload for `key` and bumps its hit counter.
pub async fn fetch_cache_payload(
	pool: &PgPool,
	kind: &str,
	key: &str,
	now: OffsetDateTime,
) -> Result<Option<CachePayload>> {
	let row = sqlx::query(
		"SELECT payload FROM answer_cache WHERE cache_kind = $1 AND cache_key = $2 AND expires_at > $3",
	)
	.bind(kind)
	.bind(key)
	.bind(now)
	.fetch_optional(pool)
	.await?;
	let Some(row) = row else {
		return Ok(None);
	};
	let payload: Value = row.try_get("payload")?;
	let size_bytes = serde_json::to_vec(&payload)?.len();

	sqlx::query(
		"\
UPDATE answer_cache
SET last_accessed_at = $1, hit_count = hit_count + 1
WHERE cache_kind = $2 AND cache_key = $3",
	)
	.bind(now)
	.bind(kind)
	.bind(key)
	.execute(pool)
	.await?;

	Ok(Some(CachePayload { value: payload, size_bytes }))
}

/// Stores `payload` under `key` unless a live entry already exists; expired entries are
/// replaced. Returns `None` without writing when the encoded payload is larger than
/// `max_payload_bytes`.
pub async fn store_cache_payload(
	pool: &PgPool,
	kind: &str,
	key: &str,
	payload: &Value,
	now: OffsetDateTime,
	expires_at: OffsetDateTime,
	max_payload_bytes: Option<u64>,
) -> Result<Option<usize>> {
	let payload_size = serde_json::to_vec(payload)?.len();

	if let Some(max) = max_payload_bytes
		&& payload_size as u64 > max
	{
		return Ok(None);
	}

	sqlx::query(
		"\
INSERT INTO answer_cache
\t(cache_id, cache_kind, cache_key, payload, created_at, last_accessed_at, expires_at, hit_count)
VALUES ($1,$2,$3,$4,$5,$5,$6,0)
ON CONFLICT (cache_kind, cache_key) DO UPDATE SET
\tpayload = EXCLUDED.payload,
\tcreated_at = EXCLUDED.created_at,
\tlast_accessed_at = EXCLUDED.last_accessed_at,
\texpires_at = EXCLUDED.expires_at,
\thit_count = 0
WHERE answer_cache.expires_at <= EXCLUDED.created_at",
	)
	.bind(Uuid::new_v4())
	.bind(kind)
	.bind(key)
	.bind(payload)
	.bind(now)
	.bind(expires_at)
	.execute(pool)
	.await?;

	Ok(Some(payload_size))
}
