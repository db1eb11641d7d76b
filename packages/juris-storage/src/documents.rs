use sqlx::PgExecutor;

use crate::{Result, models::DocumentRow};

/// Fetches the distinct documents named by `doc_ids` in one round trip. Order is unspecified.
pub async fn fetch_documents<'e, E>(executor: E, doc_ids: &[String]) -> Result<Vec<DocumentRow>>
where
	E: PgExecutor<'e>,
{
	if doc_ids.is_empty() {
		return Ok(Vec::new());
	}

	let rows = sqlx::query_as::<_, DocumentRow>(
		"\
SELECT
\tdoc_id,
\tstatute_id,
\ttitle,
\tsource_kind,
\tcitation,
\tcontent
FROM documents
WHERE doc_id = ANY($1)",
	)
	.bind(doc_ids)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}
