use sqlx::PgExecutor;

use crate::{
	Result,
	models::{SectionChunk, StatuteAliasRow},
};

/// Every alias together with its statute's canonical title. Each statute also answers to its
/// own lowercased title.
pub async fn load_statute_aliases<'e, E>(executor: E) -> Result<Vec<StatuteAliasRow>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, StatuteAliasRow>(
		"\
SELECT a.statute_id, a.alias, s.title, s.chapter
FROM statute_aliases a
JOIN statutes s ON s.statute_id = a.statute_id
UNION
SELECT s.statute_id, lower(s.title) AS alias, s.title, s.chapter
FROM statutes s
ORDER BY statute_id, alias",
	)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Chunks of `section` and its subsections (`12` also matches `12(2)`), in document order.
pub async fn find_sections<'e, E>(
	executor: E,
	statute_id: &str,
	section: &str,
	limit: u32,
) -> Result<Vec<SectionChunk>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, SectionChunk>(
		"\
SELECT
\tc.chunk_id,
\tc.doc_id,
\tc.chunk_index,
\tc.section,
\tc.chunk_text,
\td.title,
\td.source_kind
FROM document_chunks c
JOIN documents d ON d.doc_id = c.doc_id
WHERE d.statute_id = $1
\tAND (lower(c.section) = lower($2) OR lower(c.section) LIKE lower($2) || '(%')
ORDER BY c.doc_id ASC, c.chunk_index ASC
LIMIT $3",
	)
	.bind(statute_id)
	.bind(section)
	.bind(i64::from(limit))
	.fetch_all(executor)
	.await?;

	Ok(rows)
}
