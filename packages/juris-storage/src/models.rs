use serde_json::Value;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StatuteAliasRow {
	pub statute_id: String,
	pub alias: String,
	pub title: String,
	pub chapter: Option<String>,
}

/// One chunk of a statute section, joined with its parent document.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SectionChunk {
	pub chunk_id: String,
	pub doc_id: String,
	pub chunk_index: i32,
	pub section: Option<String>,
	pub chunk_text: String,
	pub title: String,
	pub source_kind: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
	pub doc_id: String,
	pub statute_id: Option<String>,
	pub title: String,
	pub source_kind: String,
	pub citation: Option<String>,
	pub content: String,
}

#[derive(Debug, Clone)]
pub struct CachePayload {
	pub value: Value,
	pub size_bytes: usize,
}
