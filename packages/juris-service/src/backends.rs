//! Postgres and Qdrant implementations of the service's storage seams.

use std::{collections::HashMap, sync::Arc, time::Duration};

use qdrant_client::qdrant::{Condition, Filter};
use serde_json::Value;
use sqlx::PgPool;
use time::OffsetDateTime;

use juris_config::Config;
use juris_domain::statute::StatuteAlias;
use juris_storage::{
	cache,
	db::Db,
	documents,
	models::{DocumentRow, SectionChunk},
	qdrant::{ChunkHit, QdrantStore},
	statutes,
};

use crate::{
	Backends, BoxFuture, CacheStore, DocumentStore, LexicalSearch, ParentDocument, Result,
	SearchFilter, SearchHit, StatuteIndex, VectorSearch,
};

const CACHE_KIND: &str = "answer";

/// Dense and BM25 search over the chunk collection.
pub struct QdrantSearch {
	pub store: QdrantStore,
}

impl VectorSearch for QdrantSearch {
	fn search<'a>(
		&'a self,
		vector: &'a [f32],
		top_k: u32,
		filter: Option<&'a SearchFilter>,
	) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
		Box::pin(async move {
			let filter = filter.and_then(qdrant_filter);
			let hits = self.store.search_dense(vector.to_vec(), top_k, filter).await?;

			Ok(hits.into_iter().map(search_hit).collect())
		})
	}
}

impl LexicalSearch for QdrantSearch {
	fn search<'a>(&'a self, query: &'a str, top_k: u32) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
		Box::pin(async move {
			let hits = self.store.search_bm25(query, top_k).await?;

			Ok(hits.into_iter().map(search_hit).collect())
		})
	}
}

/// Corpus, statute directory and answer cache in Postgres.
pub struct PgStore {
	pub pool: PgPool,
	pub max_payload_bytes: Option<u64>,
}

impl DocumentStore for PgStore {
	fn fetch_parents<'a>(
		&'a self,
		doc_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Option<ParentDocument>>>> {
		Box::pin(async move {
			let rows = documents::fetch_documents(&self.pool, doc_ids).await?;
			let mut by_id: HashMap<String, DocumentRow> =
				rows.into_iter().map(|row| (row.doc_id.clone(), row)).collect();

			Ok(doc_ids.iter().map(|id| by_id.remove(id).map(parent_document)).collect())
		})
	}
}

impl StatuteIndex for PgStore {
	fn load_aliases(&self) -> BoxFuture<'_, Result<Vec<StatuteAlias>>> {
		Box::pin(async move {
			let rows = statutes::load_statute_aliases(&self.pool).await?;

			Ok(rows
				.into_iter()
				.map(|row| StatuteAlias {
					statute_id: row.statute_id,
					alias: row.alias,
					title: row.title,
					chapter: row.chapter,
				})
				.collect())
		})
	}

	fn find_sections<'a>(
		&'a self,
		statute_id: &'a str,
		section: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
		Box::pin(async move {
			let rows = statutes::find_sections(&self.pool, statute_id, section, limit).await?;

			Ok(rows.into_iter().map(section_hit).collect())
		})
	}
}

impl CacheStore for PgStore {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let payload = cache::fetch_cache_payload(&self.pool, CACHE_KIND, key, now).await?;

			Ok(payload.map(|payload| payload.value))
		})
	}

	fn set<'a>(
		&'a self,
		key: &'a str,
		value: &'a Value,
		ttl: Duration,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();

			cache::store_cache_payload(
				&self.pool,
				CACHE_KIND,
				key,
				value,
				now,
				now + ttl,
				self.max_payload_bytes,
			)
			.await?;

			Ok(())
		})
	}
}

/// Connects Postgres and Qdrant and makes sure the schema and collection exist.
pub async fn connect_backends(cfg: &Config) -> Result<Backends> {
	let db = Db::connect(&cfg.storage.postgres).await?;

	db.ensure_schema().await?;

	let store = QdrantStore::new(&cfg.storage.qdrant)?;

	store.ensure_collection().await?;

	let search = Arc::new(QdrantSearch { store });
	let pg = Arc::new(PgStore { pool: db.pool, max_payload_bytes: cfg.cache.max_payload_bytes });
	let cache: Option<Arc<dyn CacheStore>> =
		if cfg.cache.enabled { Some(pg.clone()) } else { None };

	Ok(Backends {
		vector: search.clone(),
		lexical: search,
		documents: pg.clone(),
		statutes: pg,
		cache,
	})
}

fn qdrant_filter(filter: &SearchFilter) -> Option<Filter> {
	if filter.source_kinds.is_empty() {
		return None;
	}

	Some(Filter::must([Condition::matches("source_kind", filter.source_kinds.clone())]))
}

fn search_hit(hit: ChunkHit) -> SearchHit {
	SearchHit {
		chunk_id: hit.chunk_id,
		doc_id: hit.doc_id,
		score: hit.score,
		title: hit.title,
		section: hit.section,
		source_kind: hit.source_kind,
		text: hit.text,
	}
}

fn section_hit(row: SectionChunk) -> SearchHit {
	SearchHit {
		chunk_id: row.chunk_id,
		doc_id: row.doc_id,
		score: 1.0,
		title: Some(row.title),
		section: row.section,
		source_kind: Some(row.source_kind),
		text: row.chunk_text,
	}
}

fn parent_document(row: DocumentRow) -> ParentDocument {
	ParentDocument {
		doc_id: row.doc_id,
		title: row.title,
		source_kind: row.source_kind,
		citation: row.citation,
		content: row.content,
	}
}
