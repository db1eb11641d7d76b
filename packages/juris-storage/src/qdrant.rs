pub const DENSE_VECTOR_NAME: &str = "dense";
pub const BM25_VECTOR_NAME: &str = "bm25";
pub const BM25_MODEL: &str = "qdrant/bm25";

use std::collections::HashMap;

use qdrant_client::qdrant::{
	CreateCollectionBuilder, Distance, Document, Filter, Modifier, Query, QueryPointsBuilder,
	ScoredPoint, SparseVectorParamsBuilder, SparseVectorsConfigBuilder, Value,
	VectorParamsBuilder, VectorsConfigBuilder, point_id::PointIdOptions, value::Kind,
};

use crate::Result;

/// Payload fields every indexed chunk carries.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
	pub chunk_id: String,
	pub doc_id: String,
	pub score: f32,
	pub title: Option<String>,
	pub section: Option<String>,
	pub source_kind: Option<String>,
	pub text: String,
}

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantStore {
	pub fn new(cfg: &juris_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	/// Creates the collection with a named dense vector and an IDF-weighted BM25 sparse vector
	/// when it does not exist yet.
	pub async fn ensure_collection(&self) -> Result<()> {
		if self.client.collection_exists(self.collection.clone()).await? {
			return Ok(());
		}

		let mut vectors_config = VectorsConfigBuilder::default();

		vectors_config.add_named_vector_params(
			DENSE_VECTOR_NAME,
			VectorParamsBuilder::new(self.vector_dim.into(), Distance::Cosine),
		);

		let mut sparse_vectors_config = SparseVectorsConfigBuilder::default();

		sparse_vectors_config.add_named_vector_params(
			BM25_VECTOR_NAME,
			SparseVectorParamsBuilder::default().modifier(Modifier::Idf as i32),
		);

		self.client
			.create_collection(
				CreateCollectionBuilder::new(self.collection.clone())
					.vectors_config(vectors_config)
					.sparse_vectors_config(sparse_vectors_config),
			)
			.await?;

		Ok(())
	}

	pub async fn search_dense(
		&self,
		vector: Vec<f32>,
		limit: u32,
		filter: Option<Filter>,
	) -> Result<Vec<ChunkHit>> {
		let mut search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector))
			.using(DENSE_VECTOR_NAME)
			.with_payload(true)
			.limit(limit as u64);

		if let Some(filter) = filter {
			search = search.filter(filter);
		}

		let response = self.client.query(search).await?;

		Ok(response.result.iter().filter_map(chunk_hit_from_point).collect())
	}

	pub async fn search_bm25(&self, text: &str, limit: u32) -> Result<Vec<ChunkHit>> {
		let search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(Document::new(text.to_string(), BM25_MODEL)))
			.using(BM25_VECTOR_NAME)
			.with_payload(true)
			.limit(limit as u64);
		let response = self.client.query(search).await?;

		Ok(response.result.iter().filter_map(chunk_hit_from_point).collect())
	}
}

/// Maps a scored point to a chunk hit. Points without a chunk id, parent id or text are skipped.
pub fn chunk_hit_from_point(point: &ScoredPoint) -> Option<ChunkHit> {
	let chunk_id = payload_string(&point.payload, "chunk_id").or_else(|| {
		point.id.as_ref().and_then(|id| match &id.point_id_options {
			Some(PointIdOptions::Uuid(uuid)) => Some(uuid.clone()),
			Some(PointIdOptions::Num(num)) => Some(num.to_string()),
			None => None,
		})
	})?;
	let doc_id = payload_string(&point.payload, "doc_id")?;
	let text = payload_string(&point.payload, "text")?;

	Some(ChunkHit {
		chunk_id,
		doc_id,
		score: point.score,
		title: payload_string(&point.payload, "title"),
		section: payload_string(&point.payload, "section"),
		source_kind: payload_string(&point.payload, "source_kind"),
		text,
	})
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	match &payload.get(key)?.kind {
		Some(Kind::StringValue(text)) if !text.is_empty() => Some(text.clone()),
		Some(Kind::IntegerValue(value)) => Some(value.to_string()),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use qdrant_client::qdrant::PointId;

	use super::*;

	fn string_value(text: &str) -> Value {
		Value { kind: Some(Kind::StringValue(text.to_string())) }
	}

	#[test]
	fn maps_payload_fields_and_falls_back_to_point_id() {
		let mut payload = HashMap::new();

		payload.insert("doc_id".to_string(), string_value("labour-act-2007"));
		payload.insert("text".to_string(), string_value("Section 12: Notice."));
		payload.insert("section".to_string(), Value { kind: Some(Kind::IntegerValue(12)) });

		let point = ScoredPoint {
			id: Some(PointId { point_id_options: Some(PointIdOptions::Num(7)) }),
			payload,
			score: 0.42,
			..Default::default()
		};
		let hit = chunk_hit_from_point(&point).expect("Expected a hit.");

		assert_eq!(hit.chunk_id, "7");
		assert_eq!(hit.doc_id, "labour-act-2007");
		assert_eq!(hit.section.as_deref(), Some("12"));
		assert_eq!(hit.title, None);
	}

	#[test]
	fn skips_points_without_parent() {
		let mut payload = HashMap::new();

		payload.insert("chunk_id".to_string(), string_value("c1"));
		payload.insert("text".to_string(), string_value("text"));

		let point = ScoredPoint { payload, ..Default::default() };

		assert!(chunk_hit_from_point(&point).is_none());
	}
}
