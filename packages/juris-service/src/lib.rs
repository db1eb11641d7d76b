pub mod aliases;
pub mod backends;
pub mod bundle;
pub mod cache;
pub mod conversational;
pub mod correction;
pub mod fusion;
pub mod graph;
pub mod intent;
pub mod quality;
pub mod rerank;
pub mod retrieval;
pub mod state;
pub mod synthesis;

mod error;

pub use error::{Error, Result};
pub use graph::{AnswerResponse, Node};
pub use state::{
	AgentState, Answer, AnswerRequest, Citation, ContextEntry, ConversationTurn,
	CorrectionDecision, CorrectionPhase, IntentResult, QualityVerdict, RetrievalCandidate,
	StateDelta, StatuteHint,
};

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use serde_json::Value;

use aliases::StatuteAliasIndex;
use juris_config::{Config, EmbeddingProviderConfig, LlmProviderConfig, ProviderConfig};
use juris_providers::{
	embedding,
	generation::{self, GenerationRequest},
	rerank as rerank_client,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, Result<Vec<f32>>>;
}

pub trait GenerationProvider
where
	Self: Send + Sync,
{
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		request: &'a GenerationRequest,
	) -> BoxFuture<'a, Result<Value>>;
}

pub trait VectorSearch
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		vector: &'a [f32],
		top_k: u32,
		filter: Option<&'a SearchFilter>,
	) -> BoxFuture<'a, Result<Vec<SearchHit>>>;
}

pub trait LexicalSearch
where
	Self: Send + Sync,
{
	fn search<'a>(&'a self, query: &'a str, top_k: u32) -> BoxFuture<'a, Result<Vec<SearchHit>>>;
}

pub trait DocumentStore
where
	Self: Send + Sync,
{
	/// One slot per requested id, `None` where the document does not exist.
	fn fetch_parents<'a>(
		&'a self,
		doc_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Option<ParentDocument>>>>;
}

pub trait StatuteIndex
where
	Self: Send + Sync,
{
	fn load_aliases(&self) -> BoxFuture<'_, Result<Vec<juris_domain::statute::StatuteAlias>>>;

	fn find_sections<'a>(
		&'a self,
		statute_id: &'a str,
		section: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<SearchHit>>>;
}

pub trait CacheStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;

	fn set<'a>(
		&'a self,
		key: &'a str,
		value: &'a Value,
		ttl: Duration,
	) -> BoxFuture<'a, Result<()>>;
}

/// One ranked hit from a search backend. `score` is a similarity for dense search and a
/// backend-specific relevance for lexical search.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchHit {
	pub chunk_id: String,
	pub doc_id: String,
	pub score: f32,
	pub title: Option<String>,
	pub section: Option<String>,
	pub source_kind: Option<String>,
	pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchFilter {
	/// Restricts hits to these source kinds. Empty means no restriction.
	pub source_kinds: Vec<String>,
}
impl SearchFilter {
	pub fn source_kind(kind: &str) -> Self {
		Self { source_kinds: vec![kind.to_string()] }
	}

	pub fn matches(&self, hit: &SearchHit) -> bool {
		self.source_kinds.is_empty()
			|| hit.source_kind.as_deref().is_some_and(|kind| {
				self.source_kinds.iter().any(|wanted| wanted.eq_ignore_ascii_case(kind))
			})
	}
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParentDocument {
	pub doc_id: String,
	pub title: String,
	pub source_kind: String,
	pub citation: Option<String>,
	pub content: String,
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub generation: Arc<dyn GenerationProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		rerank: Arc<dyn RerankProvider>,
		generation: Arc<dyn GenerationProvider>,
	) -> Self {
		Self { embedding, rerank, generation }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), rerank: provider.clone(), generation: provider }
	}
}

/// Search, corpus and cache collaborators. The cache is optional; without it every query is a
/// cold start.
#[derive(Clone)]
pub struct Backends {
	pub vector: Arc<dyn VectorSearch>,
	pub lexical: Arc<dyn LexicalSearch>,
	pub documents: Arc<dyn DocumentStore>,
	pub statutes: Arc<dyn StatuteIndex>,
	pub cache: Option<Arc<dyn CacheStore>>,
}

pub struct JurisService {
	pub cfg: Config,
	pub providers: Providers,
	pub backends: Backends,
	pub aliases: StatuteAliasIndex,
}
impl JurisService {
	pub fn new(cfg: Config, backends: Backends) -> Self {
		Self::with_providers(cfg, backends, Providers::default())
	}

	pub fn with_providers(cfg: Config, backends: Backends, providers: Providers) -> Self {
		let aliases =
			StatuteAliasIndex::new(Duration::from_secs(cfg.retrieval.shortcut.alias_ttl_secs));

		Self { cfg, providers, backends, aliases }
	}
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(embedding::embed(cfg, texts).await?) })
	}
}

impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, Result<Vec<f32>>> {
		Box::pin(async move { Ok(rerank_client::rerank(cfg, query, docs).await?) })
	}
}

impl GenerationProvider for DefaultProviders {
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		request: &'a GenerationRequest,
	) -> BoxFuture<'a, Result<Value>> {
		Box::pin(async move { Ok(generation::generate(cfg, request).await?) })
	}
}

/// Runs `fut` under a deadline. Expiry becomes `Error::Timeout` so callers handle it like any
/// other upstream failure.
pub(crate) async fn bounded<T, F>(operation: &'static str, timeout_ms: u64, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
		Ok(result) => result,
		Err(_) => Err(Error::Timeout { operation, timeout_ms }),
	}
}

/// Generation output passed through the schema check. Providers that skip validation still
/// produce a `Schema` error here.
pub(crate) async fn generate_checked(
	service: &JurisService,
	operation: &'static str,
	timeout_ms: u64,
	request: &GenerationRequest,
) -> Result<Value> {
	let value = bounded(
		operation,
		timeout_ms,
		service.providers.generation.generate(&service.cfg.providers.llm, request),
	)
	.await?;

	generation::validate_schema(&value, &request.schema)?;

	Ok(value)
}
