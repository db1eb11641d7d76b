use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use tokio::sync::RwLock;
use tracing::warn;

use juris_domain::statute::StatuteAlias;

use crate::{Error, Result, StatuteIndex};

/// Longest wait before retrying a load that failed with nothing cached.
const FAILED_LOAD_BACKOFF: Duration = Duration::from_secs(5);

struct Snapshot {
	aliases: Arc<Vec<StatuteAlias>>,
	loaded_at: Instant,
}

#[derive(Default)]
struct AliasState {
	current: Option<Snapshot>,
	failed_at: Option<Instant>,
}

/// Statute alias table loaded on first use and refreshed once it is older than `ttl`. A failed
/// refresh keeps serving the previous snapshot for another `ttl`; a failed first load is not
/// retried until a short backoff has passed.
pub struct StatuteAliasIndex {
	ttl: Duration,
	state: RwLock<AliasState>,
}
impl StatuteAliasIndex {
	pub fn new(ttl: Duration) -> Self {
		Self { ttl, state: RwLock::new(AliasState::default()) }
	}

	pub async fn aliases(
		&self,
		index: &dyn StatuteIndex,
		timeout_ms: u64,
	) -> Result<Arc<Vec<StatuteAlias>>> {
		{
			let guard = self.state.read().await;

			if let Some(aliases) = self.cached(&guard) {
				return aliases;
			}
		}

		let mut guard = self.state.write().await;

		// Another task may have refreshed while this one waited for the write lock.
		if let Some(aliases) = self.cached(&guard) {
			return aliases;
		}

		match crate::bounded("Alias load", timeout_ms, index.load_aliases()).await {
			Ok(aliases) => {
				let aliases = Arc::new(aliases);

				let loaded_at = Instant::now();

				guard.current = Some(Snapshot { aliases: aliases.clone(), loaded_at });
				guard.failed_at = None;

				Ok(aliases)
			},
			Err(err) => match guard.current.as_mut() {
				Some(snapshot) => {
					warn!(error = %err, "Statute alias refresh failed; serving stale snapshot.");

					snapshot.loaded_at = Instant::now();

					Ok(snapshot.aliases.clone())
				},
				None => {
					guard.failed_at = Some(Instant::now());

					Err(err)
				},
			},
		}
	}

	fn cached(&self, state: &AliasState) -> Option<Result<Arc<Vec<StatuteAlias>>>> {
		if let Some(snapshot) = state.current.as_ref()
			&& snapshot.loaded_at.elapsed() < self.ttl
		{
			return Some(Ok(snapshot.aliases.clone()));
		}
		if state.current.is_none()
			&& let Some(failed_at) = state.failed_at
			&& failed_at.elapsed() < self.ttl.min(FAILED_LOAD_BACKOFF)
		{
			return Some(Err(Error::Storage {
				message: "Statute aliases are unavailable; retrying after backoff.".to_string(),
			}));
		}

		None
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::{BoxFuture, Error, SearchHit};

	struct CountingIndex {
		loads: AtomicUsize,
		fail_after: usize,
		hang: bool,
	}
	impl CountingIndex {
		fn failing_after(fail_after: usize) -> Self {
			Self { loads: AtomicUsize::new(0), fail_after, hang: false }
		}

		fn loads(&self) -> usize {
			self.loads.load(Ordering::SeqCst)
		}
	}

	impl StatuteIndex for CountingIndex {
		fn load_aliases(&self) -> BoxFuture<'_, Result<Vec<StatuteAlias>>> {
			let load = self.loads.fetch_add(1, Ordering::SeqCst);
			let fail = load >= self.fail_after;
			let hang = self.hang;

			Box::pin(async move {
				if hang {
					std::future::pending::<()>().await;
				}
				if fail {
					return Err(Error::Storage { message: "down".to_string() });
				}

				Ok(vec![StatuteAlias {
					statute_id: "labour-act-2007".to_string(),
					alias: "labour act".to_string(),
					title: "Labour Act".to_string(),
					chapter: None,
				}])
			})
		}

		fn find_sections<'a>(
			&'a self,
			_statute_id: &'a str,
			_section: &'a str,
			_limit: u32,
		) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
			Box::pin(async { Ok(Vec::new()) })
		}
	}

	#[tokio::test]
	async fn loads_once_within_ttl() {
		let index = CountingIndex::failing_after(usize::MAX);
		let aliases = StatuteAliasIndex::new(Duration::from_secs(60));

		aliases.aliases(&index, 1_000).await.expect("load failed");
		aliases.aliases(&index, 1_000).await.expect("load failed");

		assert_eq!(index.loads(), 1);
	}

	#[tokio::test]
	async fn failed_refresh_keeps_stale_snapshot() {
		let index = CountingIndex::failing_after(1);
		let aliases = StatuteAliasIndex::new(Duration::ZERO);
		let first = aliases.aliases(&index, 1_000).await.expect("load failed");
		let second = aliases.aliases(&index, 1_000).await.expect("stale snapshot expected");

		assert_eq!(first, second);
		assert_eq!(index.loads(), 2);
	}

	#[tokio::test]
	async fn failed_refresh_waits_a_full_ttl_before_retrying() {
		let index = CountingIndex::failing_after(1);
		let aliases = StatuteAliasIndex::new(Duration::from_millis(50));

		aliases.aliases(&index, 1_000).await.expect("load failed");
		tokio::time::sleep(Duration::from_millis(60)).await;
		aliases.aliases(&index, 1_000).await.expect("stale snapshot expected");
		aliases.aliases(&index, 1_000).await.expect("stale snapshot expected");

		assert_eq!(index.loads(), 2);
	}

	#[tokio::test]
	async fn first_load_failure_is_reported_and_backs_off() {
		let index = CountingIndex::failing_after(0);
		let aliases = StatuteAliasIndex::new(Duration::from_secs(60));

		assert!(aliases.aliases(&index, 1_000).await.is_err());
		assert!(aliases.aliases(&index, 1_000).await.is_err());
		assert_eq!(index.loads(), 1);
	}

	#[tokio::test]
	async fn hanging_store_times_out() {
		let index = CountingIndex { hang: true, ..CountingIndex::failing_after(usize::MAX) };
		let aliases = StatuteAliasIndex::new(Duration::from_secs(60));
		let err = aliases.aliases(&index, 20).await.expect_err("Load must time out.");

		assert!(matches!(err, Error::Timeout { operation: "Alias load", .. }));
	}
}
