//! Snapshot fetching with a request-generation guard.

use super::TaskStore;
use crate::types::{Identity, Snapshot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// The result of one fetch: the snapshot plus the generation the fetch was
/// initiated under.
///
/// Generations increase monotonically with initiation order. The consumer
/// applies last-write-wins by generation at assignment time, so a slow,
/// stale response can never overwrite a fresher one.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Generation assigned when the fetch was initiated.
    pub generation: u64,
    /// The fetched snapshot (or the previous one, on store error).
    pub snapshot: Snapshot,
}

/// Retrieves authoritative snapshots from the backing store.
///
/// Concurrency contract: overlapping fetches may both run; there is no
/// cancellation. Superseded results are discarded by the consumer via the
/// generation guard; discarding is cheap, aborting is not worth the
/// protocol complexity.
///
/// Error contract: a failing store query logs a warning and yields the
/// previous successful snapshot unchanged (stale-but-available); the
/// snapshot is never cleared by an error.
#[derive(Clone)]
pub struct SnapshotFetcher {
    store: Arc<dyn TaskStore>,
    generation: Arc<AtomicU64>,
    /// Last successful snapshot and the owner it belongs to. The owner tag
    /// keeps a stale snapshot from leaking across an identity switch.
    last_good: Arc<Mutex<(Option<String>, Snapshot)>>,
}

impl std::fmt::Debug for SnapshotFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotFetcher")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

impl SnapshotFetcher {
    /// Create a fetcher over the given store.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            generation: Arc::new(AtomicU64::new(0)),
            last_good: Arc::new(Mutex::new((None, Snapshot::empty()))),
        }
    }

    /// Reserve the next generation. Call this at initiation time, before
    /// handing the fetch to a task, so generation order matches initiation
    /// order even when task scheduling reorders execution.
    pub fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fetch the snapshot for `identity` under a previously reserved
    /// generation.
    ///
    /// `None` returns an empty snapshot immediately without contacting the
    /// store (and resets the stale-on-error baseline, so a later failing
    /// fetch cannot resurrect a signed-out user's records).
    pub async fn fetch(&self, generation: u64, identity: Option<&Identity>) -> FetchOutcome {
        let Some(identity) = identity else {
            *self.last_good.lock() = (None, Snapshot::empty());
            return FetchOutcome {
                generation,
                snapshot: Snapshot::empty(),
            };
        };
        match self.store.select_tasks_by_owner(&identity.id).await {
            Ok(tasks) => {
                let snapshot = Snapshot::from(tasks);
                debug!(
                    user = %identity.id,
                    generation,
                    tasks = snapshot.len(),
                    "snapshot fetched"
                );
                *self.last_good.lock() = (Some(identity.id.clone()), snapshot.clone());
                FetchOutcome {
                    generation,
                    snapshot,
                }
            },
            Err(e) => {
                warn!(
                    user = %identity.id,
                    generation,
                    error = %e,
                    "snapshot fetch failed, keeping previous snapshot"
                );
                let guard = self.last_good.lock();
                let snapshot = match &*guard {
                    (Some(owner), snapshot) if *owner == identity.id => snapshot.clone(),
                    _ => Snapshot::empty(),
                };
                FetchOutcome {
                    generation,
                    snapshot,
                }
            },
        }
    }

    /// Convenience: reserve a generation and fetch in one call.
    pub async fn fetch_latest(&self, identity: Option<&Identity>) -> FetchOutcome {
        let generation = self.begin();
        self.fetch(generation, identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::types::TaskRecord;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct FlakyStore {
        fail: AtomicBool,
    }

    #[async_trait]
    impl TaskStore for FlakyStore {
        async fn select_tasks_by_owner(&self, owner_id: &str) -> Result<Vec<TaskRecord>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::store("select failed"));
            }
            Ok(vec![TaskRecord::new(owner_id, "water the plants")])
        }

        async fn upsert_profile(&self, _identity: &Identity) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn generations_increase_with_initiation_order() {
        let fetcher = SnapshotFetcher::new(Arc::new(FlakyStore {
            fail: AtomicBool::new(false),
        }));
        let first = fetcher.begin();
        let second = fetcher.begin();
        assert!(second > first);
    }

    #[tokio::test]
    async fn none_identity_returns_empty_without_store_contact() {
        let fetcher = SnapshotFetcher::new(Arc::new(FlakyStore {
            fail: AtomicBool::new(true),
        }));
        // Even with a failing store, a signed-out fetch succeeds instantly.
        let outcome = fetcher.fetch_latest(None).await;
        assert!(outcome.snapshot.is_empty());
    }

    #[tokio::test]
    async fn store_error_yields_previous_snapshot() {
        let store = Arc::new(FlakyStore {
            fail: AtomicBool::new(false),
        });
        let fetcher = SnapshotFetcher::new(store.clone());
        let identity = Identity::new("u1");

        let good = fetcher.fetch_latest(Some(&identity)).await;
        assert_eq!(good.snapshot.len(), 1);

        store.fail.store(true, Ordering::SeqCst);
        let stale = fetcher.fetch_latest(Some(&identity)).await;
        assert_eq!(stale.snapshot, good.snapshot);
    }

    #[tokio::test]
    async fn sign_out_resets_the_stale_baseline() {
        let store = Arc::new(FlakyStore {
            fail: AtomicBool::new(false),
        });
        let fetcher = SnapshotFetcher::new(store.clone());
        let identity = Identity::new("u1");

        fetcher.fetch_latest(Some(&identity)).await;
        fetcher.fetch_latest(None).await;

        store.fail.store(true, Ordering::SeqCst);
        let outcome = fetcher.fetch_latest(Some(&identity)).await;
        assert!(outcome.snapshot.is_empty());
    }

    #[tokio::test]
    async fn stale_baseline_never_crosses_owners() {
        let store = Arc::new(FlakyStore {
            fail: AtomicBool::new(false),
        });
        let fetcher = SnapshotFetcher::new(store.clone());

        fetcher.fetch_latest(Some(&Identity::new("u1"))).await;

        // A failing fetch for a different user must not surface u1's tasks.
        store.fail.store(true, Ordering::SeqCst);
        let outcome = fetcher.fetch_latest(Some(&Identity::new("u2"))).await;
        assert!(outcome.snapshot.is_empty());
    }
}
