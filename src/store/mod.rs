//! Backing-store boundary and snapshot fetching.
//!
//! The relational store owns every task record; the client only ever works
//! with disposable snapshot copies. [`TaskStore`] is the consumed boundary
//! (query + profile upsert); [`SnapshotFetcher`] wraps it with the
//! request-generation guard and stale-on-error retention the orchestrator
//! relies on.

mod fetcher;

pub use fetcher::{FetchOutcome, SnapshotFetcher};

#[cfg(feature = "http-client")]
mod rest;

#[cfg(feature = "http-client")]
pub use rest::RestTaskStore;

use crate::error::Result;
use crate::types::{Identity, TaskRecord};
use async_trait::async_trait;

/// The relational backing-store boundary.
///
/// Both operations are fallible with a textual error; neither failure is
/// fatal to the sync core.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Return the full, ordered set of task records owned by `owner_id`
    /// (store-assigned order).
    async fn select_tasks_by_owner(&self, owner_id: &str) -> Result<Vec<TaskRecord>>;

    /// Insert or update the profile row for the given identity.
    async fn upsert_profile(&self, identity: &Identity) -> Result<()>;
}
