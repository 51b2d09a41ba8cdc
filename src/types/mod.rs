//! Core data types shared across the synchronization components.
//!
//! Everything here is a disposable copy of server-owned state: the client
//! never treats a [`TaskRecord`] or a snapshot as a source of truth, only as
//! the result of the most recent authoritative fetch.

mod identity;
mod task;

pub use identity::Identity;
pub use task::{TaskRecord, TaskState};

use serde::{Deserialize, Serialize};

/// The full set of task records for one identity as of the last successful
/// fetch, ordered by the store-assigned position.
///
/// Snapshots are replaced wholesale on every fetch. Push-channel
/// notifications are triggers for a new fetch, never payloads that patch a
/// snapshot incrementally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Ordered task records. Empty when signed out.
    pub tasks: Vec<TaskRecord>,
}

impl Snapshot {
    /// An empty snapshot, used for the signed-out state.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of task records in the snapshot.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl From<Vec<TaskRecord>> for Snapshot {
    fn from(tasks: Vec<TaskRecord>) -> Self {
        Self { tasks }
    }
}
