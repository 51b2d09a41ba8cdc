//! Task records as stored in the relational backing store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not yet completed.
    Pending,
    /// Marked done.
    Done,
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::Pending
    }
}

/// One task row owned by the backing store.
///
/// The client only ever holds these as members of the last fetched
/// [`Snapshot`](crate::types::Snapshot); they are never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Store-assigned record id.
    pub id: Uuid,

    /// Identity id of the owning user.
    pub owner_id: String,

    /// Task title.
    pub title: String,

    /// Scheduled due time, when the task is dated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,

    /// Whether the schedule is an all-day entry rather than a point in time.
    #[serde(default)]
    pub all_day: bool,

    /// Store-assigned sort position within the owner's list.
    #[serde(default)]
    pub position: i64,

    /// Lifecycle state.
    #[serde(default)]
    pub state: TaskState,
}

impl TaskRecord {
    /// Create a pending, unscheduled task record.
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            title: title.into(),
            due_at: None,
            all_day: false,
            position: 0,
            state: TaskState::default(),
        }
    }

    /// Set the due time.
    pub fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    /// Set the sort position.
    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }
}
