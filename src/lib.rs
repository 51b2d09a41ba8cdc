//! # tasksync
//!
//! Session-bound realtime task synchronization: keeps a user's task list in
//! sync across an identity provider (sign-in state), a relational backing
//! store (task records), and a realtime push channel (change
//! notifications).
//!
//! The crate is the synchronization *core*, not a UI: it tracks identity
//! transitions, maintains exactly one live push-channel connection scoped to
//! the current identity, tears that connection down and re-establishes it
//! across login/logout/identity-switch, and triggers authoritative snapshot
//! fetches in response to push notifications, all without races, duplicate
//! deliveries, or stale fetch results overwriting fresh ones.
//!
//! ## Architecture
//!
//! - [`identity::IdentityTracker`] observes the provider's sign-in stream
//!   and publishes `{identity, loading}`.
//! - [`channel::ChannelManager`] owns at most one push-channel connection,
//!   keyed by identity; re-keys on identity change, never on transport
//!   reconnects.
//! - [`store::SnapshotFetcher`] fetches the authoritative task snapshot
//!   with a request-generation guard (last-write-wins) and stale-on-error
//!   retention.
//! - [`sync::SyncOrchestrator`] is the single consumer composing the three:
//!   identity change and change notification both trigger a fetch; the
//!   resulting [`sync::SyncState`] is what presentation code renders.
//!
//! The three external collaborators are trait boundaries
//! ([`identity::IdentityProvider`], [`store::TaskStore`],
//! [`channel::ChannelTransport`]), so the whole core is testable with
//! in-process fakes and deployable against real services.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tasksync::channel::{ChannelManager, ws::WebSocketTransport};
//! use tasksync::config::SyncConfig;
//! use tasksync::identity::IdentityTracker;
//! use tasksync::store::RestTaskStore;
//! use tasksync::sync::SyncOrchestrator;
//!
//! # async fn example(provider: Arc<dyn tasksync::identity::IdentityProvider>) -> tasksync::Result<()> {
//! let config = SyncConfig::from_env()?;
//! let manager = Arc::new(ChannelManager::from_config(
//!     &config,
//!     Arc::new(WebSocketTransport::new()),
//! ));
//! let store = Arc::new(RestTaskStore::new(config.store.as_ref().unwrap())?);
//!
//! let tracker = IdentityTracker::spawn(provider).await?;
//! let handle = SyncOrchestrator::spawn(tracker.subscribe(), manager, store);
//!
//! let mut state = handle.subscribe();
//! while state.changed().await.is_ok() {
//!     let view = state.borrow().clone();
//!     println!("{} tasks (loading: {})", view.snapshot.len(), view.loading);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `logging` (default): [`init_tracing`] convenience for binaries and
//!   tests (env-filtered `tracing-subscriber`).
//! - `websocket`: [`channel::ws::WebSocketTransport`] over
//!   tokio-tungstenite.
//! - `http-client`: [`store::RestTaskStore`] over reqwest.
//! - `full`: everything above.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod store;
pub mod sync;
pub mod types;

pub use error::{Error, Result, TransportError};

pub use channel::{ChannelEvent, ChannelManager, ChannelSignal, ChannelStatus};
pub use config::{ReconnectPolicy, SyncConfig};
pub use identity::{IdentityProvider, IdentityState, IdentityTracker};
pub use store::{SnapshotFetcher, TaskStore};
pub use sync::{SyncHandle, SyncOrchestrator, SyncState};
pub use types::{Identity, Snapshot, TaskRecord, TaskState};

/// Install an env-filtered `tracing` subscriber (`RUST_LOG` controls
/// verbosity). Intended for binaries and test setups; libraries embedding
/// this crate should install their own subscriber instead.
#[cfg(feature = "logging")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
