//! The sync orchestrator: composes identity tracking, channel management,
//! and snapshot fetching into one serialized state machine.
//!
//! The orchestrator is the single consumer of identity changes and channel
//! notifications. Both triggers cause an authoritative snapshot fetch, by
//! design: the identity change guarantees correctness at session start (a
//! returning user never sees stale data), the change notification
//! guarantees liveness afterwards (edits from other sessions appear without
//! user action). Either alone is insufficient.
//!
//! All event handling runs on one loop task, so identity-change handling
//! and notification handling are serialized with respect to each other.
//! Fetches are spawned off the loop and report back through an internal
//! channel; the request-generation guard (see
//! [`SnapshotFetcher`](crate::store::SnapshotFetcher)) makes assignment
//! last-write-wins, which is the only ordering safety net between a store
//! query and a later push notification. In-flight fetches are never
//! cancelled; superseded results are simply discarded.

use crate::channel::{ChannelManager, ChannelSignal};
use crate::error::{Error, Result};
use crate::identity::IdentityState;
use crate::store::{FetchOutcome, SnapshotFetcher, TaskStore};
use crate::types::{Identity, Snapshot};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The synchronized state exposed to presentation code.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    /// Current identity, or `None` when signed out.
    pub identity: Option<Identity>,
    /// The last applied snapshot. Empty when signed out.
    pub snapshot: Snapshot,
    /// True from a sign-in identity change until the fetch it triggered
    /// completes. Sign-out resolves immediately, and silent refreshes
    /// (notifications, manual refresh) never set this.
    pub loading: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            identity: None,
            snapshot: Snapshot::empty(),
            loading: true,
        }
    }
}

/// Commands accepted by the orchestrator loop.
#[derive(Debug)]
enum Command {
    Refresh,
    Shutdown,
}

/// Handle to a running orchestrator.
///
/// Presentation code reads [`state`](Self::state) (or awaits
/// [`subscribe`](Self::subscribe)d changes) and may trigger a manual
/// [`refresh`](Self::refresh). Dropping the handle without
/// [`shutdown`](Self::shutdown) leaves the orchestrator running for the
/// life of the process.
#[derive(Debug)]
pub struct SyncHandle {
    state_rx: watch::Receiver<SyncState>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// The current synchronized state.
    pub fn state(&self) -> SyncState {
        self.state_rx.borrow().clone()
    }

    /// A watch receiver over the synchronized state.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    /// Trigger a silent re-fetch for the current identity, equivalent to
    /// the fetch a change notification causes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misuse`] when the orchestrator has stopped;
    /// driving a dead handle is a wiring bug, not a runtime condition, and
    /// fails loudly at the call site.
    pub fn refresh(&self) -> Result<()> {
        self.cmd_tx
            .send(Command::Refresh)
            .map_err(|_| Error::Misuse("refresh() called on a stopped sync orchestrator"))
    }

    /// Stop the orchestrator: deregister the notification listener,
    /// disconnect the channel, and wait for the loop to finish. Idempotent.
    pub async fn shutdown(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Builds and runs the orchestrator loop.
pub struct SyncOrchestrator {
    identity_rx: watch::Receiver<IdentityState>,
    signals: broadcast::Receiver<ChannelSignal>,
    manager: Arc<ChannelManager>,
    fetcher: SnapshotFetcher,
    store: Arc<dyn TaskStore>,
    state_tx: watch::Sender<SyncState>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    done_tx: mpsc::UnboundedSender<FetchOutcome>,
    done_rx: mpsc::UnboundedReceiver<FetchOutcome>,
    state: SyncState,
    /// False until the first identity resolution has been handled. The
    /// first resolution always runs, even for "signed out", so `loading`
    /// resolves and the UI is never stuck.
    reconciled: bool,
    /// Highest generation applied to the snapshot (last-write-wins guard).
    applied_generation: u64,
    /// Generation of the most recently initiated fetch; `loading` clears
    /// only when a fetch at or past this generation completes.
    latest_generation: u64,
}

impl SyncOrchestrator {
    /// Spawn the orchestrator over the given identity stream, channel
    /// manager, and backing store.
    ///
    /// The notification subscription is registered here, before any
    /// connection exists, so no notification can be missed between connect
    /// and subscribe.
    pub fn spawn(
        identity_rx: watch::Receiver<IdentityState>,
        manager: Arc<ChannelManager>,
        store: Arc<dyn TaskStore>,
    ) -> SyncHandle {
        let (state_tx, state_rx) = watch::channel(SyncState::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let signals = manager.subscribe();
        let fetcher = SnapshotFetcher::new(Arc::clone(&store));

        let orchestrator = Self {
            identity_rx,
            signals,
            manager,
            fetcher,
            store,
            state_tx,
            cmd_rx,
            done_tx,
            done_rx,
            state: SyncState::default(),
            reconciled: false,
            applied_generation: 0,
            latest_generation: 0,
        };
        let task = tokio::spawn(orchestrator.run());

        SyncHandle {
            state_rx,
            cmd_tx,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        // The tracker may have emitted before we were spawned; reconcile
        // with whatever the identity state already is.
        let initial = self.identity_rx.borrow_and_update().clone();
        if !initial.loading {
            self.on_identity_change(initial.identity).await;
        }

        let mut identity_open = true;
        let mut signals_open = true;
        loop {
            tokio::select! {
                changed = self.identity_rx.changed(), if identity_open => {
                    match changed {
                        Ok(()) => {
                            let id_state = self.identity_rx.borrow_and_update().clone();
                            if !id_state.loading {
                                self.on_identity_change(id_state.identity).await;
                            }
                        },
                        Err(_) => {
                            // Tracker gone; no further identity changes.
                            debug!("identity stream closed");
                            identity_open = false;
                        },
                    }
                },
                signal = self.signals.recv(), if signals_open => {
                    match signal {
                        Ok(ChannelSignal::ChangeNotification(_payload)) => {
                            self.on_notification();
                        },
                        Ok(ChannelSignal::Opened) => {
                            debug!("channel opened");
                        },
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Missed notifications; one fetch covers them
                            // all, snapshots are wholesale.
                            warn!(missed, "notification listener lagged, re-fetching");
                            self.start_fetch();
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("channel signal stream closed");
                            signals_open = false;
                        },
                    }
                },
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Refresh) => {
                            debug!("manual refresh requested");
                            self.start_fetch();
                        },
                        Some(Command::Shutdown) | None => break,
                    }
                },
                Some(outcome) = self.done_rx.recv() => {
                    self.apply_fetch(outcome);
                },
            }
        }

        if let Err(e) = self.manager.disconnect().await {
            warn!(error = %e, "error disconnecting channel during shutdown");
        }
        debug!("sync orchestrator stopped");
    }

    /// Handle an identity transition: re-key the channel, sync the profile,
    /// and fetch the new identity's snapshot with `loading` shown.
    async fn on_identity_change(&mut self, identity: Option<Identity>) {
        let new_key = identity.as_ref().map(|i| i.id.as_str());
        let old_key = self.state.identity.as_ref().map(|i| i.id.as_str());
        if self.reconciled && new_key == old_key {
            // Same session, but display attributes may still have changed
            // (profile rename, new avatar). Refresh them and re-sync the
            // profile without re-keying or re-fetching.
            if identity != self.state.identity {
                self.state.identity = identity.clone();
                self.publish();
                if let Some(identity) = identity {
                    self.sync_profile(identity);
                }
            }
            return;
        }
        self.reconciled = true;

        self.state.identity = identity.clone();
        match &identity {
            Some(identity) => {
                self.state.loading = true;
                self.publish();
                if let Err(e) = self.manager.connect(identity).await {
                    // The transport keeps retrying per its policy; the
                    // snapshot fetch below proceeds regardless.
                    warn!(user = %identity.id, error = %e, "channel connect failed");
                }
                self.sync_profile(identity.clone());
                self.start_fetch();
            },
            None => {
                // Sign-out clears the snapshot in the same update that
                // drops the identity; the fetch below only advances the
                // generation so in-flight results for the previous
                // identity are superseded, and resets the fetcher's
                // stale-on-error baseline.
                self.state.snapshot = Snapshot::empty();
                self.state.loading = false;
                self.publish();
                if let Err(e) = self.manager.disconnect().await {
                    warn!(error = %e, "channel disconnect failed");
                }
                self.start_fetch();
                self.applied_generation = self.latest_generation;
            },
        }
    }

    /// Best-effort profile sync, off the loop so a slow store cannot delay
    /// event handling.
    fn sync_profile(&self, identity: Identity) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.upsert_profile(&identity).await {
                warn!(user = %identity.id, error = %e, "profile sync failed");
            }
        });
    }

    /// Handle a change notification: silent re-fetch for the identity
    /// current *now*, not the one current when the listener was registered.
    fn on_notification(&mut self) {
        if self.state.identity.is_none() {
            // Delayed event straggling past a sign-out; the next sign-in
            // fetches fresh anyway.
            debug!("change notification while signed out, ignoring");
            return;
        }
        debug!("change notification, re-fetching snapshot");
        self.start_fetch();
    }

    /// Initiate a fetch for the current identity. The generation is
    /// reserved here, on the loop, so generation order equals initiation
    /// order regardless of task scheduling.
    fn start_fetch(&mut self) {
        let generation = self.fetcher.begin();
        self.latest_generation = generation;
        let fetcher = self.fetcher.clone();
        let identity = self.state.identity.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let outcome = fetcher.fetch(generation, identity.as_ref()).await;
            // The loop owns the receiver; if it is gone the result is moot.
            let _ = done_tx.send(outcome);
        });
    }

    /// Apply a completed fetch under the last-write-wins guard.
    fn apply_fetch(&mut self, outcome: FetchOutcome) {
        if outcome.generation > self.applied_generation {
            self.applied_generation = outcome.generation;
            self.state.snapshot = outcome.snapshot;
        } else {
            debug!(
                generation = outcome.generation,
                applied = self.applied_generation,
                "discarding superseded fetch result"
            );
        }
        if outcome.generation >= self.latest_generation {
            self.state.loading = false;
        }
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}
