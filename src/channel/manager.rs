//! The channel connection manager: at most one live connection, keyed by
//! identity, with an explicit `connect`/`disconnect` lifecycle.

use super::{
    ChannelEvent, ChannelHandle, ChannelOptions, ChannelSignal, ChannelStatus, ChannelTransport,
};
use crate::config::{ReconnectPolicy, SyncConfig};
use crate::error::Result;
use crate::types::Identity;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Capacity of the outbound signal channel. Slow subscribers that fall more
/// than this far behind observe a lag error and should re-fetch.
const SIGNAL_CAPACITY: usize = 64;

/// Process-scoped owner of the single push-channel connection.
///
/// Construct one manager per process (or per test) and inject it into the
/// sync orchestrator. The at-most-one invariant is a property of the
/// manager instance, which makes it directly testable: no module-level
/// state is involved.
///
/// Re-keying (`connect` with a different identity) fully closes the old
/// connection (event pump stopped, handle closed) *before* the new one is
/// constructed, so there is never a window with two delivering connections
/// and never a stale listener producing duplicate notifications.
///
/// Transport-level drop/reconnect cycles under the same identity are
/// handled inside the transport per the configured [`ReconnectPolicy`] and
/// never re-key the connection.
///
/// # Examples
///
/// ```rust,ignore
/// use tasksync::channel::ChannelManager;
/// use tasksync::types::Identity;
///
/// let manager = ChannelManager::new(endpoint, reconnect, transport);
/// manager.connect(&Identity::new("u1")).await?;
/// assert_eq!(manager.current_key().as_deref(), Some("u1"));
/// manager.disconnect().await?;
/// ```
pub struct ChannelManager {
    endpoint: Url,
    reconnect: ReconnectPolicy,
    transport: Arc<dyn ChannelTransport>,
    signals: broadcast::Sender<ChannelSignal>,
    /// The singleton slot. The async mutex serializes every lifecycle
    /// transition of the `{connection, key}` pair.
    active: Mutex<Option<ActiveConnection>>,
    /// Cheap synchronous mirror of the active key and status for
    /// observability and assertions.
    observed: Arc<RwLock<(Option<String>, ChannelStatus)>>,
}

struct ActiveConnection {
    key: String,
    pump: JoinHandle<()>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (key, status) = self.observed.read().clone();
        f.debug_struct("ChannelManager")
            .field("endpoint", &self.endpoint.as_str())
            .field("key", &key)
            .field("status", &status)
            .field("transport", &self.transport.transport_type())
            .finish()
    }
}

impl ChannelManager {
    /// Create a manager for the given endpoint, policy, and transport.
    pub fn new(
        endpoint: Url,
        reconnect: ReconnectPolicy,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            endpoint,
            reconnect,
            transport,
            signals,
            active: Mutex::new(None),
            observed: Arc::new(RwLock::new((None, ChannelStatus::Closed))),
        }
    }

    /// Create a manager from configuration.
    pub fn from_config(config: &SyncConfig, transport: Arc<dyn ChannelTransport>) -> Self {
        Self::new(
            config.channel_url.clone(),
            config.reconnect.clone(),
            transport,
        )
    }

    /// Connect for the given identity.
    ///
    /// Idempotent for the same identity: an existing connection keyed to
    /// `identity.id` is left untouched. A connection keyed differently is
    /// fully closed first, then a new one is opened carrying `identity.id`
    /// as establishment metadata.
    pub async fn connect(&self, identity: &Identity) -> Result<()> {
        let mut active = self.active.lock().await;

        if let Some(conn) = active.as_ref() {
            if conn.pump.is_finished() {
                // The connection died for good (reconnect policy
                // exhausted); the slot is stale and must be replaced.
                debug!(user = %conn.key, "replacing dead channel connection");
            } else if conn.key == identity.id {
                return Ok(());
            } else {
                info!(
                    old = %conn.key,
                    new = %identity.id,
                    "identity changed, re-keying channel connection"
                );
            }
        }

        // Close the old connection completely before constructing the new
        // one: the pump must stop forwarding before a new listener exists.
        if let Some(old) = active.take() {
            self.teardown(old).await;
        }

        self.set_observed(Some(identity.id.clone()), ChannelStatus::Connecting);
        let options = ChannelOptions::for_identity(identity.id.clone(), self.reconnect.clone());
        let handle = match self.transport.open(&self.endpoint, options).await {
            Ok(handle) => handle,
            Err(e) => {
                self.set_observed(None, ChannelStatus::Closed);
                return Err(e);
            },
        };
        debug!(
            user = %identity.id,
            transport = self.transport.transport_type(),
            "channel connection opened"
        );

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_events(
            handle,
            self.signals.clone(),
            Arc::clone(&self.observed),
            cancel.clone(),
        ));
        *active = Some(ActiveConnection {
            key: identity.id.clone(),
            pump,
            cancel,
        });
        Ok(())
    }

    /// Close the connection, if any, and clear the slot. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(old) = active.take() {
            info!(user = %old.key, "closing channel connection");
            self.teardown(old).await;
        }
        Ok(())
    }

    /// Subscribe to the manager's logical signals.
    ///
    /// Subscribing and dropping receivers never affects the connection
    /// lifecycle.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelSignal> {
        self.signals.subscribe()
    }

    /// The identity id the current connection is keyed to, or `None`.
    pub fn current_key(&self) -> Option<String> {
        self.observed.read().0.clone()
    }

    /// Lifecycle status of the managed connection.
    pub fn status(&self) -> ChannelStatus {
        self.observed.read().1
    }

    async fn teardown(&self, conn: ActiveConnection) {
        conn.cancel.cancel();
        if let Err(e) = conn.pump.await {
            if !e.is_cancelled() {
                warn!(error = %e, "channel event pump ended abnormally");
            }
        }
        self.set_observed(None, ChannelStatus::Closed);
    }

    fn set_observed(&self, key: Option<String>, status: ChannelStatus) {
        *self.observed.write() = (key, status);
    }
}

/// Event pump for one connection: reads transport events and forwards the
/// logical signals until the connection dies or teardown cancels it.
async fn pump_events(
    mut handle: Box<dyn ChannelHandle>,
    signals: broadcast::Sender<ChannelSignal>,
    observed: Arc<RwLock<(Option<String>, ChannelStatus)>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => {
                if let Err(e) = handle.close().await {
                    debug!(error = %e, "error closing channel handle");
                }
                return;
            },
            event = handle.next_event() => event,
        };
        match event {
            Ok(ChannelEvent::Connected) => {
                observed.write().1 = ChannelStatus::Open;
                let _ = signals.send(ChannelSignal::Opened);
            },
            Ok(ChannelEvent::Disconnected { reason }) => {
                // Transport-level drop; the transport reconnects on its own.
                // Not an identity change, so no re-key and no signal.
                warn!(%reason, "channel transport disconnected");
                observed.write().1 = ChannelStatus::Connecting;
            },
            Ok(ChannelEvent::ConnectError { message }) => {
                warn!(%message, "channel connect error");
            },
            Ok(ChannelEvent::Greeting { message }) => {
                debug!(%message, "channel server greeting");
            },
            Ok(ChannelEvent::TaskUpdate { payload }) => {
                debug!("change notification received");
                let _ = signals.send(ChannelSignal::ChangeNotification(payload));
            },
            Err(e) => {
                debug!(error = %e, "channel connection ended");
                // No connection is keyed anymore; clear the key so
                // observers do not see a phantom connection.
                *observed.write() = (None, ChannelStatus::Closed);
                return;
            },
        }
    }
}
