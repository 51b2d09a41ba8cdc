//! Push-channel boundary: transport contract and connection management.
//!
//! The channel is the realtime leg of the synchronization triangle. Its
//! transport (WebSocket with polling fallback, reconnect/backoff internals)
//! is an external collaborator specified only by its observable contract:
//! [`ChannelTransport::open`] with identity metadata, and a stream of
//! [`ChannelEvent`]s read from the returned [`ChannelHandle`].
//!
//! The [`ChannelManager`] owns at most one live connection at a time, keyed
//! by the identity it was opened for, and re-keys (full close, then reopen)
//! when the identity changes. Everything else in the system sees only the
//! manager's logical [`ChannelSignal`]s, never the transport handle.

mod manager;

pub use manager::ChannelManager;

#[cfg(feature = "websocket")]
pub mod ws;

use crate::config::ReconnectPolicy;
use crate::error::Result;
use async_trait::async_trait;
use url::Url;

/// Transport mechanisms in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Primary: full-duplex WebSocket.
    WebSocket,
    /// Fallback: long polling, for servers that cannot hold sockets.
    Polling,
}

/// Connection-establishment options handed to the transport.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Identity id carried as establishment metadata so the server can
    /// scope/route messages to this identity.
    pub identity_tag: Option<String>,
    /// Transport preference order (primary first).
    pub transports: Vec<TransportKind>,
    /// Reconnection policy, executed entirely inside the transport.
    pub reconnect: ReconnectPolicy,
}

impl ChannelOptions {
    /// Options for a connection scoped to the given identity id.
    pub fn for_identity(identity_tag: impl Into<String>, reconnect: ReconnectPolicy) -> Self {
        Self {
            identity_tag: Some(identity_tag.into()),
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            reconnect,
        }
    }
}

/// Inbound events observable on a channel connection.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The transport-level connection is established (also emitted after an
    /// internal reconnect).
    Connected,
    /// The transport-level connection dropped; the transport's reconnect
    /// policy decides what happens next.
    Disconnected {
        /// Transport-supplied reason.
        reason: String,
    },
    /// A connection attempt failed.
    ConnectError {
        /// Transport-supplied error message.
        message: String,
    },
    /// Server greeting after the connection is scoped to the identity.
    Greeting {
        /// Human-readable greeting.
        message: String,
    },
    /// The backing store's task data may have changed. The payload is
    /// advisory only: it triggers a fetch, it never patches the snapshot.
    TaskUpdate {
        /// Advisory payload forwarded to subscribers.
        payload: serde_json::Value,
    },
}

/// Lifecycle status of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Establishing (initial dial or internal reconnect in progress).
    Connecting,
    /// Live and delivering events.
    Open,
    /// No connection exists.
    Closed,
}

/// Logical outbound signals the manager emits to its subscribers.
///
/// Transport-level connect/disconnect cycles are deliberately absent:
/// consumers react to identity changes and change notifications, never to
/// transport churn.
#[derive(Debug, Clone)]
pub enum ChannelSignal {
    /// A connection keyed to the current identity is open.
    Opened,
    /// A change notification arrived; a fresh snapshot should be fetched.
    ChangeNotification(serde_json::Value),
}

/// Factory boundary for opening channel connections.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Open a connection to `endpoint` with the given establishment
    /// options. Returns once the handle is usable; reconnection after that
    /// point is the handle's own business.
    async fn open(&self, endpoint: &Url, options: ChannelOptions) -> Result<Box<dyn ChannelHandle>>;

    /// Short transport name for logs.
    fn transport_type(&self) -> &'static str;
}

/// One live channel connection.
///
/// Owned exclusively by the manager's event pump; no other component may
/// hold it.
#[async_trait]
pub trait ChannelHandle: Send {
    /// Wait for the next inbound event. Returns
    /// [`TransportError::ConnectionClosed`](crate::error::TransportError::ConnectionClosed)
    /// once the connection is permanently gone (closed, or reconnect policy
    /// exhausted).
    async fn next_event(&mut self) -> Result<ChannelEvent>;

    /// Close the connection. Idempotent.
    async fn close(&mut self) -> Result<()>;
}
