//! WebSocket channel transport (feature `websocket`).
//!
//! Speaks newline-free JSON event frames over a WebSocket:
//!
//! ```json
//! {"event": "task_update", "data": {"op": "update"}}
//! ```
//!
//! Recognized inbound event names: `connected` (server greeting) and
//! `task_update` (change notification); transport-level `connect`,
//! `disconnect`, and `connect_error` are synthesized from the socket
//! lifecycle. Unknown events are ignored.
//!
//! The identity tag travels as a `uid` query parameter on the handshake URL
//! so the server can scope the connection immediately.
//!
//! Reconnection is implemented here, inside the handle, per the configured
//! [`ReconnectPolicy`](crate::config::ReconnectPolicy): the connection
//! manager above never observes a same-identity reconnect as anything but
//! `Disconnected` followed by `Connected`.

use super::{ChannelEvent, ChannelHandle, ChannelOptions, ChannelTransport};
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound JSON frame.
#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// WebSocket implementation of [`ChannelTransport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a WebSocket transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn open(&self, endpoint: &Url, options: ChannelOptions) -> Result<Box<dyn ChannelHandle>> {
        let url = handshake_url(endpoint, &options);
        let stream = dial(&url, &options).await?;
        let mut pending = VecDeque::new();
        pending.push_back(ChannelEvent::Connected);
        Ok(Box::new(WebSocketHandle {
            url,
            options,
            stream: Some(stream),
            pending,
            attempts: 0,
            closed: false,
        }))
    }

    fn transport_type(&self) -> &'static str {
        "websocket"
    }
}

/// One live WebSocket connection with internal reconnection.
struct WebSocketHandle {
    url: Url,
    options: ChannelOptions,
    stream: Option<WsStream>,
    pending: VecDeque<ChannelEvent>,
    attempts: u32,
    closed: bool,
}

#[async_trait]
impl ChannelHandle for WebSocketHandle {
    async fn next_event(&mut self) -> Result<ChannelEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            if self.closed {
                return Err(TransportError::ConnectionClosed.into());
            }

            match self.stream.as_mut() {
                Some(ws) => match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_frame(text.as_str()) {
                            self.pending.push_back(event);
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "server closed".to_string());
                        self.stream = None;
                        self.pending.push_back(ChannelEvent::Disconnected { reason });
                    },
                    // Ping/pong and binary frames carry no channel events.
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        self.stream = None;
                        self.pending.push_back(ChannelEvent::Disconnected {
                            reason: e.to_string(),
                        });
                    },
                    None => {
                        self.stream = None;
                        self.pending.push_back(ChannelEvent::Disconnected {
                            reason: "stream ended".to_string(),
                        });
                    },
                },
                None => self.reconnect().await?,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        if let Some(mut ws) = self.stream.take() {
            if let Err(e) = ws.send(Message::Close(None)).await {
                debug!(error = %e, "error sending close frame");
            }
        }
        Ok(())
    }
}

impl WebSocketHandle {
    /// One reconnection step. Queues `Connected` on success or
    /// `ConnectError` on a failed attempt; errors out once the policy is
    /// exhausted or disabled.
    async fn reconnect(&mut self) -> Result<()> {
        let policy = &self.options.reconnect;
        if !policy.auto_reconnect || self.attempts >= policy.max_attempts {
            warn!(attempts = self.attempts, "reconnect policy exhausted");
            self.closed = true;
            return Err(TransportError::ConnectionClosed.into());
        }
        self.attempts += 1;
        tokio::time::sleep(policy.retry_delay).await;
        debug!(attempt = self.attempts, url = %self.url, "reconnecting");
        match dial(&self.url, &self.options).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.attempts = 0;
                self.pending.push_back(ChannelEvent::Connected);
            },
            Err(e) => {
                self.pending.push_back(ChannelEvent::ConnectError {
                    message: e.to_string(),
                });
            },
        }
        Ok(())
    }
}

/// Handshake URL with the identity tag as a query parameter.
fn handshake_url(endpoint: &Url, options: &ChannelOptions) -> Url {
    let mut url = endpoint.clone();
    if let Some(tag) = &options.identity_tag {
        url.query_pairs_mut().append_pair("uid", tag);
    }
    url
}

/// Dial with the configured handshake timeout.
async fn dial(url: &Url, options: &ChannelOptions) -> Result<WsStream> {
    let timeout = options.reconnect.handshake_timeout;
    let (stream, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| TransportError::HandshakeTimeout(timeout))?
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    Ok(stream)
}

/// Map an inbound frame to a channel event. Unknown event names yield
/// `None` and are skipped.
fn parse_frame(text: &str) -> Option<ChannelEvent> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "unparseable channel frame");
            return None;
        },
    };
    match frame.event.as_str() {
        "connected" => Some(ChannelEvent::Greeting {
            message: frame
                .data
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("connected")
                .to_string(),
        }),
        "task_update" => Some(ChannelEvent::TaskUpdate {
            payload: frame.data,
        }),
        other => {
            debug!(event = other, "ignoring unknown channel event");
            None
        },
    }
}
