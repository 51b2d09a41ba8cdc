//! Identity state tracking.
//!
//! The identity provider is an injected boundary: anything that can deliver
//! a stream of sign-in/sign-out emissions implements [`IdentityProvider`].
//! The [`IdentityTracker`] subscribes exactly once for its lifetime and
//! republishes the current state over a `watch` channel that the rest of
//! the system (the sync orchestrator, tests, presentation code) observes.
//!
//! The tracker is a pure event source. It performs no channel or store side
//! effects; connecting and disconnecting the push channel on identity
//! transitions is the orchestrator's job, so that every side effect of an
//! identity change flows through a single consumer.
//!
//! # Failure policy
//!
//! Provider stream errors are logged and mapped to "no identity"; the
//! tracker never crashes. The end of the provider stream is treated as a
//! final sign-out.

use crate::error::Result;
use crate::types::Identity;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One emission from the identity provider: the current identity, or `None`
/// when signed out. Errors are delivered in-band so the tracker can apply
/// its never-crash policy.
pub type IdentityEvent = Result<Option<Identity>>;

/// Boxed stream of identity emissions. Dropping the stream unsubscribes.
pub type IdentityStream = Pin<Box<dyn Stream<Item = IdentityEvent> + Send>>;

/// The identity-provider boundary.
///
/// Implementations wrap a concrete provider's sign-in-state callback or
/// session API as a stream. The first emission must reflect the current
/// state (signed in or out), not only future transitions.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Subscribe to sign-in-state changes for the life of the returned
    /// stream.
    async fn subscribe(&self) -> Result<IdentityStream>;
}

/// Current identity state as published by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityState {
    /// The signed-in identity, or `None`.
    pub identity: Option<Identity>,
    /// True until the provider's first emission has been observed. The
    /// first emission clears this even when it reports "signed out".
    pub loading: bool,
}

impl Default for IdentityState {
    fn default() -> Self {
        Self {
            identity: None,
            loading: true,
        }
    }
}

impl IdentityState {
    /// True when a user is signed in.
    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }
}

/// Tracks the identity provider's sign-in state for the life of the process.
///
/// Dropping the tracker aborts the subscription task, which drops the
/// provider stream and thereby unsubscribes.
#[derive(Debug)]
pub struct IdentityTracker {
    state_rx: watch::Receiver<IdentityState>,
    task: JoinHandle<()>,
}

impl IdentityTracker {
    /// Subscribe to the provider and start tracking.
    ///
    /// Fails only if the initial subscription itself fails; stream errors
    /// after that are absorbed per the failure policy.
    pub async fn spawn(provider: Arc<dyn IdentityProvider>) -> Result<Self> {
        let mut stream = provider.subscribe().await?;
        let (state_tx, state_rx) = watch::channel(IdentityState::default());

        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let identity = match event {
                    Ok(identity) => identity,
                    Err(e) => {
                        warn!(error = %e, "identity provider error, treating as signed out");
                        None
                    },
                };
                match &identity {
                    Some(identity) => debug!(user = %identity.id, "identity changed: signed in"),
                    None => debug!("identity changed: signed out"),
                }
                if state_tx
                    .send(IdentityState {
                        identity,
                        loading: false,
                    })
                    .is_err()
                {
                    // All receivers gone; nothing left to track for.
                    return;
                }
            }
            debug!("identity provider stream ended, final sign-out");
            let _ = state_tx.send(IdentityState {
                identity: None,
                loading: false,
            });
        });

        Ok(Self { state_rx, task })
    }

    /// A watch receiver over the tracked identity state.
    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.state_rx.clone()
    }

    /// The current identity state.
    pub fn current(&self) -> IdentityState {
        self.state_rx.borrow().clone()
    }
}

impl Drop for IdentityTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
