//! Configuration for the synchronization core.
//!
//! Configuration is environment-supplied with local defaults, so a
//! development setup works with nothing set:
//!
//! | Variable              | Meaning                          | Default                |
//! |-----------------------|----------------------------------|------------------------|
//! | `TASKSYNC_CHANNEL_URL`| Push-channel endpoint base URL   | `ws://localhost:5000`  |
//! | `TASKSYNC_STORE_URL`  | Backing-store endpoint URL       | none (store disabled)  |
//! | `TASKSYNC_STORE_KEY`  | Backing-store public (anon) key  | none                   |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Default push-channel endpoint for local development.
pub const DEFAULT_CHANNEL_URL: &str = "ws://localhost:5000";

/// Reconnection policy handed to the push-channel transport.
///
/// Reconnection is handled entirely inside the transport; the connection
/// manager only reacts to identity changes. A transient drop followed by an
/// auto-reconnect under the same identity never re-keys the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Whether the transport retries dropped connections on its own.
    pub auto_reconnect: bool,
    /// Maximum number of reconnection attempts before giving up.
    pub max_attempts: u32,
    /// Delay between reconnection attempts.
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    /// Time allowed for the initial handshake to complete.
    #[serde(with = "duration_millis")]
    pub handshake_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: 5,
            retry_delay: Duration::from_millis(2000),
            handshake_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Configuration for the sync core.
///
/// # Examples
///
/// ```rust
/// use tasksync::config::SyncConfig;
///
/// // Local defaults, nothing external required.
/// let config = SyncConfig::default();
/// assert_eq!(config.channel_url.as_str(), "ws://localhost:5000/");
///
/// // Explicit endpoints.
/// let config = SyncConfig::new("wss://push.example.com")
///     .unwrap()
///     .with_store("https://db.example.com", "public-anon-key")
///     .unwrap();
/// assert!(config.store.is_some());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Push-channel endpoint base URL.
    pub channel_url: Url,

    /// Backing-store endpoint, when a remote store is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreEndpoint>,

    /// Reconnection policy for the push channel.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

/// Backing-store endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEndpoint {
    /// Store base URL.
    pub url: Url,
    /// Public (anon) API key sent with every request.
    pub public_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            // The default is a compile-time constant and always parses.
            channel_url: Url::parse(DEFAULT_CHANNEL_URL).expect("default channel url"),
            store: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Create a configuration with the given push-channel endpoint.
    pub fn new(channel_url: &str) -> Result<Self> {
        let channel_url = Url::parse(channel_url)
            .map_err(|e| Error::config(format!("invalid channel url {channel_url:?}: {e}")))?;
        Ok(Self {
            channel_url,
            store: None,
            reconnect: ReconnectPolicy::default(),
        })
    }

    /// Load configuration from the environment, falling back to local
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("TASKSYNC_CHANNEL_URL") {
            Ok(raw) => Self::new(&raw)?,
            Err(_) => Self::default(),
        };
        if let Ok(store_url) = std::env::var("TASKSYNC_STORE_URL") {
            let key = std::env::var("TASKSYNC_STORE_KEY").unwrap_or_default();
            config = config.with_store(&store_url, key)?;
        }
        Ok(config)
    }

    /// Set the backing-store endpoint and public key.
    pub fn with_store(mut self, url: &str, public_key: impl Into<String>) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::config(format!("invalid store url {url:?}: {e}")))?;
        self.store = Some(StoreEndpoint {
            url,
            public_key: public_key.into(),
        });
        Ok(self)
    }

    /// Override the reconnection policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
