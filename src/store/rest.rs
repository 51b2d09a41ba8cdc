//! REST backing-store client (feature `http-client`).
//!
//! Speaks a PostgREST-style API: row filters as query parameters
//! (`owner_id=eq.u1`), store-assigned ordering via `order=position.asc`,
//! and merge-duplicates upsert for the profile table. The public (anon) key
//! travels as both the `apikey` header and a bearer token.

use super::TaskStore;
use crate::config::StoreEndpoint;
use crate::error::{Error, Result};
use crate::types::{Identity, TaskRecord};
use async_trait::async_trait;
use serde::Serialize;
use url::Url;

/// Profile row as persisted by the store.
#[derive(Debug, Serialize)]
struct ProfileRow<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    full_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
}

/// [`TaskStore`] implementation over a PostgREST-style HTTP API.
///
/// # Examples
///
/// ```rust,no_run
/// use tasksync::config::SyncConfig;
/// use tasksync::store::RestTaskStore;
///
/// # fn main() -> tasksync::Result<()> {
/// let config = SyncConfig::default()
///     .with_store("https://db.example.com", "public-anon-key")?;
/// let store = RestTaskStore::new(config.store.as_ref().unwrap())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RestTaskStore {
    http: reqwest::Client,
    base: Url,
    public_key: String,
}

impl RestTaskStore {
    /// Create a store client for the given endpoint.
    pub fn new(endpoint: &StoreEndpoint) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base: endpoint.url.clone(),
            public_key: endpoint.public_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        self.base
            .join(&format!("rest/v1/{table}"))
            .map_err(|e| Error::config(format!("store url: {e}")))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.public_key)
            .bearer_auth(&self.public_key)
    }
}

#[async_trait]
impl TaskStore for RestTaskStore {
    async fn select_tasks_by_owner(&self, owner_id: &str) -> Result<Vec<TaskRecord>> {
        let mut url = self.table_url("tasks")?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("owner_id", &format!("eq.{owner_id}"))
            .append_pair("order", "position.asc");

        let response = self
            .authed(self.http.get(url))
            .send()
            .await
            .map_err(|e| Error::store(format!("select tasks: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::store(format!("select tasks: {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::store(format!("decode tasks: {e}")))
    }

    async fn upsert_profile(&self, identity: &Identity) -> Result<()> {
        let mut url = self.table_url("profiles")?;
        url.query_pairs_mut().append_pair("on_conflict", "id");

        let row = ProfileRow {
            id: &identity.id,
            email: identity.email.as_deref(),
            full_name: identity.display_name.as_deref(),
            avatar_url: identity.avatar_uri.as_deref(),
        };
        let response = self
            .authed(self.http.post(url))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&row)
            .send()
            .await
            .map_err(|e| Error::store(format!("upsert profile: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::store(format!("upsert profile: {status}: {body}")));
        }
        Ok(())
    }
}
