//! Remote collection service
//!
//! The authoritative copy of every collection lives behind a small REST
//! surface:
//!
//! - `GET /{collection}` returns the array
//! - `POST /{collection}` creates an entity and returns it
//! - `PUT /{collection}/{id}` applies a partial update and returns the entity
//! - `DELETE /{collection}/{id}` removes an entity (any 2xx)
//! - `POST /sync` accepts `{ collection: [records] }` in one batch
//! - `GET /health` answers 2xx when the service is up
//!
//! Any transport failure or non-2xx status means "remote unavailable".

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::records::Collection;

/// Errors from the remote service
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Connection, TLS or timeout failure
    #[error("Remote unreachable: {0}")]
    Transport(String),

    /// The service answered with a non-success status
    #[error("Remote returned HTTP {0}")]
    Status(u16),

    /// The response body was not what the endpoint promises
    #[error("Unexpected response from remote: {0}")]
    Decode(String),

    /// No remote URL configured
    #[error("No remote service configured")]
    NotConfigured,
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Batch body for `POST /sync`, keyed by collection cache key
pub type SyncBatch = BTreeMap<String, Vec<Value>>;

/// The remote CRUD surface the coordinator talks to
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn list(&self, collection: Collection) -> RemoteResult<Vec<Value>>;

    async fn create(&self, collection: Collection, entity: &Value) -> RemoteResult<Value>;

    async fn update(&self, collection: Collection, id: &str, patch: &Value)
        -> RemoteResult<Value>;

    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()>;

    async fn sync(&self, batch: &SyncBatch) -> RemoteResult<()>;

    async fn health(&self) -> RemoteResult<()>;
}

/// [`RemoteService`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    /// Client for `base_url`; `timeout` of `None` keeps the transport default
    pub fn new(base_url: &str, timeout: Option<Duration>) -> RemoteResult<Self> {
        let mut builder = reqwest::Client::builder().user_agent("binvault/0.3");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> RemoteResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        Ok(response)
    }

    /// Body as JSON; an empty body reads as `null`
    async fn json_body(response: reqwest::Response) -> RemoteResult<Value> {
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn list(&self, collection: Collection) -> RemoteResult<Vec<Value>> {
        let response = self
            .send(self.client.get(self.url(collection.remote_path())))
            .await?;

        match Self::json_body(response).await? {
            Value::Array(records) => {
                debug!("Fetched {} {} from remote", records.len(), collection);
                Ok(records)
            }
            other => Err(RemoteError::Decode(format!(
                "expected an array for {}, got {}",
                collection, other
            ))),
        }
    }

    async fn create(&self, collection: Collection, entity: &Value) -> RemoteResult<Value> {
        let response = self
            .send(
                self.client
                    .post(self.url(collection.remote_path()))
                    .json(entity),
            )
            .await?;
        Self::json_body(response).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: &Value,
    ) -> RemoteResult<Value> {
        let path = format!("{}/{}", collection.remote_path(), id);
        let response = self.send(self.client.put(self.url(&path)).json(patch)).await?;
        Self::json_body(response).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()> {
        let path = format!("{}/{}", collection.remote_path(), id);
        self.send(self.client.delete(self.url(&path))).await?;
        Ok(())
    }

    async fn sync(&self, batch: &SyncBatch) -> RemoteResult<()> {
        self.send(self.client.post(self.url("sync")).json(batch))
            .await?;
        Ok(())
    }

    async fn health(&self) -> RemoteResult<()> {
        self.send(self.client.get(self.url("health"))).await?;
        Ok(())
    }
}
