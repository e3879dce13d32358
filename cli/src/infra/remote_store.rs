//! HTTP client for the remote key-value store.
//!
//! `GET|PUT|DELETE {base}/v1/kv/{scope}:{key}` with JSON bodies and a
//! bearer token; `GET {base}/v1/kv?prefix=...` lists keys.

use std::time::Duration;

use anyhow::{Context, Result};
use keel_common::qualified_key;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::application::ports::KvStore;
use crate::domain::error::StoreError;

pub struct HttpKvStore {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpKvStore {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("keel/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
        })
    }

    fn key_url(&self, scope: &str, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url, qualified_key(scope, key))
    }

    async fn send(&self, request: RequestBuilder, key: &str) -> Result<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::Unauthorized {
                status: response.status().as_u16(),
            }
            .into()),
            _ => {
                debug!(key, status = response.status().as_u16(), "store response");
                Ok(response)
            }
        }
    }
}

fn http_error(status: StatusCode, key: &str) -> anyhow::Error {
    StoreError::Http {
        status: status.as_u16(),
        key: key.to_owned(),
    }
    .into()
}

/// Key listings may or may not carry the `scope:` prefix.
fn strip_scope<'k>(scope: &str, key: &'k str) -> &'k str {
    key.strip_prefix(scope)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(key)
}

impl KvStore for HttpKvStore {
    async fn get<T: DeserializeOwned + Send>(&self, scope: &str, key: &str) -> Result<Option<T>> {
        let qualified = qualified_key(scope, key);
        let response = self
            .send(self.client.get(self.key_url(scope, key)), &qualified)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| StoreError::Transport(e.to_string()))?;
                serde_json::from_slice(&body).map(Some).map_err(|e| {
                    StoreError::Malformed {
                        key: qualified,
                        reason: e.to_string(),
                    }
                    .into()
                })
            }
            status => Err(http_error(status, &qualified)),
        }
    }

    async fn put<T: Serialize + Sync>(&self, scope: &str, key: &str, value: &T) -> Result<()> {
        let qualified = qualified_key(scope, key);
        let response = self
            .send(self.client.put(self.key_url(scope, key)).json(value), &qualified)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(http_error(response.status(), &qualified))
        }
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<()> {
        let qualified = qualified_key(scope, key);
        let response = self
            .send(self.client.delete(self.key_url(scope, key)), &qualified)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(http_error(status, &qualified)),
        }
    }

    async fn list_keys(&self, scope: &str, prefix: &str) -> Result<Vec<String>> {
        let qualified = qualified_key(scope, prefix);
        let request = self
            .client
            .get(format!("{}/v1/kv", self.base_url))
            .query(&[("prefix", qualified.as_str())]);
        let response = self.send(request, &qualified).await?;
        if !response.status().is_success() {
            return Err(http_error(response.status(), &qualified));
        }
        let keys: Vec<String> = response.json().await.map_err(|e| StoreError::Malformed {
            key: qualified.clone(),
            reason: e.to_string(),
        })?;
        Ok(keys
            .iter()
            .map(|key| strip_scope(scope, key).to_owned())
            .collect())
    }
}
