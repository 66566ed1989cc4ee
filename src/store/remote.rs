//! REST client for the remote plate collections
//!
//! Endpoints (relative to the configured base URL):
//! - `GET /v1/collections/{collection}/records/{plate}` → record or 404
//! - `GET /v1/collections/{collection}/records?field=…&contains=…` → `{"records": [...]}`
//! - `GET /v1/collections/{collection}/records` → every record
//! - `GET /v1/health` → 2xx when reachable

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use super::PlateRecord;
use crate::{Error, Result};

#[derive(Deserialize)]
struct RecordList {
    records: Vec<PlateRecord>,
}

/// Client for the remote document store
#[derive(Clone)]
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteStore {
    /// Create a client for `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty or the HTTP client cannot be built
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("store.remote_url must not be empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Base URL the client talks to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetch one record by plate
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed
    pub async fn get(&self, collection: &str, plate: &str) -> Result<Option<PlateRecord>> {
        let response = self
            .request(&format!("/v1/collections/{collection}/records/{plate}"))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(collection, plate, "remote miss");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Store(format!("remote get failed {status}: {body}")));
        }

        let record: PlateRecord = response.json().await?;
        Ok(Some(record))
    }

    /// Records whose array `field` contains `value`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed
    pub async fn query(&self, collection: &str, field: &str, value: &str) -> Result<Vec<PlateRecord>> {
        let response = self
            .request(&format!("/v1/collections/{collection}/records"))
            .query(&[("field", field), ("contains", value)])
            .send()
            .await?;

        Self::read_list(response).await
    }

    /// Every record in a collection
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed
    pub async fn list(&self, collection: &str) -> Result<Vec<PlateRecord>> {
        let response = self
            .request(&format!("/v1/collections/{collection}/records"))
            .send()
            .await?;

        Self::read_list(response).await
    }

    /// Check that the remote answers at all
    ///
    /// # Errors
    ///
    /// Returns error if the health endpoint is unreachable or unhealthy
    pub async fn ping(&self) -> Result<()> {
        let response = self.request("/v1/health").send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Store(format!("health check returned {}", response.status())))
        }
    }

    async fn read_list(response: reqwest::Response) -> Result<Vec<PlateRecord>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Store(format!("remote query failed {status}: {body}")));
        }

        let list: RecordList = response.json().await?;
        Ok(list.records)
    }
}
