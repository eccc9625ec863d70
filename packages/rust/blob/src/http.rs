//! HTTP object-storage client (Supabase-style storage API).
//!
//! Upload: `POST {endpoint}/object/{bucket}/{name}` with `x-upsert: false`.
//! Public URL: `{endpoint}/object/public/{bucket}/{name}`.

use std::time::Duration;

use async_trait::async_trait;
use notecast_shared::{NotecastError, Result};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use crate::{BlobStore, validate_object_name};

/// Upload timeout; media can be tens of megabytes.
const UPLOAD_TIMEOUT_SECS: u64 = 300;

/// User-Agent string for storage requests.
const USER_AGENT: &str = concat!("Notecast/", env!("CARGO_PKG_VERSION"));

/// Bucket-scoped client for an HTTP object store.
pub struct HttpBlobStore {
    client: Client,
    endpoint: String,
    bucket: String,
    token: String,
}

impl HttpBlobStore {
    pub fn new(endpoint: &str, bucket: &str, token: String) -> Result<Self> {
        let parsed = Url::parse(endpoint)
            .map_err(|e| NotecastError::config(format!("invalid blob endpoint {endpoint}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NotecastError::config(format!(
                "blob endpoint must be http(s): {endpoint}"
            )));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|e| NotecastError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            token,
        })
    }

    fn object_url(&self, name: &str) -> String {
        format!("{}/object/{}/{name}", self.endpoint, self.bucket)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    #[instrument(skip_all, fields(name = %name, bytes = bytes.len()))]
    async fn put(&self, name: &str, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        validate_object_name(name)?;
        let url = self.object_url(name);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| NotecastError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(NotecastError::Blob(format!("object already exists: {name}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotecastError::Blob(format!(
                "upload of {name} failed: HTTP {status}: {body}"
            )));
        }

        debug!(%status, "object uploaded");
        Ok(self.public_url(name))
    }

    fn public_url(&self, name: &str) -> String {
        format!("{}/object/public/{}/{name}", self.endpoint, self.bucket)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        validate_object_name(name)?;
        let url = self.object_url(name);

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| NotecastError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(NotecastError::Blob(format!(
            "delete of {name} failed: HTTP {status}"
        )))
    }

    fn backend_name(&self) -> &str {
        "http"
    }
}
