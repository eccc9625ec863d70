//! Blob storage for published media.
//!
//! A [`BlobStore`] accepts finished media under an object name and resolves
//! a durable public URL for it. Stores never overwrite: putting a name that
//! already exists is an error, so two jobs can never clobber each other.

mod http;
mod local;

use std::sync::Arc;

use async_trait::async_trait;
use notecast_shared::{BlobBackend, BlobConfig, NotecastError, Result, expand_home, read_secret_env};

pub use http::HttpBlobStore;
pub use local::LocalBlobStore;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Object storage for generated media.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `name` and return the object's public URL.
    ///
    /// Fails if an object with the same name already exists.
    async fn put(&self, name: &str, bytes: Vec<u8>, mime_type: &str) -> Result<String>;

    /// Public URL an object stored under `name` is (or would be) served from.
    fn public_url(&self, name: &str) -> String;

    /// Remove an object. Removing a missing object is not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Backend name for tracing.
    fn backend_name(&self) -> &str;
}

/// Build the blob store selected by the `[blob]` config section.
pub fn blob_store_from_config(config: &BlobConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend {
        BlobBackend::Local => {
            let root = expand_home(&config.local_dir)?;
            let base_url = match config.public_base_url.strip_prefix("file://") {
                Some(path) => format!("file://{}", expand_home(path)?.display()),
                None => config.public_base_url.clone(),
            };
            Ok(Arc::new(LocalBlobStore::new(root, base_url)))
        }
        BlobBackend::Http => {
            let endpoint = config.http_endpoint.as_deref().ok_or_else(|| {
                NotecastError::config("[blob] backend = \"http\" requires http_endpoint")
            })?;
            let token = read_secret_env(&config.token_env, "Blob storage token")?;
            Ok(Arc::new(HttpBlobStore::new(endpoint, &config.bucket, token)?))
        }
    }
}

/// Reject object names that could escape the store's namespace.
pub(crate) fn validate_object_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(NotecastError::Blob(format!("invalid object name: {name:?}")));
    }
    Ok(())
}
