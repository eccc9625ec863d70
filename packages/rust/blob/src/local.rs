//! Filesystem-backed blob store.

use std::path::PathBuf;

use async_trait::async_trait;
use notecast_shared::{NotecastError, Result};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{BlobStore, validate_object_name};

/// Stores objects as files under a root directory.
pub struct LocalBlobStore {
    root: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    /// `base_url` is the prefix under which `root` is served.
    pub fn new(root: PathBuf, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { root, base_url }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, name: &str, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        validate_object_name(name)?;
        let path = self.root.join(name);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| NotecastError::io(parent, e))?;
        }

        // create_new refuses to clobber an existing object
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    NotecastError::Blob(format!("object already exists: {name}"))
                }
                _ => NotecastError::io(&path, e),
            })?;

        file.write_all(&bytes)
            .await
            .map_err(|e| NotecastError::io(&path, e))?;
        file.flush().await.map_err(|e| NotecastError::io(&path, e))?;

        debug!(name, mime_type, bytes = bytes.len(), "stored object");
        Ok(self.public_url(name))
    }

    fn public_url(&self, name: &str) -> String {
        format!("{}/{name}", self.base_url)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        validate_object_name(name)?;
        let path = self.root.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NotecastError::io(&path, e)),
        }
    }

    fn backend_name(&self) -> &str {
        "local"
    }
}
