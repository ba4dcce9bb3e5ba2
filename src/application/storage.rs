//! Artifact storage seam used by the daemon and the export ledger.

use std::error::Error as StdError;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage reference `{0}`")]
    InvalidReference(String),
    #[error("upload payload is empty")]
    EmptyPayload,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("storage request failed")]
    Transport {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("storage service responded with status {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },
}

impl StorageError {
    pub fn transport(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Transport {
            source: Box::new(source),
        }
    }
}

/// Upload-URL style object storage.
///
/// Uploading returns an opaque storage id; `url_for` turns a stored id into a
/// fetchable URL, or `None` when the object no longer exists.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn generate_upload_url(&self, purpose: &str) -> Result<String, StorageError>;

    async fn upload(
        &self,
        upload_url: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String, StorageError>;

    async fn url_for(&self, storage_id: &str) -> Result<Option<String>, StorageError>;
}
