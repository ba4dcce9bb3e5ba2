//! Object storage backends for rendered artifacts.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::application::storage::{ObjectStorage, StorageError};

const UPLOAD_SCHEME: &str = "upload://";
const ARTIFACT_ROUTE: &str = "artifacts";

/// Filesystem-backed storage; artifacts are served by the HTTP layer under
/// `/artifacts/{id}`.
#[derive(Debug)]
pub struct FilesystemObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl FilesystemObjectStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf, public_base_url: impl Into<String>) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn read(&self, storage_id: &str) -> Result<Bytes, StorageError> {
        let absolute = self.resolve(storage_id)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Resolve a stored id below the root, rejecting anything that escapes it.
    fn resolve(&self, storage_id: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(storage_id);
        if storage_id.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StorageError::InvalidReference(storage_id.to_string()));
        }

        Ok(self.root.join(relative))
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|extensions| extensions.first().copied()),
    }
}

#[async_trait]
impl ObjectStorage for FilesystemObjectStorage {
    async fn generate_upload_url(&self, purpose: &str) -> Result<String, StorageError> {
        let purpose = purpose.trim().trim_matches('/');
        if purpose.is_empty() || purpose.contains('/') || purpose.contains("..") {
            return Err(StorageError::InvalidReference(purpose.to_string()));
        }
        let (year, month, day) = time::OffsetDateTime::now_utc().to_calendar_date();
        Ok(format!(
            "{UPLOAD_SCHEME}{purpose}/{year}/{:02}/{:02}/{}",
            month as u8,
            day,
            Uuid::new_v4().simple()
        ))
    }

    async fn upload(
        &self,
        upload_url: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String, StorageError> {
        let stem = upload_url
            .strip_prefix(UPLOAD_SCHEME)
            .ok_or_else(|| StorageError::InvalidReference(upload_url.to_string()))?;
        if bytes.is_empty() {
            return Err(StorageError::EmptyPayload);
        }

        let storage_id = match extension_for(content_type) {
            Some(extension) => format!("{stem}.{extension}"),
            None => stem.to_string(),
        };
        let absolute = self.resolve(&storage_id)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        if let Err(err) = file.write_all(&bytes).await {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(StorageError::Io(err));
        }
        file.flush().await?;

        debug!(
            target = "infra::storage",
            op = "upload",
            storage_id = %storage_id,
            bytes = bytes.len(),
            "Artifact stored on filesystem"
        );
        Ok(storage_id)
    }

    async fn url_for(&self, storage_id: &str) -> Result<Option<String>, StorageError> {
        let absolute = self.resolve(storage_id)?;
        if !fs::try_exists(&absolute).await? {
            return Ok(None);
        }
        Ok(Some(format!(
            "{}/{ARTIFACT_ROUTE}/{storage_id}",
            self.public_base_url
        )))
    }
}

#[derive(Serialize)]
struct UploadUrlRequest<'a> {
    purpose: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    storage_id: Option<String>,
}

#[derive(Deserialize)]
struct StorageUrlResponse {
    url: Option<String>,
}

/// Remote storage service speaking the upload-URL protocol:
/// `POST {endpoint}/upload-urls` hands out a one-shot URL, a `POST` of the
/// bytes to it returns `{storageId}`, and `GET {endpoint}/objects/{id}/url`
/// resolves a stored id.
#[derive(Debug, Clone)]
pub struct HttpObjectStorage {
    client: Client,
    endpoint: Url,
}

impl HttpObjectStorage {
    pub fn new(endpoint: &str) -> Result<Self, StorageError> {
        let endpoint = Url::parse(endpoint)
            .and_then(|url| url.join("./"))
            .map_err(|_| StorageError::InvalidReference(endpoint.to_string()))?;
        let client = Client::builder()
            .user_agent(concat!("gambit-export/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StorageError::transport)?;
        Ok(Self { client, endpoint })
    }

    fn url(&self, path: &str) -> Result<Url, StorageError> {
        self.endpoint
            .join(path)
            .map_err(|_| StorageError::InvalidReference(path.to_string()))
    }

    async fn handle<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, StorageError> {
        let status = response.status();
        let bytes = response.bytes().await.map_err(StorageError::transport)?;
        if !status.is_success() {
            return Err(StorageError::UnexpectedResponse {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        serde_json::from_slice(&bytes).map_err(StorageError::transport)
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn generate_upload_url(&self, purpose: &str) -> Result<String, StorageError> {
        let response = self
            .client
            .post(self.url("upload-urls")?)
            .json(&UploadUrlRequest { purpose })
            .send()
            .await
            .map_err(StorageError::transport)?;
        let body: UploadUrlResponse = Self::handle(response).await?;
        Ok(body.upload_url)
    }

    async fn upload(
        &self,
        upload_url: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::EmptyPayload);
        }
        let url = Url::parse(upload_url)
            .map_err(|_| StorageError::InvalidReference(upload_url.to_string()))?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(StorageError::transport)?;
        let body: UploadResponse = Self::handle(response).await?;
        body.storage_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StorageError::UnexpectedResponse {
                status: 200,
                body: "upload response missing storageId".to_string(),
            })
    }

    async fn url_for(&self, storage_id: &str) -> Result<Option<String>, StorageError> {
        if storage_id.is_empty() || storage_id.contains('/') {
            return Err(StorageError::InvalidReference(storage_id.to_string()));
        }
        let response = self
            .client
            .get(self.url(&format!("objects/{storage_id}/url"))?)
            .send()
            .await
            .map_err(StorageError::transport)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: StorageUrlResponse = Self::handle(response).await?;
        Ok(body.url)
    }
}
