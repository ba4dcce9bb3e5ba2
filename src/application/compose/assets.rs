//! Inlining of project-relative asset references as data URIs.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::debug;

/// One place a project-relative asset may live.
#[derive(Debug, Clone)]
pub enum AssetSource {
    /// Files under a directory, addressed by their path below it.
    Directory(PathBuf),
    /// Preloaded bytes keyed by their project-relative path (`/frames/gold.png`).
    Memory(BTreeMap<String, Vec<u8>>),
}

impl AssetSource {
    async fn read(&self, reference: &str) -> Option<Vec<u8>> {
        match self {
            AssetSource::Directory(root) => {
                let path = contained_path(root, reference)?;
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        debug!(
                            target = "application::compose::assets",
                            path = %path.display(),
                            error = %err,
                            "Asset not readable from directory source"
                        );
                        None
                    }
                }
            }
            AssetSource::Memory(entries) => entries.get(reference).cloned(),
        }
    }
}

/// Ordered asset sources; the first one holding the asset wins and an
/// unresolvable reference is passed through verbatim.
#[derive(Debug, Clone, Default)]
pub struct AssetResolver {
    sources: Vec<AssetSource>,
}

impl AssetResolver {
    pub fn new(sources: Vec<AssetSource>) -> Self {
        Self { sources }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self::new(vec![AssetSource::Directory(root.into())])
    }

    /// Return a `data:` URI for project-relative references, or the
    /// reference unchanged.
    pub async fn resolve(&self, reference: &str) -> String {
        if !reference.starts_with('/') {
            return reference.to_string();
        }

        for source in &self.sources {
            if let Some(bytes) = source.read(reference).await {
                return data_uri(reference, &bytes);
            }
        }
        reference.to_string()
    }

    /// Resolve each distinct reference once, keyed by the reference.
    pub async fn resolve_all<'a>(
        &self,
        references: impl IntoIterator<Item = &'a str>,
    ) -> BTreeMap<String, String> {
        let mut resolved = BTreeMap::new();
        for reference in references {
            if !resolved.contains_key(reference) {
                let value = self.resolve(reference).await;
                resolved.insert(reference.to_string(), value);
            }
        }
        resolved
    }
}

fn data_uri(reference: &str, bytes: &[u8]) -> String {
    let mime = mime_guess::from_path(reference).first_or_octet_stream();
    format!("data:{};base64,{}", mime.essence_str(), STANDARD.encode(bytes))
}

fn contained_path(root: &Path, reference: &str) -> Option<PathBuf> {
    let relative = Path::new(reference.trim_start_matches('/'));
    if relative.as_os_str().is_empty()
        || relative.is_absolute()
        || relative
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
    {
        return None;
    }
    Some(root.join(relative))
}
