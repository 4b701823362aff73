use crate::error::{DashboardError, DashboardResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::{self, create_dir_all};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Folder inside the bucket that uploaded documents land in.
pub const DOCUMENTS_PREFIX: &str = "documents";

/// Scheme of references that only live as long as the current session.
pub const EPHEMERAL_SCHEME: &str = "blob:local/";

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^a-z0-9]").unwrap();
}

/// A binary payload supplied with a document.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Blob {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    pub fn is_pdf(&self) -> bool {
        self.extension().as_deref() == Some("pdf")
            || self.content_type.as_deref() == Some("application/pdf")
    }

    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }
}

/// External binary-blob hosting.
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `path` and return a public URL for it.
    fn upload(
        &self,
        path: &str,
        bytes: &[u8],
    ) -> impl Future<Output = DashboardResult<String>> + Send;

    fn remove(&self, path: &str) -> impl Future<Output = DashboardResult<()>> + Send;
}

impl<S: ObjectStorage> ObjectStorage for Arc<S> {
    fn upload(
        &self,
        path: &str,
        bytes: &[u8],
    ) -> impl Future<Output = DashboardResult<String>> + Send {
        (**self).upload(path, bytes)
    }

    fn remove(&self, path: &str) -> impl Future<Output = DashboardResult<()>> + Send {
        (**self).remove(path)
    }
}

/// Object path for an uploaded file: `documents/<timestamp>_<safe name>.<ext>`.
///
/// The stem is lowercased and every character outside `[a-z0-9]` becomes `_`,
/// so the result never contains separators or traversal components.
pub fn object_path(file_name: &str, timestamp_ms: u64) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_lowercase();
    let safe_stem = UNSAFE_CHARS.replace_all(&stem, "_");

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| UNSAFE_CHARS.replace_all(&ext.to_lowercase(), "").into_owned())
        .filter(|ext| !ext.is_empty());

    match extension {
        Some(ext) => format!("{}/{}_{}.{}", DOCUMENTS_PREFIX, timestamp_ms, safe_stem, ext),
        None => format!("{}/{}_{}", DOCUMENTS_PREFIX, timestamp_ms, safe_stem),
    }
}

/// A reference valid only within the current session.
pub fn ephemeral_reference() -> String {
    format!("{}{}", EPHEMERAL_SCHEME, Uuid::new_v4())
}

pub fn is_ephemeral(reference: &str) -> bool {
    reference.starts_with(EPHEMERAL_SCHEME)
}

/// Object storage backed by a local directory, served under `public_base_url`.
#[derive(Clone, Debug)]
pub struct DirectoryStorage {
    root: PathBuf,
    public_base_url: String,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        DirectoryStorage {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> DashboardResult<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !safe || path.is_empty() {
            return Err(DashboardError::RemoteUpload(format!(
                "unsafe object path: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStorage for DirectoryStorage {
    async fn upload(&self, path: &str, bytes: &[u8]) -> DashboardResult<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            create_dir_all(parent).map_err(|e| DashboardError::RemoteUpload(e.to_string()))?;
        }
        fs::write(&target, bytes).map_err(|e| DashboardError::RemoteUpload(e.to_string()))?;

        Ok(format!("{}/{}", self.public_base_url, path))
    }

    async fn remove(&self, path: &str) -> DashboardResult<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DashboardError::RemoteUpload(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_paths_are_sanitized_and_prefixed() {
        assert_eq!(
            object_path("Rapport Annuel (2024).PDF", 1700000000000),
            "documents/1700000000000_rapport_annuel__2024_.pdf"
        );
        assert_eq!(object_path("../../etc/passwd", 5), "documents/5_passwd");
        assert_eq!(object_path("notes", 9), "documents/9_notes");
    }

    #[test]
    fn ephemeral_references_are_recognizable() {
        let reference = ephemeral_reference();
        assert!(is_ephemeral(&reference));
        assert!(!is_ephemeral("/objects/documents/1_a.pdf"));
    }

    #[test]
    fn blob_kind_detection() {
        assert!(Blob::new("report.PDF", vec![]).is_pdf());
        assert!(Blob::new("x", vec![]).with_content_type("application/pdf").is_pdf());
        assert!(Blob::new("p.png", vec![]).with_content_type("image/png").is_image());
        assert!(!Blob::new("notes.txt", vec![]).is_pdf());
    }

    #[tokio::test]
    async fn directory_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::new(dir.path(), "/objects/");

        let url = storage.upload("documents/1_a.pdf", b"%PDF").await.unwrap();
        assert_eq!(url, "/objects/documents/1_a.pdf");
        assert_eq!(fs::read(dir.path().join("documents/1_a.pdf")).unwrap(), b"%PDF");

        storage.remove("documents/1_a.pdf").await.unwrap();
        assert!(!dir.path().join("documents/1_a.pdf").exists());
        // Removing twice is fine.
        storage.remove("documents/1_a.pdf").await.unwrap();

        assert!(storage.upload("../escape", b"x").await.is_err());
    }
}
