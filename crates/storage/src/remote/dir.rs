use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{FileHandle, FileStore, RemoteError};

/// File store backed by a local directory, e.g. a folder mirrored by a
/// desktop cloud client.
#[derive(Debug, Clone)]
pub struct DirectoryFileStore {
    root: PathBuf,
}

impl DirectoryFileStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, file: &FileHandle) -> PathBuf {
        self.root.join(&file.name)
    }
}

fn io_error(err: &std::io::Error) -> RemoteError {
    RemoteError::Unavailable(err.to_string())
}

#[async_trait]
impl FileStore for DirectoryFileStore {
    async fn find_or_create(&self, name: &str) -> Result<FileHandle, RemoteError> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(RemoteError::Rejected(format!("invalid file name: {name:?}")));
        }
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&e))?;
        let handle = FileHandle {
            id: self.root.join(name).to_string_lossy().into_owned(),
            name: name.to_owned(),
        };
        let path = self.path_of(&handle);
        if !fs::try_exists(&path).await.map_err(|e| io_error(&e))? {
            fs::write(&path, b"").await.map_err(|e| io_error(&e))?;
            debug!(path = %path.display(), "created empty sync file");
        }
        Ok(handle)
    }

    async fn download(&self, file: &FileHandle) -> Result<Option<Value>, RemoteError> {
        let path = self.path_of(file);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&err)),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RemoteError::Malformed(e.to_string()))
    }

    async fn upload(&self, file: &FileHandle, value: &Value) -> Result<(), RemoteError> {
        let path = self.path_of(file);
        let tmp = path.with_extension("json.tmp");
        let raw =
            serde_json::to_vec_pretty(value).map_err(|e| RemoteError::Malformed(e.to_string()))?;
        fs::write(&tmp, raw).await.map_err(|e| io_error(&e))?;
        fs::rename(&tmp, &path).await.map_err(|e| io_error(&e))?;
        Ok(())
    }
}
