use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::{Result, TasklineError};

/// Writable file handle returned by [`Storage::create`].
pub type FileWriter = Pin<Box<dyn AsyncWrite + Send>>;
/// Readable file handle returned by [`Storage::open`].
pub type FileReader = Pin<Box<dyn AsyncRead + Send>>;

/// Size and kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub len: u64,
    pub is_dir: bool,
}

/// Filesystem primitives used by the download pipeline.
///
/// Every error is reported as [`TasklineError::Storage`] carrying the path
/// that failed.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create (or truncate) a file for writing.
    async fn create(&self, path: &Path) -> Result<FileWriter>;

    async fn open(&self, path: &Path) -> Result<FileReader>;

    /// Names of the entries directly inside `path`.
    async fn read_dir(&self, path: &Path) -> Result<Vec<String>>;

    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove an empty directory.
    async fn remove_dir(&self, path: &Path) -> Result<()>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    async fn metadata(&self, path: &Path) -> Result<EntryInfo>;
}

/// [`Storage`] on the local filesystem through `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

#[async_trait]
impl Storage for LocalStorage {
    async fn create(&self, path: &Path) -> Result<FileWriter> {
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| TasklineError::storage(path, e))?;
        Ok(Box::pin(file))
    }

    async fn open(&self, path: &Path) -> Result<FileReader> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| TasklineError::storage(path, e))?;
        Ok(Box::pin(file))
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| TasklineError::storage(path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TasklineError::storage(path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| TasklineError::storage(path, e))
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_dir(path)
            .await
            .map_err(|e| TasklineError::storage(path, e))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| TasklineError::storage(path, e))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| TasklineError::storage(path, e))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| TasklineError::storage(path, e))
    }

    async fn metadata(&self, path: &Path) -> Result<EntryInfo> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| TasklineError::storage(path, e))?;
        Ok(EntryInfo {
            len: meta.len(),
            is_dir: meta.is_dir(),
        })
    }
}

/// Delete every file in `dir`, then `dir` itself.
///
/// Entries are removed concurrently. Subdirectories are not descended into,
/// so a non-empty subdirectory makes the call fail. Not safe against other
/// writers touching `dir` at the same time.
pub async fn remove_dir_and_contents(storage: &dyn Storage, dir: &Path) -> Result<()> {
    let entries = storage.read_dir(dir).await?;
    debug!(dir = %dir.display(), entries = entries.len(), "Removing directory");

    let paths: Vec<PathBuf> = entries.iter().map(|name| dir.join(name)).collect();
    try_join_all(paths.iter().map(|path| storage.remove_file(path))).await?;

    storage.remove_dir(dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn create_write_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage;

        let mut file = storage.create(&dir.path().join("b.txt")).await.unwrap();
        file.write_all(b"hello").await.unwrap();
        file.shutdown().await.unwrap();
        storage.write(&dir.path().join("a.txt"), b"x").await.unwrap();

        assert_eq!(
            storage.read_dir(dir.path()).await.unwrap(),
            vec!["a.txt".to_string(), "b.txt".to_string()]
        );
        assert_eq!(storage.read(&dir.path().join("b.txt")).await.unwrap(), b"hello");
        let info = storage.metadata(&dir.path().join("b.txt")).await.unwrap();
        assert_eq!(info, EntryInfo { len: 5, is_dir: false });
    }

    #[tokio::test]
    async fn removes_directory_with_files() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("segments");
        let storage = LocalStorage;
        storage.create_dir_all(&dir).await.unwrap();
        for i in 0..5 {
            storage
                .write(&dir.join(format!("seg{i}.ts")), b"data")
                .await
                .unwrap();
        }

        remove_dir_and_contents(&storage, &dir).await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn missing_directory_reports_path() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        let err = remove_dir_and_contents(&LocalStorage, &missing)
            .await
            .unwrap_err();
        assert!(err.is_storage());
        assert!(err.to_string().contains("nope"));
    }
}
