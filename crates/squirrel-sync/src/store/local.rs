//! Directory-backed store.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::trace;

use super::Store;
use crate::error::{StoreError, StoreResult};

/// Stores each blob as a file under `root`.
///
/// Store paths are relative to `root`; `a/b` maps to `root/a/b`. Paths that
/// would leave the root (absolute paths, `..`) are rejected.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root`. The directory is created on first
    /// write if it does not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a store path onto the filesystem, refusing anything that would
    /// escape the root.
    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(path);
        let mut full = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => full.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StoreError::path_escapes_root(path));
                }
            }
        }
        if full == self.root {
            return Err(StoreError::other(format!("empty store path {path:?}")));
        }
        Ok(full)
    }

    fn map_io(path: &str, err: io::Error) -> StoreError {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::not_found(path)
        } else {
            StoreError::Io(err)
        }
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let full = self.resolve(path)?;
        trace!("reading {}", full.display());
        fs::read(&full).await.map_err(|e| Self::map_io(path, e))
    }

    async fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write beside the target and rename over it so a crash never leaves
        // a truncated blob.
        let mut staging = full.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        fs::write(&staging, data).await?;
        fs::rename(&staging, &full).await?;
        trace!("wrote {} bytes to {}", data.len(), full.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
