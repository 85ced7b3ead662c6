//! Storage backends.
//!
//! The [`Store`] contract is deliberately small: whole-blob reads and writes
//! addressed by a relative path. Encryption, network transport and caching
//! all live behind it.

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

/// A place blobs can be read from and written to.
///
/// A missing path must fail with [`StoreError::NotFound`] so callers can
/// tell "empty" apart from "broken".
#[async_trait]
pub trait Store: Send + Sync {
    // ========================================================================
    // Binary
    // ========================================================================

    async fn read(&self, path: &str) -> StoreResult<Vec<u8>>;

    async fn write(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    // ========================================================================
    // Text
    // ========================================================================

    /// Read a UTF-8 blob.
    async fn reads(&self, path: &str) -> StoreResult<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).map_err(|_| StoreError::NotText(path.to_string()))
    }

    /// Write a UTF-8 blob.
    async fn writes(&self, path: &str, data: &str) -> StoreResult<()> {
        self.write(path, data.as_bytes()).await
    }

    /// Short description for logs.
    fn describe(&self) -> String;
}
