//! Content-addressed storage for patch bytes.
//!
//! Every blob is stored under the hex SHA-256 of its bytes, so writing the
//! same content twice yields the same address and a single stored copy.
//! All operations are safe to retry.
//!
//! # Examples
//!
//! ```rust,no_run
//! use patchwork::store::{ContentStore, LocalContentStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = LocalContentStore::open(".patchwork/store").await?;
//!
//!     let address = store.put(b"diff-content").await?;
//!     assert_eq!(store.put(b"diff-content").await?, address);
//!     assert_eq!(store.get(&address).await?, b"diff-content".to_vec());
//!
//!     store.pin(&address).await?;
//!     Ok(())
//! }
//! ```
mod local;

pub use local::LocalContentStore;

#[cfg(test)]
use mockall::automock;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Address of `content`: lowercase hex SHA-256.
pub fn content_address(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Whether `address` has the shape produced by [`content_address`].
pub fn is_valid_address(address: &str) -> bool {
    address.len() == 64 && address.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Durable key-value store keyed by content hash.
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `content` and return its address. Existing content is not rewritten.
    async fn put(&self, content: &[u8]) -> Result<String>;

    /// Fetch content, failing with `NotFound` when absent.
    async fn get(&self, address: &str) -> Result<Vec<u8>>;

    /// Mark content as must-retain and announce it to the replicator, if any.
    /// Returns false when the address is not stored.
    async fn pin(&self, address: &str) -> Result<bool>;

    async fn contains(&self, address: &str) -> Result<bool>;
}

/// Extension point for propagating pinned content to peers.
///
/// Only local durability is guaranteed; failures here are logged by the
/// store and never surface to callers.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Replicator: Send + Sync {
    async fn announce(&self, address: &str, content: &[u8]) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_hex_sha256() {
        assert_eq!(
            content_address(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_address(b"diff-content"), content_address(b"diff-content"));
        assert_ne!(content_address(b"foo"), content_address(b"bar"));
    }

    #[test]
    fn address_validation_rejects_paths_and_uppercase() {
        assert!(is_valid_address(&content_address(b"x")));
        assert!(!is_valid_address("../../etc/passwd"));
        assert!(!is_valid_address(&content_address(b"x").to_uppercase()));
        assert!(!is_valid_address("abc"));
    }
}
