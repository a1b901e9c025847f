use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{content_address, is_valid_address, ContentStore, Replicator};
use crate::error::{PatchworkError, Result};

/// Filesystem content store.
///
/// Layout under `root`:
/// - `objects/<address>` holds the bytes
/// - `pins/<address>` marks content that must be retained
pub struct LocalContentStore {
    root: PathBuf,
    replicator: Option<Arc<dyn Replicator>>,
}

impl LocalContentStore {
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in ["objects", "pins"] {
            tokio::fs::create_dir_all(root.join(dir))
                .await
                .map_err(|e| PatchworkError::storage(&format!("creating {}", root.join(dir).display()), e))?;
        }
        Ok(Self {
            root,
            replicator: None,
        })
    }

    pub fn with_replicator(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.replicator = Some(replicator);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, address: &str) -> PathBuf {
        self.root.join("objects").join(address)
    }

    fn pin_path(&self, address: &str) -> PathBuf {
        self.root.join("pins").join(address)
    }

    pub async fn is_pinned(&self, address: &str) -> Result<bool> {
        if !is_valid_address(address) {
            return Ok(false);
        }
        tokio::fs::try_exists(self.pin_path(address))
            .await
            .map_err(|e| PatchworkError::storage("checking pin", e))
    }

    /// Number of stored objects.
    pub async fn object_count(&self) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(self.root.join("objects"))
            .await
            .map_err(|e| PatchworkError::storage("listing objects", e))?;
        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PatchworkError::storage("listing objects", e))?
        {
            if entry.file_name().to_str().is_some_and(is_valid_address) {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn put(&self, content: &[u8]) -> Result<String> {
        let address = content_address(content);
        let path = self.object_path(&address);

        if self.contains(&address).await? {
            debug!(address = %address, "Content already stored");
            return Ok(address);
        }

        // write-then-rename keeps readers from seeing partial objects; racing
        // writers of the same address rename identical bytes over each other
        let tmp = self
            .root
            .join("objects")
            .join(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| PatchworkError::storage("writing object", e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(PatchworkError::storage("committing object", e));
        }

        debug!(address = %address, bytes = content.len(), "Stored content");
        Ok(address)
    }

    async fn get(&self, address: &str) -> Result<Vec<u8>> {
        if !is_valid_address(address) {
            return Err(PatchworkError::NotFound {
                address: address.to_string(),
            });
        }

        let content = match tokio::fs::read(self.object_path(address)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PatchworkError::NotFound {
                    address: address.to_string(),
                })
            }
            Err(e) => return Err(PatchworkError::storage("reading object", e)),
        };

        if content_address(&content) != address {
            return Err(PatchworkError::Storage(format!(
                "object {address} is corrupt"
            )));
        }
        Ok(content)
    }

    async fn pin(&self, address: &str) -> Result<bool> {
        if !self.contains(address).await? {
            return Ok(false);
        }

        let pin_path = self.pin_path(address);
        let already_pinned = tokio::fs::try_exists(&pin_path)
            .await
            .map_err(|e| PatchworkError::storage("checking pin", e))?;
        if !already_pinned {
            tokio::fs::write(&pin_path, chrono::Utc::now().to_rfc3339())
                .await
                .map_err(|e| PatchworkError::storage("writing pin", e))?;
            info!(address = %address, "Pinned content");
        }

        if let Some(replicator) = &self.replicator {
            let content = self.get(address).await?;
            if let Err(e) = replicator.announce(address, &content).await {
                warn!(address = %address, error = %e, "Replication announce failed, content kept locally");
            }
        }
        Ok(true)
    }

    async fn contains(&self, address: &str) -> Result<bool> {
        if !is_valid_address(address) {
            return Ok(false);
        }
        tokio::fs::try_exists(self.object_path(address))
            .await
            .map_err(|e| PatchworkError::storage("checking object", e))
    }
}
