use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;

use super::Command;
use crate::config::PatchworkConfig;
use crate::store::{ContentStore, LocalContentStore};

async fn open_store(config: &PatchworkConfig) -> Result<LocalContentStore> {
    LocalContentStore::open(&config.store.root)
        .await
        .with_context(|| format!("opening store at {}", config.store.root.display()))
}

pub struct PutCommand {
    config: PatchworkConfig,
    file: PathBuf,
}

impl PutCommand {
    pub fn new(config: PatchworkConfig, file: PathBuf) -> Self {
        Self { config, file }
    }
}

impl Command for PutCommand {
    async fn execute(&self) -> Result<()> {
        let store = open_store(&self.config).await?;
        let content = tokio::fs::read(&self.file)
            .await
            .with_context(|| format!("reading {}", self.file.display()))?;
        let address = store.put(&content).await?;
        println!("{address}");
        Ok(())
    }
}

pub struct GetCommand {
    config: PatchworkConfig,
    address: String,
    output: Option<PathBuf>,
}

impl GetCommand {
    pub fn new(config: PatchworkConfig, address: String, output: Option<PathBuf>) -> Self {
        Self {
            config,
            address,
            output,
        }
    }
}

impl Command for GetCommand {
    async fn execute(&self) -> Result<()> {
        let store = open_store(&self.config).await?;
        let content = store.get(&self.address).await?;
        match &self.output {
            Some(path) => {
                tokio::fs::write(path, &content)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("💾 Wrote {} bytes to {}", content.len(), path.display());
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&content)?;
                stdout.flush()?;
            }
        }
        Ok(())
    }
}

pub struct PinCommand {
    config: PatchworkConfig,
    address: String,
}

impl PinCommand {
    pub fn new(config: PatchworkConfig, address: String) -> Self {
        Self { config, address }
    }
}

impl Command for PinCommand {
    async fn execute(&self) -> Result<()> {
        let store = open_store(&self.config).await?;
        if !store.pin(&self.address).await? {
            bail!("content {} is not stored", self.address);
        }
        println!("📌 Pinned {}", self.address);
        Ok(())
    }
}
