//! JSON file storage implementation.
//!
//! Stores one `gen-NNNN.json` file per generation under a root directory.
//! Writes go to a temporary sibling first and are renamed into place, so a
//! generation record is either fully present or absent.

use std::path::{Path, PathBuf};

use synthq_core::Generation;
use tokio::fs;
use tracing::debug;

use super::{PopulationStore, Result, StoreError};

/// File-based JSON population store.
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    /// Create a store rooted at the given directory, creating it if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn generation_path(&self, index: u32) -> PathBuf {
        self.root.join(format!("gen-{index:04}.json"))
    }

    async fn generation_indices(&self) -> Result<Vec<u32>> {
        let mut indices = Vec::new();
        let mut rd = fs::read_dir(&self.root).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(index) = name
                .strip_prefix("gen-")
                .and_then(|s| s.strip_suffix(".json"))
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            indices.push(index);
        }
        indices.sort_unstable();
        Ok(indices)
    }
}

#[async_trait::async_trait]
impl PopulationStore for JsonStore {
    async fn save(&mut self, generation: &Generation) -> Result<()> {
        let path = self.generation_path(generation.index);
        let json = serde_json::to_string_pretty(generation)?;

        // Write-then-rename keeps the generation record atomic on crash.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, &path).await?;

        debug!(generation = generation.index, path = %path.display(), "saved generation");
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<Generation>> {
        let indices = self.generation_indices().await?;
        match indices.last() {
            Some(&index) => self.load(index).await,
            None => Ok(None),
        }
    }

    async fn load(&self, index: u32) -> Result<Option<Generation>> {
        read_json(&self.generation_path(index)).await
    }

    async fn history(&self) -> Result<Vec<Generation>> {
        let mut generations = Vec::new();
        for index in self.generation_indices().await? {
            if let Some(generation) = self.load(index).await? {
                generations.push(generation);
            }
        }
        Ok(generations)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
