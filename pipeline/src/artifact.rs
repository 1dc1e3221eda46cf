//! Named store for stage outputs too large to carry in `Context` directly, spec §4.13.
//! Small values stay in memory; values over `threshold_bytes` spill to
//! `<base_dir>/artifacts/<id>__<name>.json` when a base directory is configured.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::PipelineError;

#[derive(Clone, Debug)]
enum ArtifactEntry {
    Memory(Value),
    File(PathBuf),
}

pub struct ArtifactStore {
    base_dir: Option<PathBuf>,
    threshold_bytes: u64,
    entries: RwLock<HashMap<String, ArtifactEntry>>,
}

fn is_safe_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains('/') && !s.contains('\\') && s != ".." && s != "."
}

fn composite_key(id: &str, name: &str) -> String {
    format!("{id}__{name}")
}

impl ArtifactStore {
    pub fn new(base_dir: Option<PathBuf>, threshold_bytes: u64) -> Self {
        Self { base_dir, threshold_bytes, entries: RwLock::new(HashMap::new()) }
    }

    fn artifact_path(&self, base: &Path, key: &str) -> PathBuf {
        base.join("artifacts").join(format!("{key}.json"))
    }

    pub async fn store(&self, id: &str, name: &str, data: Value) -> Result<(), PipelineError> {
        if !is_safe_segment(id) || !is_safe_segment(name) {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("artifact id/name rejected as path traversal: {id}/{name}"),
            )));
        }

        let key = composite_key(id, name);
        let serialized = serde_json::to_vec(&data).map_err(crate::error::CheckpointError::Serialization)?;

        let entry = if serialized.len() as u64 > self.threshold_bytes {
            if let Some(base) = &self.base_dir {
                let path = self.artifact_path(base, &key);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, &serialized).await?;
                ArtifactEntry::File(path)
            } else {
                ArtifactEntry::Memory(data)
            }
        } else {
            ArtifactEntry::Memory(data)
        };

        self.entries.write().await.insert(key, entry);
        Ok(())
    }

    pub async fn retrieve(&self, id: &str, name: &str) -> Result<Option<Value>, PipelineError> {
        let key = composite_key(id, name);
        let entry = self.entries.read().await.get(&key).cloned();
        match entry {
            Some(ArtifactEntry::Memory(v)) => Ok(Some(v)),
            Some(ArtifactEntry::File(path)) => {
                let bytes = tokio::fs::read(&path).await?;
                let value = serde_json::from_slice(&bytes).map_err(crate::error::CheckpointError::Serialization)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn has(&self, id: &str, name: &str) -> bool {
        self.entries.read().await.contains_key(&composite_key(id, name))
    }

    pub async fn list(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn remove(&self, id: &str, name: &str) -> Result<(), PipelineError> {
        let key = composite_key(id, name);
        if let Some(ArtifactEntry::File(path)) = self.entries.write().await.remove(&key) {
            let _ = tokio::fs::remove_file(&path).await;
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), PipelineError> {
        let mut entries = self.entries.write().await;
        for entry in entries.values() {
            if let ArtifactEntry::File(path) = entry {
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        entries.clear();
        Ok(())
    }
}
