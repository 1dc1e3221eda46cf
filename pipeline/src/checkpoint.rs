//! Resumable run state, spec §4.14: a JSON file the engine reads back on `resume: true`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::error::CheckpointError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: u64,
    pub current_node: String,
    pub completed_nodes: Vec<String>,
    pub node_retries: HashMap<String, u32>,
    pub context: Context,
    pub logs: Vec<String>,
}

impl Checkpoint {
    /// Takes defensive copies: later mutation of `completed_nodes`/`node_retries` by the caller
    /// does not retroactively change this checkpoint.
    pub fn create(
        current_node: impl Into<String>,
        completed_nodes: &[String],
        node_retries: &HashMap<String, u32>,
        context: &Context,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            timestamp: timestamp_ms,
            current_node: current_node.into(),
            completed_nodes: completed_nodes.to_vec(),
            node_retries: node_retries.clone(),
            logs: context.logs().to_vec(),
            context: context.clone(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, CheckpointError> {
        let bytes = tokio::fs::read(path).await?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Self::validate(&value)?;
        let checkpoint: Checkpoint = serde_json::from_value(value)?;
        Ok(checkpoint)
    }

    fn validate(value: &Value) -> Result<(), CheckpointError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CheckpointError::Invalid("checkpoint is not a JSON object".to_string()))?;
        if !matches!(obj.get("current_node"), Some(Value::String(_))) {
            return Err(CheckpointError::Invalid("current_node must be a string".to_string()));
        }
        if !matches!(obj.get("completed_nodes"), Some(Value::Array(_))) {
            return Err(CheckpointError::Invalid("completed_nodes must be an array".to_string()));
        }
        if !matches!(obj.get("logs"), Some(Value::Array(_))) {
            return Err(CheckpointError::Invalid("logs must be an array".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("checkpoint.json");
        let mut ctx = Context::new();
        ctx.push_log("stage1 done");
        let retries = HashMap::from([("stage1".to_string(), 1u32)]);
        let cp = Checkpoint::create("stage2", &["stage1".to_string()], &retries, &ctx, 12345);
        cp.save(&path).await.unwrap();

        let loaded = Checkpoint::load(&path).await.unwrap();
        assert_eq!(loaded.current_node, "stage2");
        assert_eq!(loaded.completed_nodes, vec!["stage1".to_string()]);
        assert_eq!(loaded.node_retries.get("stage1"), Some(&1));
        assert_eq!(loaded.logs, vec!["stage1 done".to_string()]);
    }

    #[tokio::test]
    async fn load_rejects_malformed_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        tokio::fs::write(&path, br#"{"current_node": 5}"#).await.unwrap();
        let err = Checkpoint::load(&path).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[tokio::test]
    async fn create_takes_defensive_copies() {
        let mut completed = vec!["a".to_string()];
        let mut retries = HashMap::new();
        retries.insert("a".to_string(), 0u32);
        let ctx = Context::new();
        let cp = Checkpoint::create("b", &completed, &retries, &ctx, 1);
        completed.push("z".to_string());
        retries.insert("z".to_string(), 9);
        assert_eq!(cp.completed_nodes, vec!["a".to_string()]);
        assert!(!cp.node_retries.contains_key("z"));
    }
}
