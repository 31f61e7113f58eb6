use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, RuntimeError};
use crate::ids::ChunkId;
use crate::manifest::ChunkEntry;

/// What to do when a module id is defined twice with different bodies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    #[default]
    #[serde(rename = "reject")]
    Reject,
    #[serde(rename = "keepFirst")]
    KeepFirst,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Prefix prepended to every chunk file (default: "")
    #[serde(default)]
    pub public_path: String,

    /// File name template for chunks without an explicit file in the
    /// manifest. Supports `[id]` and `[hash]` (default: "[id].js")
    #[serde(default = "default_chunk_filename")]
    pub chunk_filename: String,

    /// Conflicting duplicate definitions (default: reject)
    #[serde(default)]
    pub duplicate_definitions: DuplicatePolicy,

    /// Execute runtime entries listed by payloads (default: true)
    #[serde(default = "default_true")]
    pub run_entries: bool,
}

fn default_chunk_filename() -> String {
    "[id].js".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            public_path: String::new(),
            chunk_filename: default_chunk_filename(),
            duplicate_definitions: DuplicatePolicy::Reject,
            run_entries: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON or YAML file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Config(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// URL a chunk is fetched from
    pub fn chunk_url(&self, chunk_id: &ChunkId, entry: Option<&ChunkEntry>) -> String {
        let file = match entry.and_then(|e| e.file.as_deref()) {
            Some(file) => file.to_string(),
            None => {
                let hash = entry.and_then(|e| e.hash.as_deref()).unwrap_or_default();
                self.chunk_filename
                    .replace("[id]", &chunk_id.to_string())
                    .replace("[hash]", hash)
            }
        };
        format!("{}{}", self.public_path, file)
    }
}
