//! Build-time chunk manifest: which modules each chunk contributes.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

use crate::error::{Result, RuntimeError};
use crate::ids::{ChunkId, ModuleId};

/// Manifest format version - increment when the file layout changes
pub const MANIFEST_VERSION: u32 = 1;

/// Entry for a single chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEntry {
    /// Modules this chunk registers once loaded
    #[serde(default)]
    pub modules: Vec<ModuleId>,

    /// File name relative to the public path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Content hash, substituted for `[hash]` in the file name template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Chunks that must be loaded alongside this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ChunkId>,
}

impl ChunkEntry {
    pub fn with_modules<I, M>(modules: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<ModuleId>,
    {
        Self {
            modules: modules.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    version: u32,
    #[serde(default)]
    chunks: IndexMap<ChunkId, ChunkEntry>,
}

/// Static `ChunkId -> modules` mapping, with a reverse index from module to
/// the chunks that contain it. Not mutated once the runtime is built.
#[derive(Debug, Clone, Default)]
pub struct ChunkManifest {
    chunks: IndexMap<ChunkId, ChunkEntry>,
    module_index: FxHashMap<ModuleId, Vec<ChunkId>>,
}

impl ChunkManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a chunk entry
    pub fn insert_chunk(&mut self, chunk_id: impl Into<ChunkId>, entry: ChunkEntry) {
        let chunk_id = chunk_id.into();
        if let Some(previous) = self.chunks.get(&chunk_id) {
            for module in &previous.modules {
                if let Some(chunks) = self.module_index.get_mut(module) {
                    chunks.retain(|c| c != &chunk_id);
                }
            }
            self.module_index.retain(|_, chunks| !chunks.is_empty());
        }

        for module in &entry.modules {
            let chunks = self.module_index.entry(module.clone()).or_default();
            if !chunks.contains(&chunk_id) {
                chunks.push(chunk_id.clone());
            }
        }
        self.chunks.insert(chunk_id, entry);
    }

    pub fn entry(&self, chunk_id: &ChunkId) -> Option<&ChunkEntry> {
        self.chunks.get(chunk_id)
    }

    pub fn chunk_ids(&self) -> impl Iterator<Item = &ChunkId> {
        self.chunks.keys()
    }

    pub fn modules_of(&self, chunk_id: &ChunkId) -> &[ModuleId] {
        self.chunks
            .get(chunk_id)
            .map(|entry| entry.modules.as_slice())
            .unwrap_or(&[])
    }

    /// Every chunk that contributes `module`, in manifest order
    pub fn chunks_for_module(&self, module: &ModuleId) -> Result<&[ChunkId]> {
        self.module_index
            .get(module)
            .map(Vec::as_slice)
            .ok_or_else(|| RuntimeError::UnknownModule { id: module.clone() })
    }

    /// The first chunk that declares `module`
    pub fn home_chunk(&self, module: &ModuleId) -> Result<&ChunkId> {
        self.chunks_for_module(module)?
            .first()
            .ok_or_else(|| RuntimeError::UnknownModule { id: module.clone() })
    }

    /// Chunks to ensure before requiring `module`: its home chunk followed by
    /// everything reachable through `dependsOn`, breadth first.
    pub fn required_chunks(&self, module: &ModuleId) -> Result<Vec<ChunkId>> {
        let home = self.home_chunk(module)?.clone();

        let mut seen = FxHashSet::default();
        let mut order = Vec::new();
        let mut to_process = VecDeque::from([home]);

        while let Some(chunk) = to_process.pop_front() {
            if !seen.insert(chunk.clone()) {
                continue;
            }
            if let Some(entry) = self.chunks.get(&chunk) {
                to_process.extend(entry.depends_on.iter().cloned());
            }
            order.push(chunk);
        }

        Ok(order)
    }

    /// Check that every `dependsOn` reference names a declared chunk
    pub fn validate(&self) -> Result<()> {
        for (chunk_id, entry) in &self.chunks {
            if let Some(missing) = entry
                .depends_on
                .iter()
                .find(|dep| !self.chunks.contains_key(*dep))
            {
                return Err(RuntimeError::InvalidManifest(format!(
                    "chunk {} depends on undeclared chunk {}",
                    chunk_id, missing
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: ManifestFile = serde_json::from_str(content)
            .map_err(|e| RuntimeError::InvalidManifest(e.to_string()))?;

        if file.version != MANIFEST_VERSION {
            return Err(RuntimeError::InvalidManifest(format!(
                "version mismatch: expected {}, found {}",
                MANIFEST_VERSION, file.version
            )));
        }

        let mut manifest = ChunkManifest::new();
        for (chunk_id, entry) in file.chunks {
            manifest.insert_chunk(chunk_id, entry);
        }
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::InvalidManifest(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        let file = ManifestFile {
            version: MANIFEST_VERSION,
            chunks: self.chunks.clone(),
        };
        serde_json::to_string_pretty(&file).map_err(|e| RuntimeError::InvalidManifest(e.to_string()))
    }
}
