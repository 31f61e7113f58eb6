use std::sync::Arc;
use thiserror::Error;

use crate::ids::{ChunkId, ModuleId};

/// Errors surfaced by the registry, loader and manifest.
///
/// Cloneable so that a single chunk failure can be handed to every waiter on
/// that chunk and cached for later callers.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("Module not found: {id}{}", pending_suffix(.pending_chunk))]
    ModuleNotFound {
        id: ModuleId,
        pending_chunk: Option<ChunkId>,
    },

    #[error("Loading chunk {chunk_id} failed")]
    ChunkLoad {
        chunk_id: ChunkId,
        #[source]
        cause: Arc<FetchError>,
    },

    #[error("No chunk in the manifest contributes module {id}")]
    UnknownModule { id: ModuleId },

    #[error("Conflicting definition registered for module {id}")]
    ConflictingDefinition { id: ModuleId },

    #[error("Module {id} failed during instantiation")]
    ModuleEvaluation {
        id: ModuleId,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("Invalid chunk manifest: {0}")]
    InvalidManifest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Raised by module bodies for application-level failures.
    #[error("{0}")]
    Custom(String),
}

fn pending_suffix(pending: &Option<ChunkId>) -> String {
    match pending {
        Some(chunk) => format!(" (chunk {} is still loading)", chunk),
        None => String::new(),
    }
}

impl RuntimeError {
    pub fn module_not_found(id: impl Into<ModuleId>) -> Self {
        RuntimeError::ModuleNotFound {
            id: id.into(),
            pending_chunk: None,
        }
    }

    pub fn chunk_load(chunk_id: impl Into<ChunkId>, cause: FetchError) -> Self {
        RuntimeError::ChunkLoad {
            chunk_id: chunk_id.into(),
            cause: Arc::new(cause),
        }
    }

    pub fn custom(message: impl Into<String>) -> Self {
        RuntimeError::Custom(message.into())
    }

    /// The chunk id carried by a `ChunkLoad` error.
    pub fn chunk_id(&self) -> Option<&ChunkId> {
        match self {
            RuntimeError::ChunkLoad { chunk_id, .. } => Some(chunk_id),
            _ => None,
        }
    }
}

/// Why a chunk payload could not be obtained or accepted.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no payload at {url}")]
    NotFound { url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("payload from {url} did not register the requested chunk")]
    Missing { url: String },

    #[error("payload rejected: {0}")]
    Integrity(String),

    #[error("request timed out")]
    TimedOut,

    #[error("load was abandoned before completion")]
    Canceled,

    #[error("could not schedule fetch: {0}")]
    Spawn(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
