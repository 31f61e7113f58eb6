//! The `require` handle passed to module bodies and exposed to consumers.

use futures::future::{self, FutureExt, LocalBoxFuture};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{FetchError, Result, RuntimeError};
use crate::exports::Exports;
use crate::ids::{ChunkId, ModuleId};
use crate::loader::ChunkLoader;
use crate::registry::ModuleRegistry;

/// Synchronous module resolver bound to one registry.
///
/// `require` never fetches: a module whose chunk has not arrived yet is
/// reported as not found. Chunks are brought in with `ensure_chunk`, whose
/// future must be awaited outside of any module body.
#[derive(Clone)]
pub struct Require {
    registry: Rc<ModuleRegistry>,
    loader: Option<Weak<ChunkLoader>>,
}

impl Require {
    /// Create a resolver with no chunk loader behind it
    pub fn new(registry: Rc<ModuleRegistry>) -> Self {
        Self {
            registry,
            loader: None,
        }
    }

    pub(crate) fn with_loader(registry: Rc<ModuleRegistry>, loader: Weak<ChunkLoader>) -> Self {
        Self {
            registry,
            loader: Some(loader),
        }
    }

    pub fn require(&self, id: impl Into<ModuleId>) -> Result<Exports> {
        self.registry.get_exports(&id.into(), self)
    }

    /// Start loading a chunk. Intended for dynamic imports from module bodies.
    pub fn ensure_chunk(&self, chunk_id: impl Into<ChunkId>) -> LocalBoxFuture<'static, Result<()>> {
        let chunk_id = chunk_id.into();
        match self.loader.as_ref().and_then(Weak::upgrade) {
            Some(loader) => loader.ensure_chunk(chunk_id),
            None => future::ready(Err(RuntimeError::chunk_load(
                chunk_id,
                FetchError::Spawn("no chunk loader is attached to this resolver".to_string()),
            )))
            .boxed_local(),
        }
    }

    pub fn registry(&self) -> &Rc<ModuleRegistry> {
        &self.registry
    }
}

impl fmt::Debug for Require {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Require")
            .field("modules", &self.registry.len())
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}
