//! Chunk payloads and the queue they are pushed onto.
//!
//! A chunk file, when evaluated, pushes `[chunk_ids, modules, entries]` onto a
//! well-known queue. Pushes that happen before the runtime is up are buffered
//! and replayed in order when the runtime attaches.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::ids::{ChunkId, ModuleId};
use crate::loader::{ChunkLoader, IngestReport};
use crate::registry::ModuleDefinition;

/// One delivered chunk file
#[derive(Debug, Clone, Default)]
pub struct ChunkPayload {
    /// Chunks this payload completes
    pub chunk_ids: Vec<ChunkId>,
    /// Definitions in delivery order
    pub modules: IndexMap<ModuleId, ModuleDefinition>,
    /// Modules to execute once their chunks are present
    pub runtime_entries: Vec<ModuleId>,
}

impl ChunkPayload {
    pub fn new<I, C>(chunk_ids: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ChunkId>,
    {
        Self {
            chunk_ids: chunk_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_module(mut self, id: impl Into<ModuleId>, definition: ModuleDefinition) -> Self {
        self.modules.insert(id.into(), definition);
        self
    }

    pub fn with_entry(mut self, id: impl Into<ModuleId>) -> Self {
        self.runtime_entries.push(id.into());
        self
    }

    pub fn module_ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.modules.keys()
    }
}

#[derive(Default)]
struct QueueInner {
    backlog: RefCell<VecDeque<ChunkPayload>>,
    sink: RefCell<Option<Weak<ChunkLoader>>>,
}

/// The global push entry point shared by every chunk file.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct ChunkQueue {
    inner: Rc<QueueInner>,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a payload.
    ///
    /// Returns the ingest result when a loader is attached, `None` when the
    /// payload was buffered.
    pub fn push(&self, payload: ChunkPayload) -> Option<Result<IngestReport>> {
        let loader = self.inner.sink.borrow().as_ref().and_then(Weak::upgrade);
        match loader {
            Some(loader) => Some(loader.ingest(vec![payload])),
            None => {
                self.inner.backlog.borrow_mut().push_back(payload);
                None
            }
        }
    }

    /// Number of payloads waiting for a loader
    pub fn pending(&self) -> usize {
        self.inner.backlog.borrow().len()
    }

    pub fn is_attached(&self) -> bool {
        self.inner
            .sink
            .borrow()
            .as_ref()
            .is_some_and(|sink| sink.strong_count() > 0)
    }

    pub(crate) fn connect(&self, loader: &Rc<ChunkLoader>) {
        *self.inner.sink.borrow_mut() = Some(Rc::downgrade(loader));
    }

    /// Route future pushes to `loader` and replay the backlog through it
    pub(crate) fn attach(&self, loader: &Rc<ChunkLoader>) -> Result<IngestReport> {
        self.connect(loader);
        let backlog: Vec<ChunkPayload> = self.inner.backlog.borrow_mut().drain(..).collect();
        loader.ingest(backlog)
    }
}

impl fmt::Debug for ChunkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkQueue")
            .field("pending", &self.pending())
            .field("attached", &self.is_attached())
            .finish()
    }
}
