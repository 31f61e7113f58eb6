use std::cell::RefCell;
use tracing::{debug, error, info, warn};

use crate::ids::{ChunkId, ModuleId};

/// A lifecycle event from the registry or the chunk loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    ChunkRequested { chunk_id: ChunkId, url: String },
    ChunkLoaded { chunk_id: ChunkId, modules: usize },
    ChunkFailed { chunk_id: ChunkId, reason: String },
    PayloadRejected {
        chunk_ids: Vec<ChunkId>,
        reason: String,
    },
    ModuleDefined { module_id: ModuleId },
    ModuleInstantiated { module_id: ModuleId },
    ModuleFailed { module_id: ModuleId, reason: String },
    EntryExecuted {
        module_id: ModuleId,
        error: Option<String>,
    },
}

/// Trait for observing runtime events
/// This allows for dependency injection and testing with collecting handlers
pub trait EventHandler {
    fn emit(&self, event: RuntimeEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventHandler;

impl EventHandler for TracingEventHandler {
    fn emit(&self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::ChunkRequested { chunk_id, url } => {
                debug!("Requesting chunk {} from {}", chunk_id, url);
            }
            RuntimeEvent::ChunkLoaded { chunk_id, modules } => {
                info!("Chunk {} loaded ({} modules)", chunk_id, modules);
            }
            RuntimeEvent::ChunkFailed { chunk_id, reason } => {
                warn!("Chunk {} failed: {}", chunk_id, reason);
            }
            RuntimeEvent::PayloadRejected { chunk_ids, reason } => {
                let chunks: Vec<String> = chunk_ids.iter().map(ToString::to_string).collect();
                warn!("Payload for chunks [{}] rejected: {}", chunks.join(", "), reason);
            }
            RuntimeEvent::ModuleDefined { module_id } => {
                debug!("Defined module {}", module_id);
            }
            RuntimeEvent::ModuleInstantiated { module_id } => {
                debug!("Instantiated module {}", module_id);
            }
            RuntimeEvent::ModuleFailed { module_id, reason } => {
                error!("Module {} failed: {}", module_id, reason);
            }
            RuntimeEvent::EntryExecuted { module_id, error: None } => {
                debug!("Executed runtime entry {}", module_id);
            }
            RuntimeEvent::EntryExecuted {
                module_id,
                error: Some(reason),
            } => {
                error!("Runtime entry {} failed: {}", module_id, reason);
            }
        }
    }
}

/// Collecting event handler for testing
/// Records all events without logging
#[derive(Debug, Default)]
pub struct CollectingEventHandler {
    events: RefCell<Vec<RuntimeEvent>>,
}

impl CollectingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.borrow().clone()
    }

    /// How many fetches were started for `chunk_id`
    pub fn request_count(&self, chunk_id: &ChunkId) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::ChunkRequested { chunk_id: c, .. } if c == chunk_id))
            .count()
    }

    pub fn instantiation_count(&self, module_id: &ModuleId) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::ModuleInstantiated { module_id: m } if m == module_id))
            .count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EventHandler for CollectingEventHandler {
    fn emit(&self, event: RuntimeEvent) {
        self.events.borrow_mut().push(event);
    }
}
