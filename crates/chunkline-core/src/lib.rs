pub mod config;
pub mod error;
pub mod events;
pub mod exports;
pub mod ids;
pub mod loader;
pub mod manifest;
pub mod payload;
pub mod registry;
pub mod resolver;
pub mod runtime;

pub use config::{DuplicatePolicy, RuntimeConfig};
pub use error::{FetchError, Result, RuntimeError};
pub use events::{CollectingEventHandler, EventHandler, RuntimeEvent, TracingEventHandler};
pub use exports::{ExportGetter, ExportValue, Exports};
pub use ids::{ChunkId, ModuleId};
pub use loader::{
    ChunkFetcher, ChunkLoader, ChunkRequest, ChunkState, EntryOutcome, IngestReport,
    RejectedPayload, StaticChunkSource,
};
pub use manifest::{ChunkEntry, ChunkManifest, MANIFEST_VERSION};
pub use payload::{ChunkPayload, ChunkQueue};
pub use registry::{DefineOutcome, ModuleBody, ModuleDefinition, ModuleRegistry, ModuleState};
pub use resolver::Require;
pub use runtime::Runtime;
