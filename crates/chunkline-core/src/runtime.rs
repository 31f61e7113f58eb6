use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::task::LocalSpawn;
use std::rc::Rc;

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::events::{EventHandler, TracingEventHandler};
use crate::exports::Exports;
use crate::ids::{ChunkId, ModuleId};
use crate::loader::{ChunkFetcher, ChunkLoader, ChunkState, IngestReport};
use crate::manifest::ChunkManifest;
use crate::payload::{ChunkPayload, ChunkQueue};
use crate::registry::ModuleRegistry;
use crate::resolver::Require;

/// One loaded application: registry, chunk loader and push queue wired
/// together around a shared configuration and manifest.
pub struct Runtime {
    config: Rc<RuntimeConfig>,
    manifest: Rc<ChunkManifest>,
    registry: Rc<ModuleRegistry>,
    loader: Rc<ChunkLoader>,
    queue: ChunkQueue,
    require: Require,
}

impl Runtime {
    /// Create a runtime that reports lifecycle events through `tracing`
    pub fn new(
        config: RuntimeConfig,
        manifest: ChunkManifest,
        fetcher: Rc<dyn ChunkFetcher>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        Self::with_dependencies(
            config,
            manifest,
            fetcher,
            spawner,
            Rc::new(TracingEventHandler),
        )
    }

    /// Create a runtime with a custom event handler (for testing)
    pub fn with_dependencies(
        config: RuntimeConfig,
        manifest: ChunkManifest,
        fetcher: Rc<dyn ChunkFetcher>,
        spawner: Rc<dyn LocalSpawn>,
        events: Rc<dyn EventHandler>,
    ) -> Self {
        let config = Rc::new(config);
        let manifest = Rc::new(manifest);
        let registry = Rc::new(ModuleRegistry::with_options(
            config.duplicate_definitions,
            events.clone(),
        ));
        let loader = ChunkLoader::new(
            registry.clone(),
            manifest.clone(),
            config.clone(),
            fetcher,
            spawner,
            events,
        );

        let queue = ChunkQueue::new();
        queue.connect(&loader);
        let require = loader.require_handle();

        Runtime {
            config,
            manifest,
            registry,
            loader,
            queue,
            require,
        }
    }

    /// Synchronously resolve a module whose chunk is already present.
    ///
    /// When the module, or a module it requires, is missing but the manifest
    /// places it in a chunk that is currently loading, the error names that
    /// chunk.
    pub fn require(&self, id: impl Into<ModuleId>) -> Result<Exports> {
        self.require
            .require(id)
            .map_err(|error| self.with_pending_hint(error))
    }

    fn with_pending_hint(&self, error: RuntimeError) -> RuntimeError {
        match error {
            RuntimeError::ModuleNotFound {
                id,
                pending_chunk: None,
            } => {
                let pending_chunk = self.loader.pending_chunk_for(&id);
                RuntimeError::ModuleNotFound { id, pending_chunk }
            }
            RuntimeError::ModuleEvaluation { id, source } => RuntimeError::ModuleEvaluation {
                id,
                source: Box::new(self.with_pending_hint(*source)),
            },
            other => other,
        }
    }

    pub fn ensure_chunk(&self, chunk_id: impl Into<ChunkId>) -> LocalBoxFuture<'static, Result<()>> {
        self.loader.ensure_chunk(chunk_id)
    }

    pub fn ensure_chunks<I, C>(&self, chunk_ids: I) -> LocalBoxFuture<'static, Result<()>>
    where
        I: IntoIterator<Item = C>,
        C: Into<ChunkId>,
    {
        self.loader.ensure_chunks(chunk_ids)
    }

    /// Load everything `id` needs according to the manifest, then require it
    pub fn load_module(&self, id: impl Into<ModuleId>) -> LocalBoxFuture<'static, Result<Exports>> {
        let id = id.into();
        let chunks = match self.manifest.required_chunks(&id) {
            Ok(chunks) => chunks,
            Err(e) => return future::ready(Err(e)).boxed_local(),
        };

        let ready = self.loader.ensure_chunks(chunks);
        let require = self.require.clone();
        async move {
            ready.await?;
            require.require(id)
        }
        .boxed_local()
    }

    /// Apply payloads delivered outside the queue
    pub fn ingest(&self, batch: Vec<ChunkPayload>) -> Result<IngestReport> {
        self.loader.ingest(batch)
    }

    /// The queue owned by this runtime; pushes are applied immediately
    pub fn queue(&self) -> &ChunkQueue {
        &self.queue
    }

    /// Adopt a queue that chunk files may already have pushed onto.
    ///
    /// Buffered payloads are ingested in push order; later pushes go straight
    /// to this runtime. A conflicting payload is listed in the report's
    /// `rejected` and does not stop the ones after it.
    pub fn attach_queue(&self, queue: &ChunkQueue) -> Result<IngestReport> {
        queue.attach(&self.loader)
    }

    pub fn chunk_state(&self, chunk_id: &ChunkId) -> ChunkState {
        self.loader.state(chunk_id)
    }

    /// A `require` handle that outlives borrows of the runtime
    pub fn require_handle(&self) -> Require {
        self.require.clone()
    }

    pub fn config(&self) -> &Rc<RuntimeConfig> {
        &self.config
    }

    pub fn manifest(&self) -> &Rc<ChunkManifest> {
        &self.manifest
    }

    pub fn registry(&self) -> &Rc<ModuleRegistry> {
        &self.registry
    }

    pub fn loader(&self) -> &Rc<ChunkLoader> {
        &self.loader
    }
}
