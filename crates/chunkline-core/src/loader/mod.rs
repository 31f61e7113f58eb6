//! Chunk loading: request tracking, fetch scheduling and payload ingestion.
//!
//! Every chunk moves `NotRequested -> Loading -> Loaded | Failed` and never
//! back. Callers waiting on a chunk hold a oneshot receiver; all receivers of
//! a chunk are completed together, in the order they were registered.

mod fetch;

pub use fetch::{ChunkFetcher, ChunkRequest, StaticChunkSource};

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::task::{LocalSpawn, LocalSpawnExt};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{FetchError, Result, RuntimeError};
use crate::events::{EventHandler, RuntimeEvent};
use crate::exports::Exports;
use crate::ids::{ChunkId, ModuleId};
use crate::manifest::ChunkManifest;
use crate::payload::ChunkPayload;
use crate::registry::{error_chain, DefineOutcome, ModuleRegistry};
use crate::resolver::Require;

/// Observable lifecycle of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    NotRequested,
    Loading,
    Loaded,
    Failed,
}

enum Status {
    NotRequested,
    Loading,
    Loaded,
    Failed(RuntimeError),
}

type Waiter = oneshot::Sender<Result<()>>;

struct ChunkRecord {
    status: Status,
    module_ids: FxHashSet<ModuleId>,
    waiters: Vec<Waiter>,
}

impl ChunkRecord {
    fn new(modules: &[ModuleId]) -> Self {
        Self {
            status: Status::NotRequested,
            module_ids: modules.iter().cloned().collect(),
            waiters: Vec::new(),
        }
    }

    fn state(&self) -> ChunkState {
        match self.status {
            Status::NotRequested => ChunkState::NotRequested,
            Status::Loading => ChunkState::Loading,
            Status::Loaded => ChunkState::Loaded,
            Status::Failed(_) => ChunkState::Failed,
        }
    }

    fn add_waiter(&mut self) -> oneshot::Receiver<Result<()>> {
        let (sender, receiver) = oneshot::channel();
        self.waiters.push(sender);
        receiver
    }
}

/// Result of executing one runtime entry
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub module_id: ModuleId,
    pub result: Result<Exports>,
}

/// A payload that was refused because it conflicts with registered modules
#[derive(Debug, Clone)]
pub struct RejectedPayload {
    pub chunk_ids: Vec<ChunkId>,
    pub error: RuntimeError,
}

/// Summary of an `ingest` call
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Chunks that became loaded during this call
    pub loaded_chunks: Vec<ChunkId>,
    /// Newly registered module definitions
    pub defined: usize,
    /// Definitions that were already registered
    pub duplicates: usize,
    /// Runtime entries executed or abandoned during this call
    pub entries: Vec<EntryOutcome>,
    /// Payloads skipped because of conflicting definitions
    pub rejected: Vec<RejectedPayload>,
}

impl IngestReport {
    /// True when no payload was rejected
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// The first rejection as an error, for callers that treat any conflict
    /// as fatal
    pub fn into_result(self) -> Result<Self> {
        match self.rejected.first() {
            Some(rejected) => Err(rejected.error.clone()),
            None => Ok(self),
        }
    }

    fn merge(&mut self, other: IngestReport) {
        self.loaded_chunks.extend(other.loaded_chunks);
        self.defined += other.defined;
        self.duplicates += other.duplicates;
        self.entries.extend(other.entries);
        self.rejected.extend(other.rejected);
    }
}

enum EntryStatus {
    Ready,
    Waiting,
    Blocked(RuntimeError),
}

pub struct ChunkLoader {
    registry: Rc<ModuleRegistry>,
    manifest: Rc<ChunkManifest>,
    config: Rc<RuntimeConfig>,
    fetcher: Rc<dyn ChunkFetcher>,
    spawner: Rc<dyn LocalSpawn>,
    events: Rc<dyn EventHandler>,
    chunks: RefCell<FxHashMap<ChunkId, ChunkRecord>>,
    deferred: RefCell<Vec<ModuleId>>,
    this: Weak<ChunkLoader>,
}

impl ChunkLoader {
    pub fn new(
        registry: Rc<ModuleRegistry>,
        manifest: Rc<ChunkManifest>,
        config: Rc<RuntimeConfig>,
        fetcher: Rc<dyn ChunkFetcher>,
        spawner: Rc<dyn LocalSpawn>,
        events: Rc<dyn EventHandler>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            registry,
            manifest,
            config,
            fetcher,
            spawner,
            events,
            chunks: RefCell::new(FxHashMap::default()),
            deferred: RefCell::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// A `require` handle whose `ensure_chunk` routes back to this loader
    pub fn require_handle(&self) -> Require {
        Require::with_loader(self.registry.clone(), self.this.clone())
    }

    pub fn state(&self, chunk_id: &ChunkId) -> ChunkState {
        self.chunks
            .borrow()
            .get(chunk_id)
            .map(ChunkRecord::state)
            .unwrap_or(ChunkState::NotRequested)
    }

    pub fn is_loaded(&self, chunk_id: &ChunkId) -> bool {
        self.state(chunk_id) == ChunkState::Loaded
    }

    /// Modules a chunk is known to contribute, from the manifest and from
    /// whatever payloads have arrived for it
    pub fn modules_of(&self, chunk_id: &ChunkId) -> Vec<ModuleId> {
        match self.chunks.borrow().get(chunk_id) {
            Some(record) => record.module_ids.iter().cloned().collect(),
            None => self.manifest.modules_of(chunk_id).to_vec(),
        }
    }

    /// A loading chunk that the manifest says will supply `module`
    pub fn pending_chunk_for(&self, module: &ModuleId) -> Option<ChunkId> {
        let candidates = self.manifest.chunks_for_module(module).ok()?;
        candidates
            .iter()
            .find(|chunk| self.state(chunk) == ChunkState::Loading)
            .cloned()
    }

    /// Runtime entries still waiting for their chunks
    pub fn deferred_entries(&self) -> Vec<ModuleId> {
        self.deferred.borrow().clone()
    }

    /// Resolve once `chunk_id` is loaded, fetching it if nobody has yet.
    ///
    /// Concurrent calls for the same chunk share a single fetch. A failed
    /// chunk stays failed: every later call gets the same error.
    pub fn ensure_chunk(&self, chunk_id: impl Into<ChunkId>) -> LocalBoxFuture<'static, Result<()>> {
        let chunk_id = chunk_id.into();

        let (receiver, start) = {
            let mut chunks = self.chunks.borrow_mut();
            let record = chunks
                .entry(chunk_id.clone())
                .or_insert_with(|| ChunkRecord::new(self.manifest.modules_of(&chunk_id)));

            match &record.status {
                Status::Loaded => return future::ready(Ok(())).boxed_local(),
                Status::Failed(error) => return future::ready(Err(error.clone())).boxed_local(),
                Status::NotRequested | Status::Loading => {}
            }

            let start = matches!(record.status, Status::NotRequested);
            record.status = Status::Loading;
            (record.add_waiter(), start)
        };

        if start {
            self.start_fetch(chunk_id.clone());
        }

        async move {
            match receiver.await {
                Ok(result) => result,
                Err(oneshot::Canceled) => Err(RuntimeError::chunk_load(chunk_id, FetchError::Canceled)),
            }
        }
        .boxed_local()
    }

    /// Ensure several chunks concurrently. Reports the first failure in
    /// argument order.
    pub fn ensure_chunks<I, C>(&self, chunk_ids: I) -> LocalBoxFuture<'static, Result<()>>
    where
        I: IntoIterator<Item = C>,
        C: Into<ChunkId>,
    {
        let waits: Vec<_> = chunk_ids
            .into_iter()
            .map(|chunk_id| self.ensure_chunk(chunk_id))
            .collect();

        async move {
            for result in future::join_all(waits).await {
                result?;
            }
            Ok(())
        }
        .boxed_local()
    }

    fn start_fetch(&self, chunk_id: ChunkId) {
        let request = ChunkRequest {
            url: self
                .config
                .chunk_url(&chunk_id, self.manifest.entry(&chunk_id)),
            chunk_id: chunk_id.clone(),
        };
        self.events.emit(RuntimeEvent::ChunkRequested {
            chunk_id: chunk_id.clone(),
            url: request.url.clone(),
        });

        let fetch = self.fetcher.fetch(request.clone());
        let loader = self.this.clone();
        let task = async move {
            let outcome = fetch.await;
            match loader.upgrade() {
                Some(loader) => loader.complete_fetch(&request, outcome),
                None => debug!("Chunk {} arrived after the loader was dropped", request.chunk_id),
            }
        };

        if let Err(e) = self.spawner.spawn_local(task) {
            self.fail_chunk(&chunk_id, FetchError::Spawn(e.to_string()));
        }
    }

    fn complete_fetch(
        &self,
        request: &ChunkRequest,
        outcome: std::result::Result<ChunkPayload, FetchError>,
    ) {
        let payload = match outcome {
            Ok(payload) => payload,
            Err(cause) => return self.fail_chunk(&request.chunk_id, cause),
        };

        let error = match self.ingest(vec![payload]) {
            Ok(report) => match report.rejected.into_iter().next() {
                Some(rejected) => rejected.error,
                None => {
                    if self.state(&request.chunk_id) == ChunkState::Loading {
                        self.fail_chunk(
                            &request.chunk_id,
                            FetchError::Missing {
                                url: request.url.clone(),
                            },
                        );
                    }
                    return;
                }
            },
            Err(error) => error,
        };
        self.fail_chunk(&request.chunk_id, FetchError::Integrity(error.to_string()));
    }

    fn fail_chunk(&self, chunk_id: &ChunkId, cause: FetchError) {
        let error = RuntimeError::chunk_load(chunk_id.clone(), cause);

        let waiters = {
            let mut chunks = self.chunks.borrow_mut();
            let record = chunks
                .entry(chunk_id.clone())
                .or_insert_with(|| ChunkRecord::new(self.manifest.modules_of(chunk_id)));

            if matches!(record.status, Status::Loaded | Status::Failed(_)) {
                debug!(
                    "Ignoring late failure for settled chunk {}: {}",
                    chunk_id, error
                );
                return;
            }
            record.status = Status::Failed(error.clone());
            std::mem::take(&mut record.waiters)
        };

        self.events.emit(RuntimeEvent::ChunkFailed {
            chunk_id: chunk_id.clone(),
            reason: error_chain(&error),
        });
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }

        // entries that needed this chunk are reported through events
        self.run_ready_entries();
    }

    /// Flip a chunk to loaded and release its waiters. Returns false if the
    /// chunk was already settled.
    fn mark_loaded(&self, chunk_id: &ChunkId, modules: &[ModuleId]) -> bool {
        let (waiters, module_count) = {
            let mut chunks = self.chunks.borrow_mut();
            let record = chunks
                .entry(chunk_id.clone())
                .or_insert_with(|| ChunkRecord::new(self.manifest.modules_of(chunk_id)));
            record.module_ids.extend(modules.iter().cloned());

            match record.status {
                Status::Loaded => return false,
                Status::Failed(_) => {
                    warn!(
                        "Chunk {} delivered after it failed; it stays failed",
                        chunk_id
                    );
                    return false;
                }
                Status::NotRequested | Status::Loading => {}
            }

            record.status = Status::Loaded;
            (std::mem::take(&mut record.waiters), record.module_ids.len())
        };

        self.events.emit(RuntimeEvent::ChunkLoaded {
            chunk_id: chunk_id.clone(),
            modules: module_count,
        });
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
        true
    }

    /// Merge delivered payloads into the registry.
    ///
    /// Each payload is checked in full before any of its definitions are
    /// registered. A payload that conflicts with a registered module is
    /// skipped without a trace and listed in `rejected`; the rest of the
    /// batch is still applied.
    pub fn ingest(&self, batch: Vec<ChunkPayload>) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for payload in batch {
            let conflict = payload
                .modules
                .iter()
                .find_map(|(id, definition)| self.registry.check_define(id, definition).err());
            if let Some(error) = conflict {
                self.events.emit(RuntimeEvent::PayloadRejected {
                    chunk_ids: payload.chunk_ids.clone(),
                    reason: error_chain(&error),
                });
                report.rejected.push(RejectedPayload {
                    chunk_ids: payload.chunk_ids,
                    error,
                });
                continue;
            }
            report.merge(self.apply(payload)?);
        }

        report.entries.extend(self.run_ready_entries());
        Ok(report)
    }

    fn apply(&self, payload: ChunkPayload) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for (id, definition) in &payload.modules {
            match self.registry.define(id.clone(), definition.clone())? {
                DefineOutcome::Registered => report.defined += 1,
                DefineOutcome::Duplicate | DefineOutcome::KeptExisting => report.duplicates += 1,
            }
        }

        let module_ids: Vec<ModuleId> = payload.modules.keys().cloned().collect();
        for chunk_id in &payload.chunk_ids {
            if self.mark_loaded(chunk_id, &module_ids) {
                report.loaded_chunks.push(chunk_id.clone());
            }
        }

        if self.config.run_entries {
            self.deferred
                .borrow_mut()
                .extend(payload.runtime_entries.iter().cloned());
        }
        Ok(report)
    }

    fn entry_status(&self, module: &ModuleId) -> EntryStatus {
        let required = match self.manifest.required_chunks(module) {
            Ok(chunks) => chunks,
            Err(_) if self.registry.contains(module) => return EntryStatus::Ready,
            Err(_) => return EntryStatus::Waiting,
        };

        let chunks = self.chunks.borrow();
        let mut all_loaded = true;
        for chunk_id in &required {
            match chunks.get(chunk_id).map(|record| &record.status) {
                Some(Status::Failed(error)) => return EntryStatus::Blocked(error.clone()),
                Some(Status::Loaded) => {}
                _ => all_loaded = false,
            }
        }

        if all_loaded && self.registry.contains(module) {
            EntryStatus::Ready
        } else {
            EntryStatus::Waiting
        }
    }

    /// Execute deferred entries whose chunks are all loaded, and drop the
    /// ones that depend on a failed chunk
    fn run_ready_entries(&self) -> Vec<EntryOutcome> {
        let mut settled = Vec::new();
        {
            let mut deferred = self.deferred.borrow_mut();
            let mut waiting = Vec::new();
            for module_id in deferred.drain(..) {
                match self.entry_status(&module_id) {
                    EntryStatus::Ready => settled.push((module_id, None)),
                    EntryStatus::Blocked(error) => settled.push((module_id, Some(error))),
                    EntryStatus::Waiting => waiting.push(module_id),
                }
            }
            *deferred = waiting;
        }

        let require = self.require_handle();
        settled
            .into_iter()
            .map(|(module_id, blocked)| {
                let result = match blocked {
                    Some(error) => Err(error),
                    None => require.require(module_id.clone()),
                };
                self.events.emit(RuntimeEvent::EntryExecuted {
                    module_id: module_id.clone(),
                    error: result.as_ref().err().map(error_chain),
                });
                EntryOutcome { module_id, result }
            })
            .collect()
    }

    pub fn registry(&self) -> &Rc<ModuleRegistry> {
        &self.registry
    }

    pub fn manifest(&self) -> &ChunkManifest {
        &self.manifest
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}
