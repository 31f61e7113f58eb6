//! Runtime harness for integration tests
//!
//! Builds a `Runtime` on a single-threaded `LocalPool` with a collecting
//! event handler, so tests can drive fetch tasks step by step.

use chunkline_core::{ChunkFetcher, ChunkManifest, CollectingEventHandler, Runtime, RuntimeConfig};
use futures::executor::LocalPool;
use std::future::Future;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; `RUST_LOG` controls the filter
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub pool: LocalPool,
    pub events: Rc<CollectingEventHandler>,
    pub runtime: Runtime,
}

impl Harness {
    pub fn new(manifest: ChunkManifest, fetcher: Rc<dyn ChunkFetcher>) -> Self {
        Self::with_config(RuntimeConfig::default(), manifest, fetcher)
    }

    pub fn with_config(
        config: RuntimeConfig,
        manifest: ChunkManifest,
        fetcher: Rc<dyn ChunkFetcher>,
    ) -> Self {
        init_tracing();
        let pool = LocalPool::new();
        let events = Rc::new(CollectingEventHandler::new());
        let runtime = Runtime::with_dependencies(
            config,
            manifest,
            fetcher,
            Rc::new(pool.spawner()),
            events.clone(),
        );
        Self {
            pool,
            events,
            runtime,
        }
    }

    /// Drive spawned fetch tasks until `future` resolves
    pub fn block_on<F: Future>(&mut self, future: F) -> F::Output {
        self.pool.run_until(future)
    }

    /// Run every task that can make progress without blocking
    pub fn run_until_stalled(&mut self) {
        self.pool.run_until_stalled();
    }
}
