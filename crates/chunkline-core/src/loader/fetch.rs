use futures::future::{self, FutureExt, LocalBoxFuture};
use rustc_hash::FxHashMap;
use std::cell::RefCell;

use crate::error::FetchError;
use crate::ids::ChunkId;
use crate::payload::ChunkPayload;

/// A request for one chunk payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub chunk_id: ChunkId,
    pub url: String,
}

/// Trait for obtaining chunk payloads
/// The loader calls `fetch` at most once per chunk; the returned future is
/// driven on the loader's local spawner.
pub trait ChunkFetcher {
    fn fetch(&self, request: ChunkRequest) -> LocalBoxFuture<'static, Result<ChunkPayload, FetchError>>;
}

/// In-process fetcher for pre-fetched chunks.
///
/// Payloads are registered up front and handed out on request. Every fetch
/// of the same chunk yields clones of the same definitions.
#[derive(Debug, Default)]
pub struct StaticChunkSource {
    payloads: RefCell<FxHashMap<ChunkId, ChunkPayload>>,
}

impl StaticChunkSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `payload` available under each chunk id it declares
    pub fn insert(&self, payload: ChunkPayload) {
        let mut payloads = self.payloads.borrow_mut();
        for chunk_id in &payload.chunk_ids {
            payloads.insert(chunk_id.clone(), payload.clone());
        }
    }

    pub fn contains(&self, chunk_id: &ChunkId) -> bool {
        self.payloads.borrow().contains_key(chunk_id)
    }
}

impl ChunkFetcher for StaticChunkSource {
    fn fetch(&self, request: ChunkRequest) -> LocalBoxFuture<'static, Result<ChunkPayload, FetchError>> {
        let payload = self.payloads.borrow().get(&request.chunk_id).cloned();
        match payload {
            Some(payload) => future::ready(Ok(payload)).boxed_local(),
            None => future::ready(Err(FetchError::NotFound { url: request.url })).boxed_local(),
        }
    }
}
