//! Mock chunk fetchers for testing

use chunkline_core::{ChunkFetcher, ChunkId, ChunkPayload, ChunkRequest, FetchError, StaticChunkSource};
use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

type FetchResult = Result<ChunkPayload, FetchError>;

/// A static source that records every request it receives
#[derive(Debug, Default)]
pub struct CountingFetcher {
    source: StaticChunkSource,
    requests: RefCell<Vec<ChunkRequest>>,
}

impl CountingFetcher {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn insert(&self, payload: ChunkPayload) {
        self.source.insert(payload);
    }

    pub fn requests(&self) -> Vec<ChunkRequest> {
        self.requests.borrow().clone()
    }

    pub fn fetch_count(&self, chunk_id: impl Into<ChunkId>) -> usize {
        let chunk_id = chunk_id.into();
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.chunk_id == chunk_id)
            .count()
    }
}

impl ChunkFetcher for CountingFetcher {
    fn fetch(&self, request: ChunkRequest) -> LocalBoxFuture<'static, FetchResult> {
        self.requests.borrow_mut().push(request.clone());
        self.source.fetch(request)
    }
}

/// Fails every request with an error built by the given closure
pub struct FailingFetcher {
    make_error: Box<dyn Fn(&ChunkRequest) -> FetchError>,
}

impl FailingFetcher {
    pub fn new<F>(make_error: F) -> Rc<Self>
    where
        F: Fn(&ChunkRequest) -> FetchError + 'static,
    {
        Rc::new(Self {
            make_error: Box::new(make_error),
        })
    }

    /// Every request reports a network error
    pub fn network_error() -> Rc<Self> {
        Self::new(|request| {
            FetchError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused for {}", request.url),
            ))
        })
    }
}

impl ChunkFetcher for FailingFetcher {
    fn fetch(&self, request: ChunkRequest) -> LocalBoxFuture<'static, FetchResult> {
        future::ready(Err((self.make_error)(&request))).boxed_local()
    }
}

/// A fetcher whose requests stay in flight until the test settles them.
///
/// Lets a test observe the `Loading` state, queue several waiters and then
/// decide how the fetch ends.
#[derive(Default)]
pub struct ManualFetcher {
    pending: RefCell<HashMap<ChunkId, oneshot::Sender<FetchResult>>>,
    requests: RefCell<Vec<ChunkRequest>>,
}

impl ManualFetcher {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn is_pending(&self, chunk_id: impl Into<ChunkId>) -> bool {
        self.pending.borrow().contains_key(&chunk_id.into())
    }

    pub fn fetch_count(&self, chunk_id: impl Into<ChunkId>) -> usize {
        let chunk_id = chunk_id.into();
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.chunk_id == chunk_id)
            .count()
    }

    /// Finish the in-flight request for `chunk_id` with `payload`.
    /// Returns false if nothing was pending for that chunk.
    pub fn complete(&self, chunk_id: impl Into<ChunkId>, payload: ChunkPayload) -> bool {
        self.settle(chunk_id.into(), Ok(payload))
    }

    pub fn fail(&self, chunk_id: impl Into<ChunkId>, error: FetchError) -> bool {
        self.settle(chunk_id.into(), Err(error))
    }

    fn settle(&self, chunk_id: ChunkId, result: FetchResult) -> bool {
        match self.pending.borrow_mut().remove(&chunk_id) {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }
}

impl ChunkFetcher for ManualFetcher {
    fn fetch(&self, request: ChunkRequest) -> LocalBoxFuture<'static, FetchResult> {
        let (sender, receiver) = oneshot::channel();
        self.pending
            .borrow_mut()
            .insert(request.chunk_id.clone(), sender);
        self.requests.borrow_mut().push(request);

        async move { receiver.await.unwrap_or(Err(FetchError::Canceled)) }.boxed_local()
    }
}
