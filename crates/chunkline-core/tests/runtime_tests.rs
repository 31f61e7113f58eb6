use chunkline_core::{
    ChunkId, ChunkManifest, ChunkPayload, ChunkQueue, ChunkState, DuplicatePolicy,
    FetchError, ModuleDefinition, ModuleId, ModuleState, RuntimeConfig, RuntimeError, RuntimeEvent,
};
use chunkline_test_helpers::fixtures::{
    counting_module, forwarding_module, layered_manifest, lazy_chunk_144, value_module,
};
use chunkline_test_helpers::mocks::{CountingFetcher, FailingFetcher, ManualFetcher};
use chunkline_test_helpers::Harness;
use futures::future::join_all;
use futures::task::LocalSpawnExt;
use std::cell::RefCell;
use std::rc::Rc;

fn assert_cause(err: &RuntimeError, chunk: &str, check: impl Fn(&FetchError) -> bool) {
    match err {
        RuntimeError::ChunkLoad { chunk_id, cause } => {
            assert_eq!(chunk_id, &ChunkId::from(chunk));
            assert!(check(cause.as_ref()), "unexpected cause: {}", cause);
        }
        other => panic!("expected ChunkLoad, got {:?}", other),
    }
}

// ============================================================================
// Synchronous require
// ============================================================================

#[test]
fn test_require_after_ingest() {
    let h = Harness::new(ChunkManifest::new(), CountingFetcher::new());
    h.runtime
        .ingest(vec![ChunkPayload::new(["main"]).with_module(1u64, value_module("x", 2i64))])
        .unwrap();

    let exports = h.runtime.require(1u64).unwrap();
    assert_eq!(exports.get_as::<i64>("x"), Some(2));
}

#[test]
fn test_missing_module_fails_without_fetching() {
    let fetcher = CountingFetcher::new();
    let h = Harness::new(ChunkManifest::new(), fetcher.clone());

    let err = h.runtime.require(999u64).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ModuleNotFound { ref id, pending_chunk: None } if *id == ModuleId::from(999u64)
    ));
    assert!(fetcher.requests().is_empty());
}

#[test]
fn test_mutual_requires_through_payload() {
    let h = Harness::new(ChunkManifest::new(), CountingFetcher::new());
    let payload = ChunkPayload::new(["main"])
        .with_module(
            "a",
            ModuleDefinition::new(|exports, require| {
                let b = require.require("b")?;
                exports.set("name", "a".to_string());
                exports.define_getter("peer", move || {
                    let name: Rc<dyn std::any::Any> = Rc::new(b.get_as::<String>("name"));
                    name
                });
                Ok(())
            }),
        )
        .with_module(
            "b",
            ModuleDefinition::new(|exports, require| {
                let a = require.require("a")?;
                exports.set("name", "b".to_string());
                exports.define_getter("peer", move || {
                    let name: Rc<dyn std::any::Any> = Rc::new(a.get_as::<String>("name"));
                    name
                });
                Ok(())
            }),
        );
    h.runtime.ingest(vec![payload]).unwrap();

    let a = h.runtime.require("a").unwrap();
    let b = h.runtime.require("b").unwrap();
    assert_eq!(a.get_as::<Option<String>>("peer"), Some(Some("b".to_string())));
    assert_eq!(b.get_as::<Option<String>>("peer"), Some(Some("a".to_string())));
    assert_eq!(h.runtime.registry().state(&ModuleId::from("a")), Some(ModuleState::Ready));
}

#[test]
fn test_failed_module_is_not_rerun() {
    let h = Harness::new(ChunkManifest::new(), CountingFetcher::new());
    let runs = Rc::new(RefCell::new(0));
    let counter = runs.clone();
    h.runtime
        .ingest(vec![ChunkPayload::new(["main"]).with_module(
            "broken",
            ModuleDefinition::new(move |_, _| {
                *counter.borrow_mut() += 1;
                Err(RuntimeError::custom("boom"))
            }),
        )])
        .unwrap();

    for _ in 0..2 {
        let err = h.runtime.require("broken").unwrap_err();
        assert!(matches!(err, RuntimeError::ModuleEvaluation { .. }));
    }
    assert_eq!(*runs.borrow(), 1);
    assert_eq!(
        h.runtime.registry().state(&ModuleId::from("broken")),
        Some(ModuleState::Errored)
    );
}

// ============================================================================
// Chunk loading
// ============================================================================

#[test]
fn test_lazy_chunk_fetch() {
    let (manifest, payload) = lazy_chunk_144();
    let fetcher = CountingFetcher::new();
    fetcher.insert(payload);
    let config = RuntimeConfig {
        public_path: "/master/assets/js/".to_string(),
        chunk_filename: "[id].[hash].js".to_string(),
        ..RuntimeConfig::default()
    };
    let mut h = Harness::with_config(config, manifest, fetcher.clone());

    let wait = h.runtime.ensure_chunk(144u64);
    h.block_on(wait).unwrap();

    assert_eq!(fetcher.requests()[0].url, "/master/assets/js/144.b13f8b31.js");
    let exports = h.runtime.require(693u64).unwrap();
    assert_eq!(exports.get_as::<i64>("value"), Some(693));
}

#[test]
fn test_concurrent_ensure_single_fetch() {
    let fetcher = ManualFetcher::new();
    let mut h = Harness::new(ChunkManifest::new(), fetcher.clone());

    let waits: Vec<_> = (0..3).map(|_| h.runtime.ensure_chunk("lazy")).collect();
    h.run_until_stalled();

    assert_eq!(fetcher.fetch_count("lazy"), 1);
    assert_eq!(h.runtime.chunk_state(&ChunkId::from("lazy")), ChunkState::Loading);

    assert!(fetcher.complete("lazy", ChunkPayload::new(["lazy"])));
    let results = h.block_on(join_all(waits));
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(fetcher.fetch_count("lazy"), 1);
    assert_eq!(h.events.request_count(&ChunkId::from("lazy")), 1);
}

#[test]
fn test_waiters_resolve_in_registration_order() {
    let fetcher = ManualFetcher::new();
    let mut h = Harness::new(ChunkManifest::new(), fetcher.clone());
    let order = Rc::new(RefCell::new(Vec::new()));

    let spawner = h.pool.spawner();
    for index in 0..3 {
        let wait = h.runtime.ensure_chunk("shared");
        let order = order.clone();
        spawner
            .spawn_local(async move {
                wait.await.unwrap();
                order.borrow_mut().push(index);
            })
            .unwrap();
    }
    h.run_until_stalled();
    assert!(order.borrow().is_empty());

    fetcher.complete("shared", ChunkPayload::new(["shared"]));
    h.run_until_stalled();
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn test_failed_fetch_rejects_every_waiter() {
    let fetcher = ManualFetcher::new();
    let mut h = Harness::new(ChunkManifest::new(), fetcher.clone());

    let waits: Vec<_> = (0..3).map(|_| h.runtime.ensure_chunk("chunk-7")).collect();
    h.run_until_stalled();
    fetcher.fail(
        "chunk-7",
        FetchError::Io(std::io::Error::new(std::io::ErrorKind::Other, "network down")),
    );

    for result in h.block_on(join_all(waits)) {
        assert_cause(&result.unwrap_err(), "chunk-7", |c| matches!(c, FetchError::Io(_)));
    }
    assert_eq!(h.runtime.chunk_state(&ChunkId::from("chunk-7")), ChunkState::Failed);

    // the failure is cached; no retry
    let later = h.runtime.ensure_chunk("chunk-7");
    assert_cause(&h.block_on(later).unwrap_err(), "chunk-7", |c| {
        matches!(c, FetchError::Io(_))
    });
    assert_eq!(fetcher.fetch_count("chunk-7"), 1);
    assert!(h
        .events
        .events()
        .iter()
        .any(|e| matches!(e, RuntimeEvent::ChunkFailed { reason, .. } if reason.contains("network down"))));
}

#[test]
fn test_timeout_reported_by_fetcher() {
    let mut h = Harness::new(
        ChunkManifest::new(),
        FailingFetcher::new(|_| FetchError::TimedOut),
    );

    let wait = h.runtime.ensure_chunk(3u64);
    let err = h.block_on(wait).unwrap_err();
    assert_cause(&err, "3", |c| matches!(c, FetchError::TimedOut));
}

#[test]
fn test_conflicting_chunk_fails_with_integrity() {
    let fetcher = CountingFetcher::new();
    fetcher.insert(ChunkPayload::new(["late"]).with_module("shared", value_module("v", 2i64)));
    let mut h = Harness::new(ChunkManifest::new(), fetcher);
    h.runtime
        .ingest(vec![ChunkPayload::new(["main"]).with_module("shared", value_module("v", 1i64))])
        .unwrap();

    let wait = h.runtime.ensure_chunk("late");
    let err = h.block_on(wait).unwrap_err();
    assert_cause(&err, "late", |c| matches!(c, FetchError::Integrity(_)));

    let shared = h.runtime.require("shared").unwrap();
    assert_eq!(shared.get_as::<i64>("v"), Some(1));
}

#[test]
fn test_keep_first_accepts_conflicting_chunk() {
    let fetcher = CountingFetcher::new();
    fetcher.insert(ChunkPayload::new(["late"]).with_module("shared", value_module("v", 2i64)));
    let config = RuntimeConfig {
        duplicate_definitions: DuplicatePolicy::KeepFirst,
        ..RuntimeConfig::default()
    };
    let mut h = Harness::with_config(config, ChunkManifest::new(), fetcher);
    h.runtime
        .ingest(vec![ChunkPayload::new(["main"]).with_module("shared", value_module("v", 1i64))])
        .unwrap();

    let wait = h.runtime.ensure_chunk("late");
    h.block_on(wait).unwrap();

    let shared = h.runtime.require("shared").unwrap();
    assert_eq!(shared.get_as::<i64>("v"), Some(1));
}

#[test]
fn test_pending_chunk_diagnostic() {
    let (manifest, payload) = lazy_chunk_144();
    let fetcher = ManualFetcher::new();
    let mut h = Harness::new(manifest, fetcher.clone());

    let wait = h.runtime.ensure_chunk(144u64);
    match h.runtime.require(693u64) {
        Err(RuntimeError::ModuleNotFound { pending_chunk, .. }) => {
            assert_eq!(pending_chunk, Some(ChunkId::from(144u64)));
        }
        other => panic!("unexpected: {:?}", other.map(|e| e.module_id().clone())),
    }

    fetcher.complete(144u64, payload);
    h.block_on(wait).unwrap();
    assert!(h.runtime.require(693u64).is_ok());
}

#[test]
fn test_dynamic_import_through_require_handle() {
    let fetcher = CountingFetcher::new();
    fetcher.insert(ChunkPayload::new(["settings"]).with_module("panel", value_module("value", 5i64)));
    let mut h = Harness::new(ChunkManifest::new(), fetcher);

    let require = h.runtime.require_handle();
    let wait = require.ensure_chunk("settings");
    h.block_on(wait).unwrap();

    assert_eq!(require.require("panel").unwrap().get_as::<i64>("value"), Some(5));
}

#[test]
fn test_dropping_runtime_cancels_waiters() {
    let fetcher = ManualFetcher::new();
    let h = Harness::new(ChunkManifest::new(), fetcher.clone());
    let wait = h.runtime.ensure_chunk("slow");

    let Harness { mut pool, runtime, .. } = h;
    drop(runtime);

    let err = pool.run_until(wait).unwrap_err();
    assert_cause(&err, "slow", |c| matches!(c, FetchError::Canceled));
}

// ============================================================================
// Manifest-driven loading
// ============================================================================

fn layered_fetcher() -> Rc<CountingFetcher> {
    let fetcher = CountingFetcher::new();
    fetcher.insert(ChunkPayload::new(["vendors"]).with_module("react", value_module("value", 18i64)));
    fetcher.insert(ChunkPayload::new(["app"]).with_module("shell", forwarding_module("react")));
    fetcher.insert(ChunkPayload::new(["page"]).with_module("page", forwarding_module("shell")));
    fetcher
}

#[test]
fn test_load_module_ensures_dependency_chain() {
    let fetcher = layered_fetcher();
    let mut h = Harness::new(layered_manifest(), fetcher.clone());

    let load = h.runtime.load_module("page");
    let page = h.block_on(load).unwrap();

    assert_eq!(page.get_as::<i64>("value"), Some(18));
    for chunk in ["vendors", "app", "page"] {
        assert_eq!(fetcher.fetch_count(chunk), 1);
        assert_eq!(h.runtime.chunk_state(&ChunkId::from(chunk)), ChunkState::Loaded);
    }

    // everything is present now; loading again fetches nothing
    let again = h.runtime.load_module("shell");
    h.block_on(again).unwrap();
    assert_eq!(fetcher.requests().len(), 3);
}

#[test]
fn test_load_module_reports_failed_dependency() {
    let fetcher = CountingFetcher::new();
    fetcher.insert(ChunkPayload::new(["page"]).with_module("page", value_module("value", 1i64)));
    let mut h = Harness::new(layered_manifest(), fetcher);

    let load = h.runtime.load_module("page");
    let err = h.block_on(load).unwrap_err();
    assert_cause(&err, "app", |c| matches!(c, FetchError::NotFound { .. }));
}

#[test]
fn test_load_module_rejects_unknown_module() {
    let mut h = Harness::new(layered_manifest(), layered_fetcher());
    let load = h.runtime.load_module("missing");
    let err = h.block_on(load).unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownModule { .. }));
}

#[test]
fn test_ensure_chunks_reports_first_failure_in_order() {
    let fetcher = CountingFetcher::new();
    fetcher.insert(ChunkPayload::new(["ok"]));
    let mut h = Harness::new(ChunkManifest::new(), fetcher);

    let wait = h.runtime.ensure_chunks(["ok", "first-missing", "second-missing"]);
    let err = h.block_on(wait).unwrap_err();
    assert_cause(&err, "first-missing", |c| matches!(c, FetchError::NotFound { .. }));
    assert!(h.runtime.loader().is_loaded(&ChunkId::from("ok")));
}

// ============================================================================
// Queue and runtime entries
// ============================================================================

#[test]
fn test_queue_backlog_replayed_on_attach() {
    let queue = ChunkQueue::new();
    let (definition, runs) = counting_module();
    assert!(queue
        .push(ChunkPayload::new(["vendors"]).with_module("react", definition))
        .is_none());
    assert!(queue
        .push(ChunkPayload::new(["app"]).with_module("shell", forwarding_module("react")))
        .is_none());
    assert_eq!(queue.pending(), 2);

    let h = Harness::new(layered_manifest(), CountingFetcher::new());
    let report = h.runtime.attach_queue(&queue).unwrap();

    assert_eq!(
        report.loaded_chunks,
        vec![ChunkId::from("vendors"), ChunkId::from("app")]
    );
    assert_eq!(report.defined, 2);
    assert_eq!(queue.pending(), 0);
    assert_eq!(runs.get(), 0);

    let pushed = queue.push(ChunkPayload::new(["page"]).with_module("page", forwarding_module("shell")));
    assert!(pushed.unwrap().is_ok());
    assert!(h.runtime.require("page").is_ok());
    assert_eq!(runs.get(), 1);
}

#[test]
fn test_conflicting_backlog_payload_does_not_drop_later_ones() {
    let h = Harness::new(ChunkManifest::new(), CountingFetcher::new());
    h.runtime
        .ingest(vec![ChunkPayload::new(["main"]).with_module("shared", value_module("v", 1i64))])
        .unwrap();

    let queue = ChunkQueue::new();
    queue.push(ChunkPayload::new(["bad"]).with_module("shared", value_module("v", 2i64)));
    queue.push(ChunkPayload::new(["good"]).with_module("page", value_module("v", 3i64)));

    let report = h.runtime.attach_queue(&queue).unwrap();

    assert_eq!(queue.pending(), 0);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].chunk_ids, vec![ChunkId::from("bad")]);
    assert!(matches!(
        report.rejected[0].error,
        RuntimeError::ConflictingDefinition { ref id } if *id == ModuleId::from("shared")
    ));
    assert_eq!(report.loaded_chunks, vec![ChunkId::from("good")]);

    assert_eq!(h.runtime.chunk_state(&ChunkId::from("bad")), ChunkState::NotRequested);
    assert_eq!(h.runtime.chunk_state(&ChunkId::from("good")), ChunkState::Loaded);
    assert_eq!(h.runtime.require("page").unwrap().get_as::<i64>("v"), Some(3));
    assert_eq!(h.runtime.require("shared").unwrap().get_as::<i64>("v"), Some(1));
}

#[test]
fn test_queued_payload_for_failed_chunk_keeps_it_failed() {
    let fetcher = ManualFetcher::new();
    let mut h = Harness::new(ChunkManifest::new(), fetcher.clone());

    let wait = h.runtime.ensure_chunk("flaky");
    h.run_until_stalled();
    fetcher.fail("flaky", FetchError::TimedOut);
    assert!(h.block_on(wait).is_err());

    let report = h
        .runtime
        .queue()
        .push(ChunkPayload::new(["flaky"]).with_module("late", value_module("v", 1i64)))
        .unwrap()
        .unwrap();

    assert!(report.loaded_chunks.is_empty());
    assert_eq!(h.runtime.chunk_state(&ChunkId::from("flaky")), ChunkState::Failed);
    let again = h.runtime.ensure_chunk("flaky");
    assert_cause(&h.block_on(again).unwrap_err(), "flaky", |c| {
        matches!(c, FetchError::TimedOut)
    });
}

#[test]
fn test_late_failure_keeps_chunk_loaded() {
    let fetcher = ManualFetcher::new();
    let mut h = Harness::new(ChunkManifest::new(), fetcher.clone());

    let wait = h.runtime.ensure_chunk("eager");
    h.run_until_stalled();
    assert!(fetcher.is_pending("eager"));

    // the chunk file pushes itself while the fetch is still in flight
    h.runtime
        .queue()
        .push(ChunkPayload::new(["eager"]).with_module("app", value_module("v", 1i64)))
        .unwrap()
        .unwrap();
    assert_eq!(h.runtime.chunk_state(&ChunkId::from("eager")), ChunkState::Loaded);

    assert!(fetcher.fail("eager", FetchError::TimedOut));
    h.run_until_stalled();

    assert_eq!(h.runtime.chunk_state(&ChunkId::from("eager")), ChunkState::Loaded);
    h.block_on(wait).unwrap();
    let later = h.runtime.ensure_chunk("eager");
    h.block_on(later).unwrap();
    assert!(!h
        .events
        .events()
        .iter()
        .any(|e| matches!(e, RuntimeEvent::ChunkFailed { .. })));
}

#[test]
fn test_runtime_entry_runs_after_its_chunks() {
    let queue = ChunkQueue::new();
    let (definition, runs) = counting_module();
    queue.push(
        ChunkPayload::new(["app"])
            .with_module("shell", definition)
            .with_entry("shell"),
    );

    let h = Harness::new(layered_manifest(), CountingFetcher::new());
    let report = h.runtime.attach_queue(&queue).unwrap();
    assert!(report.entries.is_empty());
    assert_eq!(runs.get(), 0);

    let report = queue
        .push(ChunkPayload::new(["vendors"]).with_module("react", value_module("value", 18i64)))
        .unwrap()
        .unwrap();
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].module_id, ModuleId::from("shell"));
    assert!(report.entries[0].result.is_ok());
    assert_eq!(runs.get(), 1);
    assert!(h.events.events().iter().any(|e| matches!(
        e,
        RuntimeEvent::EntryExecuted { error: None, .. }
    )));
}

#[test]
fn test_runtime_entries_disabled() {
    let config = RuntimeConfig {
        run_entries: false,
        ..RuntimeConfig::default()
    };
    let h = Harness::with_config(config, ChunkManifest::new(), CountingFetcher::new());
    let (definition, runs) = counting_module();

    let report = h
        .runtime
        .ingest(vec![ChunkPayload::new(["main"]).with_module("app", definition).with_entry("app")])
        .unwrap();
    assert!(report.entries.is_empty());
    assert_eq!(runs.get(), 0);
}

#[test]
fn test_ingest_same_batch_twice() {
    let h = Harness::new(ChunkManifest::new(), CountingFetcher::new());
    let (definition, runs) = counting_module();
    let batch = vec![ChunkPayload::new([1u64, 2u64]).with_module(10u64, definition)];

    let first = h.runtime.ingest(batch.clone()).unwrap();
    h.runtime.require(10u64).unwrap();
    let second = h.runtime.ingest(batch).unwrap();

    assert_eq!(first.loaded_chunks.len(), 2);
    assert!(second.loaded_chunks.is_empty());
    assert_eq!(second.duplicates, 1);
    assert_eq!(h.runtime.registry().len(), 1);
    h.runtime.require(10u64).unwrap();
    assert_eq!(runs.get(), 1);
}
