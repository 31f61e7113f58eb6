//! Test fixtures - module definitions and manifests

use chunkline_core::{ChunkEntry, ChunkId, ChunkManifest, ChunkPayload, ModuleDefinition, ModuleId};
use std::cell::Cell;
use std::rc::Rc;

/// A module that exports `name = value`
pub fn value_module<T>(name: &'static str, value: T) -> ModuleDefinition
where
    T: Clone + 'static,
{
    ModuleDefinition::new(move |exports, _| {
        exports.set(name, value.clone());
        Ok(())
    })
}

/// A module that counts how many times its body has run.
///
/// The count is also exported as `runs`.
pub fn counting_module() -> (ModuleDefinition, Rc<Cell<usize>>) {
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let definition = ModuleDefinition::new(move |exports, _| {
        counter.set(counter.get() + 1);
        exports.set("runs", counter.get());
        Ok(())
    });
    (definition, runs)
}

/// A module that requires `dependency` and re-exports its `value`
pub fn forwarding_module(dependency: impl Into<ModuleId>) -> ModuleDefinition {
    let dependency = dependency.into();
    ModuleDefinition::new(move |exports, require| {
        let dep = require.require(dependency.clone())?;
        if let Some(value) = dep.get("value") {
            exports.set_value("value", value);
        }
        Ok(())
    })
}

/// Lazily loaded chunk 144 holding module 693
pub fn lazy_chunk_144() -> (ChunkManifest, ChunkPayload) {
    let mut manifest = ChunkManifest::new();
    manifest.insert_chunk(
        144u64,
        ChunkEntry {
            hash: Some("b13f8b31".to_string()),
            ..ChunkEntry::with_modules([693u64])
        },
    );
    let payload = ChunkPayload::new([144u64]).with_module(693u64, value_module("value", 693i64));
    (manifest, payload)
}

/// `vendors <- app <- page` dependency chain
pub fn layered_manifest() -> ChunkManifest {
    let mut manifest = ChunkManifest::new();
    manifest.insert_chunk("vendors", ChunkEntry::with_modules(["react"]));
    manifest.insert_chunk(
        "app",
        ChunkEntry {
            depends_on: vec![ChunkId::from("vendors")],
            ..ChunkEntry::with_modules(["shell"])
        },
    );
    manifest.insert_chunk(
        "page",
        ChunkEntry {
            depends_on: vec![ChunkId::from("app")],
            ..ChunkEntry::with_modules(["page"])
        },
    );
    manifest
}

/// Manifest JSON matching `layered_manifest`
pub fn layered_manifest_json() -> &'static str {
    r#"{
  "version": 1,
  "chunks": {
    "vendors": { "modules": ["react"] },
    "app": { "modules": ["shell"], "dependsOn": ["vendors"] },
    "page": { "modules": ["page"], "dependsOn": ["app"], "file": "pages/page.js" }
  }
}"#
}
