//! Process-wide module table.
//!
//! Each module moves through `Unloaded -> Instantiating -> Ready` (or
//! `Errored`) exactly once. No borrow of the table is held while a module body
//! runs, so bodies may re-enter the registry through `require`.

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::DuplicatePolicy;
use crate::error::{Result, RuntimeError};
use crate::events::{EventHandler, RuntimeEvent, TracingEventHandler};
use crate::exports::Exports;
use crate::ids::ModuleId;
use crate::resolver::Require;

/// Signature of a module body: populate `exports`, optionally requiring other
/// modules through `require`.
pub type ModuleBody = dyn Fn(&Exports, &Require) -> Result<()>;

/// An immutable module definition.
///
/// Two definitions are the same if they share a body, or if both carry the
/// same digest. The digest lets a re-delivered payload (a chunk evaluated a
/// second time, producing fresh closures) be recognised as a duplicate rather
/// than a conflict.
#[derive(Clone)]
pub struct ModuleDefinition {
    body: Rc<ModuleBody>,
    digest: Option<Arc<str>>,
}

impl ModuleDefinition {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Exports, &Require) -> Result<()> + 'static,
    {
        Self {
            body: Rc::new(body),
            digest: None,
        }
    }

    /// Create a definition whose digest is the Blake3 hash of `source`
    pub fn from_source<F>(source: &str, body: F) -> Self
    where
        F: Fn(&Exports, &Require) -> Result<()> + 'static,
    {
        Self::new(body).with_digest(blake3::hash(source.as_bytes()).to_hex().to_string())
    }

    /// Attach a build-supplied content digest
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(Arc::from(digest.into()));
        self
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn same_as(&self, other: &ModuleDefinition) -> bool {
        if Rc::ptr_eq(&self.body, &other.body) {
            return true;
        }
        matches!((&self.digest, &other.digest), (Some(a), Some(b)) if a == b)
    }

    fn invoke(&self, exports: &Exports, require: &Require) -> Result<()> {
        (self.body)(exports, require)
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("digest", &self.digest)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a registered module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unloaded,
    Instantiating,
    Ready,
    Errored,
}

enum Slot {
    Unloaded,
    Instantiating(Exports),
    Ready(Exports),
    Errored(RuntimeError),
}

struct ModuleRecord {
    definition: ModuleDefinition,
    slot: Slot,
}

/// What `define` did with a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefineOutcome {
    /// First definition for this id
    Registered,
    /// The same definition was already registered
    Duplicate,
    /// A different definition exists and was kept under `keepFirst`
    KeptExisting,
}

pub struct ModuleRegistry {
    records: RefCell<FxHashMap<ModuleId, ModuleRecord>>,
    policy: DuplicatePolicy,
    events: Rc<dyn EventHandler>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::with_options(DuplicatePolicy::default(), Rc::new(TracingEventHandler))
    }

    pub fn with_options(policy: DuplicatePolicy, events: Rc<dyn EventHandler>) -> Self {
        Self {
            records: RefCell::new(FxHashMap::default()),
            policy,
            events,
        }
    }

    /// Check what `define` would do, without registering anything
    pub fn check_define(&self, id: &ModuleId, definition: &ModuleDefinition) -> Result<DefineOutcome> {
        let records = self.records.borrow();
        match records.get(id) {
            None => Ok(DefineOutcome::Registered),
            Some(existing) if existing.definition.same_as(definition) => {
                Ok(DefineOutcome::Duplicate)
            }
            Some(_) => match self.policy {
                DuplicatePolicy::Reject => {
                    Err(RuntimeError::ConflictingDefinition { id: id.clone() })
                }
                DuplicatePolicy::KeepFirst => Ok(DefineOutcome::KeptExisting),
            },
        }
    }

    /// Register `definition` under `id`.
    ///
    /// Never replaces an existing definition, whatever the policy.
    pub fn define(&self, id: ModuleId, definition: ModuleDefinition) -> Result<DefineOutcome> {
        let outcome = self.check_define(&id, &definition)?;
        match outcome {
            DefineOutcome::Registered => {
                self.records.borrow_mut().insert(
                    id.clone(),
                    ModuleRecord {
                        definition,
                        slot: Slot::Unloaded,
                    },
                );
                self.events.emit(RuntimeEvent::ModuleDefined { module_id: id });
            }
            DefineOutcome::Duplicate => {
                debug!("Module {} re-delivered, keeping existing definition", id);
            }
            DefineOutcome::KeptExisting => {
                warn!(
                    "Conflicting definition for module {} ignored (keepFirst policy)",
                    id
                );
            }
        }
        Ok(outcome)
    }

    /// Return the exports of `id`, running its body on first use.
    ///
    /// A call made while the module is still instantiating (a circular
    /// require) receives the partially populated exports handle.
    pub fn get_exports(&self, id: &ModuleId, resolver: &Require) -> Result<Exports> {
        let (definition, exports) = {
            let mut records = self.records.borrow_mut();
            let record = records
                .get_mut(id)
                .ok_or_else(|| RuntimeError::module_not_found(id))?;

            match &record.slot {
                Slot::Ready(exports) | Slot::Instantiating(exports) => {
                    return Ok(exports.clone());
                }
                Slot::Errored(error) => return Err(error.clone()),
                Slot::Unloaded => {}
            }

            let exports = Exports::new(id.clone());
            record.slot = Slot::Instantiating(exports.clone());
            (record.definition.clone(), exports)
        };

        let outcome = definition.invoke(&exports, resolver);

        let mut records = self.records.borrow_mut();
        let record = records
            .get_mut(id)
            .ok_or_else(|| RuntimeError::module_not_found(id))?;

        match outcome {
            Ok(()) => {
                record.slot = Slot::Ready(exports.clone());
                drop(records);
                self.events.emit(RuntimeEvent::ModuleInstantiated {
                    module_id: id.clone(),
                });
                Ok(exports)
            }
            Err(cause) => {
                let error = RuntimeError::ModuleEvaluation {
                    id: id.clone(),
                    source: Box::new(cause),
                };
                record.slot = Slot::Errored(error.clone());
                drop(records);
                self.events.emit(RuntimeEvent::ModuleFailed {
                    module_id: id.clone(),
                    reason: error_chain(&error),
                });
                Err(error)
            }
        }
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.records.borrow().contains_key(id)
    }

    pub fn state(&self, id: &ModuleId) -> Option<ModuleState> {
        self.records.borrow().get(id).map(|record| match record.slot {
            Slot::Unloaded => ModuleState::Unloaded,
            Slot::Instantiating(_) => ModuleState::Instantiating,
            Slot::Ready(_) => ModuleState::Ready,
            Slot::Errored(_) => ModuleState::Errored,
        })
    }

    /// Exports of a module that has started instantiating, without running anything
    pub fn cached(&self, id: &ModuleId) -> Option<Exports> {
        match &self.records.borrow().get(id)?.slot {
            Slot::Instantiating(exports) | Slot::Ready(exports) => Some(exports.clone()),
            Slot::Unloaded | Slot::Errored(_) => None,
        }
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.records.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Render an error together with its sources, outermost first
pub(crate) fn error_chain(error: &RuntimeError) -> String {
    use std::error::Error as _;

    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // wrappers such as `FetchError::Io` already print their source
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
