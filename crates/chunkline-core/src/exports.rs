//! The exports container handed to module bodies.
//!
//! `Exports` is a handle: clones share one underlying table. The registry
//! gives the same handle to the defining module and to every module that
//! requires it, including circular dependents that read it before the
//! defining body has finished.

use indexmap::IndexMap;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::ids::ModuleId;

/// A type-erased exported value.
pub type ExportValue = Rc<dyn Any>;

/// A live binding, evaluated on every read.
pub type ExportGetter = Rc<dyn Fn() -> ExportValue>;

#[derive(Clone)]
enum Binding {
    Value(ExportValue),
    Getter(ExportGetter),
}

struct ExportsInner {
    module: ModuleId,
    bindings: RefCell<IndexMap<String, Binding>>,
    es_module: Cell<bool>,
}

#[derive(Clone)]
pub struct Exports {
    inner: Rc<ExportsInner>,
}

impl Exports {
    /// Create an empty exports table owned by `module`
    pub fn new(module: ModuleId) -> Self {
        Self {
            inner: Rc::new(ExportsInner {
                module,
                bindings: RefCell::new(IndexMap::new()),
                es_module: Cell::new(false),
            }),
        }
    }

    pub fn module_id(&self) -> &ModuleId {
        &self.inner.module
    }

    /// Set a plain value, replacing any previous binding of the same name
    pub fn set<T: Any>(&self, name: impl Into<String>, value: T) {
        self.set_value(name, Rc::new(value));
    }

    pub fn set_value(&self, name: impl Into<String>, value: ExportValue) {
        self.inner
            .bindings
            .borrow_mut()
            .insert(name.into(), Binding::Value(value));
    }

    /// Define a live binding.
    ///
    /// An existing binding of the same name is left untouched, so a getter
    /// can never shadow a value the module already exported.
    pub fn define_getter<F>(&self, name: impl Into<String>, getter: F) -> bool
    where
        F: Fn() -> ExportValue + 'static,
    {
        let mut bindings = self.inner.bindings.borrow_mut();
        let name = name.into();
        if bindings.contains_key(&name) {
            return false;
        }
        bindings.insert(name, Binding::Getter(Rc::new(getter)));
        true
    }

    /// Read a binding. Getters run after the table borrow is released, so a
    /// getter may read other names from the same exports.
    pub fn get(&self, name: &str) -> Option<ExportValue> {
        let binding = self.inner.bindings.borrow().get(name).cloned()?;
        match binding {
            Binding::Value(value) => Some(value),
            Binding::Getter(getter) => Some(getter()),
        }
    }

    /// Read a binding and downcast it, cloning the value out
    pub fn get_as<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.get(name)?.downcast_ref::<T>().cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.bindings.borrow().contains_key(name)
    }

    /// Export names in definition order
    pub fn names(&self) -> Vec<String> {
        self.inner.bindings.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.bindings.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flag these exports as an ES module namespace
    pub fn mark_es_module(&self) {
        self.inner.es_module.set(true);
    }

    pub fn is_es_module(&self) -> bool {
        self.inner.es_module.get()
    }

    /// The `default` export for ES namespaces, or the whole table otherwise.
    pub fn default_export(&self) -> Option<ExportValue> {
        if self.is_es_module() {
            self.get("default")
        } else {
            Some(Rc::new(self.clone()))
        }
    }

    /// Whether two handles share the same table
    pub fn same_handle(&self, other: &Exports) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exports")
            .field("module", &self.inner.module)
            .field("names", &self.names())
            .field("es_module", &self.is_es_module())
            .finish()
    }
}
