//! Execution scope handle.
//!
//! The scope is the tensor-storage arena allocated by the model-loading layer.
//! The compiler only keeps a shared handle to it and never mutates it; tensor
//! storage itself is owned and filled by the program execution phase.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Named tensor storage shared between the loader and the runtime program.
#[derive(Debug, Default)]
pub struct Scope {
    vars: RwLock<BTreeSet<String>>,
}

impl Scope {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a scope pre-populated with the given variable names.
    pub fn with_vars<I, S>(names: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scope = Self::default();
        scope.vars.write().extend(names.into_iter().map(Into::into));
        Arc::new(scope)
    }

    /// Declare a variable. Called by the loader, never by the compiler.
    pub fn declare(&self, name: &str) {
        self.vars.write().insert(name.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.read().contains(name)
    }

    pub fn var_names(&self) -> Vec<String> {
        self.vars.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.vars.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.read().is_empty()
    }
}
