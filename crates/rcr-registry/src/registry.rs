// SPDX-License-Identifier: MIT OR Apache-2.0

//! A process-wide, thread-safe name→factory table.
//!
//! Generalized from the backend registry pattern: rather than holding ready
//! instances, each entry is a zero-argument factory so that every chain
//! gets its own fresh node instance from the same type name.

use rcr_core::RuleError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type Factory<T> = Arc<dyn Fn() -> Box<T> + Send + Sync>;

/// A name→factory table for some trait object type `T` (nodes, endpoints).
pub struct TypedRegistry<T: ?Sized> {
    factories: RwLock<HashMap<String, Factory<T>>>,
}

impl<T: ?Sized> Default for TypedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> TypedRegistry<T> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory under `type_name`. Fails with
    /// [`RuleError::Duplicate`] if one is already registered.
    pub fn register(
        &self,
        type_name: impl Into<String>,
        factory: impl Fn() -> Box<T> + Send + Sync + 'static,
    ) -> Result<(), RuleError> {
        let type_name = type_name.into();
        let mut guard = self.factories.write().expect("registry lock poisoned");
        if guard.contains_key(&type_name) {
            return Err(RuleError::Duplicate(type_name));
        }
        guard.insert(type_name, Arc::new(factory));
        Ok(())
    }

    /// Remove a factory. Returns `true` if one was present.
    pub fn unregister(&self, type_name: &str) -> bool {
        self.factories
            .write()
            .expect("registry lock poisoned")
            .remove(type_name)
            .is_some()
    }

    /// Whether a factory is registered under `type_name`.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories
            .read()
            .expect("registry lock poisoned")
            .contains_key(type_name)
    }

    /// Create a fresh instance from the factory registered under
    /// `type_name`.
    pub fn create(&self, type_name: &str) -> Result<Box<T>, RuleError> {
        let guard = self.factories.read().expect("registry lock poisoned");
        let factory = guard
            .get(type_name)
            .ok_or_else(|| RuleError::NotFound(type_name.to_string()))?;
        Ok(factory())
    }

    /// The sorted list of registered type names.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let guard = self.factories.read().expect("registry lock poisoned");
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }
}
