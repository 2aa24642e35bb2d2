// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run registry: test cases that are currently executing.
//!
//! The runner is the only writer. The callback listener reads the registry to route log lines to
//! the right test case. Entries are removed by dropping the [`RegistryGuard`] returned on
//! registration, so an attempt's entry is gone once the attempt is over, however it ended.

use crate::test_case::TestCase;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Maps the names of executing test cases to their handles.
///
/// This is cheap to clone: all clones share the same map. A registry is scoped to one scheduling
/// session.
#[derive(Clone, Debug, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<TestCase>>>>,
}

impl RunRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `test_case` as executing until the returned guard is dropped.
    #[must_use = "the test case is deregistered when the guard is dropped"]
    pub fn register(&self, test_case: Arc<TestCase>) -> RegistryGuard {
        let name = test_case.name().to_owned();
        if self.lock().insert(name.clone(), test_case).is_some() {
            tracing::warn!(test_case = %name, "test case was already registered, replacing");
        }
        RegistryGuard {
            registry: self.clone(),
            name,
        }
    }

    /// Returns the handle for an executing test case.
    pub fn get(&self, name: &str) -> Option<Arc<TestCase>> {
        self.lock().get(name).cloned()
    }

    /// Returns true if the named test case is executing.
    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Returns the number of executing test cases.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no test case is executing.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<TestCase>>> {
        // Every mutation is a single map operation, so a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a test case from the [`RunRegistry`] when dropped.
#[derive(Debug)]
pub struct RegistryGuard {
    registry: RunRegistry,
    name: String,
}

impl RegistryGuard {
    /// Returns the name of the registered test case.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.name);
    }
}
