//! Name Registry
//!
//! Existence checks for view names, serialized per `(name, project)`.
//!
//! `is_exist` alone only answers for the moment it ran. Create and rename
//! flows call `reserve` instead: the check and the claim happen under the
//! same key lock, and the claim lives until the returned `NameReservation`
//! is dropped.

use crate::error::{ViewError, ViewResult};
use crate::store::ViewStore;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type NameKey = (String, u64);

#[derive(Default)]
struct Registry {
    locks: Mutex<HashMap<NameKey, Arc<Mutex<()>>>>,
    pending: Mutex<HashSet<NameKey>>,
}

/// Per-name advisory locks plus in-flight reservations.
#[derive(Clone, Default)]
pub struct NameRegistry {
    inner: Arc<Registry>,
}

impl NameRegistry {
    pub fn new() -> Self {
        NameRegistry::default()
    }

    /// True when `name` is used in the project by a view other than `id`.
    ///
    /// A name held by a live reservation counts as used.
    pub fn is_exist(
        &self,
        store: &dyn ViewStore,
        name: &str,
        id: Option<u64>,
        project_id: u64,
    ) -> ViewResult<bool> {
        let key = (name.trim().to_string(), project_id);
        self.with_key_lock(&key, || self.taken(store, &key, id))
    }

    /// Check and claim `name` in one step.
    pub fn reserve(
        &self,
        store: &dyn ViewStore,
        name: &str,
        id: Option<u64>,
        project_id: u64,
    ) -> ViewResult<NameReservation> {
        let key = (name.trim().to_string(), project_id);
        self.with_key_lock(&key, || {
            if self.taken(store, &key, id)? {
                tracing::info!(name = %key.0, project_id, "the view name is already taken");
                return Err(ViewError::NameTaken(key.0.clone()));
            }
            self.inner.pending.lock().insert(key.clone());
            Ok(NameReservation {
                registry: Arc::clone(&self.inner),
                key: key.clone(),
            })
        })
    }

    /// Names currently reserved.
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }

    fn taken(&self, store: &dyn ViewStore, key: &NameKey, id: Option<u64>) -> ViewResult<bool> {
        if self.inner.pending.lock().contains(key) {
            return Ok(true);
        }
        let found = store.view_id_by_name(&key.0, key.1)?;
        Ok(match (id, found) {
            (Some(id), Some(found)) => id != found,
            (None, Some(found)) => found > 0,
            (_, None) => false,
        })
    }

    fn with_key_lock<T>(&self, key: &NameKey, f: impl FnOnce() -> ViewResult<T>) -> ViewResult<T> {
        let lock = Arc::clone(self.inner.locks.lock().entry(key.clone()).or_default());
        let result = {
            let _held = lock.lock();
            f()
        };
        drop(lock);

        // Forget locks nobody else is waiting on
        let mut locks = self.inner.locks.lock();
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
        result
    }
}

/// Claim on a view name. Released on drop.
#[must_use = "the name is released as soon as the reservation is dropped"]
pub struct NameReservation {
    registry: Arc<Registry>,
    key: NameKey,
}

impl NameReservation {
    pub fn name(&self) -> &str {
        &self.key.0
    }

    pub fn project_id(&self) -> u64 {
        self.key.1
    }
}

impl Drop for NameReservation {
    fn drop(&mut self) {
        self.registry.pending.lock().remove(&self.key);
    }
}
