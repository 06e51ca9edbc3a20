// src/storage/key_value.rs
//! In-memory key/value storage for TokenScript views.
//!
//! Each TokenScript gets its own namespace, so views of one TokenScript can
//! never read or clear the values of another.

use crate::channel::collaborators::StorageBackend;
use crate::error::StorageError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// In-memory [`StorageBackend`].
///
/// Values live for the lifetime of the process. Embedders needing persistence
/// implement [`StorageBackend`] over their own store.
#[derive(Default)]
pub struct MemoryStorage {
    /// Values keyed by TokenScript id, then item key
    scopes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn scopes(&self) -> Result<MutexGuard<'_, HashMap<String, HashMap<String, String>>>, StorageError> {
        self.scopes
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))
    }

    /// Number of items stored for `ts_id`.
    pub fn count_items(&self, ts_id: &str) -> usize {
        self.scopes()
            .map(|scopes| scopes.get(ts_id).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    /// Checks whether `key` is set for `ts_id` without copying its value.
    pub fn contains_item(&self, ts_id: &str, key: &str) -> bool {
        self.scopes()
            .map(|scopes| scopes.get(ts_id).map_or(false, |items| items.contains_key(key)))
            .unwrap_or(false)
    }
}

impl StorageBackend for MemoryStorage {
    /// Stores `value` under `key`, overwriting any previous value.
    fn set_item(&self, ts_id: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.scopes()?
            .entry(ts_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_item(&self, ts_id: &str, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .scopes()?
            .get(ts_id)
            .and_then(|items| items.get(key))
            .cloned())
    }

    fn get_all_items(&self, ts_id: &str) -> Result<HashMap<String, String>, StorageError> {
        Ok(self.scopes()?.get(ts_id).cloned().unwrap_or_default())
    }

    /// Removes `key`. Removing an absent key is not an error.
    fn remove_item(&self, ts_id: &str, key: &str) -> Result<(), StorageError> {
        if let Some(items) = self.scopes()?.get_mut(ts_id) {
            items.remove(key);
        }
        Ok(())
    }

    /// Removes every item of `ts_id`. Other TokenScripts are untouched.
    fn clear(&self, ts_id: &str) -> Result<(), StorageError> {
        self.scopes()?.remove(ts_id);
        Ok(())
    }
}
