//! State Store
//!
//! The reservoir: a dot-addressable JSON mapping with a persisted subset.
//!
//! # How It Works
//!
//! 1. Every write compares the new value with the current one first. A
//!    write that changes nothing returns `false` and leaves the generation
//!    counter alone. Callers only request hydration when a write returns
//!    `true`, which is what keeps self-referential directives from looping.
//!
//! 2. Persistence works per top-level key. Writing `user.name` with
//!    `persist` mirrors the whole `user` object into the persisted subset.
//!    A key that is persisted stays mirrored on later writes.
//!
//! 3. Saving is deferred until the store has been marked loaded, so a
//!    half-initialised store never overwrites what is on disk.

use serde_json::{Map, Value as Json};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::persistence::{parse_blob, Storage};
use crate::error::Error;
use crate::logs::ErrorLog;

/// The central key-value state.
pub struct Store {
    data: Map<String, Json>,
    persisted: Map<String, Json>,
    /// Bumped on every effective write.
    generation: u64,
    errors: ErrorLog,
    storage: Box<dyn Storage>,
    storage_key: String,
    loaded: bool,
    save_pending: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Store {
    pub fn new(storage: Box<dyn Storage>, storage_key: impl Into<String>, errors: ErrorLog) -> Self {
        Self {
            data: Map::new(),
            persisted: Map::new(),
            generation: 0,
            errors,
            storage,
            storage_key: storage_key.into(),
            loaded: false,
            save_pending: false,
            waiters: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Dot-path lookup without logging.
    pub fn lookup(&self, key: &str) -> Option<&Json> {
        let mut segments = key.split('.');
        let first = segments.next()?;
        segments.try_fold(self.data.get(first)?, |current, segment| {
            current.as_object()?.get(segment)
        })
    }

    /// Dot-path lookup. A miss is recorded in the error log.
    pub fn get(&self, key: &str) -> Option<Json> {
        let found = self.lookup(key).cloned();
        if found.is_none() {
            self.errors.record(key, Error::KeyNotFound(key.to_string()));
        }
        found
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Current state, in insertion order.
    pub fn snapshot(&self) -> &Map<String, Json> {
        &self.data
    }

    /// The persisted subset.
    pub fn persisted(&self) -> &Map<String, Json> {
        &self.persisted
    }

    /// Counter of effective writes. Two equal readings mean no state changed
    /// in between.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write `value` at `key`, creating intermediate objects along a dotted
    /// path. Returns whether anything changed.
    pub fn set(&mut self, key: &str, value: Json, persist: bool) -> bool {
        if self.lookup(key) == Some(&value) {
            return false;
        }
        let path: Vec<&str> = key.split('.').collect();
        if !write_path(&mut self.data, &path, value) {
            return false;
        }
        self.generation += 1;
        debug!(key, generation = self.generation, "state changed");
        self.after_write(path[0], persist);
        true
    }

    /// Remove `key`. Returns whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let path: Vec<&str> = key.split('.').collect();
        let Some((last, parents)) = path.split_last() else {
            return false;
        };
        let mut current = &mut self.data;
        for segment in parents {
            current = match current.get_mut(*segment).and_then(Json::as_object_mut) {
                Some(map) => map,
                None => return false,
            };
        }
        if current.remove(*last).is_none() {
            return false;
        }
        self.generation += 1;
        debug!(key, generation = self.generation, "state removed");
        let top = path[0];
        if self.persisted.contains_key(top) {
            self.mirror(top);
            self.save();
        }
        true
    }

    /// Write every entry. Returns whether any of them changed.
    pub fn set_many(&mut self, entries: Map<String, Json>, persist: bool) -> bool {
        let mut changed = false;
        for (key, value) in entries {
            changed |= self.set(&key, value, persist);
        }
        changed
    }

    /// Write only the entries whose key is absent.
    ///
    /// With `persist`, every listed key joins the persisted subset, including
    /// keys that already had a value.
    pub fn set_defaults(&mut self, entries: Map<String, Json>, persist: bool) -> bool {
        let mut changed = false;
        for (key, value) in entries {
            if self.lookup(&key).is_none() {
                changed |= self.set(&key, value, persist);
            } else if persist {
                let top = key.split('.').next().unwrap_or(&key).to_string();
                if !self.persisted.contains_key(&top) {
                    self.mirror(&top);
                    self.save();
                }
            }
        }
        changed
    }

    fn after_write(&mut self, top: &str, persist: bool) {
        if persist || self.persisted.contains_key(top) {
            self.mirror(top);
            self.save();
        }
    }

    /// Copy the current value of a top-level key into the persisted subset.
    fn mirror(&mut self, top: &str) {
        match self.data.get(top) {
            Some(value) => {
                self.persisted.insert(top.to_string(), value.clone());
            }
            None => {
                self.persisted.remove(top);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn set_storage_key(&mut self, key: impl Into<String>) {
        self.storage_key = key.into();
    }

    /// Write the persisted subset, or remember to once loaded.
    pub fn save(&mut self) {
        if !self.loaded {
            self.save_pending = true;
            return;
        }
        let blob = Json::Object(self.persisted.clone()).to_string();
        match self.storage.set_item(&self.storage_key, &blob) {
            Ok(()) => debug!(key = %self.storage_key, bytes = blob.len(), "saved persisted state"),
            Err(e) => error!(key = %self.storage_key, error = %e, "failed to save persisted state"),
        }
    }

    /// Merge the durable blob into state. Returns whether state changed.
    ///
    /// A blob that is malformed or not an object is discarded and logged.
    pub fn load(&mut self) -> bool {
        let raw = match self.storage.get_item(&self.storage_key) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %self.storage_key, error = %e, "failed to read persisted state");
                None
            }
        };
        let blob = match raw.as_deref().map(parse_blob) {
            None => Map::new(),
            Some(Ok(map)) => map,
            Some(Err(e)) => {
                error!(
                    key = %self.storage_key,
                    raw = raw.as_deref().unwrap_or_default(),
                    error = %e,
                    "Error parsing reservoir data from storage"
                );
                self.errors.record(self.storage_key.clone(), e);
                Map::new()
            }
        };

        for (key, value) in blob {
            self.persisted.insert(key, value);
        }
        let mut changed = false;
        for (key, value) in &self.persisted {
            if self.data.get(key) != Some(value) {
                self.data.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            self.generation += 1;
        }
        changed
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Mark the store loaded: flush a deferred save and wake waiters.
    pub fn mark_loaded(&mut self) {
        self.loaded = true;
        if std::mem::take(&mut self.save_pending) {
            self.save();
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// A receiver that completes once the store is loaded.
    pub fn wait_for_loaded(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if self.loaded {
            let _ = tx.send(());
        } else {
            self.waiters.push(tx);
        }
        rx
    }
}

/// Write `value` at `path` under `root`, replacing non-object intermediates.
fn write_path(root: &mut Map<String, Json>, path: &[&str], value: Json) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    let mut current = root;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Json::Object(Map::new()));
        if !slot.is_object() {
            *slot = Json::Object(Map::new());
        }
        current = match slot.as_object_mut() {
            Some(map) => map,
            None => return false,
        };
    }
    current.insert(last.to_string(), value);
    true
}
