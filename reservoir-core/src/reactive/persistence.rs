//! Durable Storage
//!
//! The persisted subset of the store is written as one JSON object under a
//! namespace key. [`Storage`] abstracts where that string lives.
//! [`MemoryStorage`] is a shared handle, so a test can hand a clone to a
//! second runtime to simulate a page reload. [`FileStorage`] keeps one file
//! per namespace key in a directory.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};

/// A string key-value store that survives the runtime.
pub trait Storage {
    /// Read the item stored under `key`, if any.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing what was there.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory storage. Clones share the same items.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with one item.
    pub fn with_item(key: &str, value: &str) -> Self {
        let storage = Self::new();
        storage.items.lock().insert(key.to_string(), value.to_string());
        storage
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Directory-backed storage: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(e)),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }
}

/// Parse a persisted blob. Anything but a JSON object is rejected.
pub fn parse_blob(raw: &str) -> Result<Map<String, Json>> {
    match serde_json::from_str::<Json>(raw) {
        Ok(Json::Object(map)) => Ok(map),
        Ok(other) => Err(Error::StorageParse(format!(
            "expected a JSON object, found {}",
            match other {
                Json::Null => "null",
                Json::Bool(_) => "a boolean",
                Json::Number(_) => "a number",
                Json::String(_) => "a string",
                Json::Array(_) => "an array",
                Json::Object(_) => "an object",
            }
        ))),
        Err(e) => Err(Error::StorageParse(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_clones_share_items() {
        let storage = MemoryStorage::new();
        let reloaded = storage.clone();
        storage.set_item("ns", "{}").unwrap();
        assert_eq!(reloaded.get_item("ns").unwrap().as_deref(), Some("{}"));
        assert_eq!(reloaded.get_item("other").unwrap(), None);
    }

    #[test]
    fn file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert_eq!(storage.get_item("app/state").unwrap(), None);

        storage.set_item("app/state", r#"{"theme":"dark"}"#).unwrap();
        assert_eq!(
            storage.get_item("app/state").unwrap().as_deref(),
            Some(r#"{"theme":"dark"}"#)
        );
        assert!(dir.path().join("app_state.json").exists());
    }

    #[test]
    fn file_storage_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("profiles").join("default");
        let storage = FileStorage::new(&nested);

        storage.set_item("state", "{}").unwrap();
        assert_eq!(storage.get_item("state").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn blob_must_be_an_object() {
        assert!(parse_blob(r#"{"a": 1}"#).is_ok());
        assert!(matches!(parse_blob("[1, 2]"), Err(Error::StorageParse(_))));
        assert!(matches!(parse_blob("null"), Err(Error::StorageParse(_))));
        assert!(matches!(parse_blob("{oops"), Err(Error::StorageParse(_))));
    }
}
