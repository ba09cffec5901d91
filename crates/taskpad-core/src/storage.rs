use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const TASKS_KEY: &str = "tasks";
pub const TAGS_KEY: &str = "tags";
pub const SORT_STATE_KEY: &str = "sortState";

/// Synchronous string key-value persistence. Every mutation of the task
/// collection is written through immediately.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

/// One JSON document per key under a data directory (`<dir>/<key>.json`).
#[derive(Debug)]
pub struct FileStore {
    pub data_dir: PathBuf,
}

impl FileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        info!(data_dir = %data_dir.display(), "opened file store");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(anyhow!("invalid storage key: {key:?}"));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            debug!(file = %path.display(), "no stored value");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        write_atomic(&path, value).with_context(|| format!("failed to save {key}"))
    }

    #[tracing::instrument(skip(self))]
    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing {}", path.display()))?;
        }
        Ok(())
    }
}

/// In-process store, used by tests and throwaway sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: &str, value: &str) -> Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Read and parse a stored value. Missing keys and unparseable documents both
/// yield `None`; the latter is logged so the caller can fall back to defaults.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> anyhow::Result<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(key, error = %err, "stored value is not valid json; ignoring");
            Ok(None)
        }
    }
}

pub fn save_json<T: Serialize + ?Sized>(
    store: &mut dyn KeyValueStore,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let serialized = serde_json::to_string(value)?;
    store.set(key, &serialized)
}

#[tracing::instrument(skip(path, contents))]
fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = contents.len(), "writing atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

/// Memory store shared between a test and the code under test, with writes
/// to chosen keys failing on demand.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub(crate) struct FailingStore {
    entries: std::rc::Rc<std::cell::RefCell<MemoryStore>>,
    broken: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
}

#[cfg(test)]
impl FailingStore {
    pub(crate) fn break_writes(&self, key: &str) {
        self.broken.borrow_mut().push(key.to_string());
    }

    pub(crate) fn heal(&self) {
        self.broken.borrow_mut().clear();
    }

    pub(crate) fn stored(&self, key: &str) -> Option<String> {
        self.entries.borrow().entries.get(key).cloned()
    }

    pub(crate) fn put(&self, key: &str, value: &str) {
        self.entries
            .borrow_mut()
            .entries
            .insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
impl KeyValueStore for FailingStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.stored(key))
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.broken.borrow().iter().any(|k| k == key) {
            return Err(anyhow!("disk full while saving {key}"));
        }
        self.put(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.entries.borrow_mut().entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_and_removes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = FileStore::open(temp.path()).expect("open store");

        assert_eq!(store.get(TASKS_KEY).expect("get"), None);
        store.set(TASKS_KEY, "[]").expect("set");
        assert_eq!(store.get(TASKS_KEY).expect("get").as_deref(), Some("[]"));
        assert!(temp.path().join("tasks.json").exists());

        store.remove(TASKS_KEY).expect("remove");
        assert_eq!(store.get(TASKS_KEY).expect("get"), None);
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = FileStore::open(temp.path()).expect("open store");
        assert!(store.set("../escape", "x").is_err());
        assert!(store.get("").is_err());
    }

    #[test]
    fn load_json_tolerates_garbage() {
        let store = MemoryStore::new().with_entry(SORT_STATE_KEY, "{not json");
        let loaded: Option<serde_json::Value> =
            load_json(&store, SORT_STATE_KEY).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn save_then_load_json() {
        let mut store = MemoryStore::new();
        save_json(&mut store, TAGS_KEY, &serde_json::json!({"home": 2})).expect("save");
        let loaded: Option<serde_json::Value> = load_json(&store, TAGS_KEY).expect("load");
        assert_eq!(loaded, Some(serde_json::json!({"home": 2})));
    }
}
