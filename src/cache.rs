//! Small persistent key-value cache.
//!
//! Values are stored as `{"value": ...}` JSON under namespaced keys of the
//! form `__{NAMESPACE}_{KEY}__`, upper-cased. The auth layer keeps its tokens
//! here; the storage backend is a platform capability behind
//! [`KeyValueStore`].

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// String key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    ///
    /// Returns [`NetError::Io`](crate::NetError::Io) if a persistent store
    /// fails to write.
    fn set(&self, key: &str, value: String) -> Result<()>;

    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    fn remove(&self, key: &str) -> Result<()>;
}

/// Namespaced, upper-cased storage key.
pub fn cache_key(namespace: &str, key: &str) -> String {
    format!("__{namespace}_{key}__").to_uppercase()
}

#[derive(Serialize)]
struct WrappedRef<'a, T> {
    value: &'a T,
}

#[derive(Deserialize)]
struct Wrapped<T> {
    value: T,
}

/// Store `value` under `key`.
///
/// # Errors
///
/// Returns [`NetError::Serialization`](crate::NetError::Serialization) if the
/// value cannot be encoded, or the store's write error.
pub fn set_cache<T: Serialize>(
    store: &dyn KeyValueStore,
    namespace: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(&WrappedRef { value })?;
    store.set(&cache_key(namespace, key), json)
}

/// Read `key`, falling back to `default`.
///
/// A missing or unreadable entry is overwritten with `default`.
pub fn get_cache<T: Serialize + DeserializeOwned>(
    store: &dyn KeyValueStore,
    namespace: &str,
    key: &str,
    default: T,
) -> T {
    let stored = store
        .get(&cache_key(namespace, key))
        .and_then(|raw| serde_json::from_str::<Wrapped<T>>(&raw).ok());
    match stored {
        Some(wrapped) => wrapped.value,
        None => {
            if let Err(e) = set_cache(store, namespace, key, &default) {
                tracing::warn!(key, error = %e, "failed to reset cache entry");
            }
            default
        }
    }
}

// ── Memory store ────────────────────────────────────────────────────

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries().insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

// ── File store ──────────────────────────────────────────────────────

/// Store backed by one JSON object file.
///
/// The file is read once on open and rewritten through a temporary file and
/// a rename on every mutation, so a crash never leaves a half-written file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`. A missing or corrupt file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| match serde_json::from_str(&raw) {
                Ok(entries) => Some(entries),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt cache file");
                    None
                }
            })
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut entries);
        let content = serde_json::to_string_pretty(&*entries)?;
        write_atomic(&self.path, content.as_bytes())
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir)?;
    }
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("cache.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{base}.tmp-{}-{counter}", std::process::id()));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut tmp) => {
                tmp.write_all(content)?;
                tmp.sync_all()?;
                break candidate;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(e.into()),
        }
    };
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.mutate(|entries| {
            entries.insert(key.to_owned(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.mutate(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_and_uppercased() {
        assert_eq!(cache_key("Onet_1.0", "auth_tokens"), "__ONET_1.0_AUTH_TOKENS__");
    }

    #[test]
    fn values_are_wrapped() {
        let store = MemoryStore::new();
        set_cache(&store, "app", "level", &7u32).unwrap();
        assert_eq!(
            store.get("__APP_LEVEL__").as_deref(),
            Some(r#"{"value":7}"#)
        );
        assert_eq!(get_cache(&store, "app", "level", 0u32), 7);
    }

    #[test]
    fn unreadable_entry_is_replaced_by_default() {
        let store = MemoryStore::new();
        store.set("__APP_LEVEL__", "not json".into()).unwrap();
        assert_eq!(get_cache(&store, "app", "level", 3u32), 3);
        assert_eq!(
            store.get("__APP_LEVEL__").as_deref(),
            Some(r#"{"value":3}"#)
        );

        let missing: Option<String> = get_cache(&store, "app", "nothing", None);
        assert_eq!(missing, None);
        assert_eq!(store.get("__APP_NOTHING__").as_deref(), Some(r#"{"value":null}"#));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("nonogram-net-{}", uuid::Uuid::new_v4()));
        let path = dir.join("cache.json");
        {
            let store = FileStore::open(&path);
            store.set("a", "1".into()).unwrap();
            store.set("b", "2".into()).unwrap();
            store.remove("a").unwrap();
        }
        let reopened = FileStore::open(&path);
        assert_eq!(reopened.get("a"), None);
        assert_eq!(reopened.get("b").as_deref(), Some("2"));
        let leftovers = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(leftovers, 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = std::env::temp_dir().join(format!("nonogram-net-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cache.json");
        std::fs::write(&path, "{broken").unwrap();
        let store = FileStore::open(&path);
        assert_eq!(store.get("x"), None);
        store.set("x", "y".into()).unwrap();
        assert_eq!(FileStore::open(&path).get("x").as_deref(), Some("y"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
