//! JSON-file-backed store for the CLI configuration surface.
//!
//! One file per namespace (`synced.json`, `local.json`) under the data
//! directory. Durability over throughput: every `set` rewrites the
//! namespace file; change notifications are in-process only, mirroring
//! the external capability's per-context delivery.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{KeyValueStore, Namespace, StoreChange};
use crate::error::StoreError;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct JsonFileStore {
    inner: Arc<Inner>,
}

struct Inner {
    dir: PathBuf,
    // Serializes the read-modify-write of a namespace file within this
    // process; cross-process writers remain unsynchronized by design.
    io: Mutex<()>,
    changes: broadcast::Sender<StoreChange>,
}

impl JsonFileStore {
    pub fn new(dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::Unavailable(format!("cannot create {}: {e}", dir.display())))?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                io: Mutex::new(()),
                changes,
            }),
        })
    }

    /// `~/.config/doombreak/store/` (or `doombreak-dev` under
    /// `DOOMBREAK_ENV=dev`).
    pub fn default_dir() -> PathBuf {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config");
        let env = std::env::var("DOOMBREAK_ENV").unwrap_or_else(|_| "production".to_string());
        let app = if env == "dev" { "doombreak-dev" } else { "doombreak" };
        base.join(app).join("store")
    }

    fn path(&self, ns: Namespace) -> PathBuf {
        let name = match ns {
            Namespace::Synced => "synced.json",
            Namespace::Local => "local.json",
        };
        self.inner.dir.join(name)
    }

    fn read_ns(&self, ns: Namespace) -> Result<HashMap<String, Value>, StoreError> {
        let path = self.path(ns);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| StoreError::MalformedValue {
                key: path.display().to_string(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }

    fn write_ns(&self, ns: Namespace, map: &HashMap<String, Value>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(map).map_err(|e| StoreError::MalformedValue {
            key: self.path(ns).display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(self.path(ns), content).map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, ns: Namespace, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError> {
        let _guard = self
            .inner
            .io
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock failed: {e}")))?;
        let map = self.read_ns(ns)?;
        Ok(keys
            .iter()
            .filter_map(|key| map.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, ns: Namespace, entries: HashMap<String, Value>) -> Result<(), StoreError> {
        let changed = {
            let _guard = self
                .inner
                .io
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("lock failed: {e}")))?;
            let mut map = self.read_ns(ns)?;
            let mut changed = Vec::new();
            for (key, value) in entries {
                if map.get(&key) != Some(&value) {
                    changed.push(key.clone());
                    map.insert(key, value);
                }
            }
            if !changed.is_empty() {
                self.write_ns(ns, &map)?;
            }
            changed
        };
        if !changed.is_empty() {
            let _ = self.inner.changes.send(StoreChange {
                namespace: ns,
                keys: changed,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().to_path_buf()).unwrap();
        store
            .set(
                Namespace::Synced,
                HashMap::from([("appUrl".to_string(), Value::from("http://x/"))]),
            )
            .await
            .unwrap();

        // A fresh handle over the same directory sees the write.
        let reopened = JsonFileStore::new(dir.path().to_path_buf()).unwrap();
        let values = reopened.get(Namespace::Synced, &["appUrl"]).await.unwrap();
        assert_eq!(values["appUrl"], Value::from("http://x/"));
    }

    #[tokio::test]
    async fn namespaces_live_in_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().to_path_buf()).unwrap();
        store
            .set(
                Namespace::Local,
                HashMap::from([("usage_x.com".to_string(), Value::from(1))]),
            )
            .await
            .unwrap();
        assert!(dir.path().join("local.json").exists());
        assert!(!dir.path().join("synced.json").exists());
        assert!(store.get(Namespace::Synced, &["usage_x.com"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unchanged_write_skips_file_and_notification() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().to_path_buf()).unwrap();
        let entries = HashMap::from([("k".to_string(), Value::from(1))]);
        store.set(Namespace::Synced, entries.clone()).await.unwrap();

        let mut changes = store.subscribe();
        store.set(Namespace::Synced, entries).await.unwrap();
        assert!(matches!(
            changes.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
