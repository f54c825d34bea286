//! In-process reference store.
//!
//! Backs tests and any context that needs store semantics without
//! persistence. Change notifications fire only for keys whose value
//! actually changed, matching the external capability's behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{KeyValueStore, Namespace, StoreChange};
use crate::error::StoreError;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    synced: Mutex<HashMap<String, Value>>,
    local: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                synced: Mutex::new(HashMap::new()),
                local: Mutex::new(HashMap::new()),
                changes,
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate a transient outage: all operations fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn map_for(&self, ns: Namespace) -> &Mutex<HashMap<String, Value>> {
        match ns {
            Namespace::Synced => &self.inner.synced,
            Namespace::Local => &self.inner.local,
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, ns: Namespace, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError> {
        self.check_available()?;
        let map = self
            .map_for(ns)
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock failed: {e}")))?;
        Ok(keys
            .iter()
            .filter_map(|key| map.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, ns: Namespace, entries: HashMap<String, Value>) -> Result<(), StoreError> {
        self.check_available()?;
        let changed = {
            let mut map = self
                .map_for(ns)
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("lock failed: {e}")))?;
            let mut changed = Vec::new();
            for (key, value) in entries {
                if map.get(&key) != Some(&value) {
                    changed.push(key.clone());
                    map.insert(key, value);
                }
            }
            changed
        };
        if !changed.is_empty() {
            // No subscribers is fine; the notification is best-effort.
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
    async fn set_then_get_round_trip() {
        let store = MemoryStore::new();
        store
            .set(
                Namespace::Synced,
                HashMap::from([("appUrl".to_string(), Value::from("http://x/"))]),
            )
            .await
            .unwrap();
        let values = store.get(Namespace::Synced, &["appUrl", "missing"]).await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values["appUrl"], Value::from("http://x/"));
        // Namespaces are disjoint.
        assert!(store.get(Namespace::Local, &["appUrl"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn notifies_only_actual_changes() {
        let store = MemoryStore::new();
        let mut changes = store.subscribe();

        let entries = HashMap::from([("k".to_string(), Value::from(1))]);
        store.set(Namespace::Synced, entries.clone()).await.unwrap();
        let change = changes.recv().await.unwrap();
        assert_eq!(change.namespace, Namespace::Synced);
        assert_eq!(change.keys, vec!["k".to_string()]);

        // Writing the identical value again raises no notification.
        store.set(Namespace::Synced, entries).await.unwrap();
        assert!(matches!(
            changes.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn outage_fails_operations_transiently() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.get(Namespace::Synced, &["k"]).await.is_err());
        store.set_unavailable(false);
        assert!(store.get(Namespace::Synced, &["k"]).await.is_ok());
    }
}
