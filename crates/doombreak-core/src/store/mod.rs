//! Shared store adapter.
//!
//! The persistent key-value store is an external capability with
//! `get`/`set`/`subscribe` semantics and no native transactions; this
//! module wraps it with the canonical schema. Read-modify-write sequences
//! are vulnerable to lost updates under concurrent writers -- accepted by
//! design, since writers are serialized by page/context lifecycle in
//! practice and every derived value is recomputed from full state.
//!
//! Two namespaces exist: `synced` (configuration, replicated across
//! devices) and `local` (per-device usage ledgers).

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::DEFAULT_APP_URL;
use crate::error::{Result, StoreError};
use crate::site::{default_sites, SiteKey, SiteMap, SitePolicy};
use crate::usage::UsageLedger;

/// Synced-namespace key holding the `{domain -> policy}` map.
pub const KEY_BLOCKED_SITES: &str = "blockedSites";
/// Synced-namespace key holding the redirect-target base URL.
pub const KEY_APP_URL: &str = "appUrl";
/// Synced-namespace key holding the companion countdown deadline.
pub const KEY_COUNTDOWN_END_AT: &str = "countdownEndAt";

/// Local-namespace key for one domain's usage ledger.
pub fn usage_key(domain: &SiteKey) -> String {
    format!("usage_{domain}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Synced,
    Local,
}

/// A change notification: which keys changed in which namespace.
///
/// Notifications carry no values; consumers re-read the store, so a missed
/// or reordered notification self-heals on the next read.
#[derive(Debug, Clone)]
pub struct StoreChange {
    pub namespace: Namespace,
    pub keys: Vec<String>,
}

/// The external key-value store capability.
///
/// Every operation may fail transiently ([`StoreError`]); callers skip the
/// current trigger rather than retrying in a loop. Implementations notify
/// subscribers only for keys whose value actually changed.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, ns: Namespace, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError>;
    async fn set(&self, ns: Namespace, entries: HashMap<String, Value>) -> Result<(), StoreError>;
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Typed wrapper defining the canonical schema over a raw store.
///
/// Single writer of record for `blockedSites`; validates on read and
/// repairs rather than propagating undefined shapes.
#[derive(Clone)]
pub struct StoreAdapter<S> {
    store: S,
}

impl<S: KeyValueStore> StoreAdapter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    async fn get_one(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StoreError> {
        let mut values = self.store.get(ns, &[key]).await?;
        Ok(values.remove(key))
    }

    async fn set_one(&self, ns: Namespace, key: &str, value: Value) -> Result<(), StoreError> {
        self.store
            .set(ns, HashMap::from([(key.to_string(), value)]))
            .await
    }

    /// Whether the key currently holds any value (used for first-run
    /// seeding, which must not clobber existing configuration).
    pub async fn contains(&self, ns: Namespace, key: &str) -> Result<bool, StoreError> {
        Ok(self.get_one(ns, key).await?.is_some())
    }

    /// The configured site map; absent reads as the stock defaults.
    ///
    /// Malformed entries are dropped with a warning, the rest processed.
    pub async fn blocked_sites(&self) -> Result<SiteMap> {
        match self.get_one(Namespace::Synced, KEY_BLOCKED_SITES).await? {
            Some(value) => Ok(decode_sites(&value)),
            None => Ok(default_sites()),
        }
    }

    /// The raw stored site map, if any -- no default substitution. Used
    /// where absence matters (seeding, sync idempotence checks).
    pub async fn blocked_sites_raw(&self) -> Result<Option<SiteMap>> {
        Ok(self
            .get_one(Namespace::Synced, KEY_BLOCKED_SITES)
            .await?
            .map(|value| decode_sites(&value)))
    }

    pub async fn set_blocked_sites(&self, sites: &SiteMap) -> Result<()> {
        let value = serde_json::to_value(sites)?;
        Ok(self.set_one(Namespace::Synced, KEY_BLOCKED_SITES, value).await?)
    }

    pub async fn app_url(&self) -> Result<String> {
        let value = self.get_one(Namespace::Synced, KEY_APP_URL).await?;
        Ok(match value {
            Some(Value::String(url)) if !url.is_empty() => url,
            Some(other) => {
                warn!(value = %other, "appUrl has wrong shape, using default");
                DEFAULT_APP_URL.to_string()
            }
            None => DEFAULT_APP_URL.to_string(),
        })
    }

    pub async fn set_app_url(&self, url: &str) -> Result<()> {
        Ok(self
            .set_one(Namespace::Synced, KEY_APP_URL, Value::String(url.to_string()))
            .await?)
    }

    /// Companion countdown deadline in epoch millis; any non-integer shape
    /// reads as "no active session", never as an error.
    pub async fn countdown_end_at(&self) -> Result<Option<i64>> {
        Ok(self
            .get_one(Namespace::Synced, KEY_COUNTDOWN_END_AT)
            .await?
            .and_then(|value| value.as_i64()))
    }

    pub async fn set_countdown_end_at(&self, end_at: Option<i64>) -> Result<()> {
        let value = end_at.map_or(Value::Null, Value::from);
        Ok(self
            .set_one(Namespace::Synced, KEY_COUNTDOWN_END_AT, value)
            .await?)
    }

    /// The usage ledger for a domain; absent or malformed reads as empty
    /// (valid entries of a partially-malformed ledger are kept).
    pub async fn usage(&self, domain: &SiteKey) -> Result<UsageLedger> {
        let key = usage_key(domain);
        Ok(self
            .get_one(Namespace::Local, &key)
            .await?
            .map(|value| UsageLedger::from_value(&value))
            .unwrap_or_default())
    }

    pub async fn set_usage(&self, domain: &SiteKey, ledger: &UsageLedger) -> Result<()> {
        let value = serde_json::to_value(ledger)?;
        Ok(self
            .set_one(Namespace::Local, &usage_key(domain), value)
            .await?)
    }

    /// Fetch ledgers for every domain in `sites`.
    pub async fn usage_for(&self, sites: &SiteMap) -> Result<BTreeMap<SiteKey, UsageLedger>> {
        let mut ledgers = BTreeMap::new();
        for domain in sites.keys() {
            ledgers.insert(domain.clone(), self.usage(domain).await?);
        }
        Ok(ledgers)
    }
}

/// Entry-level decode of the stored site map: invalid domain keys and
/// malformed policies are discarded, the rest kept.
fn decode_sites(value: &Value) -> SiteMap {
    let Some(entries) = value.as_object() else {
        warn!("blockedSites has wrong shape, treating as absent");
        return default_sites();
    };
    let mut sites = SiteMap::new();
    for (raw_key, raw_policy) in entries {
        let key = match SiteKey::new(raw_key) {
            Ok(key) => key,
            Err(e) => {
                warn!(key = raw_key, error = %e, "dropping malformed site entry");
                continue;
            }
        };
        match serde_json::from_value::<SitePolicy>(raw_policy.clone()) {
            Ok(policy) => {
                sites.insert(key, policy);
            }
            Err(e) => {
                warn!(key = raw_key, error = %e, "dropping malformed site policy");
            }
        }
    }
    sites
}
