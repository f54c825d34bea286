//! One-directional importer for the companion application's local state.
//!
//! The companion app keeps per-device platform flags and an optional focus
//! countdown in its own storage. The bridge maps that shape into the
//! shared schema (a site map plus `countdownEndAt`) and never writes back.
//! Imports are idempotent: re-running with unchanged source state performs
//! zero store writes, so no change-notification storm reaches the
//! compiler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::site::{SiteKey, SiteMap, SitePolicy};
use crate::store::{KeyValueStore, StoreAdapter};

/// Platform enable flags as the companion app stores them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformFlags {
    pub instagram: bool,
    pub tiktok: bool,
    pub twitter: bool,
    pub youtube: bool,
}

/// Snapshot of the companion app's local state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanionState {
    #[serde(default)]
    pub platforms: PlatformFlags,
    /// Focus-session deadline in epoch millis, if one is running.
    #[serde(default)]
    pub countdown_end_at: Option<i64>,
}

/// An active focus session imported from the companion source.
///
/// Read-only to the enforcement side; expires naturally. Stale values mean
/// "no active session", never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownSession {
    pub ends_at_epoch_ms: i64,
    pub platform_flags: PlatformFlags,
}

impl CountdownSession {
    pub fn is_active(&self, now_ms: i64) -> bool {
        now_ms < self.ends_at_epoch_ms
    }
}

/// True iff a stored countdown deadline is still in the future.
pub fn countdown_active(end_at: Option<i64>, now_ms: i64) -> bool {
    end_at.is_some_and(|ends_at| now_ms < ends_at)
}

/// The companion application's local state, read at page-context init for
/// the companion's own domain or on an explicit sync message.
#[async_trait]
pub trait CompanionSource: Send + Sync {
    /// `None` when the companion has no stored state yet.
    async fn read_state(&self) -> Result<Option<CompanionState>>;
}

/// Outcome of an import pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Whether any store key was actually written.
    pub changed: bool,
}

/// Map the companion's platform flags onto the shared site map.
///
/// Companion-managed policies carry no limits (limit 0 = unlimited); the
/// companion's own focus timer governs their blocking.
pub fn sites_from_flags(flags: &PlatformFlags) -> SiteMap {
    let entry = |domain: &str, enabled: bool, icon: &str, name: &str| {
        let mut policy = SitePolicy::limited(0, 0).with_display(icon, name);
        policy.enabled = enabled;
        (SiteKey::new(domain).expect("companion domain is valid"), policy)
    };
    SiteMap::from([
        entry("instagram.com", flags.instagram, "\u{25A0}", "Instagram"),
        entry("tiktok.com", flags.tiktok, "\u{25CF}", "TikTok"),
        entry("twitter.com", flags.twitter, "\u{25B2}", "Twitter"),
        entry("youtube.com", flags.youtube, "\u{25C6}", "YouTube"),
    ])
}

/// Sole importer of companion state into the shared schema.
pub struct SyncBridge<S> {
    adapter: StoreAdapter<S>,
    app_url: String,
}

impl<S: KeyValueStore> SyncBridge<S> {
    pub fn new(adapter: StoreAdapter<S>, app_url: &str) -> Self {
        Self {
            adapter,
            app_url: app_url.to_string(),
        }
    }

    /// Import the companion's state, writing only the keys whose mapped
    /// value differs from what the store already holds.
    pub async fn import(&self, source: &dyn CompanionSource) -> Result<SyncOutcome> {
        let Some(state) = source.read_state().await? else {
            debug!("companion has no stored state, nothing to import");
            return Ok(SyncOutcome { changed: false });
        };

        let mut changed = false;

        let mapped = sites_from_flags(&state.platforms);
        if self.adapter.blocked_sites_raw().await? != Some(mapped.clone()) {
            self.adapter.set_blocked_sites(&mapped).await?;
            changed = true;
        }

        if self.adapter.countdown_end_at().await? != state.countdown_end_at {
            self.adapter
                .set_countdown_end_at(state.countdown_end_at)
                .await?;
            changed = true;
        }

        if self.adapter.app_url().await? != self.app_url {
            self.adapter.set_app_url(&self.app_url).await?;
            changed = true;
        }

        Ok(SyncOutcome { changed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    struct FixedSource(Option<CompanionState>);

    #[async_trait]
    impl CompanionSource for FixedSource {
        async fn read_state(&self) -> Result<Option<CompanionState>> {
            Ok(self.0.clone())
        }
    }

    fn state() -> CompanionState {
        CompanionState {
            platforms: PlatformFlags {
                instagram: true,
                tiktok: false,
                twitter: true,
                youtube: false,
            },
            countdown_end_at: Some(1_700_000_000_000),
        }
    }

    #[tokio::test]
    async fn first_import_writes_then_is_idempotent() {
        let store = MemoryStore::new();
        let adapter = StoreAdapter::new(store.clone());
        let bridge = SyncBridge::new(adapter.clone(), "https://focus.example/");
        let source = FixedSource(Some(state()));

        let outcome = bridge.import(&source).await.unwrap();
        assert!(outcome.changed);

        let sites = adapter.blocked_sites().await.unwrap();
        assert!(sites[&SiteKey::new("instagram.com").unwrap()].enabled);
        assert!(!sites[&SiteKey::new("tiktok.com").unwrap()].enabled);
        assert_eq!(
            adapter.countdown_end_at().await.unwrap(),
            Some(1_700_000_000_000)
        );
        assert_eq!(adapter.app_url().await.unwrap(), "https://focus.example/");

        // Unchanged source: zero writes, zero notifications.
        let mut changes = store.subscribe();
        let outcome = bridge.import(&source).await.unwrap();
        assert!(!outcome.changed);
        assert!(matches!(
            changes.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn absent_companion_state_is_a_noop() {
        let adapter = StoreAdapter::new(MemoryStore::new());
        let bridge = SyncBridge::new(adapter.clone(), "https://focus.example/");
        let outcome = bridge.import(&FixedSource(None)).await.unwrap();
        assert!(!outcome.changed);
        assert_eq!(adapter.blocked_sites_raw().await.unwrap(), None);
    }

    #[test]
    fn stale_countdown_is_no_session() {
        let session = CountdownSession {
            ends_at_epoch_ms: 1_000,
            platform_flags: PlatformFlags::default(),
        };
        assert!(session.is_active(999));
        assert!(!session.is_active(1_000));
        assert!(!session.is_active(2_000));

        assert!(!countdown_active(None, 0));
        assert!(countdown_active(Some(10), 5));
        assert!(!countdown_active(Some(10), 10));
    }
}
