//! Monitored-site policies keyed by registrable domain.
//!
//! A [`SiteKey`] is the host component used as a policy key (e.g.
//! `instagram.com`); it matches itself and all subdomains. Policies carry
//! daily/weekly limits in minutes plus cosmetic display metadata, stored
//! in the shared schema under the `blockedSites` key.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::{EngineError, Result};

/// Validated registrable-domain key: lower-cased host, no scheme/path/port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SiteKey(String);

impl SiteKey {
    /// Validate and normalize a raw domain string.
    ///
    /// Input is lower-cased; anything that is not a bare registrable host
    /// (scheme, path, port, whitespace, missing dot) is rejected.
    pub fn new(raw: &str) -> Result<Self> {
        let key = raw.trim().to_ascii_lowercase();
        let reject = |reason: &str| EngineError::InvalidDomainKey {
            key: raw.to_string(),
            reason: reason.to_string(),
        };

        if key.is_empty() {
            return Err(reject("empty"));
        }
        if key.contains("://") || key.contains('/') {
            return Err(reject("contains scheme or path"));
        }
        if key.contains(':') {
            return Err(reject("contains port"));
        }
        if key.chars().any(char::is_whitespace) {
            return Err(reject("contains whitespace"));
        }
        if !key.contains('.') || key.starts_with('.') || key.ends_with('.') {
            return Err(reject("not a registrable domain"));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Anchored host match, subdomain-inclusive.
    ///
    /// `instagram.com` matches `instagram.com` and `m.instagram.com`,
    /// never `notinstagram.com`.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        host == self.0 || host.ends_with(&format!(".{}", self.0))
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SiteKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for SiteKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SiteKey::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// Cosmetic display metadata; irrelevant to enforcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Per-domain monitoring/blocking policy.
///
/// A limit of 0 means unlimited. `daily <= weekly` is not enforced; the
/// limits are evaluated independently and the first exceeded one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitePolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "dailyLimit")]
    pub daily_limit_minutes: u32,
    #[serde(default, rename = "weeklyLimit")]
    pub weekly_limit_minutes: u32,
    #[serde(flatten)]
    pub display: DisplayMeta,
}

impl SitePolicy {
    /// Enabled policy with the given limits and no display metadata.
    pub fn limited(daily_limit_minutes: u32, weekly_limit_minutes: u32) -> Self {
        Self {
            enabled: true,
            daily_limit_minutes,
            weekly_limit_minutes,
            display: DisplayMeta::default(),
        }
    }

    pub fn with_display(mut self, icon: &str, name: &str) -> Self {
        self.display = DisplayMeta {
            icon: Some(icon.to_string()),
            name: Some(name.to_string()),
        };
        self
    }
}

/// The `{domain -> policy}` mapping stored under `blockedSites`.
pub type SiteMap = BTreeMap<SiteKey, SitePolicy>;

/// Stock site set seeded on first run.
pub fn default_sites() -> SiteMap {
    let entry = |domain: &str, daily: u32, weekly: u32, icon: &str, name: &str| {
        (
            SiteKey::new(domain).expect("stock domain is valid"),
            SitePolicy::limited(daily, weekly).with_display(icon, name),
        )
    };
    BTreeMap::from([
        entry("instagram.com", 60, 300, "\u{1F4F7}", "Instagram"),
        entry("tiktok.com", 30, 150, "\u{1F3B5}", "TikTok"),
        entry("twitter.com", 45, 200, "\u{1F426}", "Twitter"),
        entry("x.com", 45, 200, "\u{1F426}", "X"),
        entry("youtube.com", 90, 400, "\u{1F4FA}", "YouTube"),
        entry("facebook.com", 30, 150, "\u{1F465}", "Facebook"),
        entry("reddit.com", 60, 300, "\u{1F534}", "Reddit"),
    ])
}

/// Whether `url` belongs to the monitored domain (itself or a subdomain).
pub fn is_blocked_site(url: &str, domain: &SiteKey) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .is_some_and(|host| domain.matches_host(host)),
        Err(_) => false,
    }
}

/// Resolve the policy governing `host`.
///
/// When several configured domains match (e.g. `instagram.com` and
/// `m.instagram.com` both configured), the longest suffix wins.
pub fn resolve_policy<'a>(host: &str, sites: &'a SiteMap) -> Option<(&'a SiteKey, &'a SitePolicy)> {
    sites
        .iter()
        .filter(|(key, _)| key.matches_host(host))
        .max_by_key(|(key, _)| key.as_str().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_normalizes_case_and_whitespace() {
        let key = SiteKey::new("  Instagram.COM ").unwrap();
        assert_eq!(key.as_str(), "instagram.com");
    }

    #[test]
    fn key_rejects_malformed_input() {
        assert!(SiteKey::new("").is_err());
        assert!(SiteKey::new("https://instagram.com").is_err());
        assert!(SiteKey::new("instagram.com/feed").is_err());
        assert!(SiteKey::new("instagram.com:443").is_err());
        assert!(SiteKey::new("instagram").is_err());
        assert!(SiteKey::new(".instagram.com").is_err());
        assert!(SiteKey::new("insta gram.com").is_err());
    }

    #[test]
    fn subdomain_matching() {
        let key = SiteKey::new("instagram.com").unwrap();
        assert!(is_blocked_site("https://m.instagram.com/x", &key));
        assert!(is_blocked_site("https://www.instagram.com/", &key));
        assert!(is_blocked_site("http://instagram.com/reels", &key));
        assert!(!is_blocked_site("https://notinstagram.com", &key));
        assert!(!is_blocked_site("not a url", &key));
    }

    #[test]
    fn longest_suffix_wins() {
        let mut sites = SiteMap::new();
        sites.insert(
            SiteKey::new("instagram.com").unwrap(),
            SitePolicy::limited(60, 300),
        );
        sites.insert(
            SiteKey::new("m.instagram.com").unwrap(),
            SitePolicy::limited(5, 0),
        );

        let (key, policy) = resolve_policy("m.instagram.com", &sites).unwrap();
        assert_eq!(key.as_str(), "m.instagram.com");
        assert_eq!(policy.daily_limit_minutes, 5);

        let (key, _) = resolve_policy("www.instagram.com", &sites).unwrap();
        assert_eq!(key.as_str(), "instagram.com");

        assert!(resolve_policy("example.com", &sites).is_none());
    }

    #[test]
    fn policy_wire_shape_uses_store_schema_names() {
        let policy = SitePolicy::limited(60, 300).with_display("x", "Instagram");
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["dailyLimit"], 60);
        assert_eq!(value["weeklyLimit"], 300);
        assert_eq!(value["name"], "Instagram");

        // Partial entries (companion imports carry no limits) parse with
        // limit 0, i.e. unlimited.
        let partial: SitePolicy =
            serde_json::from_value(serde_json::json!({ "enabled": true })).unwrap();
        assert!(partial.enabled);
        assert_eq!(partial.daily_limit_minutes, 0);
        assert_eq!(partial.weekly_limit_minutes, 0);
    }

    #[test]
    fn default_sites_are_complete() {
        let sites = default_sites();
        assert_eq!(sites.len(), 7);
        assert!(sites.values().all(|p| p.enabled));
        let ig = &sites[&SiteKey::new("instagram.com").unwrap()];
        assert_eq!(ig.daily_limit_minutes, 60);
        assert_eq!(ig.weekly_limit_minutes, 300);
    }
}
