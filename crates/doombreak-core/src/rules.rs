//! Declarative redirect rules compiled from policy + usage state.
//!
//! The compiled artifact is consumed by the platform's request-interception
//! capability, abstracted here as [`RuleSink`]. Compilation is a pure,
//! deterministic derivation: the same `{policies, ledgers}` pair always
//! yields byte-identical rules, and the installed set is always exactly the
//! enabled-and-over-limit subset after a successful pass.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::site::{SiteKey, SiteMap};
use crate::usage::{should_block, UsageLedger};

/// All block rules share one priority; the set is disjoint by domain.
pub const RULE_PRIORITY: u32 = 1;

/// One redirect rule per enabled, currently-over-limit domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleAction {
    Redirect { redirect: RedirectSpec },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectSpec {
    /// Substitution template; `\0` embeds the originally requested URL.
    #[serde(rename = "regexSubstitution")]
    pub regex_substitution: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    #[serde(rename = "regexFilter")]
    pub regex_filter: String,
    #[serde(rename = "resourceTypes")]
    pub resource_types: Vec<ResourceType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
}

/// Anchored host pattern, subdomain-inclusive via the optional `www.` and
/// any-path suffix: `https?://(www\.)?<escaped>/.*`.
pub fn host_pattern(domain: &SiteKey) -> String {
    let escaped = domain.as_str().replace('.', "\\.");
    format!("https?://(www\\.)?{escaped}/.*")
}

/// Redirect target embedding the blocked domain and the original URL.
pub fn redirect_substitution(app_url: &str, domain: &SiteKey) -> String {
    format!("{app_url}?blocked={domain}&original=\\0")
}

impl BlockRule {
    pub fn for_site(id: u32, domain: &SiteKey, app_url: &str) -> Self {
        Self {
            id,
            priority: RULE_PRIORITY,
            action: RuleAction::Redirect {
                redirect: RedirectSpec {
                    regex_substitution: redirect_substitution(app_url, domain),
                },
            },
            condition: RuleCondition {
                regex_filter: host_pattern(domain),
                resource_types: vec![ResourceType::MainFrame],
            },
        }
    }
}

/// Compile the full rule set from current policy + usage state.
///
/// Ids are assigned 1..n over the lexicographically sorted blocked domain
/// set, so an unchanged block-set recompiles to identical rules. A domain
/// with no ledger entry is treated as unused.
pub fn compile(
    sites: &SiteMap,
    ledgers: &BTreeMap<SiteKey, UsageLedger>,
    app_url: &str,
    today: NaiveDate,
) -> Vec<BlockRule> {
    let empty = UsageLedger::default();
    sites
        .iter()
        .filter(|(key, policy)| {
            let ledger = ledgers.get(*key).unwrap_or(&empty);
            should_block(policy, ledger, today)
        })
        .enumerate()
        .map(|(index, (key, _))| BlockRule::for_site(index as u32 + 1, key, app_url))
        .collect()
}

/// The platform's declarative-rule installation capability.
///
/// `replace` removes `remove_ids` and adds `add` as one operation; the
/// implementation must leave the previous set installed when it fails,
/// never a partially-removed state.
#[async_trait]
pub trait RuleSink: Send + Sync {
    async fn installed(&self) -> Result<Vec<BlockRule>>;
    async fn replace(&self, remove_ids: Vec<u32>, add: Vec<BlockRule>) -> Result<()>;
}

/// In-process reference sink; used by tests and the CLI dry path.
#[derive(Clone, Default)]
pub struct MemoryRuleSink {
    inner: std::sync::Arc<MemorySinkInner>,
}

#[derive(Default)]
struct MemorySinkInner {
    rules: std::sync::Mutex<Vec<BlockRule>>,
    reject: std::sync::atomic::AtomicBool,
}

impl MemoryRuleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `replace` calls fail, leaving the installed set as is.
    pub fn set_reject(&self, reject: bool) {
        self.inner
            .reject
            .store(reject, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleSink for MemoryRuleSink {
    async fn installed(&self) -> Result<Vec<BlockRule>> {
        let rules = self
            .inner
            .rules
            .lock()
            .map_err(|e| EngineError::RuleInstallationFailed(format!("rule lock failed: {e}")))?;
        Ok(rules.clone())
    }

    async fn replace(&self, remove_ids: Vec<u32>, add: Vec<BlockRule>) -> Result<()> {
        if self.inner.reject.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EngineError::RuleInstallationFailed(
                "sink rejected rule set".to_string(),
            ));
        }
        let mut rules = self
            .inner
            .rules
            .lock()
            .map_err(|e| EngineError::RuleInstallationFailed(format!("rule lock failed: {e}")))?;
        rules.retain(|rule| !remove_ids.contains(&rule.id));
        rules.extend(add);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::*;
    use crate::site::SitePolicy;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn over_limit_fixture() -> (SiteMap, BTreeMap<SiteKey, UsageLedger>, NaiveDate) {
        let today = date(2024, 1, 8);
        let mut sites = SiteMap::new();
        let mut ledgers = BTreeMap::new();
        for domain in ["instagram.com", "tiktok.com"] {
            let key = SiteKey::new(domain).unwrap();
            let mut ledger = UsageLedger::default();
            ledger.record(today, 120);
            sites.insert(key.clone(), SitePolicy::limited(60, 300));
            ledgers.insert(key, ledger);
        }
        (sites, ledgers, today)
    }

    #[test]
    fn compilation_is_idempotent() {
        let (sites, ledgers, today) = over_limit_fixture();
        let first = compile(&sites, &ledgers, "http://localhost:8080/", today);
        let second = compile(&sites, &ledgers, "http://localhost:8080/", today);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn ids_follow_sorted_domain_order() {
        let (sites, ledgers, today) = over_limit_fixture();
        let rules = compile(&sites, &ledgers, "http://localhost:8080/", today);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, 1);
        assert!(rules[0].condition.regex_filter.contains("instagram"));
        assert_eq!(rules[1].id, 2);
        assert!(rules[1].condition.regex_filter.contains("tiktok"));
    }

    #[test]
    fn only_enabled_over_limit_sites_compile() {
        let (mut sites, ledgers, today) = over_limit_fixture();
        sites
            .get_mut(&SiteKey::new("tiktok.com").unwrap())
            .unwrap()
            .enabled = false;
        // Under-limit site never compiles regardless of enablement.
        sites.insert(
            SiteKey::new("reddit.com").unwrap(),
            SitePolicy::limited(60, 300),
        );

        let rules = compile(&sites, &ledgers, "http://localhost:8080/", today);
        assert_eq!(rules.len(), 1);
        assert!(rules[0].condition.regex_filter.contains("instagram"));
    }

    #[test]
    fn generated_pattern_matches_intended_urls_only() {
        let key = SiteKey::new("instagram.com").unwrap();
        let pattern = Regex::new(&host_pattern(&key)).unwrap();
        assert!(pattern.is_match("https://instagram.com/feed"));
        assert!(pattern.is_match("http://www.instagram.com/"));
        assert!(!pattern.is_match("https://notinstagram.com/feed"));
        assert!(!pattern.is_match("https://instagram.commerce.example/"));
    }

    #[test]
    fn rule_wire_shape() {
        let key = SiteKey::new("instagram.com").unwrap();
        let rule = BlockRule::for_site(1, &key, "http://localhost:8080/");
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["action"]["type"], "redirect");
        assert_eq!(
            value["action"]["redirect"]["regexSubstitution"],
            "http://localhost:8080/?blocked=instagram.com&original=\\0"
        );
        assert_eq!(
            value["condition"]["regexFilter"],
            "https?://(www\\.)?instagram\\.com/.*"
        );
        assert_eq!(value["condition"]["resourceTypes"][0], "main_frame");
    }

    #[tokio::test]
    async fn memory_sink_replace_and_reject() {
        let sink = MemoryRuleSink::new();
        let key = SiteKey::new("instagram.com").unwrap();
        let rule = BlockRule::for_site(1, &key, "http://localhost:8080/");

        sink.replace(vec![], vec![rule.clone()]).await.unwrap();
        assert_eq!(sink.installed().await.unwrap(), vec![rule.clone()]);

        sink.set_reject(true);
        assert!(sink.replace(vec![1], vec![]).await.is_err());
        // Previous set remains installed after a failed replace.
        assert_eq!(sink.installed().await.unwrap(), vec![rule]);
    }
}
