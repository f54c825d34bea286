//! Background policy engine.
//!
//! The persistent context that owns rule compilation. Every decision is a
//! pure recomputation from the latest store state -- no delta stream, so a
//! missed or reordered notification self-heals on the next pass. Failures
//! degrade to "policy not yet applied" and are retried on the next
//! trigger, never in a tight loop.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::Event;
use crate::message::Message;
use crate::rules::{compile, RuleSink};
use crate::site::{default_sites, resolve_policy, SiteKey, SitePolicy};
use crate::store::{
    KeyValueStore, StoreAdapter, StoreChange, Namespace, KEY_APP_URL, KEY_BLOCKED_SITES,
};
use crate::sync::{countdown_active, CompanionSource, SyncBridge};
use crate::usage::{should_block, UsageAggregator};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Answer to "what does the policy currently say about this URL" --
/// served to the configuration surface (popup/status views).
#[derive(Debug, Clone, Serialize)]
pub struct SiteStatus {
    pub monitored: bool,
    pub domain: Option<String>,
    pub policy: Option<SitePolicy>,
    pub today_minutes: u32,
    pub week_minutes: u32,
    pub blocked: bool,
    pub countdown_active: bool,
}

pub struct PolicyEngine<S, R> {
    adapter: StoreAdapter<S>,
    aggregator: UsageAggregator<S>,
    sink: R,
    config: EngineConfig,
    companion: Option<Box<dyn CompanionSource>>,
    events: broadcast::Sender<Event>,
}

impl<S: KeyValueStore + Clone, R: RuleSink> PolicyEngine<S, R> {
    pub fn new(store: S, sink: R, config: EngineConfig) -> Self {
        let adapter = StoreAdapter::new(store);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            aggregator: UsageAggregator::new(adapter.clone()),
            adapter,
            sink,
            config,
            companion: None,
            events,
        }
    }

    /// Attach the companion source serving `syncFromApp` triggers.
    pub fn with_companion(mut self, companion: Box<dyn CompanionSource>) -> Self {
        self.companion = Some(companion);
        self
    }

    pub fn adapter(&self) -> &StoreAdapter<S> {
        &self.adapter
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// First-run seeding: write stock configuration for absent keys only,
    /// then bring the installed rules in line.
    pub async fn init_defaults(&self, today: NaiveDate) -> Result<()> {
        if !self.adapter.contains(Namespace::Synced, KEY_BLOCKED_SITES).await? {
            let sites = default_sites();
            self.adapter.set_blocked_sites(&sites).await?;
            info!(sites = sites.len(), "seeded default site policies");
            self.emit(Event::DefaultsSeeded {
                sites: sites.len(),
                at: Utc::now(),
            });
        }
        if !self.adapter.contains(Namespace::Synced, KEY_APP_URL).await? {
            self.adapter.set_app_url(&self.config.app_url).await?;
        }
        self.recompile(today).await?;
        Ok(())
    }

    /// Recompile and install the rule set derived from current state.
    ///
    /// Installation is a full replace of the previously installed ids; it
    /// is skipped entirely when the compiled set already matches, so
    /// recompiling unchanged state causes no platform churn. Returns the
    /// number of installed rules.
    pub async fn recompile(&self, today: NaiveDate) -> Result<usize> {
        let sites = self.adapter.blocked_sites().await?;
        let app_url = self.adapter.app_url().await?;
        let ledgers = self.adapter.usage_for(&sites).await?;
        let rules = compile(&sites, &ledgers, &app_url, today);

        let installed = self.sink.installed().await?;
        if installed == rules {
            debug!(count = rules.len(), "rule set unchanged");
            return Ok(rules.len());
        }

        let remove_ids = installed.iter().map(|rule| rule.id).collect();
        let count = rules.len();
        match self.sink.replace(remove_ids, rules).await {
            Ok(()) => {
                info!(count, "installed block rules");
                self.emit(Event::RulesInstalled {
                    count,
                    at: Utc::now(),
                });
                Ok(count)
            }
            Err(e) => {
                // Previous rule set remains installed; next trigger retries.
                error!(error = %e, "rule installation failed");
                self.emit(Event::RuleInstallationFailed {
                    message: e.to_string(),
                    at: Utc::now(),
                });
                Err(EngineError::RuleInstallationFailed(e.to_string()))
            }
        }
    }

    /// Validate and apply a usage report, recompiling when the domain
    /// newly crossed its limit.
    pub async fn record_usage(
        &self,
        domain: &str,
        time_spent_minutes: i64,
        today: NaiveDate,
    ) -> Result<()> {
        if time_spent_minutes < 0 {
            return Err(EngineError::NegativeUsageDelta {
                domain: domain.to_string(),
                minutes: time_spent_minutes,
            });
        }
        let key = SiteKey::new(domain)?;
        let minutes = u32::try_from(time_spent_minutes).unwrap_or(u32::MAX);
        let update = self.aggregator.record_usage(&key, minutes, today).await?;
        if minutes > 0 {
            self.emit(Event::UsageRecorded {
                domain: key.to_string(),
                minutes_added: minutes,
                today_total: update.today_minutes,
                at: Utc::now(),
            });
        }
        if update.crossed_limit {
            info!(domain = %key, total = update.today_minutes, "limit crossed");
            self.emit(Event::LimitCrossed {
                domain: key.to_string(),
                at: Utc::now(),
            });
            self.recompile(today).await?;
        }
        Ok(())
    }

    /// Run the sync bridge against the attached companion source.
    pub async fn sync_from_app(&self) -> Result<bool> {
        let Some(companion) = self.companion.as_deref() else {
            warn!("syncFromApp received but no companion source is attached");
            return Ok(false);
        };
        let bridge = SyncBridge::new(self.adapter.clone(), &self.config.app_url);
        let outcome = bridge.import(companion).await?;
        self.emit(Event::SyncCompleted {
            changed: outcome.changed,
            at: Utc::now(),
        });
        Ok(outcome.changed)
    }

    /// Dispatch one cross-context message.
    pub async fn handle_message(&self, message: Message, now: DateTime<Local>) -> Result<()> {
        let today = now.date_naive();
        match message {
            Message::UpdateUsage {
                domain,
                time_spent_minutes,
            } => self.record_usage(&domain, time_spent_minutes, today).await,
            Message::UpdateRules => self.recompile(today).await.map(|_| ()),
            Message::SyncFromApp => self.sync_from_app().await.map(|_| ()),
            Message::OpenOptions => {
                self.emit(Event::OptionsRequested { at: Utc::now() });
                Ok(())
            }
        }
    }

    /// Current policy verdict for a URL, for the configuration surface.
    pub async fn site_status(&self, url: &str, now: DateTime<Local>) -> Result<SiteStatus> {
        let today = now.date_naive();
        let countdown = countdown_active(
            self.adapter.countdown_end_at().await?,
            now.timestamp_millis(),
        );

        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        let matched = match host {
            Some(host) => {
                let sites = self.adapter.blocked_sites().await?;
                resolve_policy(&host, &sites).map(|(key, policy)| (key.clone(), policy.clone()))
            }
            None => None,
        };

        let Some((key, policy)) = matched else {
            return Ok(SiteStatus {
                monitored: false,
                domain: None,
                policy: None,
                today_minutes: 0,
                week_minutes: 0,
                blocked: false,
                countdown_active: countdown,
            });
        };

        let ledger = self.adapter.usage(&key).await?;
        Ok(SiteStatus {
            monitored: true,
            blocked: should_block(&policy, &ledger, today),
            today_minutes: ledger.minutes_on(today),
            week_minutes: ledger.weekly_minutes(today),
            domain: Some(key.to_string()),
            policy: Some(policy),
            countdown_active: countdown,
        })
    }

    /// Message/notification loop; returns when the message channel closes.
    ///
    /// Rule-affecting store changes (`blockedSites`, `appUrl`) trigger a
    /// recompilation; everything else is handled by message dispatch.
    pub async fn run(&self, mut messages: mpsc::Receiver<Message>) {
        let mut changes = self.adapter.subscribe();
        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(message) => {
                        debug!(?message, "handling message");
                        if let Err(e) = self.handle_message(message, Local::now()).await {
                            warn!(error = %e, "message handling failed");
                        }
                    }
                    None => break,
                },
                change = changes.recv() => match change {
                    Ok(change) if affects_rules(&change) => {
                        if let Err(e) = self.recompile(Local::now().date_naive()).await {
                            warn!(error = %e, "recompilation failed");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Dropped notifications self-heal: recompute from
                        // full state.
                        warn!(missed, "change notifications lagged");
                        if let Err(e) = self.recompile(Local::now().date_naive()).await {
                            warn!(error = %e, "recompilation failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

fn affects_rules(change: &StoreChange) -> bool {
    change.namespace == Namespace::Synced
        && change
            .keys
            .iter()
            .any(|key| key == KEY_BLOCKED_SITES || key == KEY_APP_URL)
}
