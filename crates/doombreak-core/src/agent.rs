//! Per-page enforcement agent.
//!
//! One agent exists per page context. It is a wall-clock state machine
//! with no internal threads: the surrounding context drives it with load,
//! visibility, navigation, and tick calls, passing the current time in
//! epoch milliseconds. All agent state lives here, created at page init
//! and cleared by `teardown` on every exit path.
//!
//! ## State transitions
//!
//! ```text
//! Unchecked -> (Allowed | Blocked)
//! Allowed <-> Blocked   (usage crosses a limit / policy turned off)
//! ```

use chrono::{Local, NaiveDate, TimeZone};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::message::Message;
use crate::site::{resolve_policy, SiteKey};
use crate::store::{KeyValueStore, StoreAdapter};
use crate::usage::should_block;

/// Blocking decision for the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Unchecked,
    Allowed,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// The page's rendering capability: interstitial on/off.
pub trait PageSurface: Send {
    fn show_interstitial(&mut self, domain: &SiteKey);
    fn remove_interstitial(&mut self);
}

/// Elapsed-time bookkeeping for one monitored page.
///
/// Sub-minute remainders carry forward in `carry_secs` until they
/// accumulate to a whole minute; they are never dropped.
#[derive(Debug, Clone, Copy)]
struct FlushClock {
    last_flush_ms: i64,
    carry_secs: i64,
    visible: bool,
}

impl FlushClock {
    fn start(now_ms: i64) -> Self {
        Self {
            last_flush_ms: now_ms,
            carry_secs: 0,
            visible: true,
        }
    }

    /// Whole minutes elapsed since the last flush; remainder carries.
    fn take_minutes(&mut self, now_ms: i64) -> i64 {
        let elapsed_secs = if self.visible {
            ((now_ms - self.last_flush_ms) / 1000).max(0)
        } else {
            0
        };
        self.last_flush_ms = now_ms;
        let total = self.carry_secs + elapsed_secs;
        self.carry_secs = total % 60;
        total / 60
    }
}

pub struct PageAgent<S, P> {
    adapter: StoreAdapter<S>,
    surface: P,
    messages: mpsc::Sender<Message>,
    url: Option<String>,
    matched: Option<SiteKey>,
    state: PageState,
    clock: Option<FlushClock>,
}

fn local_date(now_ms: i64) -> NaiveDate {
    Local
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Local::now)
        .date_naive()
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

impl<S: KeyValueStore, P: PageSurface> PageAgent<S, P> {
    pub fn new(adapter: StoreAdapter<S>, surface: P, messages: mpsc::Sender<Message>) -> Self {
        Self {
            adapter,
            surface,
            messages,
            url: None,
            matched: None,
            state: PageState::Unchecked,
            clock: None,
        }
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    /// The configured domain governing this page, if any.
    pub fn matched_domain(&self) -> Option<&SiteKey> {
        self.matched.as_ref()
    }

    /// Initial decision for a freshly loaded page.
    pub async fn on_load(&mut self, url: &str, now_ms: i64) -> PageState {
        self.url = Some(url.to_string());
        self.evaluate(now_ms).await
    }

    /// URL change without a full reload (single-page-app navigation).
    ///
    /// The page context persists across these, so the previous domain's
    /// pending time is flushed before the decision re-runs.
    pub async fn handle_navigation(&mut self, url: &str, now_ms: i64) -> PageState {
        let new_host = host_of(url);
        let old_host = self.url.as_deref().and_then(host_of);
        self.url = Some(url.to_string());
        if new_host == old_host {
            return self.state;
        }
        self.flush(now_ms).await;
        self.clock = None;
        self.evaluate(now_ms).await
    }

    /// Re-run the decision for the current URL (store change observed).
    pub async fn refresh(&mut self, now_ms: i64) -> PageState {
        self.evaluate(now_ms).await
    }

    /// Foreground/background transition. Hidden flushes pending time and
    /// suspends accumulation; visible resumes the clock.
    pub async fn handle_visibility(&mut self, visibility: Visibility, now_ms: i64) {
        match visibility {
            Visibility::Hidden => {
                self.flush(now_ms).await;
                if let Some(clock) = self.clock.as_mut() {
                    clock.visible = false;
                }
            }
            Visibility::Visible => {
                if let Some(clock) = self.clock.as_mut() {
                    clock.last_flush_ms = now_ms;
                    clock.visible = true;
                }
            }
        }
    }

    /// Fixed-cadence tick; bounds usage lost to abrupt termination.
    pub async fn handle_tick(&mut self, now_ms: i64) {
        self.flush(now_ms).await;
    }

    /// Final flush and state teardown; called on every exit path
    /// (navigation away, close, context teardown).
    pub async fn teardown(&mut self, now_ms: i64) {
        self.flush(now_ms).await;
        self.clock = None;
        self.matched = None;
        self.state = PageState::Unchecked;
    }

    /// Report whole elapsed minutes to the usage aggregator.
    async fn flush(&mut self, now_ms: i64) {
        let Some(domain) = self.matched.clone() else {
            return;
        };
        let Some(clock) = self.clock.as_mut() else {
            return;
        };
        let minutes = clock.take_minutes(now_ms);
        if minutes == 0 {
            return;
        }
        let message = Message::UpdateUsage {
            domain: domain.to_string(),
            time_spent_minutes: minutes,
        };
        // The engine context may already be gone; the report is lost and
        // the ledger catches up on the next flush from a live context.
        if let Err(e) = self.messages.send(message).await {
            warn!(%domain, error = %e, "usage report dropped");
        }
    }

    /// The core ALLOWED/BLOCKED decision, recomputed from latest store
    /// state. Store failures keep the current state (never a false block).
    async fn evaluate(&mut self, now_ms: i64) -> PageState {
        let host = self.url.as_deref().and_then(host_of);
        let Some(host) = host else {
            return self.settle(PageState::Allowed, None, now_ms);
        };

        let app_url = match self.adapter.app_url().await {
            Ok(url) => url,
            Err(e) => return self.degrade(&e),
        };
        // Never block the designated redirect target itself.
        if host_of(&app_url).is_some_and(|app_host| app_host == host) {
            return self.settle(PageState::Allowed, None, now_ms);
        }

        let sites = match self.adapter.blocked_sites().await {
            Ok(sites) => sites,
            Err(e) => return self.degrade(&e),
        };
        let Some((key, policy)) = resolve_policy(&host, &sites) else {
            return self.settle(PageState::Allowed, None, now_ms);
        };
        if !policy.enabled {
            return self.settle(PageState::Allowed, None, now_ms);
        }
        let key = key.clone();
        let policy = policy.clone();

        let ledger = match self.adapter.usage(&key).await {
            Ok(ledger) => ledger,
            Err(e) => return self.degrade(&e),
        };

        if should_block(&policy, &ledger, local_date(now_ms)) {
            self.settle(PageState::Blocked, Some(key), now_ms)
        } else {
            self.settle(PageState::Allowed, Some(key), now_ms)
        }
    }

    /// Apply a decision: drive the interstitial on transitions and keep
    /// the flush clock running exactly while allowed on a monitored site.
    fn settle(&mut self, next: PageState, matched: Option<SiteKey>, now_ms: i64) -> PageState {
        let prev = self.state;
        self.state = next;
        self.matched = matched;

        match (prev, next) {
            (PageState::Blocked, PageState::Blocked) => {}
            (_, PageState::Blocked) => {
                if let Some(domain) = self.matched.clone() {
                    debug!(%domain, "page blocked");
                    self.surface.show_interstitial(&domain);
                }
                self.clock = None;
            }
            (PageState::Blocked, _) => {
                debug!("page unblocked");
                self.surface.remove_interstitial();
            }
            _ => {}
        }

        if next == PageState::Allowed && self.matched.is_some() {
            if self.clock.is_none() {
                self.clock = Some(FlushClock::start(now_ms));
            }
        } else if next != PageState::Blocked {
            self.clock = None;
        }
        self.state
    }

    /// Store failure: keep the current decision, erring toward
    /// availability when no decision exists yet.
    fn degrade(&mut self, error: &crate::error::EngineError) -> PageState {
        warn!(error = %error, "store unavailable, keeping page state");
        if self.state == PageState::Unchecked {
            self.state = PageState::Allowed;
        }
        self.state
    }
}
