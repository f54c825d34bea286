use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every state change in the engine produces an Event.
/// The configuration surface subscribes to them; collaborating UIs may too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// First-run defaults were written to the shared store.
    DefaultsSeeded {
        sites: usize,
        at: DateTime<Utc>,
    },
    UsageRecorded {
        domain: String,
        minutes_added: u32,
        today_total: u32,
        at: DateTime<Utc>,
    },
    /// A recorded delta moved a domain from under to over its limit.
    LimitCrossed {
        domain: String,
        at: DateTime<Utc>,
    },
    RulesInstalled {
        count: usize,
        at: DateTime<Utc>,
    },
    /// The platform rejected the compiled set; the previous rules remain.
    RuleInstallationFailed {
        message: String,
        at: DateTime<Utc>,
    },
    SyncCompleted {
        changed: bool,
        at: DateTime<Utc>,
    },
    /// An external UI collaborator should open the options surface.
    OptionsRequested {
        at: DateTime<Utc>,
    },
}
