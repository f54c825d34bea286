//! # Doombreak Core Library
//!
//! Core business logic for Doombreak: time-bounded access limits on a
//! configurable set of domains, enforced by redirecting traffic once
//! usage thresholds are exceeded. All operations are available to any
//! front end through this library; the CLI binary is a thin layer over
//! the same core.
//!
//! ## Architecture
//!
//! Independent execution contexts (the background policy engine, one
//! enforcement agent per page, the configuration surface) share no
//! memory: they coordinate only through an eventually-consistent
//! key-value store and asynchronous messages. Every derived value -- the
//! block decision, the compiled rule set -- is a pure recomputation from
//! the latest store state, so dropped or reordered notifications converge
//! on the next pass.
//!
//! ## Key Components
//!
//! - [`StoreAdapter`]: typed schema over the external key-value capability
//! - [`UsageAggregator`]: per-domain daily usage counters and limit checks
//! - [`rules::compile`]: deterministic policy-to-redirect-rule compilation
//! - [`PageAgent`]: per-page allow/block state machine with usage flushes
//! - [`SyncBridge`]: one-directional companion-state importer
//! - [`PolicyEngine`]: the background context tying the above together

pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod rules;
pub mod site;
pub mod store;
pub mod sync;
pub mod usage;

pub use agent::{PageAgent, PageState, PageSurface, Visibility};
pub use config::EngineConfig;
pub use engine::{PolicyEngine, SiteStatus};
pub use error::{EngineError, Result, StoreError};
pub use events::Event;
pub use message::Message;
pub use rules::{BlockRule, MemoryRuleSink, RuleSink};
pub use site::{default_sites, is_blocked_site, DisplayMeta, SiteKey, SiteMap, SitePolicy};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, Namespace, StoreAdapter, StoreChange};
pub use sync::{CompanionSource, CompanionState, CountdownSession, PlatformFlags, SyncBridge};
pub use usage::{is_over_limit, should_block, UsageAggregator, UsageLedger};
