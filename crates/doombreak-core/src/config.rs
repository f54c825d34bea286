//! TOML-based application configuration.
//!
//! Stores engine-side preferences: the redirect-target app URL seeded on
//! first run and the enforcement flush cadence. Stored at
//! `~/.config/doombreak/config.toml` (`doombreak-dev` under
//! `DOOMBREAK_ENV=dev`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Redirect target used when the store holds no `appUrl`.
pub const DEFAULT_APP_URL: &str = "http://localhost:8080/";

fn default_app_url() -> String {
    DEFAULT_APP_URL.to_string()
}

fn default_flush_interval_secs() -> u64 {
    60
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL blocked navigations are redirected to.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    /// Fixed tick cadence for enforcement-agent usage flushes.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Override for the store directory; defaults to the standard data dir.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_url: default_app_url(),
            flush_interval_secs: default_flush_interval_secs(),
            store_dir: None,
        }
    }
}

impl EngineConfig {
    /// `~/.config/doombreak[-dev]/config.toml`.
    pub fn path() -> PathBuf {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config");
        let env = std::env::var("DOOMBREAK_ENV").unwrap_or_else(|_| "production".to_string());
        let app = if env == "dev" { "doombreak-dev" } else { "doombreak" };
        base.join(app).join("config.toml")
    }

    /// Load the config file, falling back to defaults when it is absent
    /// or unreadable.
    pub fn load() -> Self {
        let path = Self::path();
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "config unparsable, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
