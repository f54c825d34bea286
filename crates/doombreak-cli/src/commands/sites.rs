use clap::Subcommand;
use doombreak_core::{default_sites, SiteKey, SitePolicy};

use super::helpers::{open_adapter, runtime, CliError};

#[derive(Subcommand)]
pub enum SitesAction {
    /// List configured sites
    List,
    /// Enable monitoring/blocking for a site
    Enable {
        domain: String,
    },
    /// Disable monitoring/blocking for a site
    Disable {
        domain: String,
    },
    /// Add a site (or overwrite an existing one)
    Add {
        domain: String,
        /// Daily limit in minutes (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        daily: u32,
        /// Weekly limit in minutes (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        weekly: u32,
    },
    /// Remove a site
    Remove {
        domain: String,
    },
    /// Change a site's limits
    SetLimits {
        domain: String,
        #[arg(long)]
        daily: Option<u32>,
        #[arg(long)]
        weekly: Option<u32>,
    },
    /// Reset all sites to the stock defaults
    Reset,
}

pub fn run(action: SitesAction) -> Result<(), CliError> {
    let adapter = open_adapter()?;
    let rt = runtime()?;
    rt.block_on(async {
        match action {
            SitesAction::List => {
                let sites = adapter.blocked_sites().await?;
                println!("{}", serde_json::to_string_pretty(&sites)?);
            }
            SitesAction::Enable { domain } => {
                set_enabled(&adapter, &domain, true).await?;
                println!("enabled {domain}");
            }
            SitesAction::Disable { domain } => {
                set_enabled(&adapter, &domain, false).await?;
                println!("disabled {domain}");
            }
            SitesAction::Add { domain, daily, weekly } => {
                let key = SiteKey::new(&domain)?;
                let mut sites = adapter.blocked_sites().await?;
                sites.insert(key.clone(), SitePolicy::limited(daily, weekly));
                adapter.set_blocked_sites(&sites).await?;
                println!("added {key}");
            }
            SitesAction::Remove { domain } => {
                let key = SiteKey::new(&domain)?;
                let mut sites = adapter.blocked_sites().await?;
                if sites.remove(&key).is_none() {
                    eprintln!("unknown site: {key}");
                    std::process::exit(1);
                }
                adapter.set_blocked_sites(&sites).await?;
                println!("removed {key}");
            }
            SitesAction::SetLimits { domain, daily, weekly } => {
                let key = SiteKey::new(&domain)?;
                let mut sites = adapter.blocked_sites().await?;
                let Some(policy) = sites.get_mut(&key) else {
                    eprintln!("unknown site: {key}");
                    std::process::exit(1);
                };
                if let Some(daily) = daily {
                    policy.daily_limit_minutes = daily;
                }
                if let Some(weekly) = weekly {
                    policy.weekly_limit_minutes = weekly;
                }
                adapter.set_blocked_sites(&sites).await?;
                println!("updated {key}");
            }
            SitesAction::Reset => {
                adapter.set_blocked_sites(&default_sites()).await?;
                println!("sites reset to defaults");
            }
        }
        Ok(())
    })
}

async fn set_enabled(
    adapter: &doombreak_core::StoreAdapter<doombreak_core::JsonFileStore>,
    domain: &str,
    enabled: bool,
) -> Result<(), CliError> {
    let key = SiteKey::new(domain)?;
    let mut sites = adapter.blocked_sites().await?;
    let Some(policy) = sites.get_mut(&key) else {
        eprintln!("unknown site: {key}");
        std::process::exit(1);
    };
    policy.enabled = enabled;
    adapter.set_blocked_sites(&sites).await?;
    Ok(())
}
