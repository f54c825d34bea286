use chrono::Local;
use clap::Subcommand;
use doombreak_core::SiteKey;
use serde::Serialize;

use super::helpers::{open_adapter, open_engine, runtime, CliError};

#[derive(Subcommand)]
pub enum UsageAction {
    /// Today's and this week's minutes per site
    Show {
        /// Restrict to one domain
        domain: Option<String>,
    },
    /// Report elapsed minutes for a domain (what a page agent would send)
    Record {
        domain: String,
        minutes: u32,
    },
}

#[derive(Serialize)]
struct UsageRow {
    domain: String,
    today_minutes: u32,
    week_minutes: u32,
    daily_limit: u32,
    weekly_limit: u32,
    over_limit: bool,
}

pub fn run(action: UsageAction) -> Result<(), CliError> {
    let rt = runtime()?;
    rt.block_on(async {
        match action {
            UsageAction::Show { domain } => {
                let adapter = open_adapter()?;
                let today = Local::now().date_naive();
                let sites = adapter.blocked_sites().await?;
                let mut rows = Vec::new();
                for (key, policy) in &sites {
                    if let Some(filter) = &domain {
                        if SiteKey::new(filter)? != *key {
                            continue;
                        }
                    }
                    let ledger = adapter.usage(key).await?;
                    rows.push(UsageRow {
                        domain: key.to_string(),
                        today_minutes: ledger.minutes_on(today),
                        week_minutes: ledger.weekly_minutes(today),
                        daily_limit: policy.daily_limit_minutes,
                        weekly_limit: policy.weekly_limit_minutes,
                        over_limit: doombreak_core::is_over_limit(policy, &ledger, today),
                    });
                }
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            UsageAction::Record { domain, minutes } => {
                let engine = open_engine()?;
                let today = Local::now().date_naive();
                engine
                    .record_usage(&domain, i64::from(minutes), today)
                    .await?;
                println!("recorded {minutes} min for {domain}");
            }
        }
        Ok(())
    })
}
