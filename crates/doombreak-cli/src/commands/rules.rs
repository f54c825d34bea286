use chrono::Local;
use clap::Subcommand;
use doombreak_core::rules::compile;

use super::helpers::{open_adapter, runtime, CliError};

#[derive(Subcommand)]
pub enum RulesAction {
    /// Compile the current state and print the resulting rule set
    Show,
    /// Print just the number of rules the current state compiles to
    Count,
}

pub fn run(action: RulesAction) -> Result<(), CliError> {
    let adapter = open_adapter()?;
    let rt = runtime()?;
    rt.block_on(async {
        let today = Local::now().date_naive();
        let sites = adapter.blocked_sites().await?;
        let app_url = adapter.app_url().await?;
        let ledgers = adapter.usage_for(&sites).await?;
        let rules = compile(&sites, &ledgers, &app_url, today);

        match action {
            RulesAction::Show => println!("{}", serde_json::to_string_pretty(&rules)?),
            RulesAction::Count => println!("{}", rules.len()),
        }
        Ok(())
    })
}
