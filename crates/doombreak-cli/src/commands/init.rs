use chrono::Local;

use super::helpers::{open_engine, runtime, CliError};

pub fn run() -> Result<(), CliError> {
    let engine = open_engine()?;
    let rt = runtime()?;
    rt.block_on(async {
        engine.init_defaults(Local::now().date_naive()).await?;
        let sites = engine.adapter().blocked_sites().await?;
        println!("initialized with {} sites", sites.len());
        Ok(())
    })
}
