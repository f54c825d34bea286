use chrono::Local;

use super::helpers::{open_engine, runtime, CliError};

pub fn run(url: &str) -> Result<(), CliError> {
    let engine = open_engine()?;
    let rt = runtime()?;
    rt.block_on(async {
        let status = engine.site_status(url, Local::now()).await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        Ok(())
    })
}
