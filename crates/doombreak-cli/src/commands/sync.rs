use std::path::{Path, PathBuf};

use async_trait::async_trait;
use doombreak_core::{CompanionSource, CompanionState, Result as CoreResult};

use super::helpers::{open_engine, runtime, CliError};

/// Companion state exported to a JSON file (the shape the companion app
/// keeps in its own local storage).
struct JsonFileCompanion {
    path: PathBuf,
}

#[async_trait]
impl CompanionSource for JsonFileCompanion {
    async fn read_state(&self) -> CoreResult<Option<CompanionState>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: CompanionState = serde_json::from_str(&content)?;
        Ok(Some(state))
    }
}

pub fn run(file: &Path) -> Result<(), CliError> {
    let companion = JsonFileCompanion {
        path: file.to_path_buf(),
    };
    let engine = open_engine()?.with_companion(Box::new(companion));
    let rt = runtime()?;
    rt.block_on(async {
        let changed = engine.sync_from_app().await?;
        if changed {
            println!("companion state imported");
        } else {
            println!("already up to date");
        }
        Ok(())
    })
}
