//! Shared command plumbing: the file-backed store, the engine, and the
//! runtime that drives the async core from synchronous commands.

use doombreak_core::{
    EngineConfig, JsonFileStore, MemoryRuleSink, PolicyEngine, StoreAdapter,
};

pub type CliError = Box<dyn std::error::Error>;
pub type CliEngine = PolicyEngine<JsonFileStore, MemoryRuleSink>;

/// Single-threaded runtime; each command is one short-lived invocation.
pub fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

pub fn open_store() -> Result<JsonFileStore, CliError> {
    let config = EngineConfig::load();
    let dir = config
        .store_dir
        .clone()
        .unwrap_or_else(JsonFileStore::default_dir);
    Ok(JsonFileStore::new(dir)?)
}

pub fn open_adapter() -> Result<StoreAdapter<JsonFileStore>, CliError> {
    Ok(StoreAdapter::new(open_store()?))
}

/// Engine over the file store. The rule sink is in-process: the CLI has
/// no platform interception capability, so installed rules live for the
/// duration of one invocation and `rules show` prints the compiled set.
pub fn open_engine() -> Result<CliEngine, CliError> {
    let config = EngineConfig::load();
    Ok(PolicyEngine::new(
        open_store()?,
        MemoryRuleSink::new(),
        config,
    ))
}
