pub mod classify;
pub mod history;
pub mod routes;
pub mod serve;

use relayclaw_config::AppConfig;
use std::path::Path;

/// Load and validate the config at `path`, with environment overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load_with_env(path).map_err(|e| format!("Failed to load config: {e}").into())
}
