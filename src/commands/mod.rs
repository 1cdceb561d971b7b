//! CLI command implementations.

pub mod check;
pub mod init;
pub mod list;
pub mod start;
pub mod status;
pub mod unblock;

use anyhow::Result;
use std::path::Path;
use tracing::debug;

use crate::config::Config;

/// Load the config file, or fall back to defaults when it does not exist.
pub(crate) fn load_or_default(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        Config::load(config_path)
    } else {
        debug!("Config file {:?} not found, using defaults", config_path);
        Ok(Config::default())
    }
}
