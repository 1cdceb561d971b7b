//! Start command implementation.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::enforcer::{check_root, select_backend};
use crate::lock::LockGuard;
use crate::monitor::Monitor;
use crate::signal::{ShutdownGuard, ShutdownToken};

/// Run the start command
pub async fn run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;

    check_root()?;
    let _lock = LockGuard::acquire()?;

    let token = ShutdownToken::new();
    let _signals = ShutdownGuard::new(token.clone());

    let backend = select_backend(config.backend)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting FloodGuard"
    );

    let monitor = Monitor::new(&config, backend, token);
    monitor.run().await?;

    info!("FloodGuard stopped");
    Ok(())
}
