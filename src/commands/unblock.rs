//! Unblock command implementation.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::enforcer::{check_root, select_backend};
use crate::validation::validate_ip_or_cidr;

/// Run the unblock command
pub async fn run(target: &str, config_path: &Path) -> Result<()> {
    let net = validate_ip_or_cidr(target.trim())?.trunc();

    check_root()?;

    let config = super::load_or_default(config_path)?;
    let backend = select_backend(config.backend)?;

    backend
        .unblock(&net)
        .await
        .with_context(|| format!("Failed to unblock {}", net))?;

    info!(ip = %net, backend = backend.name(), "Address unblocked");
    println!("[OK] {} unblocked", net);
    Ok(())
}
