//! List command implementation.

use anyhow::Result;
use ipnet::IpNet;
use std::path::Path;

use crate::enforcer::{check_root, select_backend};

/// Run the list command
pub async fn run(config_path: &Path) -> Result<()> {
    check_root()?;

    let config = super::load_or_default(config_path)?;
    let backend = select_backend(config.backend)?;

    let mut nets = backend.list().await?;
    nets.sort();
    nets.dedup();

    print!("{}", render(backend.name(), &nets));
    Ok(())
}

fn render(backend: &str, nets: &[IpNet]) -> String {
    if nets.is_empty() {
        return format!("No addresses blocked ({})\n", backend);
    }

    let mut out = format!("Blocked addresses ({}, {} total):\n", backend, nets.len());
    for net in nets {
        out.push_str(&format!("  {}\n", net));
    }
    out
}
