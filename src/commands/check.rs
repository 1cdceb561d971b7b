//! Check command implementation.

use anyhow::Result;
use std::net::IpAddr;
use std::path::Path;

use crate::allowlist::Allowlist;
use crate::error::FloodguardError;
use crate::validation::validate_ip;

/// Run the check command
pub async fn run(ip_str: &str, config_path: &Path) -> Result<()> {
    let ip = validate_ip(ip_str.trim())
        .map_err(|_| FloodguardError::InvalidIp(ip_str.to_string()))?;

    let config = super::load_or_default(config_path)?;
    let allowlist = Allowlist::new(&config.allowlist);

    println!();
    println!("{}", describe(&allowlist, ip));
    println!();

    Ok(())
}

fn describe(allowlist: &Allowlist, ip: IpAddr) -> String {
    if allowlist.contains(ip) {
        format!("IP {} is EXEMPT (allowlisted, never blocked)", ip)
    } else {
        format!("IP {} is NOT exempt (subject to flood detection)", ip)
    }
}
