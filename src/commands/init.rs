//! Init command implementation.

use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

use crate::cmd_abstraction::RealCommandExecutor;
use crate::config::Config;
use crate::hostinfo::{local_addresses, PublicIpResolver};
use crate::validation::validate_ip_or_cidr;

/// Run the init command
///
/// `public_ip` is a space-separated list of addresses to allowlist. When it
/// is absent and `detect` is set, the host's public and interface addresses
/// are used instead.
pub async fn run(public_ip: Option<&str>, detect: bool, force: bool, config_path: &Path) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            config_path.display()
        );
    }

    let candidates = match public_ip {
        Some(list) => list.split_whitespace().map(str::to_string).collect(),
        None if detect => detect_own_addresses().await,
        None => Vec::new(),
    };
    let extra = usable_entries(&candidates);

    let config = Config::with_extra_allowlist(&extra);
    config.save(config_path)?;

    info!(path = %config_path.display(), allowlist = config.allowlist.len(), "Configuration written");
    println!("[OK] Configuration written to {}", config_path.display());
    if !extra.is_empty() {
        println!("Allowlisted host addresses: {}", extra.join(" "));
    }
    Ok(())
}

async fn detect_own_addresses() -> Vec<String> {
    let mut found = Vec::new();

    match PublicIpResolver::new() {
        Ok(resolver) => match resolver.resolve().await {
            Some(ip) => found.push(ip.to_string()),
            None => warn!("Could not detect public IP address"),
        },
        Err(e) => warn!("Public IP lookup unavailable: {:#}", e),
    }

    match local_addresses(&RealCommandExecutor::new()) {
        Ok(addrs) => found.extend(addrs.iter().map(|ip| ip.to_string())),
        Err(e) => warn!("Could not list interface addresses: {:#}", e),
    }

    found
}

/// Keep entries that parse as an address or CIDR, without duplicates.
fn usable_entries(candidates: &[String]) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    for candidate in candidates {
        if let Err(e) = validate_ip_or_cidr(candidate) {
            warn!("Ignoring {}", e);
            continue;
        }
        if !entries.contains(candidate) {
            entries.push(candidate.clone());
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_usable_entries() {
        let candidates: Vec<String> = ["203.0.113.1", "bogus", "2001:db8::/32", "203.0.113.1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(usable_entries(&candidates), vec!["203.0.113.1", "2001:db8::/32"]);
    }

    #[tokio::test]
    async fn test_init_writes_config_with_public_ips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        run(Some("203.0.113.1 2001:db8::1 ::1"), true, false, &path)
            .await
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.allowlist,
            vec!["127.0.0.1", "::1", "0.0.0.0", "::", "203.0.113.1", "2001:db8::1"]
        );
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "backend: dummy\n").unwrap();

        let err = run(None, false, false, &path).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));

        run(None, false, true, &path).await.unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.allowlist.len(), 4);
    }
}
