//! Discovery of this host's own addresses, used by `floodguard init` to
//! seed the allowlist.

use anyhow::{Context, Result};
use reqwest::Client;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

use crate::cmd_abstraction::{run_checked, CommandExecutor};
use crate::validation::validate_ip;

const TIMEOUT_SECS: u64 = 5;

/// Plain-text "what is my IP" services, tried in order.
pub const PUBLIC_IP_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://ifconfig.me/ip",
    "https://icanhazip.com",
];

/// HTTP client for public address lookups
pub struct PublicIpResolver {
    client: Client,
}

impl PublicIpResolver {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .user_agent(format!("floodguard/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// First address reported by any of the lookup services.
    pub async fn resolve(&self) -> Option<IpAddr> {
        for service in PUBLIC_IP_SERVICES {
            match self.fetch(service).await {
                Ok(ip) => {
                    info!(ip = %ip, service = service, "Detected public IP");
                    return Some(ip);
                }
                Err(e) => debug!(service = service, "Public IP lookup failed: {:#}", e),
            }
        }
        None
    }

    async fn fetch(&self, url: &str) -> Result<IpAddr> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        validate_ip(body.trim())
    }
}

/// Non-loopback addresses configured on interfaces that are up.
pub fn local_addresses<E: CommandExecutor + ?Sized>(executor: &E) -> Result<Vec<IpAddr>> {
    let output = run_checked(executor, "ip", &["-o", "addr", "show", "up"])?;
    Ok(parse_ip_addr_output(&output))
}

/// Parse `ip -o addr show` output.
///
/// Each line looks like `2: eth0    inet 192.168.1.5/24 brd ... scope global eth0`.
/// Loopback and unspecified addresses are dropped, duplicates removed.
fn parse_ip_addr_output(output: &str) -> Vec<IpAddr> {
    let mut addrs = Vec::new();

    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        let Some(cidr) = tokens
            .by_ref()
            .find(|t| *t == "inet" || *t == "inet6")
            .and_then(|_| tokens.next())
        else {
            continue;
        };

        let addr = cidr.split('/').next().unwrap_or(cidr);
        let Ok(ip) = addr.parse::<IpAddr>() else {
            debug!(token = cidr, "Skipping unparsable interface address");
            continue;
        };

        if ip.is_loopback() || ip.is_unspecified() || addrs.contains(&ip) {
            continue;
        }
        addrs.push(ip);
    }

    addrs
}
