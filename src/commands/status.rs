//! Status command implementation.

use anyhow::Result;
use std::path::Path;

use crate::config::{BanMode, Config};
use crate::enforcer::{check_root, select_backend};
use crate::lock::{holder_pid, LOCK_FILE};

/// Run the status command
pub async fn run(config_path: &Path) -> Result<()> {
    let config = super::load_or_default(config_path)?;
    let backend = select_backend(config.backend)?;

    println!();
    match holder_pid(LOCK_FILE) {
        Some(pid) => println!("FloodGuard: RUNNING (PID {})", pid),
        None => println!("FloodGuard: STOPPED"),
    }
    println!("Backend: {}", backend.name());

    // Listing rules needs CAP_NET_ADMIN
    if check_root().is_ok() {
        match backend.list().await {
            Ok(nets) => println!("Blocked addresses: {}", nets.len()),
            Err(e) => println!("Blocked addresses: unknown ({:#})", e),
        }
    } else {
        println!("Blocked addresses: unknown (run as root)");
    }
    println!();

    print!("{}", summarize(&config));
    println!();

    Ok(())
}

fn summarize(config: &Config) -> String {
    let mode = match config.ban.mode {
        BanMode::Auto => "auto (block)",
        BanMode::Monitor => "monitor (log only)",
    };
    let duration = match config.ban_duration() {
        Some(d) => format!("{}s", d.as_secs()),
        None => "permanent".to_string(),
    };
    let ports = if config.monitor.ports.is_empty() {
        "all".to_string()
    } else {
        config
            .monitor
            .ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut out = String::new();
    out.push_str(&format!("Poll interval: {:?}\n", config.poll_interval()));
    out.push_str(&format!(
        "Max connections: {}\n",
        threshold(config.monitor.max_connections)
    ));
    let rate = match config.monitor.max_qps {
        0 => threshold(0),
        n => format!("{}/s", n),
    };
    out.push_str(&format!("Max rate: {}\n", rate));
    out.push_str(&format!("Ports: {}\n", ports));
    out.push_str(&format!("Ban mode: {}\n", mode));
    out.push_str(&format!("Ban duration: {}\n", duration));
    out.push_str(&format!("Allowlist entries: {}\n", config.allowlist.len()));
    out.push_str(&format!("Denylist entries: {}\n", config.denylist.len()));
    out
}

fn threshold(value: u32) -> String {
    if value == 0 {
        "disabled".to_string()
    } else {
        value.to_string()
    }
}
