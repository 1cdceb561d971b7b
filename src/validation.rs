//! Centralized validation functions for FloodGuard.
//!
//! This module provides unified parsing for:
//! - IP addresses and CIDR ranges
//! - Duration strings used by the poll interval (`10s`, `1m30s`, `500ms`)

use anyhow::{anyhow, bail, Result};
use ipnet::IpNet;
use std::net::IpAddr;
use std::time::Duration;

/// Validate an IP address string and return the parsed IpAddr.
///
/// # Examples
/// ```
/// use floodguard::validation::validate_ip;
/// assert!(validate_ip("192.168.1.1").is_ok());
/// assert!(validate_ip("::1").is_ok());
/// assert!(validate_ip("invalid").is_err());
/// ```
pub fn validate_ip(ip_str: &str) -> Result<IpAddr> {
    ip_str
        .parse()
        .map_err(|_| anyhow!("Invalid IP address: {}", ip_str))
}

/// Validate an IP address or CIDR string and return the parsed IpNet.
///
/// A plain address (without /prefix) becomes a /32 (IPv4) or /128 (IPv6) network.
///
/// # Examples
/// ```
/// use floodguard::validation::validate_ip_or_cidr;
/// assert!(validate_ip_or_cidr("192.168.1.1").is_ok());
/// assert!(validate_ip_or_cidr("192.168.0.0/24").is_ok());
/// assert!(validate_ip_or_cidr("invalid").is_err());
/// ```
pub fn validate_ip_or_cidr(ip_str: &str) -> Result<IpNet> {
    if ip_str.contains('/') {
        ip_str
            .parse()
            .map_err(|_| anyhow!("Invalid CIDR: {}", ip_str))
    } else {
        Ok(IpNet::from(validate_ip(ip_str)?))
    }
}

/// Parse a duration string made of `<number><unit>` groups.
///
/// Units: `ms`, `s`, `m`, `h`, `d`. Groups may be chained (`1m30s`).
/// ASCII only; no signs and no fractions.
///
/// # Examples
/// ```
/// use floodguard::validation::parse_duration;
/// use std::time::Duration;
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert!(parse_duration("ten seconds").is_err());
/// ```
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        bail!("Duration cannot be empty");
    }
    if !s.is_ascii() {
        bail!("Invalid duration '{}'. Only ASCII characters allowed", input);
    }

    let bytes = s.as_bytes();
    let mut total = Duration::ZERO;
    let mut i = 0;

    while i < bytes.len() {
        let num_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if num_start == i {
            bail!("Invalid duration '{}'. Expected a number at offset {}", input, i);
        }
        let value: u64 = s[num_start..i]
            .parse()
            .map_err(|_| anyhow!("Invalid duration '{}'. Number out of range", input))?;

        let unit_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let step = match &s[unit_start..i] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3_600)),
            "d" => Duration::from_secs(value.saturating_mul(86_400)),
            "" => bail!("Invalid duration '{}'. Missing unit (ms, s, m, h, d)", input),
            other => bail!("Invalid duration '{}'. Unknown unit '{}'", input, other),
        };

        total = total
            .checked_add(step)
            .ok_or_else(|| anyhow!("Invalid duration '{}'. Value too large", input))?;
    }

    Ok(total)
}
