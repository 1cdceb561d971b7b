//! Error types for FloodGuard.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FloodguardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Firewall error: {0}")]
    Firewall(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Invalid IP address: {0}")]
    InvalidIp(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Failed to block {failed} out of {total} malicious IPs")]
    BlockFailed { failed: usize, total: usize },
}
