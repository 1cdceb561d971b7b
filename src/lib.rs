//! # FloodGuard - Connection-flood detector for Linux hosts
//!
//! Watches the kernel's TCP connection tables, flags remote addresses that
//! hold too many connections or open them too fast, and blocks them through
//! the host firewall.
//!
//! ## Features
//!
//! - **Two checks** - Absolute connection count and per-second growth rate
//! - **Allowlist** - Exact addresses and CIDRs that are never blocked
//! - **Denylist** - Addresses and CIDRs blocked unconditionally at startup
//! - **Expiring bans** - Blocks are lifted after a configurable duration
//! - **Monitor mode** - Detect and log without touching the firewall
//! - **Backends** - nftables (preferred), iptables (legacy), dummy (no-op)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        FloodGuard                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: start, status, list, unblock, check, init  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml)                                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Monitor (tokio interval + shutdown token)                  │
//! │    ├── ProcNetReader   /proc/net/tcp, /proc/net/tcp6        │
//! │    ├── Detector        count + rate thresholds              │
//! │    ├── Allowlist       exact + CIDR exemptions (ipnet)      │
//! │    └── BanTable        expiring bans                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Enforcer (FirewallBackend trait)                           │
//! │    ├── NftablesBackend (recommended)                        │
//! │    ├── IptablesBackend (legacy)                             │
//! │    └── DummyBackend (no firewall tool present)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use floodguard::config::Config;
//! use floodguard::enforcer::{check_root, select_backend};
//! use floodguard::monitor::Monitor;
//! use floodguard::signal::{ShutdownGuard, ShutdownToken};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     check_root()?;
//!
//!     let config = Config::load("/etc/floodguard/config.yaml")?;
//!     let backend = select_backend(config.backend)?;
//!
//!     let token = ShutdownToken::new();
//!     let _signals = ShutdownGuard::new(token.clone());
//!
//!     Monitor::new(&config, backend, token).run().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`allowlist`] - Exemption matching
//! - [`bans`] - Expiring ban bookkeeping
//! - [`cli`] - Command-line interface definitions
//! - [`clock`] - Time source abstraction
//! - [`cmd_abstraction`] - Mockable process execution
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`connections`] - `/proc/net/tcp{,6}` parsing
//! - [`detector`] - Threshold and rate detection
//! - [`enforcer`] - Firewall backend abstraction (nftables, iptables)
//! - [`error`] - Typed errors
//! - [`hostinfo`] - Public and interface address discovery
//! - [`lock`] - Single-instance locking
//! - [`monitor`] - Detection and enforcement loop
//! - [`signal`] - Graceful shutdown signal handling
//! - [`validation`] - Address and duration parsing

pub mod allowlist;
pub mod bans;
pub mod cli;
pub mod clock;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod connections;
pub mod detector;
pub mod enforcer;
pub mod error;
pub mod hostinfo;
pub mod lock;
pub mod monitor;
pub mod signal;
pub mod validation;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::FloodguardError;
