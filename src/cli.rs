//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(name = "floodguard")]
#[command(author, version, about = "Connection-flood detector and auto-blocker for Linux hosts")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start monitoring connections and blocking floods
    Start,

    /// Show backend, lock holder and blocked address count
    Status,

    /// List addresses currently blocked by the firewall backend
    List,

    /// Remove a block for an IP or CIDR
    Unblock {
        /// IP address or CIDR to unblock
        target: String,
    },

    /// Check whether an IP is exempt under the configured allowlist
    Check {
        /// IP address to check
        ip: String,
    },

    /// Write a default configuration file
    Init {
        /// Space-separated addresses to add to the allowlist (skips detection)
        #[arg(long)]
        public_ip: Option<String>,

        /// Do not detect public and local addresses
        #[arg(long)]
        no_detect: bool,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Show version
    Version,
}
