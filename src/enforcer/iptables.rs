//! iptables backend implementation.

use anyhow::Result;
use async_trait::async_trait;
use ipnet::IpNet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{render_net, FirewallBackend};
use crate::cmd_abstraction::{args_to_strings, run_checked, succeeds, CommandExecutor, RealCommandExecutor};
use crate::validation::validate_ip_or_cidr;

const IPTABLES: &str = "iptables";
const IP6TABLES: &str = "ip6tables";
const CHAIN: &str = "FLOODGUARD";

fn tool_for(net: &IpNet) -> &'static str {
    match net {
        IpNet::V4(_) => IPTABLES,
        IpNet::V6(_) => IP6TABLES,
    }
}

/// iptables backend (legacy fallback)
///
/// One DROP rule per blocked network in a dedicated `FLOODGUARD` chain,
/// jumped to from `INPUT`. IPv6 networks go through ip6tables.
pub struct IptablesBackend<E: CommandExecutor = RealCommandExecutor> {
    executor: Arc<E>,
}

impl IptablesBackend {
    pub fn new() -> Self {
        Self::with_executor(Arc::new(RealCommandExecutor::new()))
    }
}

impl Default for IptablesBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> IptablesBackend<E> {
    pub fn with_executor(executor: Arc<E>) -> Self {
        Self { executor }
    }

    /// Create the chain and the INPUT jump if missing.
    fn ensure_chain(&self, tool: &str) -> Result<()> {
        // Fails when the chain already exists
        let _ = self
            .executor
            .execute(tool, &args_to_strings(&["-N", CHAIN]));

        if !succeeds(self.executor.as_ref(), tool, &["-C", "INPUT", "-j", CHAIN]) {
            run_checked(self.executor.as_ref(), tool, &["-I", "INPUT", "-j", CHAIN])?;
            debug!(tool = tool, "Inserted INPUT jump to {}", CHAIN);
        }
        Ok(())
    }

    fn list_tool(&self, tool: &str) -> Result<Vec<IpNet>> {
        let output = match self
            .executor
            .execute(tool, &args_to_strings(&["-n", "-L", CHAIN]))
        {
            Ok(output) => output,
            Err(e) if tool == IP6TABLES => {
                warn!("ip6tables unavailable, skipping IPv6 rules: {}", e);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        if output.success {
            return Ok(parse_drop_rules(&output.stdout));
        }
        if is_missing_chain(&output.stderr) {
            return Ok(Vec::new());
        }
        anyhow::bail!("{} -n -L {} failed: {}", tool, CHAIN, output.stderr.trim())
    }
}

#[async_trait]
impl<E: CommandExecutor + 'static> FirewallBackend for IptablesBackend<E> {
    fn name(&self) -> &'static str {
        "iptables"
    }

    fn is_available(&self) -> bool {
        succeeds(self.executor.as_ref(), IPTABLES, &["--version"])
    }

    async fn block(&self, net: &IpNet) -> Result<()> {
        let tool = tool_for(net);
        let source = render_net(net);
        self.ensure_chain(tool)?;

        if succeeds(
            self.executor.as_ref(),
            tool,
            &["-C", CHAIN, "-s", &source, "-j", "DROP"],
        ) {
            debug!(source = %source, "DROP rule already present");
            return Ok(());
        }

        run_checked(
            self.executor.as_ref(),
            tool,
            &["-I", CHAIN, "-s", &source, "-j", "DROP"],
        )?;
        Ok(())
    }

    async fn unblock(&self, net: &IpNet) -> Result<()> {
        let source = render_net(net);
        run_checked(
            self.executor.as_ref(),
            tool_for(net),
            &["-D", CHAIN, "-s", &source, "-j", "DROP"],
        )?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<IpNet>> {
        let mut nets = self.list_tool(IPTABLES)?;
        nets.extend(self.list_tool(IP6TABLES)?);
        Ok(nets)
    }
}

fn is_missing_chain(stderr: &str) -> bool {
    stderr.contains("No chain") || stderr.contains("does not exist")
}

/// Extract source networks from `iptables -n -L` DROP lines.
///
/// The source is the first column after target/prot/opt that parses as an
/// address or CIDR.
fn parse_drop_rules(output: &str) -> Vec<IpNet> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            if tokens.next() != Some("DROP") {
                return None;
            }
            let parsed = tokens.skip(1).find_map(|t| validate_ip_or_cidr(t).ok());
            if parsed.is_none() {
                debug!(line = line, "Skipping unparsable iptables rule");
            }
            parsed
        })
        .collect()
}
