//! nftables backend implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ipnet::IpNet;
use std::sync::Arc;
use tracing::debug;

use super::{render_net, FirewallBackend};
use crate::cmd_abstraction::{args_to_strings, run_checked, succeeds, CommandExecutor, RealCommandExecutor};
use crate::validation::validate_ip_or_cidr;

const NFT: &str = "nft";
const TABLE_FAMILY: &str = "inet";
const TABLE_NAME: &str = "floodguard";
const CHAIN_NAME: &str = "input";
const SET_NAME_V4: &str = "blocklist_v4";
const SET_NAME_V6: &str = "blocklist_v6";

/// Validate that an IP/CIDR string is safe to pass to nft as a set element.
/// Only digits, dots, colons, slashes and lowercase hex letters are allowed.
fn is_safe_nft_element(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_digit() || c == '.' || c == ':' || c == '/' || ('a'..='f').contains(&c)
        })
}

fn set_for(net: &IpNet) -> &'static str {
    match net {
        IpNet::V4(_) => SET_NAME_V4,
        IpNet::V6(_) => SET_NAME_V6,
    }
}

/// nftables backend
///
/// Owns the `inet floodguard` table. Blocked networks live in two interval
/// sets, one per address family, matched by a single input-hook chain.
pub struct NftablesBackend<E: CommandExecutor = RealCommandExecutor> {
    executor: Arc<E>,
}

impl NftablesBackend {
    pub fn new() -> Self {
        Self::with_executor(Arc::new(RealCommandExecutor::new()))
    }
}

impl Default for NftablesBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> NftablesBackend<E> {
    pub fn with_executor(executor: Arc<E>) -> Self {
        Self { executor }
    }

    /// Script creating the managed table, both sets and the drop chain.
    fn generate_setup_script(&self) -> String {
        let mut script = String::new();
        script.push_str(&format!("add table {} {}\n", TABLE_FAMILY, TABLE_NAME));
        script.push_str(&format!("table {} {} {{\n", TABLE_FAMILY, TABLE_NAME));
        script.push_str(&format!("    set {} {{\n", SET_NAME_V4));
        script.push_str("        type ipv4_addr\n");
        script.push_str("        flags interval\n");
        script.push_str("    }\n");
        script.push_str(&format!("    set {} {{\n", SET_NAME_V6));
        script.push_str("        type ipv6_addr\n");
        script.push_str("        flags interval\n");
        script.push_str("    }\n");
        script.push_str(&format!("    chain {} {{\n", CHAIN_NAME));
        script.push_str("        type filter hook input priority 0; policy accept;\n");
        script.push_str(&format!("        ip saddr @{} counter drop\n", SET_NAME_V4));
        script.push_str(&format!("        ip6 saddr @{} counter drop\n", SET_NAME_V6));
        script.push_str("    }\n");
        script.push_str("}\n");
        script
    }

    fn table_exists(&self) -> bool {
        succeeds(
            self.executor.as_ref(),
            NFT,
            &["list", "table", TABLE_FAMILY, TABLE_NAME],
        )
    }

    /// Create the managed table unless it already exists.
    fn ensure_table(&self) -> Result<()> {
        if self.table_exists() {
            return Ok(());
        }

        debug!("Creating nftables table {} {}", TABLE_FAMILY, TABLE_NAME);
        let output = self
            .executor
            .execute_with_stdin(NFT, &args_to_strings(&["-f", "-"]), &self.generate_setup_script())
            .context("Failed to run nft")?;

        if !output.success {
            anyhow::bail!("nft table setup failed: {}", output.stderr.trim());
        }
        Ok(())
    }

    fn element_for(net: &IpNet) -> Result<String> {
        let element = render_net(net);
        if !is_safe_nft_element(&element) {
            anyhow::bail!("Refusing unsafe nftables element: {}", element);
        }
        Ok(element)
    }

    fn list_set(&self, set: &str) -> Result<Vec<IpNet>> {
        let output = run_checked(
            self.executor.as_ref(),
            NFT,
            &["list", "set", TABLE_FAMILY, TABLE_NAME, set],
        )?;
        Ok(parse_set_elements(&output))
    }
}

#[async_trait]
impl<E: CommandExecutor + 'static> FirewallBackend for NftablesBackend<E> {
    fn name(&self) -> &'static str {
        "nftables"
    }

    fn is_available(&self) -> bool {
        succeeds(self.executor.as_ref(), NFT, &["--version"])
    }

    async fn block(&self, net: &IpNet) -> Result<()> {
        let element = Self::element_for(net)?;
        self.ensure_table()?;
        run_checked(
            self.executor.as_ref(),
            NFT,
            &["add", "element", TABLE_FAMILY, TABLE_NAME, set_for(net), "{", &element, "}"],
        )?;
        debug!(element = %element, "nftables element added");
        Ok(())
    }

    async fn unblock(&self, net: &IpNet) -> Result<()> {
        let element = Self::element_for(net)?;
        run_checked(
            self.executor.as_ref(),
            NFT,
            &["delete", "element", TABLE_FAMILY, TABLE_NAME, set_for(net), "{", &element, "}"],
        )?;
        debug!(element = %element, "nftables element removed");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<IpNet>> {
        if !self.table_exists() {
            return Ok(Vec::new());
        }

        let mut nets = self.list_set(SET_NAME_V4)?;
        nets.extend(self.list_set(SET_NAME_V6)?);
        Ok(nets)
    }
}

/// Parse the `elements = { ... }` block of `nft list set` output.
///
/// The block may span several lines. Tokens that are not an address or CIDR
/// (ranges, timeouts, counters) are skipped.
fn parse_set_elements(output: &str) -> Vec<IpNet> {
    let Some(start) = output.find("elements = {") else {
        return Vec::new();
    };
    let body = &output[start + "elements = {".len()..];
    let body = match body.find('}') {
        Some(end) => &body[..end],
        None => body,
    };

    body.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .filter_map(|token| match validate_ip_or_cidr(token) {
            Ok(net) => Some(net),
            Err(_) => {
                debug!(token = token, "Skipping unparsable nftables set element");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_abstraction::{CommandOutput, MockCommandExecutor};

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn backend(mock: MockCommandExecutor) -> NftablesBackend<MockCommandExecutor> {
        NftablesBackend::with_executor(Arc::new(mock))
    }

    #[test]
    fn test_is_safe_nft_element() {
        assert!(is_safe_nft_element("192.168.1.1"));
        assert!(is_safe_nft_element("10.0.0.0/8"));
        assert!(is_safe_nft_element("2001:db8::1"));
        assert!(is_safe_nft_element("2001:db8::/32"));

        assert!(!is_safe_nft_element(""));
        assert!(!is_safe_nft_element("1.2.3.4; flush ruleset"));
        assert!(!is_safe_nft_element("1.2.3.4 }"));
        assert!(!is_safe_nft_element("1.2.3.4\n"));
        assert!(!is_safe_nft_element("$(reboot)"));
    }

    #[test]
    fn test_generate_setup_script() {
        let script = backend(MockCommandExecutor::new()).generate_setup_script();
        assert!(script.starts_with("add table inet floodguard\n"));
        assert!(script.contains("set blocklist_v4"));
        assert!(script.contains("type ipv6_addr"));
        assert!(script.contains("hook input"));
        assert!(script.contains("ip saddr @blocklist_v4 counter drop"));
        assert!(script.contains("ip6 saddr @blocklist_v6 counter drop"));
    }

    #[test]
    fn test_parse_set_elements_single_line() {
        let output = "table inet floodguard {\n\tset blocklist_v4 {\n\t\ttype ipv4_addr\n\t\tflags interval\n\t\telements = { 1.2.3.4, 10.0.0.0/8 }\n\t}\n}\n";
        assert_eq!(
            parse_set_elements(output),
            vec![net("1.2.3.4/32"), net("10.0.0.0/8")]
        );
    }

    #[test]
    fn test_parse_set_elements_multi_line() {
        let output = "\t\telements = { 1.2.3.4, 5.6.7.8,\n\t\t\t     9.9.9.9 }\n\t}\n";
        assert_eq!(parse_set_elements(output).len(), 3);
    }

    #[test]
    fn test_parse_set_elements_skips_garbage() {
        let output = "elements = { 1.2.3.4-1.2.3.9, 2001:db8::1, bogus }";
        assert_eq!(parse_set_elements(output), vec![net("2001:db8::1/128")]);
    }

    #[test]
    fn test_parse_set_elements_empty_set() {
        let output = "table inet floodguard {\n\tset blocklist_v4 {\n\t\ttype ipv4_addr\n\t}\n}\n";
        assert!(parse_set_elements(output).is_empty());
    }

    #[tokio::test]
    async fn test_block_creates_table_when_missing() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| cmd == "nft" && args[0] == "list")
            .times(1)
            .returning(|_, _| Ok(CommandOutput::failed("No such file or directory")));
        mock.expect_execute_with_stdin()
            .withf(|cmd, args, stdin| {
                cmd == "nft" && args == ["-f", "-"] && stdin.contains("table inet floodguard")
            })
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::ok("")));
        mock.expect_execute()
            .withf(|cmd, args| {
                cmd == "nft"
                    && args[0] == "add"
                    && args[4] == "blocklist_v4"
                    && args.contains(&"1.2.3.4".to_string())
            })
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));

        backend(mock).block(&net("1.2.3.4/32")).await.unwrap();
    }

    #[tokio::test]
    async fn test_block_reuses_existing_table() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| cmd == "nft" && args[0] == "list")
            .returning(|_, _| Ok(CommandOutput::ok("table inet floodguard {}")));
        mock.expect_execute_with_stdin().times(0);
        mock.expect_execute()
            .withf(|_, args| args[0] == "add" && args[4] == "blocklist_v6")
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));

        backend(mock).block(&net("2001:db8::1/128")).await.unwrap();
    }

    #[tokio::test]
    async fn test_block_failure_is_returned() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| args[0] == "list")
            .returning(|_, _| Ok(CommandOutput::ok("")));
        mock.expect_execute()
            .withf(|_, args| args[0] == "add")
            .returning(|_, _| Ok(CommandOutput::failed("Error: Could not process rule")));

        let err = backend(mock).block(&net("1.2.3.4/32")).await.unwrap_err();
        assert!(err.to_string().contains("Could not process rule"));
    }

    #[tokio::test]
    async fn test_unblock_deletes_element() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| {
                cmd == "nft"
                    && args[0] == "delete"
                    && args[1] == "element"
                    && args.contains(&"10.0.0.0/8".to_string())
            })
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));

        backend(mock).unblock(&net("10.1.2.3/8")).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_without_table_is_empty() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| args[0] == "list" && args[1] == "table")
            .returning(|_, _| Ok(CommandOutput::failed("No such file or directory")));

        assert!(backend(mock).list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_reads_both_sets() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| args[0] == "list" && args[1] == "table")
            .returning(|_, _| Ok(CommandOutput::ok("table inet floodguard {}")));
        mock.expect_execute()
            .withf(|_, args| args[0] == "list" && args[1] == "set" && args[4] == "blocklist_v4")
            .returning(|_, _| Ok(CommandOutput::ok("elements = { 1.2.3.4 }")));
        mock.expect_execute()
            .withf(|_, args| args[0] == "list" && args[1] == "set" && args[4] == "blocklist_v6")
            .returning(|_, _| Ok(CommandOutput::ok("elements = { 2001:db8::1 }")));

        let nets = backend(mock).list().await.unwrap();
        assert_eq!(nets, vec![net("1.2.3.4/32"), net("2001:db8::1/128")]);
    }

    #[test]
    fn test_is_available_probe() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| cmd == "nft" && args == ["--version"])
            .returning(|_, _| Ok(CommandOutput::ok("nftables v1.0.6")));
        assert!(backend(mock).is_available());
    }
}
