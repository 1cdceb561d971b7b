//! Firewall enforcement backends (nftables, iptables, no-op).

mod dummy;
mod iptables;
mod nftables;

use anyhow::Result;
use async_trait::async_trait;
use ipnet::IpNet;
use std::sync::Arc;
use tracing::{info, warn};

pub use dummy::DummyBackend;
pub use iptables::IptablesBackend;
pub use nftables::NftablesBackend;

use crate::cmd_abstraction::{CommandExecutor, RealCommandExecutor};
use crate::config::Backend;
use crate::error::FloodguardError;

/// Trait for firewall backends
#[async_trait]
pub trait FirewallBackend: Send + Sync {
    /// Short backend name for logs and status output
    fn name(&self) -> &'static str;

    /// Whether the underlying tool answers a version probe with exit status zero
    fn is_available(&self) -> bool;

    /// Drop traffic from `net`. Safe to call repeatedly for the same network.
    async fn block(&self, net: &IpNet) -> Result<()>;

    /// Remove the drop rule for `net`
    async fn unblock(&self, net: &IpNet) -> Result<()>;

    /// Networks currently blocked, as reported by the backend's own listing.
    /// Entries the backend cannot parse are skipped.
    async fn list(&self) -> Result<Vec<IpNet>>;
}

/// Select a backend using the real system commands.
pub fn select_backend(backend: Backend) -> Result<Arc<dyn FirewallBackend>> {
    select_backend_with(backend, Arc::new(RealCommandExecutor::new()))
}

/// Select a backend, probing tools through `executor`.
///
/// `Backend::Auto` probes nftables, then iptables, and falls back to the
/// no-op backend when neither tool is present. An explicitly configured
/// backend that is not available is an error.
pub fn select_backend_with<E: CommandExecutor + 'static>(
    backend: Backend,
    executor: Arc<E>,
) -> Result<Arc<dyn FirewallBackend>> {
    let nft = NftablesBackend::with_executor(executor.clone());
    let ipt = IptablesBackend::with_executor(executor);

    match backend {
        Backend::Auto => {
            if nft.is_available() {
                info!(backend = nft.name(), "Using nftables backend");
                return Ok(Arc::new(nft));
            }
            if ipt.is_available() {
                info!(backend = ipt.name(), "Using iptables backend");
                return Ok(Arc::new(ipt));
            }
            warn!("No firewall backend available, using dummy");
            Ok(Arc::new(DummyBackend::new()))
        }
        Backend::Nftables => require_available(nft),
        Backend::Iptables => require_available(ipt),
        Backend::Dummy => {
            warn!("Dummy backend selected, addresses will not actually be blocked");
            Ok(Arc::new(DummyBackend::new()))
        }
    }
}

fn require_available<B: FirewallBackend + 'static>(backend: B) -> Result<Arc<dyn FirewallBackend>> {
    if !backend.is_available() {
        return Err(FloodguardError::BackendNotAvailable(format!(
            "{} was requested but its command-line tool is not usable",
            backend.name()
        ))
        .into());
    }
    info!(backend = backend.name(), "Using configured firewall backend");
    Ok(Arc::new(backend))
}

/// Check if running as root (effective UID == 0)
///
/// Manipulating firewall rules needs CAP_NET_ADMIN; UID 0 covers the common
/// case of running under sudo or as a system service.
pub fn check_root() -> Result<()> {
    // SAFETY: geteuid() has no preconditions, never fails and does not modify state.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        return Err(FloodguardError::Permission(
            "this operation requires root privileges (or CAP_NET_ADMIN). Please run with sudo."
                .to_string(),
        )
        .into());
    }
    Ok(())
}

/// Render a network the way firewall tools print it: bare address for host
/// networks, truncated CIDR otherwise.
pub(crate) fn render_net(net: &IpNet) -> String {
    if net.prefix_len() == net.max_prefix_len() {
        net.addr().to_string()
    } else {
        net.trunc().to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_abstraction::{CommandOutput, MockCommandExecutor};

    fn executor_with(nft: bool, iptables: bool) -> Arc<MockCommandExecutor> {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| cmd == "nft" && args == ["--version".to_string()])
            .returning(move |_, _| {
                if nft {
                    Ok(CommandOutput::ok("nftables v1.0.6"))
                } else {
                    Err(anyhow::anyhow!("No such file or directory"))
                }
            });
        mock.expect_execute()
            .withf(|cmd, args| cmd == "iptables" && args == ["--version".to_string()])
            .returning(move |_, _| {
                if iptables {
                    Ok(CommandOutput::ok("iptables v1.8.9 (legacy)"))
                } else {
                    Ok(CommandOutput::failed("iptables: not supported"))
                }
            });
        Arc::new(mock)
    }

    #[test]
    fn test_auto_prefers_nftables() {
        let backend = select_backend_with(Backend::Auto, executor_with(true, true)).unwrap();
        assert_eq!(backend.name(), "nftables");
    }

    #[test]
    fn test_auto_falls_back_to_iptables() {
        let backend = select_backend_with(Backend::Auto, executor_with(false, true)).unwrap();
        assert_eq!(backend.name(), "iptables");
    }

    #[test]
    fn test_auto_falls_back_to_dummy() {
        let backend = select_backend_with(Backend::Auto, executor_with(false, false)).unwrap();
        assert_eq!(backend.name(), "dummy");
    }

    #[test]
    fn test_explicit_unavailable_backend_is_error() {
        let result = select_backend_with(Backend::Nftables, executor_with(false, true));
        let err = result.err().unwrap();
        assert!(err.to_string().contains("Backend not available"));
    }

    #[test]
    fn test_explicit_available_backend() {
        let backend = select_backend_with(Backend::Iptables, executor_with(true, true)).unwrap();
        assert_eq!(backend.name(), "iptables");
    }

    #[test]
    fn test_explicit_dummy_needs_no_probe() {
        let backend =
            select_backend_with(Backend::Dummy, Arc::new(MockCommandExecutor::new())).unwrap();
        assert_eq!(backend.name(), "dummy");
    }

    #[test]
    fn test_render_net() {
        assert_eq!(render_net(&"1.2.3.4/32".parse().unwrap()), "1.2.3.4");
        assert_eq!(render_net(&"10.1.2.3/8".parse().unwrap()), "10.0.0.0/8");
        assert_eq!(render_net(&"2001:db8::1/128".parse().unwrap()), "2001:db8::1");
    }

    #[tokio::test]
    async fn test_mock_backend_failures() {
        let backend = mock::MockBackend::failing_block(&["1.2.3.4/32"]);
        assert!(backend.block(&"1.2.3.4/32".parse().unwrap()).await.is_err());
        assert!(backend.block(&"5.6.7.8/32".parse().unwrap()).await.is_ok());
        assert_eq!(backend.list().await.unwrap().len(), 1);
    }
}
