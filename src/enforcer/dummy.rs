//! No-op backend used when no firewall tool is present.

use anyhow::Result;
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::info;

use super::FirewallBackend;

/// Records blocks in memory and never touches the system firewall.
#[derive(Debug, Default)]
pub struct DummyBackend {
    blocked: Mutex<HashSet<IpNet>>,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FirewallBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn block(&self, net: &IpNet) -> Result<()> {
        info!(ip = %net, "[DUMMY] Would block address");
        self.blocked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(*net);
        Ok(())
    }

    async fn unblock(&self, net: &IpNet) -> Result<()> {
        info!(ip = %net, "[DUMMY] Would unblock address");
        self.blocked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(net);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<IpNet>> {
        let mut nets: Vec<IpNet> = self
            .blocked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect();
        nets.sort();
        Ok(nets)
    }
}
