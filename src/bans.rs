//! Expiring ban table.
//!
//! Tracks addresses the monitor has blocked and when each block should be
//! lifted. The table only records decisions; the monitor performs the actual
//! unblock through the firewall backend.

use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::warn;

/// Blocked networks and their optional expiry.
#[derive(Debug, Clone, Default)]
pub struct BanTable {
    duration: Option<Duration>,
    entries: HashMap<IpNet, Option<Instant>>,
}

impl BanTable {
    /// `duration` of `None` (or zero) makes every ban permanent.
    pub fn new(duration: Option<Duration>) -> Self {
        Self {
            duration: duration.filter(|d| !d.is_zero()),
            entries: HashMap::new(),
        }
    }

    pub fn ban_duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Record a ban starting at `now`, using the table's duration.
    /// Returns the expiry, if any. A duration too large to represent makes
    /// the ban permanent.
    pub fn record(&mut self, net: IpNet, now: Instant) -> Option<Instant> {
        let expiry = self.duration.and_then(|d| {
            let at = now.checked_add(d);
            if at.is_none() {
                warn!(net = %net, duration = ?d, "Ban duration out of range, recording as permanent");
            }
            at
        });
        self.entries.insert(net, expiry);
        expiry
    }

    /// Record a ban that never expires.
    pub fn record_permanent(&mut self, net: IpNet) {
        self.entries.insert(net, None);
    }

    /// Put back an entry removed by [`take_expired`](Self::take_expired).
    pub fn restore(&mut self, net: IpNet, expiry: Option<Instant>) {
        self.entries.insert(net, expiry);
    }

    pub fn is_banned(&self, net: &IpNet) -> bool {
        self.entries.contains_key(net)
    }

    /// Whether `ip` falls inside any banned network.
    pub fn covers(&self, ip: &IpAddr) -> bool {
        self.entries.contains_key(&IpNet::from(*ip)) || self.entries.keys().any(|n| n.contains(ip))
    }

    /// Banned networks, sorted.
    pub fn networks(&self) -> Vec<IpNet> {
        let mut nets: Vec<IpNet> = self.entries.keys().copied().collect();
        nets.sort();
        nets
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every ban whose expiry is at or before `now`.
    pub fn take_expired(&mut self, now: Instant) -> Vec<(IpNet, Instant)> {
        let mut expired: Vec<(IpNet, Instant)> = self
            .entries
            .iter()
            .filter_map(|(net, expiry)| match expiry {
                Some(at) if *at <= now => Some((*net, *at)),
                _ => None,
            })
            .collect();

        for (net, _) in &expired {
            self.entries.remove(net);
        }

        expired.sort_by(|a, b| a.0.cmp(&b.0));
        expired
    }
}
