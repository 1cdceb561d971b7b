//! Allow-list matching.
//!
//! Entries are either exact addresses or CIDR subnets. Entries are parsed once
//! when the list is built; an entry that does not parse is logged and skipped.

use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowEntry {
    Exact(IpAddr),
    Subnet(IpNet),
}

impl AllowEntry {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.contains('/') {
            raw.parse().ok().map(AllowEntry::Subnet)
        } else {
            raw.parse().ok().map(AllowEntry::Exact)
        }
    }

    fn matches(&self, ip: IpAddr) -> bool {
        match self {
            AllowEntry::Exact(addr) => *addr == ip,
            AllowEntry::Subnet(net) => net.contains(&ip),
        }
    }

    fn covers(&self, net: &IpNet) -> bool {
        match self {
            AllowEntry::Exact(addr) => IpNet::from(*addr) == net.trunc(),
            AllowEntry::Subnet(allowed) => allowed.contains(net),
        }
    }
}

/// Addresses and subnets exempt from enforcement.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: Vec<AllowEntry>,
}

impl Allowlist {
    /// Build the list from raw configuration strings.
    pub fn new<S: AsRef<str>>(raw_entries: &[S]) -> Self {
        let entries = raw_entries
            .iter()
            .filter_map(|raw| {
                let raw = raw.as_ref();
                let entry = AllowEntry::parse(raw);
                if entry.is_none() {
                    warn!(entry = raw, "Invalid allowlist entry, skipping");
                }
                entry
            })
            .collect();

        Self { entries }
    }

    /// Number of usable entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `ip` matches any entry.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.entries.iter().any(|entry| entry.matches(ip))
    }

    /// Whether the textual address `candidate` is exempt.
    ///
    /// An address that does not parse is never exempt.
    pub fn is_exempt(&self, candidate: &str) -> bool {
        match candidate.trim().parse::<IpAddr>() {
            Ok(ip) => self.contains(ip),
            Err(_) => {
                warn!(ip = candidate, "Invalid IP address format");
                false
            }
        }
    }

    /// Whether the whole of `net` lies inside a single allow entry.
    pub fn covers(&self, net: &IpNet) -> bool {
        self.entries.iter().any(|entry| entry.covers(net))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Allowlist {
        Allowlist::new(&[
            "127.0.0.1",
            "192.168.0.0/16",
            "10.0.0.0/8",
            "::1",
            "2001:db8::/32",
        ])
    }

    #[test]
    fn test_exact_match() {
        let list = sample();
        assert!(list.is_exempt("127.0.0.1"));
        assert!(list.is_exempt("::1"));
    }

    #[test]
    fn test_subnet_match() {
        let list = sample();
        assert!(list.is_exempt("192.168.1.100"));
        assert!(list.is_exempt("10.0.0.1"));
        assert!(list.is_exempt("2001:db8::1"));
    }

    #[test]
    fn test_no_match() {
        let list = sample();
        assert!(!list.is_exempt("8.8.8.8"));
        assert!(!list.is_exempt("127.0.0.2"));
        assert!(!list.is_exempt("2001:4860:4860::8888"));
    }

    #[test]
    fn test_subnet_boundaries() {
        let list = Allowlist::new(&["10.0.0.0/8"]);
        assert!(list.is_exempt("10.1.2.3"));
        assert!(list.is_exempt("10.255.255.255"));
        assert!(!list.is_exempt("11.1.2.3"));
        assert!(!list.is_exempt("9.255.255.255"));
    }

    #[test]
    fn test_unparsable_candidate_fails_closed() {
        let list = Allowlist::new(&["0.0.0.0/0", "::/0"]);
        assert!(!list.is_exempt("not-an-ip"));
        assert!(!list.is_exempt(""));
        assert!(!list.is_exempt("300.1.1.1"));
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let list = Allowlist::new(&["garbage", "10.0.0.0/99", "1.2.3.4"]);
        assert_eq!(list.len(), 1);
        assert!(list.is_exempt("1.2.3.4"));
        assert!(!list.is_exempt("10.0.0.1"));
    }

    #[test]
    fn test_host_bits_in_subnet_entry() {
        let list = Allowlist::new(&["10.1.2.3/8"]);
        assert!(list.is_exempt("10.200.0.1"));
    }

    #[test]
    fn test_families_do_not_cross_match() {
        let list = Allowlist::new(&["0.0.0.0/0"]);
        assert!(!list.is_exempt("::1"));
    }

    #[test]
    fn test_empty_list() {
        let list = Allowlist::new::<&str>(&[]);
        assert!(list.is_empty());
        assert!(!list.is_exempt("127.0.0.1"));
    }

    #[test]
    fn test_covers() {
        let list = sample();
        assert!(list.covers(&"10.1.0.0/16".parse().unwrap()));
        assert!(list.covers(&"127.0.0.1/32".parse().unwrap()));
        assert!(!list.covers(&"10.0.0.0/7".parse().unwrap()));
        assert!(!list.covers(&"8.8.8.8/32".parse().unwrap()));
    }
}
