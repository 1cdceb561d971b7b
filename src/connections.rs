//! Connection table reader.
//!
//! Parses the kernel's `/proc/net/tcp` and `/proc/net/tcp6` tables into a
//! per-remote-address connection count. Each table starts with a header line
//! followed by one fixed-column line per socket:
//!
//! ```text
//!   sl  local_address rem_address   st tx_queue rx_queue ...
//!    0: 0100007F:0277 0101A8C0:D2F0 01 00000000:00000000 ...
//! ```
//!
//! Addresses are hex-encoded in host (little-endian) byte order, one 32-bit
//! word for IPv4 and four 32-bit words for IPv6.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Connection tables read on Linux hosts.
pub const DEFAULT_SOURCES: &[&str] = &["/proc/net/tcp", "/proc/net/tcp6"];

const MIN_COLUMNS: usize = 3;
const LOCAL_ADDR_COLUMN: usize = 1;
const REMOTE_ADDR_COLUMN: usize = 2;

/// Per-address connection counts captured in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    counts: HashMap<IpAddr, u32>,
}

impl ConnectionSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more connection for `ip`.
    pub fn record(&mut self, ip: IpAddr) {
        let entry = self.counts.entry(ip).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    /// Connection count for `ip` (0 when absent).
    pub fn count(&self, ip: &IpAddr) -> u32 {
        self.counts.get(ip).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all connection counts.
    pub fn total_connections(&self) -> u64 {
        self.counts.values().map(|&c| u64::from(c)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IpAddr, &u32)> {
        self.counts.iter()
    }
}

impl FromIterator<(IpAddr, u32)> for ConnectionSnapshot {
    fn from_iter<I: IntoIterator<Item = (IpAddr, u32)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().collect(),
        }
    }
}

/// Per-table parsing statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Data lines seen (header excluded)
    pub lines: usize,
    /// Lines that contributed to the snapshot
    pub counted: usize,
    /// Malformed or undecodable lines
    pub skipped: usize,
    /// Well-formed lines excluded by the port filter
    pub filtered: usize,
}

/// Anything that can produce a connection snapshot for the monitor.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> ConnectionSnapshot;
}

/// Reads connection tables from procfs.
#[derive(Debug, Clone)]
pub struct ProcNetReader {
    sources: Vec<PathBuf>,
    ports: Vec<u16>,
}

impl ProcNetReader {
    /// Reader over the default IPv4 and IPv6 tables.
    ///
    /// An empty `ports` list counts connections on every local port.
    pub fn new(ports: Vec<u16>) -> Self {
        Self::with_sources(DEFAULT_SOURCES.iter().map(PathBuf::from).collect(), ports)
    }

    pub fn with_sources(sources: Vec<PathBuf>, ports: Vec<u16>) -> Self {
        Self { sources, ports }
    }

    /// Read every source into one snapshot.
    ///
    /// A source that cannot be opened or read is logged and skipped; when all
    /// sources fail the snapshot is simply empty.
    pub fn read_snapshot(&self) -> ConnectionSnapshot {
        let mut snapshot = ConnectionSnapshot::new();

        for path in &self.sources {
            let file = match File::open(path) {
                Ok(f) => f,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Failed to open connection table");
                    continue;
                }
            };

            match parse_table(BufReader::new(file), &self.ports, &mut snapshot) {
                Ok(stats) => debug!(
                    file = %path.display(),
                    lines = stats.lines,
                    counted = stats.counted,
                    skipped = stats.skipped,
                    filtered = stats.filtered,
                    "Processed connection table"
                ),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Failed to read connection table")
                }
            }
        }

        snapshot
    }
}

impl SnapshotSource for ProcNetReader {
    fn snapshot(&self) -> ConnectionSnapshot {
        self.read_snapshot()
    }
}

/// Parse one connection table into `snapshot`.
///
/// The first line is the header and is skipped. Data lines with fewer than
/// three columns, or whose remote address cannot be decoded, are skipped.
/// When `ports` is non-empty only sockets whose local port is listed count.
pub fn parse_table<R: BufRead>(
    reader: R,
    ports: &[u16],
    snapshot: &mut ConnectionSnapshot,
) -> io::Result<TableStats> {
    let mut stats = TableStats::default();
    let mut lines = reader.split(b'\n');

    match lines.next() {
        Some(header) => {
            header?;
        }
        None => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "missing header line",
            ))
        }
    }

    for (idx, raw) in lines.enumerate() {
        let raw = raw?;
        let line_no = idx + 1;
        stats.lines += 1;

        let Ok(line) = std::str::from_utf8(&raw) else {
            debug!(line = line_no, "Skipping line with invalid UTF-8");
            stats.skipped += 1;
            continue;
        };
        let line = line.strip_suffix('\r').unwrap_or(line);

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < MIN_COLUMNS {
            debug!(line = line_no, content = %line, "Skipping malformed line");
            stats.skipped += 1;
            continue;
        }

        if !ports.is_empty() {
            match split_endpoint(fields[LOCAL_ADDR_COLUMN]).and_then(|(_, p)| decode_hex_port(p)) {
                Some(port) if ports.contains(&port) => {}
                Some(_) => {
                    stats.filtered += 1;
                    continue;
                }
                None => {
                    debug!(line = line_no, address = fields[LOCAL_ADDR_COLUMN], "Invalid local address format");
                    stats.skipped += 1;
                    continue;
                }
            }
        }

        let remote = fields[REMOTE_ADDR_COLUMN];
        let Some((addr_hex, _)) = split_endpoint(remote) else {
            debug!(line = line_no, address = remote, "Invalid remote address format");
            stats.skipped += 1;
            continue;
        };

        match decode_hex_addr(addr_hex) {
            Some(ip) => {
                snapshot.record(ip);
                stats.counted += 1;
            }
            None => {
                debug!(line = line_no, hex = addr_hex, "Failed to decode remote address");
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}

/// Split `HEXADDR:HEXPORT` into its two halves.
fn split_endpoint(token: &str) -> Option<(&str, &str)> {
    let mut parts = token.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(addr), Some(port), None) => Some((addr, port)),
        _ => None,
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn decode_hex_port(hex: &str) -> Option<u16> {
    if !is_hex(hex) || hex.len() > 4 {
        return None;
    }
    u16::from_str_radix(hex, 16).ok()
}

fn decode_word(hex: &str) -> Option<[u8; 4]> {
    u32::from_str_radix(hex, 16).ok().map(u32::to_le_bytes)
}

/// Decode a procfs hex address.
///
/// 8 hex chars decode to IPv4, 32 to IPv6. IPv4-mapped IPv6 addresses are
/// returned as plain IPv4 so both tables agree on one textual form.
pub fn decode_hex_addr(hex: &str) -> Option<IpAddr> {
    if !is_hex(hex) {
        return None;
    }

    match hex.len() {
        8 => decode_word(hex).map(|b| IpAddr::V4(Ipv4Addr::from(b))),
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                chunk.copy_from_slice(&decode_word(&hex[i * 8..(i + 1) * 8])?);
            }
            let v6 = Ipv6Addr::from(octets);
            Some(match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            })
        }
        _ => None,
    }
}
