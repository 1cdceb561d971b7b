//! Connection-count and connection-rate detection.
//!
//! The detector compares each new snapshot against the one from the previous
//! cycle. An address is flagged when its current connection count exceeds
//! `max_connections`, or when its count grew faster than `max_rate`
//! connections per second since the previous cycle.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::connections::ConnectionSnapshot;

/// Shortest interval over which a rate is considered meaningful.
pub const DEFAULT_MIN_RATE_INTERVAL: Duration = Duration::from_secs(1);

/// Detection thresholds. A zero threshold disables its check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Max simultaneous connections per address
    pub max_connections: u32,
    /// Max new connections per second per address
    pub max_rate: u32,
    /// Rate check is skipped when cycles are closer together than this
    pub min_rate_interval: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_rate: 50,
            min_rate_interval: DEFAULT_MIN_RATE_INTERVAL,
        }
    }
}

/// Which check flagged an address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    Connections { count: u32, threshold: u32 },
    Rate { rate: f64, threshold: u32 },
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Connections { count, threshold } => {
                write!(f, "connections {} > {}", count, threshold)
            }
            Trigger::Rate { rate, threshold } => {
                write!(f, "rate {:.1}/s > {}/s", rate, threshold)
            }
        }
    }
}

/// An address that crossed a threshold this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    pub ip: IpAddr,
    /// Current connection count for `ip`
    pub count: u32,
    pub trigger: Trigger,
}

#[derive(Debug)]
struct PreviousCycle {
    counts: ConnectionSnapshot,
    at: Instant,
}

/// Stateful threshold detector.
pub struct Detector {
    thresholds: Thresholds,
    clock: Arc<dyn Clock>,
    state: Mutex<Option<PreviousCycle>>,
}

impl Detector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self::with_clock(thresholds, Arc::new(SystemClock))
    }

    pub fn with_clock(thresholds: Thresholds, clock: Arc<dyn Clock>) -> Self {
        Self {
            thresholds,
            clock,
            state: Mutex::new(None),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<PreviousCycle>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Analyze a new snapshot and return the addresses that violate a
    /// threshold, sorted by address. The snapshot becomes the baseline for
    /// the next call.
    pub fn analyze(&self, snapshot: ConnectionSnapshot) -> Vec<Violation> {
        let mut state = self.lock_state();
        let now = self.clock.now();
        let Thresholds {
            max_connections,
            max_rate,
            min_rate_interval,
        } = self.thresholds;

        // Rate baseline: previous counts and elapsed seconds, if usable this cycle
        let baseline = match state.as_ref() {
            Some(prev) if max_rate > 0 => {
                let elapsed = now.saturating_duration_since(prev.at);
                if elapsed >= min_rate_interval && !elapsed.is_zero() {
                    Some((&prev.counts, elapsed.as_secs_f64()))
                } else {
                    debug!(
                        elapsed = ?elapsed,
                        min = ?min_rate_interval,
                        "Interval too short, skipping rate check"
                    );
                    None
                }
            }
            _ => None,
        };

        let mut violations = Vec::new();

        for (&ip, &count) in snapshot.iter() {
            if max_connections > 0 && count > max_connections {
                warn!(
                    ip = %ip,
                    connections = count,
                    threshold = max_connections,
                    "Detected excessive connections"
                );
                violations.push(Violation {
                    ip,
                    count,
                    trigger: Trigger::Connections {
                        count,
                        threshold: max_connections,
                    },
                });
                continue;
            }

            if let Some((previous, elapsed_secs)) = baseline {
                let delta = i64::from(count) - i64::from(previous.count(&ip));
                if delta > 0 {
                    let rate = delta as f64 / elapsed_secs;
                    if rate > f64::from(max_rate) {
                        warn!(
                            ip = %ip,
                            rate = rate,
                            delta = delta,
                            threshold = max_rate,
                            "Detected excessive connection rate"
                        );
                        violations.push(Violation {
                            ip,
                            count,
                            trigger: Trigger::Rate {
                                rate,
                                threshold: max_rate,
                            },
                        });
                    }
                }
            }
        }

        violations.sort_by(|a, b| a.ip.cmp(&b.ip));

        *state = Some(PreviousCycle {
            counts: snapshot,
            at: now,
        });

        violations
    }

    /// Number of addresses in the stored baseline.
    pub fn tracked_addresses(&self) -> usize {
        self.lock_state().as_ref().map_or(0, |prev| prev.counts.len())
    }

    /// Baseline count for `ip`, if a previous cycle exists.
    pub fn previous_count(&self, ip: &IpAddr) -> Option<u32> {
        self.lock_state().as_ref().map(|prev| prev.counts.count(ip))
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("thresholds", &self.thresholds)
            .field("tracked_addresses", &self.tracked_addresses())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn snap(entries: &[(&str, u32)]) -> ConnectionSnapshot {
        entries.iter().map(|(a, c)| (ip(a), *c)).collect()
    }

    fn detector(max_connections: u32, max_rate: u32) -> (Detector, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let thresholds = Thresholds {
            max_connections,
            max_rate,
            min_rate_interval: DEFAULT_MIN_RATE_INTERVAL,
        };
        (Detector::with_clock(thresholds, clock.clone()), clock)
    }

    fn flagged(violations: &[Violation]) -> Vec<IpAddr> {
        violations.iter().map(|v| v.ip).collect()
    }

    #[test]
    fn test_connection_threshold() {
        let (d, _) = detector(100, 0);
        let result = d.analyze(snap(&[("1.2.3.4", 150), ("5.6.7.8", 50)]));
        assert_eq!(flagged(&result), vec![ip("1.2.3.4")]);
        assert_eq!(
            result[0].trigger,
            Trigger::Connections {
                count: 150,
                threshold: 100
            }
        );
    }

    #[test]
    fn test_count_equal_to_threshold_not_flagged() {
        let (d, _) = detector(100, 0);
        assert!(d.analyze(snap(&[("1.2.3.4", 100)])).is_empty());
    }

    #[test]
    fn test_connection_threshold_zero_disables() {
        let (d, _) = detector(0, 0);
        assert!(d.analyze(snap(&[("1.2.3.4", 1_000_000)])).is_empty());
    }

    #[test]
    fn test_first_run_no_rate() {
        let (d, _) = detector(1000, 10);
        assert!(d.analyze(snap(&[("1.2.3.4", 500)])).is_empty());
    }

    #[test]
    fn test_rate_threshold() {
        let (d, clock) = detector(10_000, 50);
        assert!(d.analyze(snap(&[("1.2.3.4", 100)])).is_empty());

        clock.advance(Duration::from_secs(2));
        let result = d.analyze(snap(&[("1.2.3.4", 300)]));
        assert_eq!(flagged(&result), vec![ip("1.2.3.4")]);
        match result[0].trigger {
            Trigger::Rate { rate, threshold } => {
                assert!((rate - 100.0).abs() < f64::EPSILON);
                assert_eq!(threshold, 50);
            }
            other => panic!("unexpected trigger {:?}", other),
        }
    }

    #[test]
    fn test_rate_at_threshold_not_flagged() {
        let (d, clock) = detector(10_000, 50);
        d.analyze(snap(&[("1.2.3.4", 100)]));
        clock.advance(Duration::from_secs(2));
        assert!(d.analyze(snap(&[("1.2.3.4", 200)])).is_empty());
    }

    #[test]
    fn test_new_address_uses_zero_baseline() {
        let (d, clock) = detector(10_000, 50);
        d.analyze(snap(&[("1.2.3.4", 1)]));
        clock.advance(Duration::from_secs(2));
        let result = d.analyze(snap(&[("1.2.3.4", 1), ("5.6.7.8", 120)]));
        assert_eq!(flagged(&result), vec![ip("5.6.7.8")]);
    }

    #[test]
    fn test_rate_disabled() {
        let (d, clock) = detector(10_000, 0);
        d.analyze(snap(&[("1.2.3.4", 0)]));
        clock.advance(Duration::from_secs(1));
        assert!(d.analyze(snap(&[("1.2.3.4", 9999)])).is_empty());
    }

    #[test]
    fn test_negative_delta() {
        let (d, clock) = detector(10_000, 10);
        d.analyze(snap(&[("1.2.3.4", 500)]));
        clock.advance(Duration::from_secs(2));
        assert!(d.analyze(snap(&[("1.2.3.4", 100)])).is_empty());
    }

    #[test]
    fn test_unchanged_count_never_rate_flagged() {
        let (d, clock) = detector(10_000, 1);
        d.analyze(snap(&[("1.2.3.4", 5000)]));
        clock.advance(Duration::from_secs(5));
        assert!(d.analyze(snap(&[("1.2.3.4", 5000)])).is_empty());
    }

    #[test]
    fn test_interval_too_short() {
        let (d, clock) = detector(10_000, 1);
        d.analyze(snap(&[("1.2.3.4", 0)]));
        clock.advance(Duration::from_millis(999));
        assert!(d.analyze(snap(&[("1.2.3.4", 9999), ("5.6.7.8", 9999)])).is_empty());
    }

    #[test]
    fn test_interval_exactly_minimum_is_eligible() {
        let (d, clock) = detector(10_000, 1);
        d.analyze(snap(&[("1.2.3.4", 0)]));
        clock.advance(Duration::from_secs(1));
        assert_eq!(d.analyze(snap(&[("1.2.3.4", 10)])).len(), 1);
    }

    #[test]
    fn test_configurable_min_interval() {
        let clock = Arc::new(ManualClock::new());
        let d = Detector::with_clock(
            Thresholds {
                max_connections: 0,
                max_rate: 1,
                min_rate_interval: Duration::from_secs(5),
            },
            clock.clone(),
        );
        d.analyze(snap(&[("1.2.3.4", 0)]));
        clock.advance(Duration::from_secs(3));
        assert!(d.analyze(snap(&[("1.2.3.4", 100)])).is_empty());
        clock.advance(Duration::from_secs(5));
        assert_eq!(d.analyze(snap(&[("1.2.3.4", 200)])).len(), 1);
    }

    #[test]
    fn test_huge_min_interval_skips_rate_check() {
        let clock = Arc::new(ManualClock::new());
        let d = Detector::with_clock(
            Thresholds {
                max_connections: 0,
                max_rate: 1,
                min_rate_interval: Duration::MAX,
            },
            clock.clone(),
        );
        d.analyze(snap(&[("1.2.3.4", 0)]));
        clock.advance(Duration::from_secs(3600));
        assert!(d.analyze(snap(&[("1.2.3.4", 100_000)])).is_empty());
    }

    #[test]
    fn test_both_thresholds_reported_once() {
        let (d, clock) = detector(50, 10);
        d.analyze(snap(&[("1.2.3.4", 0)]));
        clock.advance(Duration::from_secs(2));
        let result = d.analyze(snap(&[("1.2.3.4", 200)]));
        assert_eq!(result.len(), 1);
        assert!(matches!(result[0].trigger, Trigger::Connections { .. }));
    }

    #[test]
    fn test_state_replaced_after_analyze() {
        let (d, clock) = detector(10_000, 10);
        assert_eq!(d.previous_count(&ip("1.2.3.4")), None);

        d.analyze(snap(&[("1.2.3.4", 10), ("5.6.7.8", 3)]));
        assert_eq!(d.tracked_addresses(), 2);
        assert_eq!(d.previous_count(&ip("1.2.3.4")), Some(10));

        clock.advance(Duration::from_secs(2));
        d.analyze(snap(&[("1.2.3.4", 12)]));
        assert_eq!(d.tracked_addresses(), 1);
        assert_eq!(d.previous_count(&ip("1.2.3.4")), Some(12));
        assert_eq!(d.previous_count(&ip("5.6.7.8")), Some(0));
    }

    #[test]
    fn test_dropped_address_restarts_from_zero() {
        let (d, clock) = detector(10_000, 50);
        d.analyze(snap(&[("1.2.3.4", 400)]));
        clock.advance(Duration::from_secs(2));
        d.analyze(snap(&[]));
        clock.advance(Duration::from_secs(2));
        let result = d.analyze(snap(&[("1.2.3.4", 400)]));
        assert_eq!(flagged(&result), vec![ip("1.2.3.4")]);
    }

    #[test]
    fn test_results_sorted() {
        let (d, _) = detector(1, 0);
        let result = d.analyze(snap(&[("9.9.9.9", 5), ("1.1.1.1", 5), ("5.5.5.5", 5)]));
        assert_eq!(
            flagged(&result),
            vec![ip("1.1.1.1"), ip("5.5.5.5"), ip("9.9.9.9")]
        );
    }

    #[test]
    fn test_trigger_display() {
        let t = Trigger::Connections {
            count: 150,
            threshold: 100,
        };
        assert_eq!(t.to_string(), "connections 150 > 100");
        let t = Trigger::Rate {
            rate: 100.0,
            threshold: 50,
        };
        assert_eq!(t.to_string(), "rate 100.0/s > 50/s");
    }
}
