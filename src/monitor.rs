//! Monitoring loop: read connections, detect floods, enforce bans.
//!
//! Each cycle runs in a fixed order:
//!
//! 1. Lift bans whose duration has elapsed (failed unblocks are retried next cycle)
//! 2. Read a connection snapshot; an empty snapshot ends the cycle
//! 3. Run the detector over the snapshot
//! 4. For every violation: skip allowlisted and already-banned addresses,
//!    log-only in monitor mode, otherwise block through the backend
//!
//! A cycle in which any block failed returns [`FloodguardError::BlockFailed`]
//! after every violation has been processed. The run loop logs that error and
//! keeps going.

use anyhow::Result;
use ipnet::IpNet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::allowlist::Allowlist;
use crate::bans::BanTable;
use crate::clock::{Clock, SystemClock};
use crate::config::{BanMode, Config};
use crate::connections::{ProcNetReader, SnapshotSource};
use crate::detector::Detector;
use crate::enforcer::FirewallBackend;
use crate::error::FloodguardError;
use crate::signal::ShutdownToken;
use crate::validation::validate_ip_or_cidr;

/// Outcome counts for one detection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Distinct remote addresses in the snapshot
    pub addresses: usize,
    /// Addresses flagged by the detector
    pub violations: usize,
    pub blocked: usize,
    pub whitelisted: usize,
    pub already_blocked: usize,
    /// Flagged but left alone because the ban mode is `monitor`
    pub observed: usize,
    pub failed: usize,
    /// Expired bans lifted at the start of the cycle
    pub unblocked: usize,
    pub unblock_failed: usize,
}

impl CycleReport {
    /// `Err(BlockFailed)` if any block attempt failed.
    pub fn into_result(self) -> Result<CycleReport> {
        if self.failed > 0 {
            return Err(FloodguardError::BlockFailed {
                failed: self.failed,
                total: self.violations,
            }
            .into());
        }
        Ok(self)
    }
}

/// Outcome of applying the denylist at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DenylistReport {
    pub blocked: usize,
    /// Invalid entries and entries covered by the allowlist
    pub skipped: usize,
    pub failed: usize,
}

/// Detection and enforcement loop.
pub struct Monitor {
    source: Box<dyn SnapshotSource>,
    detector: Detector,
    allowlist: Allowlist,
    backend: Arc<dyn FirewallBackend>,
    bans: Mutex<BanTable>,
    mode: BanMode,
    interval: Duration,
    denylist: Vec<String>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownToken,
}

impl Monitor {
    /// Monitor reading the kernel connection tables with the system clock.
    pub fn new(config: &Config, backend: Arc<dyn FirewallBackend>, shutdown: ShutdownToken) -> Self {
        let source = Box::new(ProcNetReader::new(config.monitor.ports.clone()));
        Self::with_parts(config, source, backend, Arc::new(SystemClock), shutdown)
    }

    /// Monitor with an explicit snapshot source and clock.
    pub fn with_parts(
        config: &Config,
        source: Box<dyn SnapshotSource>,
        backend: Arc<dyn FirewallBackend>,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            source,
            detector: Detector::with_clock(config.thresholds(), clock.clone()),
            allowlist: Allowlist::new(&config.allowlist),
            backend,
            bans: Mutex::new(BanTable::new(config.ban_duration())),
            mode: config.ban.mode,
            interval: config.poll_interval(),
            denylist: config.denylist.clone(),
            clock,
            shutdown,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Networks this monitor currently holds a ban for.
    pub fn banned(&self) -> Vec<IpNet> {
        self.lock_bans().networks()
    }

    /// Request the run loop to stop after the current cycle.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    fn lock_bans(&self) -> MutexGuard<'_, BanTable> {
        self.bans.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block every denylist entry permanently.
    ///
    /// Entries the allowlist fully covers are skipped. Failures are logged
    /// and counted, never fatal.
    pub async fn apply_denylist(&self) -> DenylistReport {
        let mut report = DenylistReport::default();

        for entry in &self.denylist {
            let net = match validate_ip_or_cidr(entry) {
                Ok(net) => net.trunc(),
                Err(e) => {
                    warn!(entry = %entry, "Skipping invalid denylist entry: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };

            if self.allowlist.covers(&net) {
                warn!(entry = %net, "Denylist entry is covered by the allowlist, not blocking");
                report.skipped += 1;
                continue;
            }

            match self.backend.block(&net).await {
                Ok(()) => {
                    info!(ip = %net, "Blocked denylisted address");
                    self.lock_bans().record_permanent(net);
                    report.blocked += 1;
                }
                Err(e) => {
                    error!(ip = %net, error = %e, "Failed to block denylisted address");
                    report.failed += 1;
                }
            }
        }

        if !self.denylist.is_empty() {
            info!(
                blocked = report.blocked,
                skipped = report.skipped,
                failed = report.failed,
                "Denylist applied"
            );
        }
        report
    }

    /// Unblock bans whose duration has elapsed.
    async fn expire_bans(&self, report: &mut CycleReport) {
        let now = self.clock.now();
        let expired = self.lock_bans().take_expired(now);

        for (net, expiry) in expired {
            match self.backend.unblock(&net).await {
                Ok(()) => {
                    info!(ip = %net, "Ban expired, address unblocked");
                    report.unblocked += 1;
                }
                Err(e) => {
                    // Removed out of band (e.g. `floodguard unblock`)
                    if let Ok(current) = self.backend.list().await {
                        if !current.contains(&net) {
                            info!(ip = %net, "Expired ban no longer present in firewall, dropping");
                            report.unblocked += 1;
                            continue;
                        }
                    }
                    warn!(ip = %net, error = %e, "Failed to unblock expired ban, will retry");
                    self.lock_bans().restore(net, Some(expiry));
                    report.unblock_failed += 1;
                }
            }
        }
    }

    /// Run one cycle and return its counts, including failed blocks.
    pub async fn run_cycle_report(&self) -> CycleReport {
        let mut report = CycleReport::default();

        self.expire_bans(&mut report).await;

        let snapshot = self.source.snapshot();
        if snapshot.is_empty() {
            debug!("No connections found to analyze");
            return report;
        }
        report.addresses = snapshot.len();
        debug!(
            addresses = snapshot.len(),
            connections = snapshot.total_connections(),
            "Analyzing connections"
        );

        let violations = self.detector.analyze(snapshot);
        report.violations = violations.len();
        if violations.is_empty() {
            debug!("No flooding addresses detected");
            return report;
        }

        for violation in violations {
            let ip = violation.ip;

            if self.allowlist.contains(ip) {
                info!(ip = %ip, count = violation.count, trigger = %violation.trigger, "Address is allowlisted, skipping");
                report.whitelisted += 1;
                continue;
            }

            if self.lock_bans().covers(&ip) {
                debug!(ip = %ip, "Address already blocked");
                report.already_blocked += 1;
                continue;
            }

            if self.mode == BanMode::Monitor {
                warn!(ip = %ip, count = violation.count, trigger = %violation.trigger, "Flood detected (monitor mode, not blocking)");
                report.observed += 1;
                continue;
            }

            warn!(ip = %ip, count = violation.count, trigger = %violation.trigger, "Blocking flooding address");
            let net = IpNet::from(ip);
            match self.backend.block(&net).await {
                Ok(()) => {
                    let expiry = self.lock_bans().record(net, self.clock.now());
                    info!(ip = %ip, permanent = expiry.is_none(), "Address blocked");
                    report.blocked += 1;
                }
                Err(e) => {
                    error!(ip = %ip, error = %e, "Failed to block address");
                    report.failed += 1;
                }
            }
        }

        info!(
            violations = report.violations,
            blocked = report.blocked,
            whitelisted = report.whitelisted,
            already_blocked = report.already_blocked,
            observed = report.observed,
            failed = report.failed,
            "Check completed"
        );
        report
    }

    /// Run one cycle. Fails with `BlockFailed` when any block failed.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_report().await.into_result()
    }

    /// Apply the denylist, then run cycles until shutdown is requested.
    ///
    /// Shutdown is only observed between cycles.
    pub async fn run(&self) -> Result<()> {
        info!(
            backend = self.backend.name(),
            interval = ?self.interval,
            mode = ?self.mode,
            allowlist = self.allowlist.len(),
            "Starting monitor"
        );

        self.apply_denylist().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Monitor stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("Check cycle failed: {:#}", e);
                    }
                }
            }
        }
    }
}
