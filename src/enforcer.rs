//! Connection-Limit Enforcement
//!
//! [`LimitEnforcer::run_cycle`] is the periodic sweep: load every active
//! account carrying a connection limit, group by host, count live sessions,
//! and block accounts over their limit. Cycles are single-flight — a
//! trigger that fires while a cycle is still running is skipped without
//! opening a single session. One unreachable host never stops the sweep;
//! its accounts are picked up again next cycle.
//!
//! [`Scheduler`] drives the sweep on a fixed interval. Settings are read
//! once at `start()`; changing them requires an explicit `restart()`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::error::Result;
use crate::provision::AccountProvisioner;
use crate::registry::{Account, AccountRegistry, AccountStatus, FleetRegistry, Host};

/// What one enforcement cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    /// True when the trigger overlapped a running cycle and did nothing
    pub skipped: bool,
    /// Accounts whose connection count was checked
    pub checked: usize,
    /// Accounts blocked this cycle
    pub blocked: usize,
    /// Hosts that could not be processed
    pub host_failures: usize,
}

impl CycleReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Sweeps the fleet and blocks accounts exceeding their connection limit
pub struct LimitEnforcer {
    provisioner: AccountProvisioner,
    fleet: Arc<dyn FleetRegistry>,
    accounts: Arc<dyn AccountRegistry>,
    audit: Arc<dyn AuditSink>,
    /// Pause between hosts, to spread connection load across the fleet
    host_pause: Duration,
    running: AtomicBool,
    cycles: AtomicU64,
}

impl LimitEnforcer {
    pub fn new(
        provisioner: AccountProvisioner,
        fleet: Arc<dyn FleetRegistry>,
        accounts: Arc<dyn AccountRegistry>,
        audit: Arc<dyn AuditSink>,
        host_pause: Duration,
    ) -> Self {
        Self {
            provisioner,
            fleet,
            accounts,
            audit,
            host_pause,
            running: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
        }
    }

    /// Completed (non-skipped) cycles since construction
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Run one enforcement cycle. Returns a skipped report when a cycle is
    /// already in flight. The in-flight flag is released on every exit path,
    /// including cancellation of the driving task mid-cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("enforcement cycle already in flight, skipping trigger");
            return Ok(CycleReport::skipped());
        }

        // The guard clears the flag when this future is dropped, so an
        // aborted schedule cannot leave the enforcer permanently skipping.
        let _guard = FlagGuard(&self.running);
        let result = self.cycle_inner().await;
        if result.is_ok() {
            self.cycles.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn cycle_inner(&self) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        info!("enforcement cycle {} started", cycle_id);

        let working_set = self.accounts.active_with_limit().await?;
        let by_host = group_by_host(working_set);
        let host_count = by_host.len();

        let mut report = CycleReport::default();
        for (index, (host_id, group)) in by_host.into_iter().enumerate() {
            match self.fleet.host(host_id).await {
                Ok(Some(host)) => {
                    if !self.enforce_host(&host, &group, &mut report).await {
                        report.host_failures += 1;
                    }
                }
                Ok(None) => {
                    warn!("cycle {}: accounts reference unknown host id {}", cycle_id, host_id);
                    report.host_failures += 1;
                }
                Err(e) => {
                    warn!("cycle {}: host {} lookup failed: {}", cycle_id, host_id, e);
                    report.host_failures += 1;
                }
            }

            if index + 1 < host_count {
                tokio::time::sleep(self.host_pause).await;
            }
        }

        info!(
            "enforcement cycle {} finished: {} checked, {} blocked, {} host failures",
            cycle_id, report.checked, report.blocked, report.host_failures
        );
        Ok(report)
    }

    /// Enforce limits for every account in `group` on one host. Returns
    /// false when processing was abandoned, either because the host is
    /// unreachable or because a remote block failed partway through; the
    /// remaining accounts wait for the next cycle.
    async fn enforce_host(&self, host: &Host, group: &[Account], report: &mut CycleReport) -> bool {
        for account in group {
            // None never appears in the working set, but the type allows it.
            let limit = match account.connection_limit {
                Some(limit) => limit,
                None => continue,
            };

            let count = match self
                .provisioner
                .count_connections(host, &account.username)
                .await
            {
                Ok(count) => count,
                Err(e) => {
                    warn!("host {} unreachable, deferring its accounts: {}", host.name, e);
                    return false;
                }
            };
            report.checked += 1;

            if count > limit {
                if !self.block_account(host, account, count, limit).await {
                    return false;
                }
                report.blocked += 1;
            }
        }
        true
    }

    /// Block one over-limit account remotely, persist the new status, and
    /// audit the outcome. Returns false when the remote block failed; the
    /// caller then abandons this host for the rest of the cycle.
    async fn block_account(&self, host: &Host, account: &Account, count: u32, limit: u32) -> bool {
        let reason = format!("exceeded connection limit ({}/{})", count, limit);
        info!(
            "blocking {} on {}: {} connections, limit {}",
            account.username, host.name, count, limit
        );

        if let Err(e) = self.provisioner.block(host, &account.username).await {
            warn!(
                "failed to block {} on {}: {}",
                account.username, host.name, e
            );
            self.audit
                .record(AuditEvent::new(
                    "auto_block",
                    format!("block of {} failed: {}", account.username, e),
                    Some(host.id),
                    Some(account.id),
                    AuditOutcome::Failure,
                ))
                .await;
            return false;
        }

        // Remote succeeded; a failed status write leaves the stores
        // diverging until the next manual correction.
        if let Err(e) = self
            .accounts
            .set_status(account.id, AccountStatus::Blocked, Some(reason.clone()))
            .await
        {
            warn!(
                "{} blocked on {} but status write failed: {}",
                account.username, host.name, e
            );
        }

        self.audit
            .record(AuditEvent::new(
                "auto_block",
                format!("account {} blocked automatically: {}", account.username, reason),
                Some(host.id),
                Some(account.id),
                AuditOutcome::Success,
            ))
            .await;
        true
    }
}

/// Releases the single-flight flag on drop
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn group_by_host(accounts: Vec<Account>) -> BTreeMap<i64, Vec<Account>> {
    let mut by_host: BTreeMap<i64, Vec<Account>> = BTreeMap::new();
    for account in accounts {
        by_host.entry(account.host_id).or_default().push(account);
    }
    by_host
}

/// Scheduler settings, read once per `start()`
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub interval: Duration,
}

/// Owns the background task driving periodic enforcement cycles
pub struct Scheduler {
    enforcer: Arc<LimitEnforcer>,
    settings: Arc<RwLock<SchedulerSettings>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(enforcer: Arc<LimitEnforcer>, settings: SchedulerSettings) -> Self {
        Self {
            enforcer,
            settings: Arc::new(RwLock::new(settings)),
            task: Mutex::new(None),
        }
    }

    /// Replace the settings. Takes effect at the next `start()` or
    /// `restart()`; a running schedule is not touched.
    pub async fn set_settings(&self, settings: SchedulerSettings) {
        *self.settings.write().await = settings;
    }

    /// Start the periodic schedule. The first cycle runs one full interval
    /// after start, not immediately. A no-op when already running or when
    /// the schedule is disabled.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("scheduler already running");
            return;
        }

        let settings = *self.settings.read().await;
        if !settings.enabled {
            info!("limit enforcement schedule disabled");
            return;
        }

        info!(
            "limit enforcement scheduled every {}s",
            settings.interval.as_secs()
        );
        let enforcer = Arc::clone(&self.enforcer);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(settings.interval);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = enforcer.run_cycle().await {
                    warn!("scheduled enforcement cycle failed: {}", e);
                }
            }
        }));
    }

    /// Stop the schedule. A cycle in flight is cancelled at its next await
    /// point; dropping the cycle future releases the single-flight flag.
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            // Wait for the task to actually wind down so a cycle in flight
            // has released the single-flight flag before stop returns.
            let _ = task.await;
            info!("limit enforcement schedule stopped");
        }
    }

    /// Stop and start again, re-reading the settings.
    pub async fn restart(&self) {
        self.stop().await;
        self.start().await;
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }
}
