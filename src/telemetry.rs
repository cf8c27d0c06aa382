//! Host Telemetry
//!
//! One session, five independent read-only probes, one snapshot. Probe
//! parsing is deliberately forgiving: each probe is parsed in isolation and
//! a failure substitutes a safe default instead of aborting the snapshot.
//! A failed connection is reported as data (`status = "error"`), never as
//! an error to the caller — a dashboard fanning out over the fleet must
//! render unreachable hosts, not crash on them.

use serde::Serialize;
use tracing::warn;

use crate::command;
use crate::registry::Host;
use crate::session::{SessionHandle, SessionManager};

/// Aggregated telemetry for one host at one point in time
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HostSnapshot {
    pub host_id: i64,
    pub host_name: String,
    pub status: String,
    pub cpu_usage: f64,
    pub ram_usage: f64,
    pub ram_total_mb: f64,
    pub ram_used_mb: f64,
    pub disk_usage: f64,
    pub disk_total: String,
    pub disk_used: String,
    pub uptime: String,
    pub ports: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostSnapshot {
    fn empty(host: &Host, status: &str) -> Self {
        Self {
            host_id: host.id,
            host_name: host.name.clone(),
            status: status.to_string(),
            cpu_usage: 0.0,
            ram_usage: 0.0,
            ram_total_mb: 0.0,
            ram_used_mb: 0.0,
            disk_usage: 0.0,
            disk_total: "0G".to_string(),
            disk_used: "0G".to_string(),
            uptime: String::new(),
            ports: Vec::new(),
            error: None,
        }
    }

    fn error(host: &Host, message: String) -> Self {
        let mut snapshot = Self::empty(host, "error");
        snapshot.error = Some(message);
        snapshot
    }
}

/// Collects defensively-parsed host snapshots
#[derive(Clone)]
pub struct TelemetryCollector {
    sessions: SessionManager,
}

impl TelemetryCollector {
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }

    /// Probe `host` and assemble a snapshot. Never fails: connection and
    /// transport problems come back as an `error`-status snapshot.
    pub async fn system_info(&self, host: &Host) -> HostSnapshot {
        let session = match self.sessions.open(host).await {
            Ok(session) => session,
            Err(e) => {
                warn!("telemetry for {} unavailable: {}", host.name, e);
                return HostSnapshot::error(host, e.to_string());
            }
        };

        let snapshot = self.probe_all(session.as_ref(), host).await;
        session.close().await;
        snapshot
    }

    async fn probe_all(&self, session: &dyn SessionHandle, host: &Host) -> HostSnapshot {
        let mut snapshot = HostSnapshot::empty(host, "online");

        match self.probe(session, command::cpu_usage()).await {
            Ok(out) => snapshot.cpu_usage = parse_cpu(&out),
            Err(e) => return HostSnapshot::error(host, e),
        }

        match self.probe(session, command::memory_usage()).await {
            Ok(out) => {
                let (usage, total, used) = parse_memory(&out);
                snapshot.ram_usage = usage;
                snapshot.ram_total_mb = total;
                snapshot.ram_used_mb = used;
            }
            Err(e) => return HostSnapshot::error(host, e),
        }

        match self.probe(session, command::disk_usage()).await {
            Ok(out) => {
                let (usage, total, used) = parse_disk(&out);
                snapshot.disk_usage = usage;
                snapshot.disk_total = total;
                snapshot.disk_used = used;
            }
            Err(e) => return HostSnapshot::error(host, e),
        }

        match self.probe(session, command::uptime()).await {
            Ok(out) => snapshot.uptime = parse_uptime(&out),
            Err(e) => return HostSnapshot::error(host, e),
        }

        match self.probe(session, command::listening_ports()).await {
            Ok(out) => snapshot.ports = parse_ports(&out),
            Err(e) => return HostSnapshot::error(host, e),
        }

        snapshot
    }

    /// Run one probe; transport faults become the error string that turns
    /// the whole snapshot into an error snapshot. Command failures are not
    /// transport faults — the empty stdout simply parses to a default.
    async fn probe(
        &self,
        session: &dyn SessionHandle,
        cmd: command::ShellCommand,
    ) -> std::result::Result<String, String> {
        match session.exec(&cmd).await {
            Ok(out) => Ok(out.stdout),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// `top -bn1` CPU column, e.g. `"12.5\n"`.
fn parse_cpu(stdout: &str) -> f64 {
    stdout.trim().parse().unwrap_or(0.0)
}

/// `free` derived `"<usage%> <total MB> <used MB>"`.
fn parse_memory(stdout: &str) -> (f64, f64, f64) {
    let mut parts = stdout.trim().split_whitespace();
    let usage = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0.0);
    let total = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0.0);
    let used = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0.0);
    (usage, total, used)
}

/// `df -h /` derived `"<use%> <size> <used>"`, e.g. `"42% 80G 32G"`.
fn parse_disk(stdout: &str) -> (f64, String, String) {
    let mut parts = stdout.trim().split_whitespace();
    let usage = parts
        .next()
        .and_then(|p| p.trim_end_matches('%').parse().ok())
        .unwrap_or(0.0);
    let total = parts.next().unwrap_or("0G").to_string();
    let used = parts.next().unwrap_or("0G").to_string();
    (usage, total, used)
}

/// `uptime -p` output with the `up ` prefix stripped.
fn parse_uptime(stdout: &str) -> String {
    stdout.trim().strip_prefix("up ").unwrap_or(stdout.trim()).to_string()
}

/// One port number per line; anything non-numeric is dropped.
fn parse_ports(stdout: &str) -> Vec<u16> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}
