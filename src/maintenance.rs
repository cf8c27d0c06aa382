//! Host Maintenance
//!
//! Two blunt instruments: the fixed log-cleanup batch and a reboot. Both
//! are best-effort by nature. Individual cleanup commands fail routinely
//! (a host without nginx has no nginx logs) and the batch keeps going;
//! a reboot tears the transport down underneath us, so its exec result is
//! meaningless and is discarded.

use tracing::{info, warn};

use crate::command;
use crate::error::Result;
use crate::registry::Host;
use crate::session::SessionManager;

#[derive(Clone)]
pub struct MaintenanceRunner {
    sessions: SessionManager,
}

impl MaintenanceRunner {
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }

    /// Run the log-cleanup batch on `host`. Every command is attempted;
    /// failures (non-zero exits and transport faults alike) are logged and
    /// skipped. Only a failed connection is an error.
    pub async fn clean_logs(&self, host: &Host) -> Result<()> {
        let session = self.sessions.open(host).await?;

        for cmd in command::clean_log_batch() {
            match session.exec(&cmd).await {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    warn!(
                        "log cleanup on {}: '{}' exited {}",
                        host.name, cmd, out.exit_code
                    );
                }
                Err(e) => {
                    warn!("log cleanup on {}: '{}' failed: {}", host.name, cmd, e);
                }
            }
        }

        session.close().await;
        info!("log cleanup completed on {}", host.name);
        Ok(())
    }

    /// Reboot `host`. The command kills the connection mid-flight, so the
    /// exec outcome is discarded; reaching the host at all is the success
    /// criterion.
    pub async fn restart_host(&self, host: &Host) -> Result<()> {
        let session = self.sessions.open(host).await?;

        let _ = session.exec(&command::reboot()).await;
        session.close().await;

        info!("reboot issued to {}", host.name);
        Ok(())
    }
}
