//! Remote Session Layer
//!
//! This module defines the session abstraction the higher-level components
//! are built on. They depend on an injected [`SessionOpener`] capability
//! rather than a concrete transport, so tests substitute a scripted fake
//! without any network I/O.
//!
//! A session is opened for exactly one logical operation, executes one
//! command at a time, and is closed on every exit path. There is no pooling
//! anywhere: every operation pays a full authentication handshake.

pub mod ssh;

use std::sync::Arc;

use tracing::{info, warn};

use crate::command::ShellCommand;
use crate::error::{Error, Result};
use crate::registry::{FleetRegistry, Host, HostStatus};

pub use ssh::Ssh2Opener;

/// Result of executing one command to completion.
///
/// A non-zero exit code is a valid result, not an error — callers interpret
/// exit codes themselves. Only transport faults surface as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One authenticated transport to a host
#[async_trait::async_trait]
pub trait SessionHandle: Send + Sync {
    /// Execute one shell command to completion.
    async fn exec(&self, command: &ShellCommand) -> Result<ExecOutput>;

    /// Release the session. Idempotent; safe on a partially-initialized
    /// session and safe to call more than once.
    async fn close(&self);
}

/// Capability to open an authenticated session to a host
#[async_trait::async_trait]
pub trait SessionOpener: Send + Sync {
    async fn open(&self, host: &Host) -> Result<Box<dyn SessionHandle>>;
}

/// Opens sessions and mirrors each attempt's outcome into the fleet
/// registry: success marks the host online, failure marks it offline.
/// That status write is visible to every component reading the registry.
#[derive(Clone)]
pub struct SessionManager {
    opener: Arc<dyn SessionOpener>,
    fleet: Arc<dyn FleetRegistry>,
}

impl SessionManager {
    pub fn new(opener: Arc<dyn SessionOpener>, fleet: Arc<dyn FleetRegistry>) -> Self {
        Self { opener, fleet }
    }

    /// Open a session to `host`, recording the reachability outcome.
    pub async fn open(&self, host: &Host) -> Result<Box<dyn SessionHandle>> {
        match self.opener.open(host).await {
            Ok(session) => {
                info!("ssh connection established to {} ({})", host.name, host.address);
                if let Err(e) = self.fleet.update_status(host.id, HostStatus::Online).await {
                    warn!("failed to mark {} online: {}", host.name, e);
                }
                Ok(session)
            }
            Err(e) => {
                warn!("ssh connection to {} failed: {}", host.name, e);
                if let Err(e) = self.fleet.update_status(host.id, HostStatus::Offline).await {
                    warn!("failed to mark {} offline: {}", host.name, e);
                }
                let message = match e {
                    Error::Connection { message, .. } => message,
                    other => other.to_string(),
                };
                Err(Error::Connection {
                    host: host.name.clone(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::testing::{test_host, ScriptedOpener};

    #[tokio::test]
    async fn test_open_marks_host_online() {
        let registry = Arc::new(MemoryRegistry::new());
        let host = test_host(1);
        registry.insert_host(host.clone()).await;

        let opener = Arc::new(ScriptedOpener::new());
        let manager = SessionManager::new(opener, registry.clone());

        let session = manager.open(&host).await.unwrap();
        session.close().await;

        let stored = registry.host(1).await.unwrap().unwrap();
        assert_eq!(stored.status, HostStatus::Online);
        assert!(stored.last_check.is_some());
    }

    #[tokio::test]
    async fn test_open_failure_marks_host_offline() {
        let registry = Arc::new(MemoryRegistry::new());
        let host = test_host(1);
        registry.insert_host(host.clone()).await;

        let opener = Arc::new(ScriptedOpener::new());
        opener.refuse_host(&host.name).await;
        let manager = SessionManager::new(opener, registry.clone());

        let err = manager.open(&host).await.err().unwrap();
        assert!(matches!(err, Error::Connection { .. }));

        let stored = registry.host(1).await.unwrap().unwrap();
        assert_eq!(stored.status, HostStatus::Offline);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let registry = Arc::new(MemoryRegistry::new());
        let host = test_host(1);
        registry.insert_host(host.clone()).await;

        let opener = Arc::new(ScriptedOpener::new());
        let manager = SessionManager::new(opener.clone(), registry);

        let session = manager.open(&host).await.unwrap();
        session.close().await;
        session.close().await;

        assert_eq!(opener.state().opens(), 1);
        assert_eq!(opener.state().closes(), 1);
    }
}
