//! Account Provisioning
//!
//! Every operation opens exactly one session, runs its ordered command
//! sequence, and closes the session no matter how the sequence ends. The
//! command grammar lives in [`crate::command`]; this module owns the
//! sequencing, the tolerated remote conditions, and the never-throw
//! contracts of the read-only operations.

use std::time::Duration;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::command;
use crate::error::{Error, Result};
use crate::registry::Host;
use crate::session::{SessionHandle, SessionManager};
use crate::util::is_valid_username;

/// Grace pause between killing an account's processes and removing it.
const DELETE_GRACE: Duration = Duration::from_millis(500);

/// One logged-in user and its live session count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub username: String,
    pub connections: u32,
}

/// Runs ordered command sequences against one account on one host
#[derive(Clone)]
pub struct AccountProvisioner {
    sessions: SessionManager,
}

impl AccountProvisioner {
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }

    /// Create an OS account with home directory and login shell, set its
    /// password, and set its expiration date.
    ///
    /// Tolerates a pre-existing OS account ("already exists"); a failed
    /// expiration write is a warning, not an error. Cross-host username
    /// uniqueness is the caller's concern.
    pub async fn create_account(
        &self,
        host: &Host,
        username: &str,
        password: &str,
        expiration: NaiveDate,
    ) -> Result<()> {
        if !is_valid_username(username) {
            return Err(Error::InvalidInput(format!(
                "username {:?} is not a valid account name",
                username
            )));
        }

        let session = self.sessions.open(host).await?;
        let result = self
            .create_sequence(session.as_ref(), host, username, password, expiration)
            .await;
        session.close().await;
        result
    }

    async fn create_sequence(
        &self,
        session: &dyn SessionHandle,
        host: &Host,
        username: &str,
        password: &str,
        expiration: NaiveDate,
    ) -> Result<()> {
        let created = session.exec(&command::create_user(username)).await?;
        if !created.success() && !created.stderr.contains("already exists") {
            return Err(Error::Provisioning(format!(
                "failed to create account {}: {}",
                username,
                created.stderr.trim()
            )));
        }

        let passwd = session
            .exec(&command::set_password(username, password))
            .await?;
        if !passwd.success() {
            return Err(Error::Provisioning(format!(
                "failed to set password for {}: {}",
                username,
                passwd.stderr.trim()
            )));
        }

        let expired = session
            .exec(&command::set_expiration(username, expiration))
            .await?;
        if !expired.success() {
            warn!(
                "could not set expiration for {} on {}: {}",
                username,
                host.name,
                expired.stderr.trim()
            );
        }

        info!("account {} created on {}", username, host.name);
        Ok(())
    }

    /// Terminate the account's processes, wait a short grace period, then
    /// remove the account and its home directory. Tolerates an account
    /// that is already gone ("does not exist").
    pub async fn delete_account(&self, host: &Host, username: &str) -> Result<()> {
        let session = self.sessions.open(host).await?;
        let result = self.delete_sequence(session.as_ref(), host, username).await;
        session.close().await;
        result
    }

    async fn delete_sequence(
        &self,
        session: &dyn SessionHandle,
        host: &Host,
        username: &str,
    ) -> Result<()> {
        // pkill exits non-zero when the user had no processes; that is fine.
        session
            .exec(&command::kill_user_processes(username))
            .await?;
        tokio::time::sleep(DELETE_GRACE).await;

        let removed = session.exec(&command::remove_user(username)).await?;
        if !removed.success() && !removed.stderr.contains("does not exist") {
            return Err(Error::Provisioning(format!(
                "failed to delete account {}: {}",
                username,
                removed.stderr.trim()
            )));
        }

        info!("account {} deleted from {}", username, host.name);
        Ok(())
    }

    /// Set a new password for the account.
    pub async fn set_password(&self, host: &Host, username: &str, password: &str) -> Result<()> {
        self.single_command(
            host,
            command::set_password(username, password),
            &format!("failed to change password for {}", username),
        )
        .await?;
        info!("password changed for {} on {}", username, host.name);
        Ok(())
    }

    /// Set a new expiration date (`YYYY-MM-DD`) for the account.
    pub async fn set_expiration(
        &self,
        host: &Host,
        username: &str,
        expiration: NaiveDate,
    ) -> Result<()> {
        self.single_command(
            host,
            command::set_expiration(username, expiration),
            &format!("failed to update expiration for {}", username),
        )
        .await?;
        info!("expiration updated for {} on {}", username, host.name);
        Ok(())
    }

    /// Lock the account. Remotely idempotent.
    pub async fn block(&self, host: &Host, username: &str) -> Result<()> {
        self.single_command(
            host,
            command::lock_user(username),
            &format!("failed to block {}", username),
        )
        .await?;
        info!("account {} blocked on {}", username, host.name);
        Ok(())
    }

    /// Unlock the account. Remotely idempotent.
    pub async fn unblock(&self, host: &Host, username: &str) -> Result<()> {
        self.single_command(
            host,
            command::unlock_user(username),
            &format!("failed to unblock {}", username),
        )
        .await?;
        info!("account {} unblocked on {}", username, host.name);
        Ok(())
    }

    /// Count live ssh sessions for the account.
    ///
    /// Once a session is open, this never fails: a failed command or an
    /// unparsable count degrades to `0`. A connection failure still
    /// surfaces, so the enforcement cycle can isolate an unreachable host.
    pub async fn count_connections(&self, host: &Host, username: &str) -> Result<u32> {
        let session = self.sessions.open(host).await?;
        let count = match session.exec(&command::count_ssh_sessions(username)).await {
            Ok(out) if out.success() => out.stdout.trim().parse::<u32>().unwrap_or(0),
            Ok(_) => 0,
            Err(e) => {
                warn!(
                    "connection count for {} on {} failed: {}",
                    username, host.name, e
                );
                0
            }
        };
        session.close().await;
        Ok(count)
    }

    /// Enumerate logged-in users with per-user session counts.
    ///
    /// Same contract as [`Self::count_connections`]: command failures after
    /// a successful open degrade to an empty list.
    pub async fn list_active_sessions(&self, host: &Host) -> Result<Vec<ActiveSession>> {
        let session = self.sessions.open(host).await?;
        let users = match session.exec(&command::active_sessions()).await {
            Ok(out) if out.success() => parse_active_sessions(&out.stdout),
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!("active session listing on {} failed: {}", host.name, e);
                Vec::new()
            }
        };
        session.close().await;
        Ok(users)
    }

    /// Open a session, run one command, require exit code 0.
    async fn single_command(
        &self,
        host: &Host,
        cmd: command::ShellCommand,
        failure_context: &str,
    ) -> Result<()> {
        let session = self.sessions.open(host).await?;
        let result = match session.exec(&cmd).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(Error::Provisioning(format!(
                "{}: {}",
                failure_context,
                out.stderr.trim()
            ))),
            Err(e) => Err(e),
        };
        session.close().await;
        result
    }
}

/// Parse `who | awk '{print $1}' | sort | uniq -c` output: lines of
/// `"  <count> <username>"`.
fn parse_active_sessions(stdout: &str) -> Vec<ActiveSession> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let connections = parts.next()?.parse::<u32>().ok()?;
            let username = parts.next()?.to_string();
            Some(ActiveSession {
                username,
                connections,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::testing::{output, test_host, ScriptedOpener};
    use std::sync::Arc;

    fn setup() -> (Arc<ScriptedOpener>, AccountProvisioner, Host) {
        let registry = Arc::new(MemoryRegistry::new());
        let host = test_host(1);
        let opener = Arc::new(ScriptedOpener::new());
        let sessions = SessionManager::new(opener.clone(), registry);
        (opener.clone(), AccountProvisioner::new(sessions), host)
    }

    fn exp() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_create_account_happy_path() {
        let (opener, provisioner, host) = setup();

        provisioner
            .create_account(&host, "alice", "pw", exp())
            .await
            .unwrap();

        let executed = opener.state().executed();
        assert_eq!(executed[0], "useradd -m -s /bin/bash alice");
        assert!(executed[1].contains("chpasswd"));
        assert!(executed[2].starts_with("chage -E 2026-01-01"));
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test]
    async fn test_create_tolerates_existing_account() {
        let (opener, provisioner, host) = setup();
        opener
            .respond("useradd", output(9, "", "useradd: user 'alice' already exists"))
            .await;

        provisioner
            .create_account(&host, "alice", "pw", exp())
            .await
            .unwrap();
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test]
    async fn test_create_fails_on_other_useradd_error() {
        let (opener, provisioner, host) = setup();
        opener
            .respond("useradd", output(1, "", "useradd: cannot lock /etc/passwd"))
            .await;

        let err = provisioner
            .create_account(&host, "alice", "pw", exp())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provisioning(_)));
        // Session released despite the failure.
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_username_before_connecting() {
        let (opener, provisioner, host) = setup();

        let err = provisioner
            .create_account(&host, "Bad User!", "pw", exp())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(opener.state().opens(), 0);
    }

    #[tokio::test]
    async fn test_create_chage_failure_is_warning_only() {
        let (opener, provisioner, host) = setup();
        opener
            .respond("chage", output(1, "", "chage: shadow locked"))
            .await;

        provisioner
            .create_account(&host, "alice", "pw", exp())
            .await
            .unwrap();
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_tolerates_missing_account() {
        let (opener, provisioner, host) = setup();
        opener
            .respond("userdel", output(6, "", "userdel: user 'ghost' does not exist"))
            .await;

        provisioner.delete_account(&host, "ghost").await.unwrap();

        let executed = opener.state().executed();
        assert_eq!(executed[0], "pkill -u ghost");
        assert!(executed[1].starts_with("userdel -r"));
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_fails_on_other_error() {
        let (opener, provisioner, host) = setup();
        opener
            .respond("userdel", output(8, "", "userdel: user alice is currently used"))
            .await;

        let err = provisioner.delete_account(&host, "alice").await.unwrap_err();
        assert!(matches!(err, Error::Provisioning(_)));
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test]
    async fn test_count_connections_parses_count() {
        let (opener, provisioner, host) = setup();
        opener.respond("wc -l", output(0, "3\n", "")).await;

        let count = provisioner.count_connections(&host, "alice").await.unwrap();
        assert_eq!(count, 3);
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test]
    async fn test_count_connections_defaults_to_zero() {
        let (opener, provisioner, host) = setup();
        opener.respond("wc -l", output(0, "not a number", "")).await;
        assert_eq!(
            provisioner.count_connections(&host, "alice").await.unwrap(),
            0
        );

        let (opener, provisioner, host) = setup();
        opener.respond("wc -l", output(1, "", "ps: boom")).await;
        assert_eq!(
            provisioner.count_connections(&host, "alice").await.unwrap(),
            0
        );
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test]
    async fn test_count_connections_transport_fault_degrades_to_zero() {
        let (opener, provisioner, host) = setup();
        opener.fail_exec("wc -l").await;

        assert_eq!(
            provisioner.count_connections(&host, "alice").await.unwrap(),
            0
        );
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test]
    async fn test_count_connections_surfaces_connection_failure() {
        let (opener, provisioner, host) = setup();
        opener.refuse_host(&host.name).await;

        let err = provisioner
            .count_connections(&host, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(opener.state().opens(), 0);
    }

    #[tokio::test]
    async fn test_list_active_sessions_parses_uniq_output() {
        let (opener, provisioner, host) = setup();
        opener
            .respond("who |", output(0, "      2 alice\n      1 bob\n", ""))
            .await;

        let sessions = provisioner.list_active_sessions(&host).await.unwrap();
        assert_eq!(
            sessions,
            vec![
                ActiveSession {
                    username: "alice".to_string(),
                    connections: 2
                },
                ActiveSession {
                    username: "bob".to_string(),
                    connections: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_list_active_sessions_defaults_to_empty() {
        let (opener, provisioner, host) = setup();
        opener.respond("who |", output(1, "", "who: boom")).await;

        let sessions = provisioner.list_active_sessions(&host).await.unwrap();
        assert!(sessions.is_empty());
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test]
    async fn test_set_expiration_round_trip_format() {
        let (opener, provisioner, host) = setup();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        provisioner
            .set_expiration(&host, "alice", date)
            .await
            .unwrap();

        let executed = opener.state().executed();
        assert_eq!(executed[0], "chage -E 2025-03-01 alice");
    }

    #[tokio::test]
    async fn test_block_already_blocked_account_succeeds() {
        let (opener, provisioner, host) = setup();

        // usermod -L exits 0 whether or not the account is already locked.
        provisioner.block(&host, "alice").await.unwrap();
        provisioner.block(&host, "alice").await.unwrap();

        let executed = opener.state().executed();
        assert_eq!(executed, vec!["usermod -L alice"; 2]);
        assert!(opener.state().all_sessions_closed());
    }

    #[tokio::test]
    async fn test_transport_fault_still_closes_session() {
        let (opener, provisioner, host) = setup();
        opener.fail_exec("usermod -L").await;

        let err = provisioner.block(&host, "alice").await.unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert!(opener.state().all_sessions_closed());
    }

    #[test]
    fn test_parse_active_sessions_skips_garbage() {
        let parsed = parse_active_sessions("   2 alice\nnot-a-line\n x bob\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].username, "alice");
    }
}
