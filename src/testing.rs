//! Scripted fake transport for tests
//!
//! Implements the session traits without any network I/O. Responses are
//! keyed by command-line substring; opens, closes, and executed command
//! lines are recorded so tests can assert on the cleanup guarantee and the
//! single-flight property.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;

use crate::command::ShellCommand;
use crate::error::{Error, Result};
use crate::registry::{Account, AccountStatus, Credential, Host, HostStatus};
use crate::session::{ExecOutput, SessionHandle, SessionOpener};

pub fn output(exit_code: i32, stdout: &str, stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

pub fn test_host(id: i64) -> Host {
    Host {
        id,
        name: format!("vps-{}", id),
        address: format!("203.0.113.{}", id),
        port: 22,
        ssh_user: "root".to_string(),
        credential: Credential::Password("hunter2".to_string()),
        status: HostStatus::Unknown,
        last_check: None,
    }
}

pub fn test_account(id: i64, host_id: i64, username: &str, limit: Option<u32>) -> Account {
    Account {
        id,
        host_id,
        username: username.to_string(),
        password: "pw".to_string(),
        expiration_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        connection_limit: limit,
        status: AccountStatus::Active,
        blocked_reason: None,
    }
}

/// Shared recording state behind every scripted session
#[derive(Default)]
pub struct ScriptState {
    rules: Mutex<Vec<(String, ExecOutput)>>,
    fail_rules: Mutex<Vec<String>>,
    refused: Mutex<HashSet<String>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    executed: Mutex<Vec<String>>,
    exec_delay: Mutex<Duration>,
}

impl ScriptState {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Every opened session has been closed exactly once.
    pub fn all_sessions_closed(&self) -> bool {
        self.opens() == self.closes()
    }
}

/// Scripted opener handed to `SessionManager` in tests
#[derive(Default)]
pub struct ScriptedOpener {
    state: Arc<ScriptState>,
}

impl ScriptedOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<ScriptState> {
        Arc::clone(&self.state)
    }

    /// Respond to any command containing `pattern` with `response`.
    /// First matching rule wins; unmatched commands succeed with empty
    /// output.
    pub async fn respond(&self, pattern: &str, response: ExecOutput) {
        self.state
            .rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), response));
    }

    /// Fail any command containing `pattern` with a transport error.
    pub async fn fail_exec(&self, pattern: &str) {
        self.state
            .fail_rules
            .lock()
            .unwrap()
            .push(pattern.to_string());
    }

    /// Refuse connections to the named host.
    pub async fn refuse_host(&self, name: &str) {
        self.state.refused.lock().unwrap().insert(name.to_string());
    }

    /// Delay every exec call, to let tests overlap cycles deterministically.
    pub fn set_exec_delay(&self, delay: Duration) {
        *self.state.exec_delay.lock().unwrap() = delay;
    }
}

#[async_trait::async_trait]
impl SessionOpener for ScriptedOpener {
    async fn open(&self, host: &Host) -> Result<Box<dyn SessionHandle>> {
        if self.state.refused.lock().unwrap().contains(&host.name) {
            return Err(Error::Connection {
                host: host.name.clone(),
                message: "connection refused".to_string(),
            });
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct ScriptedSession {
    state: Arc<ScriptState>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl SessionHandle for ScriptedSession {
    async fn exec(&self, command: &ShellCommand) -> Result<ExecOutput> {
        let delay = *self.state.exec_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let line = command.as_str().to_string();
        self.state.executed.lock().unwrap().push(line.clone());

        let fail_rules = self.state.fail_rules.lock().unwrap();
        if fail_rules.iter().any(|p| line.contains(p.as_str())) {
            return Err(Error::Execution("transport fault (scripted)".to_string()));
        }
        drop(fail_rules);

        let rules = self.state.rules.lock().unwrap();
        for (pattern, response) in rules.iter() {
            if line.contains(pattern.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(output(0, "", ""))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
