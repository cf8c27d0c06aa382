//! SSH transport over libssh2
//!
//! `ssh2` is a blocking API; every call runs inside
//! `tokio::task::spawn_blocking` so the runtime is never stalled. The
//! session handle is shared behind a mutex — the session contract already
//! guarantees one command at a time, the mutex just makes that safe to
//! express across blocking tasks.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::command::ShellCommand;
use crate::error::{Error, Result};
use crate::registry::{Credential, Host};
use crate::session::{ExecOutput, SessionHandle, SessionOpener};

/// Opens authenticated ssh2 sessions with a fixed connect timeout
pub struct Ssh2Opener {
    connect_timeout: Duration,
}

impl Ssh2Opener {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait::async_trait]
impl SessionOpener for Ssh2Opener {
    async fn open(&self, host: &Host) -> Result<Box<dyn SessionHandle>> {
        let address = host.address.clone();
        let port = host.port;
        let username = host.ssh_user.clone();
        let credential = host.credential.clone();
        let timeout = self.connect_timeout;

        let session = tokio::task::spawn_blocking(move || {
            connect_blocking(&address, port, &username, &credential, timeout)
        })
        .await
        .map_err(|e| Error::Execution(format!("ssh connect task failed: {}", e)))??;

        Ok(Box::new(Ssh2Session {
            inner: Arc::new(Mutex::new(session)),
            closed: AtomicBool::new(false),
        }))
    }
}

fn connect_blocking(
    address: &str,
    port: u16,
    username: &str,
    credential: &Credential,
    timeout: Duration,
) -> Result<ssh2::Session> {
    let addr = (address, port)
        .to_socket_addrs()
        .map_err(|e| Error::Connection {
            host: address.to_string(),
            message: format!("address resolution failed: {}", e),
        })?
        .next()
        .ok_or_else(|| Error::Connection {
            host: address.to_string(),
            message: "address resolved to nothing".to_string(),
        })?;

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| Error::Connection {
        host: address.to_string(),
        message: e.to_string(),
    })?;

    let mut session = ssh2::Session::new().map_err(|e| Error::Connection {
        host: address.to_string(),
        message: format!("session init failed: {}", e),
    })?;
    // The timeout covers the handshake and authentication. It is cleared
    // afterwards: a remote command is allowed to run as long as it likes
    // (there is no per-command timeout in this design).
    session.set_timeout(timeout.as_millis() as u32);
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| Error::Connection {
        host: address.to_string(),
        message: format!("handshake failed: {}", e),
    })?;

    match credential {
        Credential::PrivateKey(key) => session
            .userauth_pubkey_memory(username, None, key, None)
            .map_err(|e| Error::Connection {
                host: address.to_string(),
                message: format!("key authentication failed: {}", e),
            })?,
        Credential::Password(password) => session
            .userauth_password(username, password)
            .map_err(|e| Error::Connection {
                host: address.to_string(),
                message: format!("password authentication failed: {}", e),
            })?,
    }

    if !session.authenticated() {
        return Err(Error::Connection {
            host: address.to_string(),
            message: "authentication rejected".to_string(),
        });
    }

    // 0 disables the libssh2 timeout again.
    session.set_timeout(0);

    Ok(session)
}

/// One live ssh2 session
pub struct Ssh2Session {
    inner: Arc<Mutex<ssh2::Session>>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl SessionHandle for Ssh2Session {
    async fn exec(&self, command: &ShellCommand) -> Result<ExecOutput> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Execution("session is closed".to_string()));
        }

        let inner = Arc::clone(&self.inner);
        let line = command.as_str().to_string();
        debug!("exec: {}", line);

        tokio::task::spawn_blocking(move || exec_blocking(&inner, &line))
            .await
            .map_err(|e| Error::Execution(format!("ssh exec task failed: {}", e)))?
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(session) = inner.lock() {
                let _ = session.disconnect(None, "session closed", None);
            }
        })
        .await;
    }
}

fn exec_blocking(inner: &Mutex<ssh2::Session>, line: &str) -> Result<ExecOutput> {
    use std::io::Read;

    let session = inner
        .lock()
        .map_err(|_| Error::Execution("session lock poisoned".to_string()))?;

    let mut channel = session
        .channel_session()
        .map_err(|e| Error::Execution(format!("channel open failed: {}", e)))?;
    channel
        .exec(line)
        .map_err(|e| Error::Execution(format!("exec failed: {}", e)))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| Error::Execution(format!("stdout read failed: {}", e)))?;

    let mut stderr = String::new();
    let _ = channel.stderr().read_to_string(&mut stderr);

    channel.wait_close().ok();
    let exit_code = channel.exit_status().unwrap_or(0);

    Ok(ExecOutput {
        exit_code,
        stdout,
        stderr,
    })
}
