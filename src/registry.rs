//! Fleet and Account Registries
//!
//! Host and account records are owned by an external store; the
//! orchestration core reads them through the [`FleetRegistry`] and
//! [`AccountRegistry`] traits and writes back only status updates. The
//! traits keep persistence substitutable: the binary and the tests use the
//! in-memory [`MemoryRegistry`], seeded from a TOML fleet file.
//!
//! Remote state and registry state are deliberately not transactional. A
//! remote success followed by a failed status write leaves them diverging
//! until manual correction; callers log that case instead of retrying.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Host authentication material.
///
/// An explicit tagged union rather than two optional fields: when an
/// operator supplies both a password and a private key, the key wins. That
/// precedence lives in [`Credential::from_parts`] and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PrivateKey(String),
}

impl Credential {
    /// Build a credential from the registry's optional column pair.
    pub fn from_parts(password: Option<String>, private_key: Option<String>) -> Result<Self> {
        match (private_key, password) {
            (Some(key), _) if !key.is_empty() => Ok(Credential::PrivateKey(key)),
            (_, Some(pass)) if !pass.is_empty() => Ok(Credential::Password(pass)),
            _ => Err(Error::InvalidInput(
                "host has neither an ssh password nor an ssh key".to_string(),
            )),
        }
    }
}

/// Reachability status of a host, updated after every connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Unknown,
    Online,
    Offline,
}

/// A remote machine managed over SSH
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub ssh_user: String,
    pub credential: Credential,
    pub status: HostStatus,
    pub last_check: Option<DateTime<Utc>>,
}

/// Lifecycle status of a shell account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Blocked,
}

/// A shell login provisioned on one host
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub host_id: i64,
    pub username: String,
    pub password: String,
    pub expiration_date: NaiveDate,
    /// `None` means unlimited concurrent connections
    pub connection_limit: Option<u32>,
    pub status: AccountStatus,
    pub blocked_reason: Option<String>,
}

impl Account {
    /// Whether the expiration date has passed relative to `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date < today
    }
}

/// Read/status-write access to host records
#[async_trait::async_trait]
pub trait FleetRegistry: Send + Sync {
    /// Look up one host by id
    async fn host(&self, id: i64) -> Result<Option<Host>>;

    /// All registered hosts
    async fn hosts(&self) -> Result<Vec<Host>>;

    /// Record the outcome of a connection attempt. Also bumps `last_check`.
    async fn update_status(&self, id: i64, status: HostStatus) -> Result<()>;
}

/// Read/status-write access to account records
#[async_trait::async_trait]
pub trait AccountRegistry: Send + Sync {
    /// Look up one account by id
    async fn account(&self, id: i64) -> Result<Option<Account>>;

    /// Accounts that are active and carry a connection limit — the
    /// enforcement cycle's working set
    async fn active_with_limit(&self) -> Result<Vec<Account>>;

    /// Active accounts whose expiration date has passed
    async fn expired_accounts(&self, today: NaiveDate) -> Result<Vec<Account>>;

    /// Update an account's status and blocked reason
    async fn set_status(
        &self,
        id: i64,
        status: AccountStatus,
        reason: Option<String>,
    ) -> Result<()>;
}

/// In-memory registry backing the binary and the tests
#[derive(Default)]
pub struct MemoryRegistry {
    hosts: RwLock<HashMap<i64, Host>>,
    accounts: RwLock<HashMap<i64, Account>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_host(&self, host: Host) {
        self.hosts.write().await.insert(host.id, host);
    }

    pub async fn insert_account(&self, account: Account) {
        self.accounts.write().await.insert(account.id, account);
    }

    /// Seed from a parsed fleet file.
    pub async fn seed(&self, file: FleetFile) -> Result<()> {
        for spec in file.hosts {
            self.insert_host(spec.into_host()?).await;
        }
        for spec in file.accounts {
            self.insert_account(spec.into_account()).await;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FleetRegistry for MemoryRegistry {
    async fn host(&self, id: i64) -> Result<Option<Host>> {
        Ok(self.hosts.read().await.get(&id).cloned())
    }

    async fn hosts(&self) -> Result<Vec<Host>> {
        let mut hosts: Vec<Host> = self.hosts.read().await.values().cloned().collect();
        hosts.sort_by_key(|h| h.id);
        Ok(hosts)
    }

    async fn update_status(&self, id: i64, status: HostStatus) -> Result<()> {
        let mut hosts = self.hosts.write().await;
        let host = hosts
            .get_mut(&id)
            .ok_or_else(|| Error::Registry(format!("unknown host id {}", id)))?;
        host.status = status;
        host.last_check = Some(Utc::now());
        Ok(())
    }
}

#[async_trait::async_trait]
impl AccountRegistry for MemoryRegistry {
    async fn account(&self, id: i64) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn active_with_limit(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| a.status == AccountStatus::Active && a.connection_limit.is_some())
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn expired_accounts(&self, today: NaiveDate) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| a.status == AccountStatus::Active && a.is_expired(today))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn set_status(
        &self,
        id: i64,
        status: AccountStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| Error::Registry(format!("unknown account id {}", id)))?;
        account.status = status;
        account.blocked_reason = reason;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fleet file (TOML) — the binary's stand-in for the external registries
// ---------------------------------------------------------------------------

/// On-disk fleet description
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetFile {
    #[serde(default)]
    pub hosts: Vec<HostSpec>,
    #[serde(default)]
    pub accounts: Vec<AccountSpec>,
}

fn default_port() -> u16 {
    22
}

/// One `[[hosts]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct HostSpec {
    pub id: i64,
    pub name: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub ssh_user: String,
    pub ssh_password: Option<String>,
    pub ssh_key: Option<String>,
}

impl HostSpec {
    fn into_host(self) -> Result<Host> {
        let credential = Credential::from_parts(self.ssh_password, self.ssh_key)?;
        Ok(Host {
            id: self.id,
            name: self.name,
            address: self.address,
            port: self.port,
            ssh_user: self.ssh_user,
            credential,
            status: HostStatus::Unknown,
            last_check: None,
        })
    }
}

/// One `[[accounts]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct AccountSpec {
    pub id: i64,
    pub host_id: i64,
    pub username: String,
    pub password: String,
    pub expiration_date: NaiveDate,
    pub connection_limit: Option<u32>,
}

impl AccountSpec {
    fn into_account(self) -> Account {
        Account {
            id: self.id,
            host_id: self.host_id,
            username: self.username,
            password: self.password,
            expiration_date: self.expiration_date,
            connection_limit: self.connection_limit,
            status: AccountStatus::Active,
            blocked_reason: None,
        }
    }
}

/// Load and parse a fleet file.
pub fn load_fleet_file(path: &Path) -> Result<FleetFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Registry(format!("failed to read fleet file {:?}: {}", path, e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Registry(format!("failed to parse fleet file {:?}: {}", path, e)))
}
