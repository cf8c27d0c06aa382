// SSH Fleet Orchestrator - Main Entry Point
//
// CLI over the orchestration core:
// - one-shot and scheduled connection-limit enforcement
// - account provisioning operations
// - host telemetry and maintenance

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sshfleet::audit::MemoryAuditLog;
use sshfleet::config::Config;
use sshfleet::enforcer::{LimitEnforcer, Scheduler, SchedulerSettings};
use sshfleet::maintenance::MaintenanceRunner;
use sshfleet::provision::AccountProvisioner;
use sshfleet::registry::{load_fleet_file, AccountRegistry, FleetRegistry, Host, MemoryRegistry};
use sshfleet::session::{SessionManager, Ssh2Opener};
use sshfleet::telemetry::TelemetryCollector;
use sshfleet::util;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// sshfleet: SSH fleet orchestrator
#[derive(Parser, Debug)]
#[command(name = "sshfleet")]
#[command(version = "0.1.0")]
#[command(about = "Shell account provisioning and connection-limit enforcement over SSH", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file (defaults to the XDG config dir)
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one enforcement cycle and exit
    Scan,
    /// Run the periodic enforcement schedule until interrupted
    Watch,
    /// Collect and print a telemetry snapshot for a host
    Info {
        /// Host id from the fleet file
        host_id: i64,
    },
    /// List logged-in users on a host
    Sessions {
        host_id: i64,
    },
    /// Run the log-cleanup batch on a host
    CleanLogs {
        host_id: i64,
    },
    /// Reboot a host
    Reboot {
        host_id: i64,
    },
    /// Create a shell account on a host
    CreateAccount {
        host_id: i64,
        username: String,
        /// Password; generated when omitted
        #[arg(long)]
        password: Option<String>,
        /// Days until the account expires
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Delete a shell account from a host
    DeleteAccount {
        host_id: i64,
        username: String,
    },
    /// Change an account password
    SetPassword {
        host_id: i64,
        username: String,
        password: String,
    },
    /// Change an account expiration date (YYYY-MM-DD)
    SetExpiration {
        host_id: i64,
        username: String,
        expiration: NaiveDate,
    },
    /// Lock an account
    Block {
        host_id: i64,
        username: String,
    },
    /// Unlock an account
    Unblock {
        host_id: i64,
        username: String,
    },
    /// Count live ssh sessions for an account
    Connections {
        host_id: i64,
        username: String,
    },
    /// List active accounts whose expiration date has passed
    Expired,
}

/// Everything the subcommands operate on
struct App {
    registry: Arc<MemoryRegistry>,
    provisioner: AccountProvisioner,
    telemetry: TelemetryCollector,
    maintenance: MaintenanceRunner,
    enforcer: Arc<LimitEnforcer>,
    config: Config,
}

impl App {
    async fn build(config: Config) -> Result<Self> {
        let registry = Arc::new(MemoryRegistry::new());
        let fleet = load_fleet_file(config.fleet_file.as_ref())
            .with_context(|| format!("failed to load fleet file {}", config.fleet_file))?;
        registry.seed(fleet).await?;

        let opener = Arc::new(Ssh2Opener::new(config.ssh.connect_timeout()));
        let sessions = SessionManager::new(opener, registry.clone());
        let provisioner = AccountProvisioner::new(sessions.clone());
        let audit = Arc::new(MemoryAuditLog::new());
        let enforcer = Arc::new(LimitEnforcer::new(
            provisioner.clone(),
            registry.clone(),
            registry.clone(),
            audit,
            config.enforcer.host_pause(),
        ));

        Ok(Self {
            registry,
            provisioner,
            telemetry: TelemetryCollector::new(sessions.clone()),
            maintenance: MaintenanceRunner::new(sessions),
            enforcer,
            config,
        })
    }

    async fn host(&self, id: i64) -> Result<Host> {
        self.registry
            .host(id)
            .await?
            .with_context(|| format!("host id {} is not in the fleet file", id))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(filter.into())
                .from_env_lossy(),
        )
        .init();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let app = App::build(config).await?;
    run_command(&app, args.command).await
}

async fn run_command(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Scan => {
            let report = app.enforcer.run_cycle().await?;
            info!(
                "cycle done: {} checked, {} blocked, {} host failures",
                report.checked, report.blocked, report.host_failures
            );
        }
        Commands::Watch => {
            let scheduler = Scheduler::new(
                app.enforcer.clone(),
                SchedulerSettings {
                    enabled: app.config.enforcer.enabled,
                    interval: app.config.enforcer.interval(),
                },
            );
            scheduler.start().await;
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("shutting down");
            scheduler.stop().await;
        }
        Commands::Info { host_id } => {
            let host = app.host(host_id).await?;
            let snapshot = app.telemetry.system_info(&host).await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Sessions { host_id } => {
            let host = app.host(host_id).await?;
            for session in app.provisioner.list_active_sessions(&host).await? {
                println!("{:>6} {}", session.connections, session.username);
            }
        }
        Commands::CleanLogs { host_id } => {
            let host = app.host(host_id).await?;
            app.maintenance.clean_logs(&host).await?;
        }
        Commands::Reboot { host_id } => {
            let host = app.host(host_id).await?;
            app.maintenance.restart_host(&host).await?;
        }
        Commands::CreateAccount {
            host_id,
            username,
            password,
            days,
        } => {
            let host = app.host(host_id).await?;
            let password = password.unwrap_or_else(|| util::generate_password(12));
            let expiration = util::add_days(util::today(), days);
            app.provisioner
                .create_account(&host, &username, &password, expiration)
                .await?;
            println!(
                "created {} on {} (expires {}) password: {}",
                username,
                host.name,
                util::format_date(expiration),
                password
            );
        }
        Commands::DeleteAccount { host_id, username } => {
            let host = app.host(host_id).await?;
            app.provisioner.delete_account(&host, &username).await?;
        }
        Commands::SetPassword {
            host_id,
            username,
            password,
        } => {
            let host = app.host(host_id).await?;
            app.provisioner
                .set_password(&host, &username, &password)
                .await?;
        }
        Commands::SetExpiration {
            host_id,
            username,
            expiration,
        } => {
            let host = app.host(host_id).await?;
            app.provisioner
                .set_expiration(&host, &username, expiration)
                .await?;
        }
        Commands::Block { host_id, username } => {
            let host = app.host(host_id).await?;
            app.provisioner.block(&host, &username).await?;
        }
        Commands::Unblock { host_id, username } => {
            let host = app.host(host_id).await?;
            app.provisioner.unblock(&host, &username).await?;
        }
        Commands::Connections { host_id, username } => {
            let host = app.host(host_id).await?;
            let count = app.provisioner.count_connections(&host, &username).await?;
            println!("{}", count);
        }
        Commands::Expired => {
            for account in app.registry.expired_accounts(util::today()).await? {
                println!(
                    "{:>4} {} (host {}) expired {}",
                    account.id,
                    account.username,
                    account.host_id,
                    util::format_date(account.expiration_date)
                );
            }
        }
    }
    Ok(())
}
