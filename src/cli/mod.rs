//! CLI command handling.
//!
//! Provides subcommands for:
//! - Managing services (`create`, `destroy`, `start`, `stop`, `restart`,
//!   `use`, `list`, `upgrade`)
//! - Moving data (`shell`, `dump`, `backup`, `restore`, `delete-backup`,
//!   `backups`)
//! - Regenerating the admin front-end (`admin refresh`)
//! - Checking the container runtime (`doctor`)
//! - Shell completion scripts (`completion`)

mod completion;
mod data;
mod doctor;
mod service;

pub use completion::Completion;
pub use data::run_data_command;
pub use doctor::run_doctor_command;
pub use service::{run_service_command, resolve_create_password};

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ColorChoice, Parser, Subcommand, ValueEnum};

use crate::admin::AdminAggregator;
use crate::config::AppConfig;
use crate::prompt::Prompter;
use crate::runtime::{ContainerRuntime, DockerRuntime};
use crate::service::StorageMode;
use crate::store::{ConfigStore, JsonFileBackend};

#[derive(Parser, Debug)]
#[command(name = "mariadb-services")]
#[command(about = "Run named MariaDB services in containers")]
#[command(
    long_about = "Creates and manages named MariaDB instances in Docker, a shared phpMyAdmin front-end, and streaming dumps and backups.\nExamples:\n  mariadb-services create app --storage volume\n  mariadb-services backup app -d shop"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Data root (config document, dumps, admin state)
    #[arg(long, global = true, env = "MARIADB_SERVICES_HOME")]
    pub home: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// Default tracing filter for the requested verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "mariadb_services=info",
            _ => "mariadb_services=debug",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a service and start it
    #[command(
        about = "Create a service",
        long_about = "Registers a new service. Internal services get a container; pass --host for an existing server.\nExample: mariadb-services create app --storage volume"
    )]
    Create(CreateArgs),

    /// Remove a service's container, its storage and its registration
    #[command(
        about = "Destroy a service",
        long_about = "Removes the container and default storage, then unregisters the service. Custom volumes are kept.\nExample: mariadb-services destroy app --yes"
    )]
    Destroy {
        /// Service name (defaults to the default service)
        name: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Allow destroying the default service
        #[arg(short, long)]
        force: bool,
    },

    /// Start a service's container
    Start {
        name: Option<String>,
    },

    /// Remove a service's container, keeping its data
    Stop {
        name: Option<String>,
    },

    /// Recreate and start a service's container
    Restart {
        name: Option<String>,
    },

    /// Set the default service
    Use {
        name: String,
    },

    /// List services with their container status
    List,

    /// Change storage or image settings; applied on next restart
    Upgrade(UpgradeArgs),

    /// Open an interactive client session
    Shell {
        name: Option<String>,

        #[arg(short, long)]
        database: Option<String>,
    },

    /// Stream a dump to stdout
    Dump {
        name: Option<String>,

        #[arg(short, long)]
        database: Option<String>,
    },

    /// Write a dump to the service's dump directory
    Backup {
        name: Option<String>,

        #[arg(short, long)]
        database: Option<String>,

        /// File name (".sql" is appended if missing)
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Load a backup file into a database
    Restore {
        name: Option<String>,

        #[arg(short, long)]
        database: Option<String>,

        #[arg(short, long)]
        file: Option<String>,
    },

    /// Delete a backup file
    DeleteBackup {
        name: Option<String>,

        #[arg(short, long)]
        database: Option<String>,

        #[arg(short, long)]
        file: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List backups of a service
    Backups {
        name: Option<String>,
    },

    /// Manage the admin front-end
    #[command(subcommand)]
    Admin(AdminCommand),

    /// Check that Docker is installed and running
    Doctor,

    /// Generate shell completion scripts
    #[command(
        about = "Generate completions",
        long_about = "Generates shell completion scripts.\nExample: mariadb-services completion --shell bash > mariadb-services.bash"
    )]
    Completion(Completion),
}

#[derive(clap::Args, Debug, Clone)]
pub struct CreateArgs {
    pub name: String,

    /// Hostname of an existing server (makes the service external)
    #[arg(long)]
    pub host: Option<String>,

    #[arg(short, long)]
    pub username: Option<String>,

    #[arg(short, long)]
    pub password: Option<String>,

    #[arg(long)]
    pub root_password: Option<String>,

    #[arg(long)]
    pub password_hash: Option<String>,

    #[arg(long, default_value_t = StorageMode::Filesystem)]
    pub storage: StorageMode,

    /// Custom volume name (never deleted by destroy)
    #[arg(long)]
    pub volume: Option<String>,

    #[arg(long)]
    pub image: Option<String>,

    #[arg(long)]
    pub image_version: Option<String>,

    /// Extra container environment, KEY=VALUE
    #[arg(short, long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct UpgradeArgs {
    pub name: Option<String>,

    #[arg(long)]
    pub storage: Option<StorageMode>,

    #[arg(long)]
    pub volume: Option<String>,

    #[arg(long)]
    pub image: Option<String>,

    #[arg(long)]
    pub image_version: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AdminCommand {
    /// Regenerate the server list and recreate the admin container
    Refresh {
        /// Hostname the front-end is served under
        #[arg(long)]
        hostname: Option<String>,
    },
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

/// Shared state for one command invocation.
pub struct Context {
    pub config: AppConfig,
    pub store: ConfigStore,
    pub prompter: Arc<dyn Prompter>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
}

impl Context {
    /// Open the config store under the configured home.
    pub fn open(config: AppConfig, prompter: Arc<dyn Prompter>) -> anyhow::Result<Self> {
        let store = ConfigStore::open(JsonFileBackend::new(config.paths.store_path()))?;
        Ok(Self {
            config,
            store,
            prompter,
            runtime: None,
        })
    }

    /// Use `runtime` instead of connecting to Docker.
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// The container runtime, connecting on first use.
    pub async fn runtime(&mut self) -> anyhow::Result<Arc<dyn ContainerRuntime>> {
        if let Some(runtime) = &self.runtime {
            return Ok(runtime.clone());
        }
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect().await?);
        self.runtime = Some(runtime.clone());
        Ok(runtime)
    }

    /// Rebuild the admin front-end after a topology change.
    pub async fn resync_admin(&mut self) -> anyhow::Result<()> {
        let runtime = self.runtime().await?;
        AdminAggregator::new(runtime, &self.config)
            .resync(&self.store)
            .await?;
        Ok(())
    }
}

/// Dispatch a parsed command.
pub async fn run_command(cli: Cli, prompter: Arc<dyn Prompter>) -> anyhow::Result<()> {
    match cli.command {
        Command::Completion(completion) => completion.run(),
        Command::Doctor => run_doctor_command().await,
        command => {
            let config = AppConfig::resolve(cli.home)?;
            let mut ctx = Context::open(config, prompter)?;
            run_in_context(&mut ctx, command).await
        }
    }
}

/// Run a service or data command against an opened context.
pub async fn run_in_context(ctx: &mut Context, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Shell { .. }
        | Command::Dump { .. }
        | Command::Backup { .. }
        | Command::Restore { .. }
        | Command::DeleteBackup { .. }
        | Command::Backups { .. } => run_data_command(ctx, command).await,
        Command::Admin(AdminCommand::Refresh { hostname }) => {
            if let Some(hostname) = hostname {
                ctx.store.set_admin_hostname(hostname);
                ctx.store.save()?;
            }
            ctx.resync_admin().await?;
            println!("Admin front-end: http://{}", ctx.store.admin_hostname());
            Ok(())
        }
        Command::Completion(completion) => completion.run(),
        Command::Doctor => run_doctor_command().await,
        command => run_service_command(ctx, command).await,
    }
}
