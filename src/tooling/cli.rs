//! CLI Tooling
//!
//! Command-line interface for running a coordinator, a watching node, or a
//! single inspection of the local tree.

use crate::client::RemoteCoordinator;
use crate::config::{ConfigLoader, SyncConfig};
use crate::coordinator::{Coordinator, CoordinatorService};
use crate::error::SyncError;
use crate::reconcile::{EngineSettings, ReconciliationEngine, SledSeenIndex};
use crate::server::CoordinatorServer;
use crate::table::build_table;
use crate::tooling::format::{format_file_table_text, format_plan_text, format_report_text};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// driftsync - polling directory reconciliation
#[derive(Parser)]
#[command(name = "driftsync")]
#[command(about = "Keep a directory in sync with a coordinator by periodic reconciliation")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory to sync (overrides `root` in the config)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Configuration file path, layered over the global config
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the coordinator for the root directory
    Serve {
        /// Bind address (overrides `listen`)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Run the reconciliation loop until interrupted
    Watch {
        /// Coordinator address (overrides `coordinator`)
        #[arg(long)]
        coordinator: Option<String>,
        /// Seconds between cycles (overrides `sync.interval_secs`)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Run one reconciliation cycle and print the report
    Sync {
        #[arg(long)]
        coordinator: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show what the next cycle would do without changing anything
    Plan {
        #[arg(long)]
        coordinator: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the local file table
    Table {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl Commands {
    /// Whether the command needs a usable credential and network settings.
    fn talks_to_peer(&self) -> bool {
        !matches!(self, Commands::Table { .. })
    }
}

/// Resolved configuration and root for one invocation.
pub struct CliContext {
    config: SyncConfig,
    root: PathBuf,
}

impl CliContext {
    pub fn new(cli: &Cli) -> Result<Self, SyncError> {
        let explicit = cli.config.as_deref();
        let mut config = if cli.command.talks_to_peer() {
            ConfigLoader::load(explicit)?
        } else {
            ConfigLoader::load_unvalidated(explicit)?
        };

        if let Some(level) = &cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &cli.log_format {
            config.logging.format = format.clone();
        }
        if let Some(output) = &cli.log_output {
            config.logging.output = output.clone();
        }
        if let Some(file) = &cli.log_file {
            config.logging.file = Some(file.clone());
        }

        let root = config.resolve_root(cli.root.as_deref());
        if !root.is_dir() {
            return Err(SyncError::Config(format!("root {} is not a directory", root.display())));
        }
        Ok(Self { config, root })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn execute(&self, command: &Commands) -> Result<String, SyncError> {
        match command {
            Commands::Serve { listen } => {
                let addr = listen.clone().unwrap_or_else(|| self.config.listen.clone());
                self.serve(&addr)?;
                Ok(String::new())
            }
            Commands::Watch {
                coordinator,
                interval_secs,
            } => {
                let engine = self.engine(coordinator.as_deref())?;
                let interval = interval_secs
                    .map(std::time::Duration::from_secs)
                    .unwrap_or_else(|| self.config.interval());
                let stop = engine.stop_handle();
                stop_on_ctrl_c(move || *stop.write() = false);
                engine.run(interval);
                Ok(String::new())
            }
            Commands::Sync { coordinator, format } => {
                let report = self.engine(coordinator.as_deref())?.run_cycle()?;
                match format {
                    OutputFormat::Json => to_json(&report),
                    OutputFormat::Text => Ok(format_report_text(&report)),
                }
            }
            Commands::Plan { coordinator, format } => {
                let planned = self.engine(coordinator.as_deref())?.dry_run()?;
                match format {
                    OutputFormat::Json => to_json(&planned),
                    OutputFormat::Text => Ok(format_plan_text(&planned)),
                }
            }
            Commands::Table { format } => {
                let table = build_table(&self.root)?;
                match format {
                    OutputFormat::Json => to_json(&table.iter().collect::<Vec<_>>()),
                    OutputFormat::Text => Ok(format_file_table_text(&table)),
                }
            }
        }
    }

    fn engine(&self, coordinator: Option<&str>) -> Result<ReconciliationEngine<RemoteCoordinator>, SyncError> {
        let addr = coordinator
            .map(str::to_string)
            .or_else(|| self.config.coordinator.clone())
            .ok_or_else(|| SyncError::Config("no coordinator address configured".into()))?;
        let remote = RemoteCoordinator::new(addr, self.config.credential(), self.config.client_timeouts());
        let seen = SledSeenIndex::open(&self.config.seen_index_dir(&self.root)?)?;
        let settings: EngineSettings = self.config.engine_settings();
        Ok(ReconciliationEngine::new(self.root.clone(), remote, Box::new(seen), settings))
    }

    fn serve(&self, addr: &str) -> Result<(), SyncError> {
        let coordinator: Arc<dyn Coordinator> =
            Arc::new(CoordinatorService::new(self.root.clone(), self.config.coordinator_settings()));
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        runtime.block_on(async {
            let server = CoordinatorServer::bind(addr, coordinator, self.config.credential()).await?;
            info!(root = %self.root.display(), "Serving");
            server
                .serve_until(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
        })
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, SyncError> {
    serde_json::to_string_pretty(value).map_err(|e| SyncError::Protocol(e.to_string()))
}

/// Run `on_signal` once when Ctrl-C arrives, from a helper thread.
fn stop_on_ctrl_c<F: FnOnce() + Send + 'static>(on_signal: F) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::warn!(error = %e, "Could not install Ctrl-C handler");
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            info!("Interrupt received, stopping after the current cycle");
            on_signal();
        }
    });
}
