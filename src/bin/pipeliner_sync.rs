use clap::{Parser, Subcommand};
use log::{error, info, warn};
use pipeliner_sync::command::{render_status, render_table};
use pipeliner_sync::events::SkipLogListener;
use pipeliner_sync::logging::{self, LogMode};
use pipeliner_sync::remote::HttpRemoteClient;
use pipeliner_sync::{
    load_sync_config, standard_registry, DirectionSet, MessageBus, ModelType, RunOutcome,
    ScopeTracker, ScrollCursorStore, SledLocalStore, StrategyFilter, SyncCommand, SyncConfig,
    SyncDb, SyncDirection, SyncError, SyncOrchestrator, SyncRequest, SyncResult, SyncStatusLock,
};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the sync configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured (or selected) strategies
    Sync {
        /// Direction to run; repeat for both (default: push and pull)
        #[arg(short, long = "method", value_enum)]
        methods: Vec<SyncDirection>,

        /// Strategy to run, qualified or short name; repeatable
        #[arg(short, long = "strategy")]
        strategies: Vec<String>,

        /// Acting user recorded on events
        #[arg(short, long)]
        user_id: Option<String>,

        /// Label stored on the lock row while the run is active
        #[arg(long)]
        status_owner: Option<String>,

        /// Route logs to the background channel instead of the terminal
        #[arg(short, long)]
        quiet: bool,
    },
    /// Run the strategies for a single local record and print the result table
    SyncModel {
        #[arg(value_enum)]
        model_type: ModelType,

        model_id: String,

        #[arg(short, long = "method", value_enum)]
        methods: Vec<SyncDirection>,

        #[arg(short, long)]
        user_id: Option<String>,

        #[arg(short, long)]
        quiet: bool,
    },
    /// Show the sync status lock
    Status {},
    /// Drop every stored scroll cursor so the next pull starts from the beginning
    FlushCursors {},
    /// Replace the enabled scope set
    Scopes {
        #[arg(required = true)]
        scopes: Vec<String>,
    },
}

impl Commands {
    fn quiet(&self) -> bool {
        match self {
            Commands::Sync { quiet, .. } | Commands::SyncModel { quiet, .. } => *quiet,
            _ => false,
        }
    }
}

fn directions(methods: &[SyncDirection]) -> DirectionSet {
    if methods.is_empty() {
        DirectionSet::both()
    } else {
        DirectionSet::from_directions(methods)
    }
}

/// Everything a run needs, opened from one configuration.
struct Runtime {
    config: SyncConfig,
    db: SyncDb,
    lock: Arc<SyncStatusLock>,
    cursors: Arc<ScrollCursorStore>,
}

impl Runtime {
    fn open(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let db = SyncDb::open(&config.storage_path)?;
        let lock = Arc::new(SyncStatusLock::new(&db, &config.lock_name, config.lock_ttl_secs));
        let cursors = Arc::new(ScrollCursorStore::new(db.clone()));
        Ok(Self {
            config,
            db,
            lock,
            cursors,
        })
    }

    fn scope_tracker(&self) -> ScopeTracker {
        ScopeTracker::new(self.db.clone(), Arc::clone(&self.cursors))
    }

    /// Fail when a sync holds the lock; cursor maintenance must not race a pull
    fn ensure_idle(&self, action: &str) -> SyncResult<()> {
        if self.lock.running()? {
            return Err(SyncError::Configuration(format!(
                "'{}' is running; refusing to {} during a sync",
                self.lock.lock_name(),
                action
            )));
        }
        Ok(())
    }

    fn command(&self, bus: Arc<MessageBus>) -> SyncResult<SyncCommand> {
        let remote = Arc::new(HttpRemoteClient::from_config(&self.config.remote)?);
        let local = Arc::new(SledLocalStore::new(self.db.clone()));
        let registry = standard_registry(&self.config, remote, local.clone())?;
        let orchestrator = SyncOrchestrator::new(
            Arc::new(registry),
            Arc::clone(&self.lock),
            self.cursors.clone(),
            local,
            bus,
        );
        Ok(SyncCommand::new(orchestrator)
            .with_scopes(self.scope_tracker(), self.config.enabled_scopes.clone()))
    }
}

async fn run(cli: Cli) -> SyncResult<ExitCode> {
    let config = load_sync_config(cli.config.as_deref())?;
    let mode = if cli.command.quiet() {
        LogMode::Background {
            log_file: config.log_file.clone(),
        }
    } else {
        LogMode::Interactive
    };
    if let Err(e) = logging::init(mode, &config.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let runtime = Runtime::open(config)?;

    match cli.command {
        Commands::Sync {
            methods,
            strategies,
            user_id,
            status_owner,
            ..
        } => {
            let bus = Arc::new(MessageBus::new());
            let listener = SkipLogListener::spawn(&bus);
            let command = runtime.command(bus)?;

            let mut request =
                SyncRequest::new(directions(&methods)).with_filter(StrategyFilter::new(strategies));
            if let Some(user_id) = user_id {
                request = request.with_causer(user_id);
            }
            if let Some(owner) = status_owner {
                request = request.with_status_owner(owner);
            }

            let outcome = command.run(&request).await;
            let skipped = listener.stop();
            let outcome = outcome?;
            if let Some(report) = outcome.report() {
                info!(
                    "🏁 {} passes, {} failed, {} skip events",
                    report.applied.len(),
                    report.failed(),
                    skipped.len()
                );
            }
            Ok(ExitCode::from(outcome.exit_code()))
        }
        Commands::SyncModel {
            model_type,
            model_id,
            methods,
            user_id,
            ..
        } => {
            let command = runtime.command(Arc::new(MessageBus::new()))?;
            let outcome = command
                .run_model(directions(&methods), model_type, &model_id, user_id.as_deref())
                .await?;
            match &outcome {
                RunOutcome::LockBusy(status) => {
                    println!("Sync already in progress\n{}", render_status(status));
                    Ok(ExitCode::SUCCESS)
                }
                RunOutcome::Completed(report) | RunOutcome::StoppedEarly(report) => {
                    print!("{}", render_table(report));
                    if report.all_ok() {
                        Ok(ExitCode::from(outcome.exit_code()))
                    } else {
                        Ok(ExitCode::FAILURE)
                    }
                }
            }
        }
        Commands::Status {} => {
            print!("{}", render_status(&runtime.lock.status()?));
            Ok(ExitCode::SUCCESS)
        }
        Commands::FlushCursors {} => {
            runtime.ensure_idle("flush cursors")?;
            let removed = runtime.cursors.invalidate_all()?;
            println!("Removed {} scroll cursors", removed);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scopes { scopes } => {
            runtime.ensure_idle("change scopes")?;
            if runtime.scope_tracker().apply(&scopes)? {
                println!("Enabled scopes updated; scroll cursors invalidated");
            } else {
                println!("Enabled scopes unchanged");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Entry point for the Pipeliner sync CLI.
///
/// Exit codes: `0` for a completed run or a run skipped because another sync
/// holds the lock, `1` for configuration and fatal errors (and for a
/// `sync-model` run with a failed strategy), `130` when a termination signal
/// stopped the run early.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            if e.is_configuration() {
                warn!("Invalid invocation: {}", e);
            } else {
                error!("❌ Sync failed: {}", e);
            }
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
