//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::cli::{self, CliConfig, Commands, SystemCommands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::{AppStorage, DataSubdir};
use crate::data::{DatasetRegistry, DuckdbService};
use crate::domain::QueryCache;

pub struct CoreApp {
    pub config: AppConfig,
    pub storage: AppStorage,
    pub db: Arc<DuckdbService>,
    pub registry: Arc<DatasetRegistry>,
    pub cache: Arc<QueryCache>,
    pub shutdown: ShutdownService,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        match command {
            Some(Commands::System {
                command: system_cmd,
            }) => {
                return Self::handle_system_command(system_cmd, &cli_config);
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init(config.data_dir.as_deref()).await?;

        let db = Arc::new(
            DuckdbService::init(
                &storage.subdir(DataSubdir::Duckdb),
                config.limits.query_timeout_secs,
            )
            .await
            .context("Failed to initialize the analytical store")?,
        );

        let registry = Arc::new(DatasetRegistry::new(db.clone()));
        let cache = Arc::new(QueryCache::default());
        let shutdown = ShutdownService::new(db.clone());

        Ok(Self {
            config,
            storage,
            db,
            registry,
            cache,
            shutdown,
        })
    }

    async fn start_server(app: Self) -> Result<()> {
        app.shutdown.listen_for_signals();

        if let Some(handle) = app
            .registry
            .start_cleanup_task(&app.config.datasets, app.shutdown.subscribe())
        {
            app.shutdown.register(handle);
        }

        crate::api::server::start(&app).await?;

        // Server returned after the graceful-shutdown signal
        app.shutdown.shutdown().await;
        Ok(())
    }

    fn handle_system_command(cmd: SystemCommands, cli: &CliConfig) -> Result<()> {
        match cmd {
            SystemCommands::Prune { yes } => Self::prune_data(yes, cli),
        }
    }

    fn prune_data(skip_confirm: bool, cli: &CliConfig) -> Result<()> {
        let data_dir = AppStorage::resolve_data_dir(cli.data_dir.as_deref());

        if !data_dir.exists() {
            println!(
                "Nothing to prune. Data directory does not exist: {}",
                data_dir.display()
            );
            return Ok(());
        }

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        println!("This will permanently delete the local data directory:");
        println!("  {}", data_dir.display());
        println!();
        println!(
            "Make sure the server is not running. \
             Deleting data while the server is running will cause data corruption."
        );

        if !skip_confirm {
            print!("\nContinue? [y/N] ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
                println!("Aborted.");
                return Ok(());
            }
        }

        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("Failed to delete data directory: {}", data_dir.display()))?;
        println!("Pruned: {}", data_dir.display());
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }
}
