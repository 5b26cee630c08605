//! Circles indexer - trust-flow edge graph for the transfer pathfinder
//!
//! This binary provides:
//! - Full edge-graph rebuilds from the Circles subgraph
//! - Event-driven edge updates from hub `Trust` and token `Transfer` logs
//! - Debounced solver snapshot export
//! - One-shot transfer-step resolution through the external solver

use anyhow::{bail, Context, Result};
use circles_indexer::config::{Config, DatabaseConfig, LoggingConfig};
use circles_indexer::storage::Storage;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "circles-indexer")]
#[command(version, about = "Circles trust-flow edge indexer and transfer-step resolver", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "circles-indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the indexer service (listener, updater, rebuilds, export)
    Run,

    /// Rebuild the edge graph from the subgraph once and export it
    Rebuild,

    /// Write the solver snapshot file
    Export {
        /// Output path (defaults to export.edges_file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve transfer steps between two accounts and print them as JSON
    Steps {
        /// Sender address
        #[arg(long)]
        from: String,

        /// Recipient address
        #[arg(long)]
        to: String,

        /// Amount to send (integer, smallest unit)
        #[arg(long)]
        value: String,

        /// Maximum hops (defaults to pathfinder.default_hops)
        #[arg(long)]
        hops: Option<u32>,
    },

    /// Show edge count and sync progress
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://circles.db")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_indexer(&cli.config, cli.debug).await,
        Commands::Rebuild => rebuild_once(&cli.config, cli.debug).await,
        Commands::Export { output } => export_once(&cli.config, cli.debug, output).await,
        Commands::Steps {
            from,
            to,
            value,
            hops,
        } => resolve_steps(&cli.config, cli.debug, &from, &to, &value, hops).await,
        Commands::Status => show_status(&cli.config, cli.debug).await,
        Commands::InitDb { database_url } => {
            init_logging(cli.debug, &LoggingConfig::default());
            init_database(&database_url).await
        }
    }
}

/// Initialize tracing subscriber for logging.
///
/// `RUST_LOG` takes precedence over the configured level; `--debug` over both.
fn init_logging(debug: bool, logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("circles_indexer=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("circles_indexer={}", logging.level)))
    };

    let fmt_layer = fmt::layer().with_target(true).with_line_number(true);

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }
}

/// Load the config file and install logging from its `[logging]` section.
fn load_config(config_path: &str, debug: bool) -> Result<Config> {
    let config = Config::from_file(config_path).context("Failed to load configuration")?;
    init_logging(debug, &config.logging);

    info!("Circles indexer v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    Ok(config)
}

/// Connect with the configured pool settings and apply migrations.
async fn open_storage(database: &DatabaseConfig) -> Result<Storage> {
    let storage = Storage::new(
        &database.url,
        Some(database.max_connections),
        Some(database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(storage)
}

fn subgraph_client(config: &Config) -> Result<circles_indexer::subgraph::SubgraphClient> {
    use circles_indexer::subgraph::{EndpointService, SubgraphClient};

    let endpoints = EndpointService::new(config.indexer.endpoints.clone())?;
    SubgraphClient::new(
        endpoints,
        config.indexer.page_size,
        config.indexer.request_timeout_secs,
    )
}

/// Turn the exit of a long-running task into the process result.
fn task_exit(name: &str, result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => {
            warn!("{} exited unexpectedly", name);
            Ok(())
        }
        Ok(Err(e)) => Err(e).with_context(|| format!("{} failed", name)),
        Err(e) => Err(anyhow::anyhow!("{} task panicked: {}", name, e)),
    }
}

/// Main indexer service
async fn run_indexer(config_path: &str, debug: bool) -> Result<()> {
    use circles_indexer::contracts::HubContractReader;
    use circles_indexer::export::ExportScheduler;
    use circles_indexer::listener::{RpcProvider, SyncEngine};
    use circles_indexer::rebuild_service::RebuildService;
    use circles_indexer::updater::IncrementalUpdater;

    let config = load_config(config_path, debug)?;

    info!("  Chain ID: {}", config.network.chain_id);
    info!("  RPC URL: {}", config.network.rpc_url);
    info!("  Hub: {}", config.contracts.hub);
    info!("  Database: {}", config.database.url);
    info!("  Subgraph endpoints: {}", config.indexer.endpoints.len());

    let storage = open_storage(&config.database).await?;
    info!("Database initialized");

    let provider = RpcProvider::new(&config.network.rpc_url, config.contracts.hub)
        .context("Failed to create RPC provider")?;

    let chain_id = provider
        .get_chain_id()
        .await
        .context("Failed to query chain id")?;
    if chain_id != config.network.chain_id {
        bail!(
            "RPC reports chain {} but the configuration expects chain {}",
            chain_id,
            config.network.chain_id
        );
    }
    storage.ensure_chain_id(chain_id).await?;

    info!("RPC provider initialized");

    let subgraph = Arc::new(subgraph_client(&config)?);
    let contracts = Arc::new(HubContractReader::new(
        provider.inner().clone(),
        config.contracts.hub,
    ));

    // Listener -> updater
    let (sender, receiver) = tokio::sync::mpsc::channel(config.updater.channel_capacity);

    let sync_engine = SyncEngine::new(
        Arc::new(provider),
        storage.clone(),
        config.sync.clone(),
        sender,
    );
    let sync_handle = tokio::spawn(async move { sync_engine.run().await });

    let rebuild_service = RebuildService::new(
        storage.clone(),
        subgraph.clone(),
        Duration::from_secs(config.rebuild.interval_secs),
    );

    let updater = IncrementalUpdater::new(
        storage.clone(),
        contracts,
        subgraph.clone(),
        config.updater.max_concurrency,
    )
    .with_rebuild(rebuild_service.clone());
    let updater_handle = tokio::spawn(async move {
        updater.consume(receiver).await;
        Ok::<(), anyhow::Error>(())
    });

    info!("Event listener started");

    let rebuild_handle = tokio::spawn(async move { rebuild_service.run().await });

    info!(
        "Rebuild service started (interval: {}s)",
        config.rebuild.interval_secs
    );

    let export_scheduler = ExportScheduler::new(
        storage.clone(),
        config.export.edges_file.clone(),
        Duration::from_millis(config.export.debounce_ms),
    );
    let export_handle = tokio::spawn(async move { export_scheduler.run().await });

    let health_handle = tokio::spawn({
        let endpoints = subgraph.endpoints().clone();
        let interval = Duration::from_secs(config.indexer.health_check_interval_secs);
        let subgraph = subgraph.clone();
        async move {
            endpoints.run_health_checks(subgraph, interval).await;
            Ok::<(), anyhow::Error>(())
        }
    });

    info!("Indexer is running. Press Ctrl+C to stop.");

    let result = tokio::select! {
        result = sync_handle => task_exit("Sync engine", result),
        result = updater_handle => task_exit("Incremental updater", result),
        result = rebuild_handle => task_exit("Rebuild service", result),
        result = export_handle => task_exit("Export scheduler", result),
        result = health_handle => task_exit("Endpoint health check", result),
        result = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, gracefully shutting down...");
            result.context("Failed to listen for Ctrl+C")
        }
    };

    storage.close().await;
    result
}

/// Rebuild once from the subgraph, then export
async fn rebuild_once(config_path: &str, debug: bool) -> Result<()> {
    use circles_indexer::export::export_snapshot;
    use circles_indexer::rebuild_service::RebuildService;

    let config = load_config(config_path, debug)?;
    let storage = open_storage(&config.database).await?;

    let service = RebuildService::new(
        storage.clone(),
        Arc::new(subgraph_client(&config)?),
        Duration::from_secs(config.rebuild.interval_secs),
    );

    let outcome = async {
        let report = service.rebuild().await?;
        let export = export_snapshot(&storage, &config.export.edges_file).await?;

        println!("\n=== Rebuild Complete ===\n");
        println!("  Safes: {}", report.statistics.safes);
        println!("  Trust Connections: {}", report.statistics.connections);
        println!("  Token Balances: {}", report.statistics.tokens);
        println!("  Derived Edges: {}", report.derived);
        println!(
            "  Added / Updated / Removed: {} / {} / {}",
            report.summary.added, report.summary.updated, report.summary.removed
        );
        println!("  Duration: {}ms", report.duration_ms);
        println!(
            "  Snapshot: {} ({} edges, {} bytes)",
            export.path.display(),
            export.edges,
            export.bytes
        );
        println!();

        Ok::<(), anyhow::Error>(())
    }
    .await;

    storage.close().await;
    outcome
}

/// Write the solver snapshot file
async fn export_once(config_path: &str, debug: bool, output: Option<PathBuf>) -> Result<()> {
    use circles_indexer::export::export_snapshot;

    let config = load_config(config_path, debug)?;
    let storage = open_storage(&config.database).await?;
    let path = output.unwrap_or_else(|| config.export.edges_file.clone());

    let result = export_snapshot(&storage, &path).await;
    storage.close().await;

    let report = result?;
    info!(
        "Exported {} edges ({} bytes) to {}",
        report.edges,
        report.bytes,
        report.path.display()
    );

    Ok(())
}

/// Resolve transfer steps and print them as JSON
async fn resolve_steps(
    config_path: &str,
    debug: bool,
    from: &str,
    to: &str,
    value: &str,
    hops: Option<u32>,
) -> Result<()> {
    use circles_indexer::pathfinder::{ProcessSolver, TransferStepResolver};

    let config = load_config(config_path, debug)?;
    let storage = open_storage(&config.database).await?;

    let solver = ProcessSolver::new(
        config.pathfinder.executable.clone(),
        config.pathfinder.args.clone(),
        Duration::from_millis(config.pathfinder.timeout_ms),
    );
    let resolver = TransferStepResolver::new(
        storage.clone(),
        Arc::new(solver),
        config.export.edges_file.clone(),
        config.pathfinder.default_hops,
    );

    let result = resolver.resolve_transfer_steps(from, to, value, hops).await;
    storage.close().await;

    let steps = match result {
        Ok(steps) => steps,
        Err(e) if e.is_client_error() => bail!("Invalid transfer request: {}", e),
        Err(e) => return Err(e).context("Failed to resolve transfer steps"),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&steps).context("Failed to serialize transfer steps")?
    );

    Ok(())
}

/// Show indexer status and sync progress
async fn show_status(config_path: &str, debug: bool) -> Result<()> {
    // Fall back to the default database ONLY if the config file doesn't exist
    let database = match Config::from_file(config_path) {
        Ok(config) => {
            init_logging(debug, &config.logging);
            info!("Using database from config: {}", config.database.url);
            config.database
        }
        Err(e) => {
            let is_not_found = e.chain().any(|cause| {
                cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
            });

            init_logging(debug, &LoggingConfig::default());
            if !is_not_found {
                return Err(e).context("Failed to load config file");
            }

            info!("Config file not found, using default database: sqlite://circles.db");
            DatabaseConfig {
                url: "sqlite://circles.db".to_string(),
                max_connections: 1,
                min_connections: 1,
            }
        }
    };

    let storage = open_storage(&database).await?;

    let sync_state = storage.get_sync_state().await?;
    let stats = storage.stats().await?;

    println!("\n=== Circles Indexer Status ===\n");
    println!("Sync Progress:");
    println!("  Chain ID: {}", sync_state.chain_id);
    println!("  Last Block: {}", sync_state.last_block_number);
    println!("  Last Block Hash: {}", sync_state.last_block_hash);
    println!(
        "  Last Updated: {}",
        chrono::DateTime::from_timestamp(sync_state.updated_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    );

    println!("\nEdge Store:");
    println!("  Total Edges: {}", stats.edge_count);
    println!("  Distinct Tokens: {}", stats.token_count);
    println!();

    storage.close().await;

    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    // Connect to database with default pool settings
    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Edges: {}", stats.edge_count);
    info!("  Last block: {}", stats.last_block_number);

    storage.close().await;

    Ok(())
}
