//! maskstream - CDC-driven masking and transformation router
//!
//! # Usage
//!
//! ```bash
//! # Route change events from a capture file
//! maskstream -c maskstream.yaml
//!
//! # Route change events piped in on stdin
//! tail -f events.ndjson | maskstream -c maskstream.yaml
//!
//! # Validate configuration
//! maskstream -c maskstream.yaml validate
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use maskstream::source::{ChangeSource, JsonLinesSource};
use maskstream::{ClassLibrary, Config, Router, RuleLibrary};

#[derive(Parser)]
#[command(name = "maskstream")]
#[command(version, about = "CDC-driven masking and transformation router")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "maskstream.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume change events and route them (default)
    Run,
    /// Validate configuration and libraries, then exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Validate => validate_config(config),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn run(config: Config) -> Result<()> {
    info!("Starting maskstream");

    let mut source = JsonLinesSource::open(&config.source).await?;
    let router = Arc::new(Mutex::new(Router::new(&config)));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Worker task: delivers events to the router strictly one at a time,
    // in source order. The only interleaving point is the shutdown signal
    // between events.
    let worker_router = router.clone();
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut worker = tokio::spawn(async move {
        pump_events(&mut source, &worker_router, &mut shutdown_rx).await
    });

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal (Ctrl+C)");
            let _ = shutdown_tx.send(());
            worker.await
        }
        result = &mut worker => result,
    };

    router.lock().await.shutdown().await;

    match result {
        Ok(Ok(())) => {
            info!("Shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            // The router has already torn every job down.
            error!("Fatal routing error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Event worker task failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Deliver events from the source to the router until end of stream, a
/// fatal routing error, or a shutdown signal.
async fn pump_events<S: ChangeSource>(
    source: &mut S,
    router: &Mutex<Router>,
    shutdown: &mut broadcast::Receiver<()>,
) -> maskstream::Result<()> {
    loop {
        let record = tokio::select! {
            record = source.next_record() => record?,
            _ = shutdown.recv() => return Ok(()),
        };
        let Some(record) = record else {
            info!("Change event source reached end of stream");
            return Ok(());
        };
        router
            .lock()
            .await
            .handle_raw(&record.value, record.key.as_deref())
            .await?;
    }
}

fn validate_config(config: Config) -> Result<()> {
    println!("✓ Configuration valid!\n");

    let rules = RuleLibrary::load(config.rules_library.as_deref());
    let classes = ClassLibrary::load(config.class_library.as_deref(), &rules);
    println!("Libraries:");
    println!("  Rules:   {} loaded", rules.len());
    println!("  Classes: {} classification entr(ies)", classes.entries().len());
    println!();

    let target = config.target_spec();
    println!("Targets:");
    match &target.path {
        Some(path) => println!("  File:     {} (insert-only)", path.display()),
        None => println!("  File:     none"),
    }
    match &target.dsn {
        Some(dsn) => println!("  Database: DSN '{}'", dsn),
        None => println!("  Database: none (updates/deletes will be skipped)"),
    }
    println!();

    println!("Engine:");
    println!("  Command: {}", config.engine.command);
    println!("  Script flag: {}", config.engine.spec_flag);
    println!();

    println!(
        "Schema change log: {}",
        config.schema_change_log.display()
    );
    match config.source.path.as_deref() {
        Some(path) => println!("Event source: {}", path.display()),
        None => println!("Event source: stdin"),
    }

    Ok(())
}
