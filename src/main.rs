//! Spindle - latency-aware weighted-random reverse proxy
//!
//! Binds two listeners: the data plane that accepts client connections and
//! forwards them to backends, and a metrics surface exposing the backend
//! registry as JSON. A background health checker keeps the registry's
//! observations current.

use clap::{Parser, Subcommand};
use spindle::health::HealthChecker;
use spindle::{config::Config, metrics, proxy::ProxyServer, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "spindle")]
#[command(about = "Latency-aware weighted-random reverse proxy", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "SPINDLE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SPINDLE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy
    Start {
        /// Data-plane host override
        #[arg(long)]
        host: Option<String>,

        /// Data-plane port override
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List configured backends
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = load_config(cli.config.clone())?;
            if let Some(host) = host {
                config.proxy.host = host;
            }
            if let Some(port) = port {
                config.proxy.port = port;
            }

            info!("Spindle v{} starting", env!("CARGO_PKG_VERSION"));
            run(config).await?;
        },

        Commands::Validate {
            config: config_path,
        } => match Config::from_file(&config_path) {
            Ok(_) => {
                println!("Configuration valid");
            },
            Err(e) => {
                eprintln!("Configuration errors found:");
                eprintln!("{}", e);
                std::process::exit(1);
            },
        },

        Commands::List => {
            let config = load_config(cli.config.clone())?;
            println!("Configured backends:");
            for backend in &config.backends {
                println!(
                    "  - {}:{} (weight {})",
                    backend.host, backend.port, backend.weight
                );
            }
        },
    }

    Ok(())
}

/// Wire up and run the data plane, metrics surface, and health checker
/// until a shutdown signal arrives.
async fn run(config: Config) -> Result<()> {
    let server = Arc::new(ProxyServer::new(config.clone())?);
    let registry = server.registry();
    let shutdown = server.shutdown_handle();

    let checker = HealthChecker::new(
        Arc::clone(&registry),
        config.health.clone(),
        shutdown.subscribe(),
    );
    let health_task = tokio::spawn(checker.run());

    let metrics_task = tokio::spawn(metrics::serve(
        Arc::clone(&registry),
        config.metrics.addr(),
        shutdown.subscribe(),
    ));

    let mut proxy_task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    let proxy_result = tokio::select! {
        result = &mut proxy_task => {
            result.map_err(|e| spindle::Error::Server(format!("Proxy task failed: {}", e)))?
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown.send(());
            proxy_task
                .await
                .map_err(|e| spindle::Error::Server(format!("Proxy task failed: {}", e)))?
        },
    };

    // Stop the background tasks even when the proxy exited on its own
    let _ = shutdown.send(());
    let _ = health_task.await;
    if let Ok(result) = metrics_task.await {
        result?;
    }
    proxy_result?;

    info!("Spindle stopped");
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(&path),
        None => Ok(Config::default()),
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}
