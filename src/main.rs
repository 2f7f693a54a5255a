use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bookd::booking::BookingServer;
use bookd::config::{Config, StoreBackend};

#[derive(Parser)]
#[command(
    name = "bookd",
    version,
    about = "Booking backend for ArgoCD Applications",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the booking server
    Serve {
        /// Config file path; environment variables are used when absent
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the bind address
        #[arg(short, long)]
        bind: Option<std::net::SocketAddr>,

        /// Override the store backend (kube, memory)
        #[arg(long)]
        store: Option<String>,
    },

    /// Load and validate the configuration, then exit
    CheckConfig {
        /// Config file path; environment variables are used when absent
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            store,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            match store.as_deref() {
                Some("memory") => config.store.backend = StoreBackend::Memory,
                Some("kube") => config.store.backend = StoreBackend::Kube,
                Some(other) => anyhow::bail!("unknown store backend: {other}"),
                None => {}
            }
            if let Some(format) = &cli.log_format {
                config.logging.format = format.clone();
            }
            config.validate()?;

            setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;
            tracing::info!(
                bind = %config.server.bind_address,
                backend = ?config.store.backend,
                privileged_group = %config.booking.privileged_group,
                "bookd starting"
            );

            if let Err(err) = serve(config).await {
                tracing::error!(
                    category = ?err.category(),
                    recoverable = err.is_recoverable(),
                    "bookd exited with error: {err}"
                );
                return Err(err.into());
            }
        }

        Commands::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            config.validate()?;
            println!("configuration ok");
            println!("  bind address: {}", config.server.bind_address);
            println!("  store backend: {:?}", config.store.backend);
            println!("  privileged group: {}", config.booking.privileged_group);
            println!("  default namespace: {}", config.booking.default_namespace);
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
}

async fn serve(config: Config) -> bookd::error::Result<()> {
    let store = config.build_store()?;
    let server = BookingServer::new(config.server_config(), store)?;
    server.start_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install SIGINT handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("bookd=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("bookd={level},warn"))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bookd=info,warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}
