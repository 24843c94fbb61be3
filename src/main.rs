//! cloud-balance: resolve logical service names to node addresses
//!
//! Loads a service topology from configuration (and optionally a discovery
//! file that is re-read periodically) and hands out addresses round-robin.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

use cloud_balance::{
    config::AppConfig,
    source::{DiscoverySource, FileSource, SourcePoller, StaticSource},
    BalancerSet, DiscoveryRegistry, UpstreamResolver,
};

#[derive(Parser)]
#[command(name = "cloud-balance")]
#[command(version = "0.1.0")]
#[command(about = "Service discovery and round-robin load balancing")]
#[command(long_about = "
cloud-balance keeps a registry of service nodes and picks one per request:
  - Static services from the config file
  - Optional discovery file re-read on an interval
  - Round-robin selection, lb://service/path URL resolution

Example usage:
  cloud-balance run --config config.yaml
  cloud-balance resolve user-service --count 3
  cloud-balance resolve lb://user-service/api/users
")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Set logging level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the registry in sync and log topology changes until Ctrl-C
    Run,

    /// Pick servers for a service name or resolve an lb:// URL
    Resolve {
        /// Service name or lb://service/path URL
        target: String,
        /// Number of selections to print
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// List known services and their nodes
    ListServices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level_filter = if let Some(level) = cli.log_level {
        level.to_string()
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
            .to_string()
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&level_filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run => run(cli.config).await?,
        Commands::Resolve { target, count } => resolve(cli.config, &target, count).await?,
        Commands::ListServices { json } => list_services(cli.config, json).await?,
        Commands::CheckConfig => check_config(cli.config)?,
    }

    Ok(())
}

fn load_config(config_path: &Path) -> anyhow::Result<AppConfig> {
    tracing::debug!("Loading configuration from {:?}", config_path);
    AppConfig::from_file(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))
}

/// Registry populated once from the static services and the discovery file
async fn load_registry(config: &AppConfig) -> anyhow::Result<DiscoveryRegistry> {
    let registry = DiscoveryRegistry::new();
    sync_static(&registry, config).await?;
    if let Some(ref file) = config.discovery.file {
        let source: Arc<dyn DiscoverySource> = Arc::new(FileSource::new(file));
        let name = source.name().to_string();
        SourcePoller::new(registry.clone(), source)
            .sync_once()
            .await
            .with_context(|| format!("discovery source '{}' failed", name))?;
    }
    Ok(registry)
}

/// Static services never change, so they are pushed once instead of polled
async fn sync_static(registry: &DiscoveryRegistry, config: &AppConfig) -> anyhow::Result<()> {
    let source: Arc<dyn DiscoverySource> = Arc::new(StaticSource::from_config(config));
    let pushed = SourcePoller::new(registry.clone(), source).sync_once().await?;
    tracing::info!(services = pushed, "Loaded static services");
    Ok(())
}

/// Keep the registry in sync with the discovery file until Ctrl-C
async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let registry = DiscoveryRegistry::new();
    sync_static(&registry, &config).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let poller = config.discovery.file.as_ref().map(|file| {
        tracing::info!(
            file = %file.display(),
            refresh_seconds = config.discovery.refresh_seconds,
            "Watching discovery file"
        );
        SourcePoller::new(registry.clone(), Arc::new(FileSource::new(file))).spawn(
            Duration::from_secs(config.discovery.refresh_seconds),
            shutdown_rx,
        )
    });

    tracing::info!(strategy = %config.balancer.strategy, "cloud-balance running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    shutdown_tx.send_replace(true);
    if let Some(handle) = poller {
        handle.await?;
    }
    Ok(())
}

/// Print `count` selections for a service or lb:// URL
async fn resolve(config_path: PathBuf, target: &str, count: usize) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let registry = load_registry(&config).await?;
    let balancers = Arc::new(BalancerSet::new(registry, config.balancer.strategy.clone())?);
    let resolver = UpstreamResolver::new(balancers);

    let is_url = target.contains("://");
    for _ in 0..count {
        let resolved = if is_url {
            resolver.resolve(target)?
        } else {
            resolver.server_for(target)?
        };
        println!("{}", resolved);
    }
    Ok(())
}

/// Print every service with a snapshot and its nodes
async fn list_services(config_path: PathBuf, json: bool) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let registry = load_registry(&config).await?;

    let discoveries: Vec<_> = registry
        .services()
        .iter()
        .filter_map(|name| registry.find(name))
        .collect();

    if json {
        let plain: Vec<&cloud_balance::Discovery> = discoveries.iter().map(|d| d.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&plain)?);
        return Ok(());
    }

    if discoveries.is_empty() {
        println!("No services known.");
        return Ok(());
    }

    for discovery in &discoveries {
        println!("{} ({} nodes)", discovery.service, discovery.len());
        for node in &discovery.cluster {
            println!("  - {}", node.url());
        }
    }
    Ok(())
}

/// Validate configuration file
fn check_config(config_path: PathBuf) -> anyhow::Result<()> {
    match AppConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid\n");
            println!("Balancer:");
            println!("  Strategy: {}", config.balancer.strategy);
            println!("\nDiscovery:");
            match config.discovery.file {
                Some(ref file) => println!("  File: {}", file.display()),
                None => println!("  File: none"),
            }
            println!("  Refresh: {}s", config.discovery.refresh_seconds);
            println!("\nServices:");
            if config.services.is_empty() {
                println!("  (none)");
            }
            for (name, service) in &config.services {
                println!("  {} : {} nodes", name, service.nodes.len());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
