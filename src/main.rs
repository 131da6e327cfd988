//! `backend-director` command line.
//!
//! - `check`: validate a configuration file
//! - `run`: publish the configured directors, probe their backends and
//!   report status until stopped; SIGHUP reloads the configuration
//! - `fetch`: send one GET through a named director

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio::time;

use backend_director::config::{load_config, DirectorConfig};
use backend_director::fetch::Http1Fetcher;
use backend_director::lifecycle::{Shutdown, Signal, SignalListener};
use backend_director::observability::{logging, metrics};
use backend_director::{Admin, Director, FetchContext, Services};

#[derive(Parser)]
#[command(name = "backend-director")]
#[command(about = "Backend connection director for a caching reverse proxy", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "director.toml")]
    config: PathBuf,

    /// Log level, overrides the configuration file (RUST_LOG wins over both).
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print it
    Check,
    /// Run directors and health probes until stopped
    Run,
    /// Fetch one URL path through a director
    Fetch {
        /// Director (backend) name
        director: String,
        /// Path and query to request
        #[arg(default_value = "/")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init(cli.log_level.as_deref().unwrap_or(&config.observability.log_level));

    match cli.command {
        Commands::Check => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            tracing::info!(backends = config.backends.len(), "Configuration is valid");
            Ok(())
        }
        Commands::Run => run(&cli.config, config).await,
        Commands::Fetch { director, path } => fetch(config, &director, &path).await,
    }
}

fn services(config: &DirectorConfig) -> Services {
    Services::standard(config.defaults.timeouts(), config.pool.idle_timeout())
        .with_fetcher(Arc::new(Http1Fetcher::with_max_body(config.defaults.max_body_bytes)))
}

async fn run(path: &Path, config: DirectorConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(path = %path.display(), "backend-director v0.1.0 starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let admin = Arc::new(Admin::new(services(&config)));
    admin.lock().load(config.backends.clone());

    let mut signals = SignalListener::new()?;
    let shutdown = Shutdown::new();
    let reporter = config
        .observability
        .status_interval()
        .map(|interval| tokio::spawn(report_status(admin.clone(), interval, shutdown.subscribe())));

    loop {
        match signals.recv().await {
            Signal::Reload => reload(path, &config, &admin),
            Signal::Shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    shutdown.trigger();
    if let Some(reporter) = reporter {
        if let Err(e) = reporter.await {
            tracing::warn!(error = %e, "Status reporter ended abnormally");
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

fn reload(path: &Path, current: &DirectorConfig, admin: &Admin) {
    tracing::info!(path = %path.display(), "Reloading configuration");
    let next = match load_config(path) {
        Ok(next) => next,
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload config. Keeping current configuration.");
            return;
        }
    };
    if next.defaults != current.defaults || next.pool != current.pool {
        tracing::warn!("[defaults] and [pool] changes take effect on restart only");
    }
    let mut ctx = admin.lock();
    ctx.load(next.backends);
    ctx.discard_retired();
}

async fn report_status(admin: Arc<Admin>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                admin.lock().discard_retired();
                let status = admin.status();
                for backend in &status.backends {
                    tracing::info!(
                        backend = %backend.name,
                        address = %backend.address,
                        healthy = backend.healthy,
                        admin_health = %backend.admin_health,
                        n_conn = backend.n_conn,
                        idle = backend.idle,
                        "Backend status"
                    );
                }
                tracing::debug!(
                    generation = status.generation,
                    retired = status.retired,
                    stats = ?status.stats,
                    "Director status"
                );
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn fetch(config: DirectorConfig, name: &str, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let admin = Admin::new(services(&config));
    admin.lock().load(config.backends);
    let director = admin
        .director(name)
        .ok_or_else(|| format!("no director named {name:?}"))?;

    let mut ctx = FetchContext::get(path);
    director.fetch_headers(&mut ctx).await?;
    let body = director.fetch_body(&mut ctx).await;
    director.finish(&mut ctx);
    let body = body?;

    if let Some(head) = &ctx.beresp {
        println!("{:?} {} {}", head.version, head.status.as_u16(), head.reason);
        for (name, value) in &head.headers {
            println!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
        }
    }
    println!();
    println!("{} bytes", body.len());
    Ok(())
}
