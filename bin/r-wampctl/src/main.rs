//! ---
//! wamp_section: "05-networking-external-interfaces"
//! wamp_subsection: "binary"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Control CLI listening to WAMP topics."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use r_wamp_common::config::{AppConfig, LoadedAppConfig};
use r_wamp_common::logging::init_tracing;
use r_wamp_metrics::{new_registry, spawn_http_server, SessionMetrics};
use r_wamp_session::{Event, SessionConfig, SessionRuntime, StaticTokenAuthenticator};
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(author, version, about = "WAMP topic listener", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Join the realm and print every event of the configured topics")]
    Listen {
        #[arg(long, value_name = "FILE", help = "Path to configuration file")]
        config: Option<PathBuf>,
        #[arg(long = "topic", value_name = "URI", help = "Additional topic to subscribe to")]
        topics: Vec<String>,
    },
    #[command(about = "Load and validate the configuration, then print it as JSON")]
    CheckConfig {
        #[arg(long, value_name = "FILE", help = "Path to configuration file")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Listen { config, topics } => {
            let loaded = load_config(config)?;
            listen(loaded, topics).await
        }
        Commands::CheckConfig { config } => {
            let loaded = load_config(config)?;
            let rendered = serde_json::to_string_pretty(&loaded.config)?;
            println!("# source: {}", loaded.source.display());
            println!("{rendered}");
            Ok(())
        }
    }
}

fn load_config(explicit: Option<PathBuf>) -> Result<LoadedAppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path);
    }
    candidates.push(PathBuf::from("configs/r-wampctl.toml"));
    candidates.push(PathBuf::from("configs/r-wampctl.example.toml"));
    AppConfig::load_with_source(&candidates)
}

async fn listen(loaded: LoadedAppConfig, extra_topics: Vec<String>) -> Result<()> {
    let config = loaded.config;
    init_tracing("r-wampctl", &config.logging)?;
    info!(source = %loaded.source.display(), url = %config.session.url, realm = %config.session.realm, "configuration loaded");

    let registry = new_registry();
    let metrics = SessionMetrics::new(registry.clone())?;
    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let token = config.auth.resolve_token()?;
    let handle = SessionRuntime::connect_websocket(
        config.session.url.clone(),
        SessionConfig::from(&config.session),
        Arc::new(StaticTokenAuthenticator::new(token)),
        Some(metrics),
    )
    .context("failed to start session runtime")?;

    let mut topics = config.topics.clone();
    topics.extend(extra_topics);
    if topics.is_empty() {
        warn!("no topics configured; the session will only stay connected");
    }
    for topic in topics {
        let label = topic.clone();
        let request = handle
            .subscribe(topic, move |event: &Event| print_event(&label, event))
            .await
            .context("failed to register subscription")?;
        info!(request = request.get(), "subscription queued");
    }

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("ctrl-c received; disconnecting");
            if handle.disconnect().await.is_ok() {
                if tokio::time::timeout(SHUTDOWN_GRACE, handle.terminated()).await.is_err() {
                    warn!("transport did not close within the grace period");
                }
            }
        }
        status = handle.terminated() => {
            warn!(state = %status.state, attempts = status.reconnect_attempts, "session ended");
        }
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn print_event(topic: &str, event: &Event) {
    let line = json!({
        "topic": topic,
        "subscription": event.subscription,
        "publication": event.publication,
        "details": event.details,
        "args": event.args,
        "kwargs": event.kwargs,
    });
    println!("{line}");
}
