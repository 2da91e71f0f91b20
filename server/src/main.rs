//! Backbone Hub Server
//!
//! HTTP API for registering ResNet backbones, training them on image folders,
//! evaluating them and predicting labels for unlabeled images.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use backbone_hub::utils::logging::{init_logging, LogConfig, LogLevel};
use backbone_hub::HubConfig;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

/// Backbone Hub Server
#[derive(Parser, Debug)]
#[command(name = "backbone-hub-server")]
#[command(version)]
#[command(about = "HTTP API for training and serving ResNet image classifiers")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "BACKBONE_HUB_PORT", default_value = "8000")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "BACKBONE_HUB_HOST", default_value = "0.0.0.0")]
    host: String,

    /// JSON hub configuration file
    #[arg(short, long, env = "BACKBONE_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum number of registered models
    #[arg(long, env = "BACKBONE_HUB_CAPACITY")]
    capacity: Option<usize>,

    /// Square input size for the backbones
    #[arg(long, env = "BACKBONE_HUB_IMAGE_SIZE")]
    image_size: Option<usize>,

    /// Directory for saved checkpoints
    #[arg(long, env = "BACKBONE_HUB_MODELS_DIR")]
    models_dir: Option<PathBuf>,

    /// Root directory for experiment tracking output
    #[arg(long, env = "BACKBONE_HUB_TRACKER_DIR")]
    tracker_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "BACKBONE_HUB_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Plain log output without colors, with thread ids
    #[arg(long, env = "BACKBONE_HUB_PLAIN_LOGS")]
    plain_logs: bool,
}

impl Cli {
    fn hub_config(&self) -> anyhow::Result<HubConfig> {
        let mut config = match &self.config {
            Some(path) => HubConfig::load(path)
                .with_context(|| format!("failed to load config from {:?}", path))?,
            None => HubConfig::default(),
        };

        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(image_size) = self.image_size {
            config.image_size = image_size;
        }
        if let Some(models_dir) = &self.models_dir {
            config.models_dir = models_dir.clone();
        }
        if let Some(tracker_dir) = &self.tracker_dir {
            config.tracker_dir = tracker_dir.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = LogLevel::from_name(&cli.log_level);
    let log_config = match level {
        LogLevel::Trace | LogLevel::Debug => LogConfig {
            level,
            ..LogConfig::verbose()
        },
        _ if cli.plain_logs => LogConfig {
            level,
            ..LogConfig::production()
        },
        _ => LogConfig {
            level,
            ..LogConfig::default()
        },
    };
    init_logging(&log_config).map_err(anyhow::Error::msg)?;

    let config = cli.hub_config()?;

    info!("Backbone Hub Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Backend:     {}", backbone_hub::backend_name());
    info!("  Capacity:    {}", config.capacity);
    info!("  Image size:  {}", config.image_size);
    info!("  Models dir:  {:?}", config.models_dir);
    info!("  Tracker dir: {:?}", config.tracker_dir);

    let state = Arc::new(AppState::new(config));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cli.host, cli.port))?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
