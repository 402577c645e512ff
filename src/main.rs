use std::sync::Arc;

use tracing::{error, info};

use feedgate::{AppState, Config, Database, HttpFeedFetcher, SystemClock, WebServer};

const CONFIG_PATH: &str = "config.toml";

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

async fn run(config: Config) -> feedgate::Result<()> {
    config.validate()?;

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::open(&config.database.path).await?;
    info!(path = %config.database.path, "Database opened");

    let fetcher = Arc::new(HttpFeedFetcher::from_config(&config.refresh)?);
    let state = Arc::new(AppState::build(
        &config,
        &db,
        Arc::new(SystemClock),
        fetcher,
    )?);

    let tasks = state.start_background_tasks(&config);
    let server = WebServer::new(&config.server, state)?;
    let result = server.run(shutdown_signal()).await;

    tasks.stop_all().await;
    db.close().await;
    result
}

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {CONFIG_PATH}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = feedgate::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        feedgate::logging::init_console_only(&config.logging.level);
    }

    info!("feedgate {}", env!("CARGO_PKG_VERSION"));
    info!(
        environment = %config.server.environment,
        "Server configured on {}:{}",
        config.server.host,
        config.server.port
    );

    if let Err(e) = run(config).await {
        error!("feedgate stopped with error: {}", e);
        std::process::exit(1);
    }
}
