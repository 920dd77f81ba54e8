use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use streamsaver::api::{ApiServer, ApiServerConfig, AppState, RequestStore};
use streamsaver::config::AppConfig;
use streamsaver::downloader::DownloadManager;
use streamsaver::utils::fs::ensure_dir_all_with_op;
use streamsaver::{logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();
    config.validate().context("invalid configuration")?;

    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;
    panic_hook::install(&config.log_dir);

    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown.clone());

    ensure_dir_all_with_op("creating download directory", &config.download_dir).await?;
    ensure_dir_all_with_op("creating stream directory", &config.hls_dir).await?;

    info!(
        download_dir = %config.download_dir.display(),
        hls_dir = %config.hls_dir.display(),
        per_host_limit = config.per_host_download_limit,
        conversion_limit = config.conversion_limit,
        "streamsaver starting"
    );

    let download_manager = Arc::new(DownloadManager::new(&config));
    let state = AppState::new(Arc::clone(&download_manager), Arc::new(RequestStore::new()))
        .with_logging_config(Arc::clone(&logging_config));
    let server = ApiServer::new(ApiServerConfig::from_env_or_default(), state);

    let server_token = server.cancel_token();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            info!("shutdown signal received");
            shutdown.cancel();
            server_token.cancel();
        }
    });

    let result = server.run().await;

    shutdown.cancel();
    download_manager.shutdown();
    info!("streamsaver stopped");

    result.map_err(Into::into)
}
