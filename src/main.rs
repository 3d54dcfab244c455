//! bulkzip server
//!
//! Reads an optional JSON config file from `BULKZIP_CONFIG`, honours a `PORT`
//! override and serves the API until SIGINT/SIGTERM.

use bulkzip::{BulkZip, Config, run_with_shutdown};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = load_config()?;
    let service = Arc::new(BulkZip::new(config).await?);

    service.start_background_tasks().await;
    let api_handle = service.spawn_api_server();

    run_with_shutdown(&service).await?;

    match api_handle.await {
        Ok(result) => result?,
        Err(e) => tracing::error!(error = %e, "API server task failed"),
    }

    Ok(())
}

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match std::env::var_os("BULKZIP_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            tracing::info!(path = %path.display(), "loading configuration");
            Config::from_json_file(&path)?
        }
        None => Config::default(),
    };

    if let Ok(port) = std::env::var("PORT") {
        let port: u16 = port
            .parse()
            .map_err(|e| format!("invalid PORT value {:?}: {}", port, e))?;
        config.api.bind_address.set_port(port);
    }

    Ok(config)
}
