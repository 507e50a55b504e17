//! TeachMe Server - Main entry point.

use anyhow::Result;
use teachme_common::config::Config;
use teachme_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("TeachMe Server v{}", env!("CARGO_PKG_VERSION"));

    // Start the backend server
    teachme_server::start_server(&config).await
}
