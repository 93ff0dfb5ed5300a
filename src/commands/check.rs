//! The `check` command: validate configuration, the boundary polygon, the
//! database schema, and upstream reachability, then exit.

use anyhow::Result;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db;
use crate::filters::FilterPipeline;
use crate::schema_check;
use crate::vatsim_client::VatsimClient;

pub async fn handle_check(config: AppConfig) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "check");
    });

    info!("Configuration loaded and validated");

    // Compiles the callsign patterns and loads the boundary polygon.
    let _pipeline = FilterPipeline::new(config.filters.clone())?;
    info!("Filter pipeline constructed");

    let pool = db::create_pool(&config.database)?;
    schema_check::ensure_schema(&pool).await?;
    info!("Database schema validated");

    let client = VatsimClient::new(config.vatsim.clone())?;
    match client.fetch_status().await {
        Ok(status) => info!(
            "Upstream reachable: {} data endpoints, {} transceiver endpoints",
            status.data.v3.len(),
            status.data.transceivers.len()
        ),
        Err(e) => warn!("Upstream status fetch failed: {}", e),
    }

    info!("Check complete");
    Ok(())
}
