// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod catchment;
pub mod config;
pub mod demand;
pub mod enrich;
pub mod geo;
pub mod metrics;

use std::sync::Arc;

use axum::Router;
use tracing::info;

pub use crate::api::{router, AppState};
pub use crate::catchment::{run, CatchmentError, CatchmentOutput, CatchmentRequest};

use crate::config::CatchmentSettingsTable;
use crate::enrich::arcgis::{ArcGisClient, ArcGisConfig};

/// Build the full application router from environment + config files.
///
/// `/metrics` is mounted only when `DEBUG_ROUTES=1`.
pub async fn app() -> anyhow::Result<Router> {
    let settings = CatchmentSettingsTable::load_default()?;
    let arcgis = ArcGisConfig::from_env();
    info!(
        target: "catchment",
        endpoint = %arcgis.endpoint,
        categories = ?settings.category_names(),
        max_retries = arcgis.backoff.max_retries,
        "catchment service configured"
    );
    let client = ArcGisClient::new(arcgis)?;
    let state = AppState::new(settings, Arc::new(client));

    let mut app = api::router(state);
    if std::env::var("DEBUG_ROUTES").ok().as_deref() == Some("1") {
        if let Some(m) = metrics::Metrics::init() {
            app = app.merge(m.router());
        }
    }
    Ok(app)
}
