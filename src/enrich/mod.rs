// src/enrich/mod.rs
//! Geo-enrichment: provider seam, per-call options, and the failure taxonomy.

pub mod arcgis;
pub mod batch;

use async_trait::async_trait;
use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::geo::Ring;

pub const DEFAULT_COUNTRY: &str = "MY";
pub const DEFAULT_DATA_COLLECTION: &str = "KeyFacts";
pub const DEFAULT_WKID: u32 = 4326;

/// Per-request study-area options.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichOptions {
    pub country: String,
    pub data_collections: Vec<String>,
    pub wkid: u32,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            country: DEFAULT_COUNTRY.to_string(),
            data_collections: vec![DEFAULT_DATA_COLLECTION.to_string()],
            wkid: DEFAULT_WKID,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    /// 4xx from the API other than 408/429. Never retried.
    #[error("geo-enrichment rejected the request: HTTP {status}: {body}")]
    ClientRequest { status: u16, body: String },
    /// Non-4xx HTTP failure (or 408/429), timeout or connection error.
    #[error("geo-enrichment transient failure: {message}")]
    Transient { status: Option<u16>, message: String },
    /// The request body could not be built.
    #[error("failed to build study-area request: {0}")]
    Request(String),
}

impl EnrichmentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EnrichmentError::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            EnrichmentError::ClientRequest { status, .. } => Some(*status),
            EnrichmentError::Transient { status, .. } => *status,
            EnrichmentError::Request(_) => None,
        }
    }
}

/// One enrichment call per polygon. Returns the parsed response body verbatim.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(
        &self,
        ring: &Ring,
        token: &str,
        opts: &EnrichOptions,
    ) -> Result<Value, EnrichmentError>;

    fn name(&self) -> &'static str;
}

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("enrich_requests_total", "HTTP requests sent to the enrichment API.");
        describe_counter!("enrich_retries_total", "Backoff retries after transient failures.");
        describe_counter!(
            "enrich_client_errors_total",
            "4xx responses from the enrichment API (not retried)."
        );
        describe_counter!(
            "enrich_hexagon_failures_total",
            "Hexagons whose enrichment failed permanently."
        );
        describe_counter!(
            "enrich_population_missing_total",
            "Successful responses without a TOTPOP_CY attribute."
        );
        describe_histogram!("enrich_request_ms", "Enrichment request latency in milliseconds.");
    });
}
