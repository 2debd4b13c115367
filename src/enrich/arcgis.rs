// src/enrich/arcgis.rs
//! ArcGIS GeoEnrichment client: one study-area POST per polygon with bounded
//! exponential backoff on transient failures.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use rand::Rng;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ensure_metrics_described, EnrichOptions, Enricher, EnrichmentError};
use crate::geo::Ring;

pub const DEFAULT_ENDPOINT: &str =
    "https://geoenrich.arcgis.com/arcgis/rest/services/World/geoenrichmentserver/GeoEnrichment/enrich";

pub const ENV_ENDPOINT: &str = "GEOENRICH_ENDPOINT";
pub const ENV_JITTER: &str = "GEOENRICH_JITTER";
pub const ENV_TIMEOUT_MS: &str = "GEOENRICH_TIMEOUT_MS";
pub const ENV_MAX_RETRIES: &str = "GEOENRICH_MAX_RETRIES";

const MIN_BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_JITTER: Duration = Duration::from_millis(1000);

/// Retry schedule for transient failures: `base * factor^(attempt-1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Clamps base delay to >= 100ms and factor to >= 1.
    pub fn new(max_retries: u32, base_delay: Duration, factor: f64, jitter: bool) -> Self {
        let factor = if factor.is_finite() { factor.max(1.0) } else { 2.0 };
        Self {
            max_retries,
            base_delay: base_delay.max(MIN_BASE_DELAY),
            factor,
            jitter,
        }
    }

    /// No clamping; lets tests run with millisecond delays.
    pub fn new_unclamped(max_retries: u32, base_delay: Duration, factor: f64, jitter: bool) -> Self {
        Self {
            max_retries,
            base_delay,
            factor,
            jitter,
        }
    }

    /// Deterministic delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let ms = self.base_delay.as_secs_f64() * 1_000.0 * self.factor.powi(exp);
        Duration::from_millis(ms.max(0.0).min(u64::MAX as f64) as u64)
    }

    /// Upper bound (exclusive) of the random extra delay added when jitter is on.
    pub fn jitter_cap(delay: Duration) -> Duration {
        delay.min(MAX_JITTER)
    }

    fn sleep_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter {
            return delay;
        }
        let cap = Self::jitter_cap(delay).as_millis() as u64;
        if cap == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..cap))
    }
}

#[derive(Debug, Clone)]
pub struct ArcGisConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for ArcGisConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_millis(30_000),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ArcGisConfig {
    /// Defaults overridden by GEOENRICH_* env vars when present and parseable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var(ENV_ENDPOINT) {
            if !url.trim().is_empty() {
                cfg.endpoint = url.trim().to_string();
            }
        }
        if let Some(ms) = env_parse::<u64>(ENV_TIMEOUT_MS) {
            cfg.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u32>(ENV_MAX_RETRIES) {
            cfg.backoff.max_retries = n;
        }
        cfg.backoff.jitter = std::env::var(ENV_JITTER).ok().as_deref() == Some("1");
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Form fields of a single-polygon study-area request.
pub fn build_form(
    ring: &Ring,
    token: &str,
    opts: &EnrichOptions,
) -> Result<Vec<(&'static str, String)>, EnrichmentError> {
    let closed = if ring.is_closed() {
        ring.clone()
    } else {
        Ring::closed(ring.points().to_vec())
    };
    let study_areas = json!([{
        "geometry": {
            "rings": [closed],
            "spatialReference": { "wkid": opts.wkid }
        },
        "attributes": { "id": "Polygon 1" }
    }]);
    let study_areas_options = json!({
        "GeometryType": "esriGeometryPolygon",
        "SpatialRelationship": "esriSpatialRelIntersects"
    });
    let use_data = json!({ "sourceCountry": opts.country });

    let to_str = |v: &Value| serde_json::to_string(v).map_err(|e| EnrichmentError::Request(e.to_string()));
    let mut form = vec![
        ("StudyAreas", to_str(&study_areas)?),
        ("StudyAreasOptions", to_str(&study_areas_options)?),
        ("useData", to_str(&use_data)?),
        ("f", "pjson".to_string()),
    ];
    if !token.is_empty() {
        form.push(("token", token.to_string()));
    }
    form.push((
        "dataCollections",
        serde_json::to_string(&opts.data_collections)
            .map_err(|e| EnrichmentError::Request(e.to_string()))?,
    ));
    Ok(form)
}

/// 4xx are terminal except 408 (request timeout) and 429 (rate limited).
pub fn is_retryable_status(status: StatusCode) -> bool {
    if status.is_client_error() {
        return status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS;
    }
    true
}

pub struct ArcGisClient {
    http: reqwest::Client,
    cfg: ArcGisConfig,
}

impl ArcGisClient {
    pub fn new(cfg: ArcGisConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("catchment-scout/0.1")
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &ArcGisConfig {
        &self.cfg
    }

    async fn send_once(&self, form: &[(&'static str, String)]) -> Result<Value, EnrichmentError> {
        counter!("enrich_requests_total").increment(1);
        let t0 = Instant::now();
        let res = self
            .http
            .post(&self.cfg.endpoint)
            .timeout(self.cfg.timeout)
            .form(form)
            .send()
            .await;
        histogram!("enrich_request_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let rsp = res.map_err(|e| EnrichmentError::Transient {
            status: None,
            message: if e.is_timeout() {
                format!("request timed out after {:?}", self.cfg.timeout)
            } else {
                e.to_string()
            },
        })?;

        let status = rsp.status();
        if status.is_success() {
            return rsp.json::<Value>().await.map_err(|e| EnrichmentError::Transient {
                status: Some(status.as_u16()),
                message: format!("invalid JSON body: {e}"),
            });
        }

        let body = rsp.text().await.unwrap_or_default();
        if is_retryable_status(status) {
            Err(EnrichmentError::Transient {
                status: Some(status.as_u16()),
                message: format!("HTTP {status}: {body}"),
            })
        } else {
            counter!("enrich_client_errors_total").increment(1);
            Err(EnrichmentError::ClientRequest {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl Enricher for ArcGisClient {
    async fn enrich(
        &self,
        ring: &Ring,
        token: &str,
        opts: &EnrichOptions,
    ) -> Result<Value, EnrichmentError> {
        ensure_metrics_described();
        let form = build_form(ring, token, opts)?;
        let backoff = self.cfg.backoff;

        let mut attempt: u32 = 0;
        loop {
            match self.send_once(&form).await {
                Ok(body) => return Ok(body),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt > backoff.max_retries {
                        warn!(target: "enrich", error = %e, attempts = attempt, "giving up after retries");
                        return Err(e);
                    }
                    let wait = backoff.sleep_for(attempt);
                    debug!(target: "enrich", error = %e, attempt, wait_ms = wait.as_millis() as u64, "retrying");
                    counter!("enrich_retries_total").increment(1);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "arcgis"
    }
}
