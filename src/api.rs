use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::catchment::{self, CatchmentError, CatchmentOutput, CatchmentRequest};
use crate::config::CatchmentSettingsTable;
use crate::enrich::Enricher;

pub const ENV_ARCGIS_TOKEN: &str = "ARCGIS_TOKEN";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<CatchmentSettingsTable>,
    pub enricher: Arc<dyn Enricher>,
    /// Used when a request carries no token.
    pub default_token: Option<String>,
}

impl AppState {
    pub fn new(settings: CatchmentSettingsTable, enricher: Arc<dyn Enricher>) -> Self {
        let default_token = std::env::var(ENV_ARCGIS_TOKEN)
            .ok()
            .filter(|t| !t.trim().is_empty());
        Self {
            settings: Arc::new(settings),
            enricher,
            default_token,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/catchment", post(run_catchment))
        .route("/api/catchment/categories", get(list_categories))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// JSON number or numeric string; booleans, objects and arrays are not numbers.
fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

// Numeric fields stay raw JSON so any shape reaches `to_request` and fails as
// a validation error instead of a body-rejection.
#[derive(Debug, Deserialize)]
struct CatchmentReq {
    #[serde(default)]
    radius: Option<Value>,
    #[serde(default)]
    center_x: Option<Value>,
    #[serde(default)]
    center_y: Option<Value>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "maxCount")]
    max_count: Option<Value>,
    #[serde(default, rename = "returnResponses")]
    return_responses: bool,
}

pub struct ApiError(CatchmentError);

impl From<CatchmentError> for ApiError {
    fn from(e: CatchmentError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

fn required(field: &str, v: Option<&Value>) -> Result<f64, CatchmentError> {
    v.and_then(numeric)
        .ok_or_else(|| CatchmentError::Validation(format!("{field} must be a finite number")))
}

fn to_request(body: CatchmentReq, default_token: Option<&str>) -> Result<CatchmentRequest, CatchmentError> {
    let radius = required("radius", body.radius.as_ref())?;
    let center_lon = required("center_x", body.center_x.as_ref())?;
    let center_lat = required("center_y", body.center_y.as_ref())?;

    // Non-numeric maxCount is ignored (no truncation); negative is an error.
    let max_hexagons = match body.max_count.as_ref().and_then(numeric) {
        Some(n) if n < 0.0 => {
            return Err(CatchmentError::Validation("maxCount must not be negative".into()))
        }
        Some(n) => Some(n.floor() as usize),
        None => None,
    };

    let token = body
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| default_token.map(str::to_string))
        .unwrap_or_default();

    Ok(CatchmentRequest {
        radius,
        center_lon,
        center_lat,
        category: body.category,
        token,
        max_hexagons,
        return_responses: body.return_responses,
    })
}

async fn run_catchment(
    State(state): State<AppState>,
    Json(body): Json<CatchmentReq>,
) -> Result<Json<CatchmentOutput>, ApiError> {
    let req = to_request(body, state.default_token.as_deref()).inspect_err(|e| {
        warn!(target: "catchment", error = %e, "rejected catchment request");
    })?;
    let out = catchment::run(&req, &state.settings, state.enricher.as_ref()).await?;
    Ok(Json(out))
}

async fn list_categories(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(
        state
            .settings
            .category_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(v: serde_json::Value) -> CatchmentReq {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let req = to_request(
            parse(serde_json::json!({
                "radius": "500", "center_x": 101.6869, "center_y": "3.139",
                "category": "Retail", "token": "t", "maxCount": "4.7"
            })),
            None,
        )
        .unwrap();
        assert_eq!(req.radius, 500.0);
        assert_eq!(req.center_lat, 3.139);
        assert_eq!(req.max_hexagons, Some(4));
        assert_eq!(req.token, "t");
    }

    #[test]
    fn missing_or_garbage_numbers_fail_validation() {
        let missing = to_request(parse(serde_json::json!({ "center_x": 1, "center_y": 2 })), None);
        assert!(matches!(missing, Err(CatchmentError::Validation(m)) if m.contains("radius")));

        let garbage = to_request(
            parse(serde_json::json!({ "radius": "abc", "center_x": 1, "center_y": 2 })),
            None,
        );
        assert!(garbage.is_err());
    }

    #[test]
    fn non_scalar_numbers_fail_validation() {
        for bad in [
            serde_json::json!(true),
            serde_json::json!({ "m": 500 }),
            serde_json::json!([500]),
        ] {
            let req = parse(serde_json::json!({ "radius": bad, "center_x": 1, "center_y": 2 }));
            assert!(matches!(
                to_request(req, None),
                Err(CatchmentError::Validation(m)) if m.contains("radius")
            ));
        }
        let req = parse(serde_json::json!({ "radius": 1, "center_x": 1, "center_y": null }));
        assert!(matches!(
            to_request(req, None),
            Err(CatchmentError::Validation(m)) if m.contains("center_y")
        ));
    }

    #[test]
    fn token_falls_back_to_default() {
        let req = to_request(
            parse(serde_json::json!({ "radius": 1, "center_x": 1, "center_y": 2, "token": "" })),
            Some("env-token"),
        )
        .unwrap();
        assert_eq!(req.token, "env-token");
    }

    #[test]
    fn max_count_rules() {
        let body = |mc: serde_json::Value| {
            parse(serde_json::json!({ "radius": 1, "center_x": 1, "center_y": 2, "maxCount": mc }))
        };
        assert_eq!(to_request(body(serde_json::json!("x")), None).unwrap().max_hexagons, None);
        assert_eq!(to_request(body(serde_json::json!(0)), None).unwrap().max_hexagons, Some(0));
        assert!(to_request(body(serde_json::json!(-2)), None).is_err());
    }
}
