// src/enrich/batch.rs
//! Sequential batch enrichment over a hexagon grid.
//!
//! Hexagons are processed one at a time with a fixed pause after each call to
//! keep the external API under its rate limits. A hexagon that keeps failing is
//! recorded with `population: None` and the batch moves on.

use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ensure_metrics_described, EnrichOptions, Enricher};
use crate::geo::Ring;

/// Attribute holding the current-year total population.
pub const POPULATION_KEY: &str = "TOTPOP_CY";

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub enrich: EnrichOptions,
    /// Extra attempts per hexagon after the first one fails.
    pub retry_count: u32,
    pub inter_call_delay: Duration,
    pub max_count: Option<usize>,
    pub keep_raw_responses: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            enrich: EnrichOptions::default(),
            retry_count: 2,
            inter_call_delay: Duration::from_millis(250),
            max_count: None,
            keep_raw_responses: false,
        }
    }
}

/// Outcome for one hexagon, index-aligned with the input grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichmentResult {
    #[serde(rename = "pop")]
    pub population: Option<f64>,
    #[serde(rename = "response")]
    pub raw_response: Option<Value>,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Enrich every hexagon (up to `max_count`) strictly in order.
pub async fn enrich_all(
    enricher: &dyn Enricher,
    hexagons: &[Ring],
    token: &str,
    opts: &BatchOptions,
) -> Vec<EnrichmentResult> {
    ensure_metrics_described();
    let limit = opts.max_count.unwrap_or(hexagons.len()).min(hexagons.len());
    let mut out = Vec::with_capacity(limit);

    for (idx, hex) in hexagons.iter().take(limit).enumerate() {
        let mut attempt: u32 = 0;
        let result = loop {
            match enricher.enrich(hex, token, &opts.enrich).await {
                Ok(resp) => {
                    let population = extract_population(&resp).and_then(population_value);
                    if population.is_none() {
                        counter!("enrich_population_missing_total").increment(1);
                        debug!(target: "enrich", hexagon = idx, "no {POPULATION_KEY} in response");
                    }
                    break EnrichmentResult {
                        population,
                        raw_response: opts.keep_raw_responses.then_some(resp),
                        error_description: None,
                    };
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > opts.retry_count {
                        counter!("enrich_hexagon_failures_total").increment(1);
                        warn!(
                            target: "enrich",
                            hexagon = idx,
                            provider = enricher.name(),
                            error = %e,
                            "hexagon enrichment failed"
                        );
                        break EnrichmentResult {
                            population: None,
                            raw_response: None,
                            error_description: Some(e.to_string()),
                        };
                    }
                    tokio::time::sleep(opts.inter_call_delay).await;
                }
            }
        };
        out.push(result);

        tokio::time::sleep(opts.inter_call_delay).await;
    }

    out
}

/// Locate `TOTPOP_CY` in an enrichment response.
///
/// Tries `results[*].value.FeatureSet.features[0].attributes` and
/// `results[*].value.attributes` first (a result without `value` is inspected
/// directly), then falls back to a depth-first scan of the whole tree.
pub fn extract_population(resp: &Value) -> Option<&Value> {
    if let Some(results) = resp.get("results").and_then(Value::as_array) {
        for r in results {
            let value = r.get("value").filter(|v| is_truthy(v)).unwrap_or(r);
            let from_features = value
                .get("FeatureSet")
                .and_then(|fs| fs.get("features"))
                .and_then(Value::as_array)
                .and_then(|f| f.first())
                .and_then(|f| f.get("attributes"))
                .and_then(|a| a.get(POPULATION_KEY));
            if let Some(hit) = from_features {
                return Some(hit);
            }
            if let Some(hit) = value.get("attributes").and_then(|a| a.get(POPULATION_KEY)) {
                return Some(hit);
            }
        }
    }
    find_key_dfs(resp, POPULATION_KEY)
}

/// Stack-based depth-first search for the first object carrying `key`.
/// Children are pushed in document order and popped last-first.
pub fn find_key_dfs<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match node {
            Value::Object(map) => {
                if let Some(hit) = map.get(key) {
                    return Some(hit);
                }
                stack.extend(map.values().filter(|v| v.is_object() || v.is_array()));
            }
            Value::Array(items) => {
                stack.extend(items.iter().filter(|v| v.is_object() || v.is_array()));
            }
            _ => {}
        }
    }
    None
}

/// Numbers pass through, numeric strings are parsed, anything else is absent.
pub fn population_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|p| p.is_finite())
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn documented_feature_set_path() {
        let resp = json!({
            "results": [{
                "value": {
                    "FeatureSet": [],
                }
            }, {
                "value": {
                    "FeatureSet": {
                        "features": [{ "attributes": { "TOTPOP_CY": 1234 } }]
                    }
                }
            }]
        });
        assert_eq!(extract_population(&resp), Some(&json!(1234)));
    }

    #[test]
    fn attributes_fallback_path() {
        let resp = json!({
            "results": [{ "value": { "attributes": { "TOTPOP_CY": 55 } } }]
        });
        assert_eq!(extract_population(&resp), Some(&json!(55)));
    }

    #[test]
    fn result_without_value_is_inspected_directly() {
        let resp = json!({
            "results": [{ "attributes": { "TOTPOP_CY": 9 } }]
        });
        assert_eq!(extract_population(&resp), Some(&json!(9)));
    }

    #[test]
    fn deep_search_finds_nested_key() {
        let resp = json!({
            "messages": [],
            "payload": { "layers": [ { "rows": [ { "TOTPOP_CY": 77, "HH": 20 } ] } ] }
        });
        assert_eq!(extract_population(&resp), Some(&json!(77)));
    }

    #[test]
    fn deep_search_visits_last_inserted_branch_first() {
        let resp: Value =
            serde_json::from_str(r#"{"zeta":{"TOTPOP_CY":1},"alpha":{"TOTPOP_CY":2}}"#).unwrap();
        assert_eq!(extract_population(&resp), Some(&json!(2)));

        let flipped: Value =
            serde_json::from_str(r#"{"alpha":{"TOTPOP_CY":2},"zeta":{"TOTPOP_CY":1}}"#).unwrap();
        assert_eq!(extract_population(&flipped), Some(&json!(1)));
    }

    #[test]
    fn miss_yields_none() {
        let resp = json!({ "error": { "code": 498, "message": "Invalid token" } });
        assert_eq!(extract_population(&resp), None);
        assert_eq!(extract_population(&json!(null)), None);
    }

    #[test]
    fn population_value_coerces() {
        assert_eq!(population_value(&json!(10)), Some(10.0));
        assert_eq!(population_value(&json!("12.5")), Some(12.5));
        assert_eq!(population_value(&json!(null)), None);
        assert_eq!(population_value(&json!("n/a")), None);
        assert_eq!(population_value(&json!({"a": 1})), None);
    }

    #[test]
    fn raw_result_serializes_like_the_http_payload() {
        let r = EnrichmentResult {
            population: Some(3.0),
            raw_response: None,
            error_description: None,
        };
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({ "pop": 3.0, "response": null })
        );
    }
}
