// tests/batch_enrichment.rs
//
// Batch orchestrator with an in-process stub enricher (no network).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use catchment_scout::enrich::batch::{enrich_all, BatchOptions};
use catchment_scout::enrich::{EnrichOptions, Enricher, EnrichmentError};
use catchment_scout::geo::{hexgrid, Ring};

/// Returns `1000 * (index + 1)` as TOTPOP_CY; the hexagon at `failing` always errors.
struct StubEnricher {
    hexagons: Vec<Ring>,
    failing: Option<usize>,
    calls: Mutex<Vec<usize>>,
}

impl StubEnricher {
    fn new(hexagons: &[Ring], failing: Option<usize>) -> Self {
        Self {
            hexagons: hexagons.to_vec(),
            failing,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Enricher for StubEnricher {
    async fn enrich(
        &self,
        ring: &Ring,
        _token: &str,
        _opts: &EnrichOptions,
    ) -> Result<Value, EnrichmentError> {
        let idx = self
            .hexagons
            .iter()
            .position(|h| h == ring)
            .expect("known hexagon");
        self.calls.lock().unwrap().push(idx);
        if Some(idx) == self.failing {
            return Err(EnrichmentError::Transient {
                status: Some(502),
                message: "bad gateway".into(),
            });
        }
        Ok(json!({
            "results": [{ "value": { "attributes": { "TOTPOP_CY": 1000 * (idx + 1) } } }]
        }))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

fn five_hexagons() -> Vec<Ring> {
    let all = hexgrid::generate(101.6869, 3.139, 500.0, 100.0);
    assert!(all.len() >= 5);
    all.into_iter().take(5).collect()
}

fn fast_opts() -> BatchOptions {
    BatchOptions {
        inter_call_delay: Duration::ZERO,
        ..BatchOptions::default()
    }
}

#[tokio::test]
async fn one_failing_hexagon_does_not_stop_the_batch() {
    let hexes = five_hexagons();
    let stub = StubEnricher::new(&hexes, Some(2));

    let out = enrich_all(&stub, &hexes, "tok", &fast_opts()).await;

    assert_eq!(out.len(), 5);
    assert_eq!(out[2].population, None);
    assert!(out[2].error_description.as_deref().unwrap().contains("bad gateway"));
    for i in [0usize, 1, 3, 4] {
        assert_eq!(out[i].population, Some(1000.0 * (i as f64 + 1.0)), "hexagon {i}");
        assert!(out[i].error_description.is_none());
    }

    // retry_count=2 -> the failing hexagon is attempted 3 times, in order.
    assert_eq!(stub.calls(), vec![0, 1, 2, 2, 2, 3, 4]);
}

#[tokio::test]
async fn retry_count_zero_attempts_once() {
    let hexes = five_hexagons();
    let stub = StubEnricher::new(&hexes, Some(0));
    let opts = BatchOptions {
        retry_count: 0,
        ..fast_opts()
    };

    let out = enrich_all(&stub, &hexes, "", &opts).await;

    assert_eq!(out.len(), 5);
    assert_eq!(stub.calls().iter().filter(|i| **i == 0).count(), 1);
}

#[tokio::test]
async fn max_count_limits_processing() {
    let hexes = five_hexagons();
    let stub = StubEnricher::new(&hexes, None);
    let opts = BatchOptions {
        max_count: Some(2),
        ..fast_opts()
    };

    let out = enrich_all(&stub, &hexes, "", &opts).await;

    assert_eq!(out.len(), 2);
    assert_eq!(stub.calls(), vec![0, 1]);
}

#[tokio::test]
async fn raw_responses_are_kept_on_request() {
    let hexes = five_hexagons();
    let stub = StubEnricher::new(&hexes, Some(1));
    let opts = BatchOptions {
        keep_raw_responses: true,
        ..fast_opts()
    };

    let out = enrich_all(&stub, &hexes[..2], "", &opts).await;

    assert!(out[0].raw_response.is_some());
    assert!(out[1].raw_response.is_none());
    assert!(out[1].error_description.is_some());

    let dropped = enrich_all(&stub, &hexes[..1], "", &fast_opts()).await;
    assert!(dropped[0].raw_response.is_none());
}

#[tokio::test]
async fn inter_call_delay_paces_every_hexagon() {
    let hexes = five_hexagons();
    let stub = StubEnricher::new(&hexes, None);
    let opts = BatchOptions {
        inter_call_delay: Duration::from_millis(15),
        ..BatchOptions::default()
    };

    let t0 = Instant::now();
    let out = enrich_all(&stub, &hexes[..3], "", &opts).await;

    assert_eq!(out.len(), 3);
    assert!(t0.elapsed() >= Duration::from_millis(45));
}

#[tokio::test]
async fn empty_grid_yields_empty_results() {
    let stub = StubEnricher::new(&[], None);
    let out = enrich_all(&stub, &[], "", &fast_opts()).await;
    assert!(out.is_empty());
}
