// src/config/catchment.rs
//! Per-category tiling and scoring settings.
//!
//! Loaded once at startup (TOML) and shared read-only afterwards. Unknown
//! categories resolve to the `default` entry.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::enrich::batch::BatchOptions;
use crate::enrich::{EnrichOptions, DEFAULT_COUNTRY, DEFAULT_DATA_COLLECTION, DEFAULT_WKID};

pub const DEFAULT_CATCHMENT_CONFIG_PATH: &str = "config/catchment.toml";
pub const ENV_CATCHMENT_CONFIG_PATH: &str = "CATCHMENT_CONFIG_PATH";
pub const DEFAULT_CATEGORY: &str = "default";
/// Upper bound on hexagons generated for one catchment run.
pub const DEFAULT_MAX_GRID_CELLS: usize = 50_000;

fn default_country() -> String {
    DEFAULT_COUNTRY.to_string()
}
fn default_data_collections() -> Vec<String> {
    vec![DEFAULT_DATA_COLLECTION.to_string()]
}
fn default_retry() -> u32 {
    2
}
fn default_delay_ms() -> u64 {
    250
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchmentSettings {
    /// Hexagon side length in meters.
    pub side_length: f64,
    pub base_max_per_km2: f64,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_data_collections")]
    pub data_collections: Vec<String>,
    /// Extra per-hexagon attempts in the batch orchestrator.
    #[serde(default = "default_retry")]
    pub retry: u32,
    /// Pause between enrichment calls, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl CatchmentSettings {
    fn builtin(side_length: f64, base_max_per_km2: f64) -> Self {
        Self {
            side_length,
            base_max_per_km2,
            country: default_country(),
            data_collections: default_data_collections(),
            retry: 2,
            delay_ms: 300,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !(self.side_length.is_finite() && self.side_length > 0.0) {
            bail!("category '{name}': sideLength must be a positive number");
        }
        if !(self.base_max_per_km2.is_finite() && self.base_max_per_km2 >= 0.0) {
            bail!("category '{name}': baseMaxPerKm2 must be a non-negative number");
        }
        if self.country.trim().is_empty() {
            bail!("category '{name}': country must not be empty");
        }
        Ok(())
    }

    /// Batch options derived from these settings.
    pub fn batch_options(&self, max_count: Option<usize>, keep_raw_responses: bool) -> BatchOptions {
        BatchOptions {
            enrich: EnrichOptions {
                country: self.country.clone(),
                data_collections: self.data_collections.clone(),
                wkid: DEFAULT_WKID,
            },
            retry_count: self.retry,
            inter_call_delay: Duration::from_millis(self.delay_ms),
            max_count,
            keep_raw_responses,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    max_grid_cells: Option<usize>,
    categories: HashMap<String, CatchmentSettings>,
}

/// Immutable category → settings table.
#[derive(Debug, Clone)]
pub struct CatchmentSettingsTable {
    default: CatchmentSettings,
    categories: HashMap<String, CatchmentSettings>,
    max_grid_cells: usize,
}

impl Default for CatchmentSettingsTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CatchmentSettingsTable {
    /// Retail / FnB / Services plus the `default` fallback.
    pub fn builtin() -> Self {
        let categories = HashMap::from([
            ("Retail".to_string(), CatchmentSettings::builtin(200.0, 4000.0)),
            ("FnB".to_string(), CatchmentSettings::builtin(75.0, 6000.0)),
            ("Services".to_string(), CatchmentSettings::builtin(100.0, 3000.0)),
        ]);
        Self {
            default: CatchmentSettings::builtin(50.0, 4000.0),
            categories,
            max_grid_cells: DEFAULT_MAX_GRID_CELLS,
        }
    }

    pub fn new(
        default: CatchmentSettings,
        categories: HashMap<String, CatchmentSettings>,
    ) -> Result<Self> {
        default.validate(DEFAULT_CATEGORY)?;
        for (name, s) in &categories {
            s.validate(name)?;
        }
        Ok(Self {
            default,
            categories,
            max_grid_cells: DEFAULT_MAX_GRID_CELLS,
        })
    }

    pub fn with_max_grid_cells(mut self, max: usize) -> Self {
        self.max_grid_cells = max;
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut file: SettingsFile = toml::from_str(s).context("parsing catchment settings")?;
        let default = file
            .categories
            .remove(DEFAULT_CATEGORY)
            .ok_or_else(|| anyhow!("catchment settings need a [categories.{DEFAULT_CATEGORY}] entry"))?;
        let table = Self::new(default, file.categories)?;
        Ok(match file.max_grid_cells {
            Some(max) => table.with_max_grid_cells(max),
            None => table,
        })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading catchment settings from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Resolve settings source:
    /// 1) $CATCHMENT_CONFIG_PATH (must exist)
    /// 2) config/catchment.toml
    /// 3) built-in table
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CATCHMENT_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CATCHMENT_CONFIG_PATH} points to non-existent path");
            }
            info!(target: "catchment", path = %pb.display(), "loading catchment settings");
            return Self::load_from_file(&pb);
        }
        let pb = PathBuf::from(DEFAULT_CATCHMENT_CONFIG_PATH);
        if pb.exists() {
            info!(target: "catchment", path = %pb.display(), "loading catchment settings");
            return Self::load_from_file(&pb);
        }
        info!(target: "catchment", "using built-in catchment settings");
        Ok(Self::builtin())
    }

    /// Settings for `category`, or the default entry when unknown or absent.
    pub fn resolve(&self, category: Option<&str>) -> &CatchmentSettings {
        category
            .and_then(|c| self.categories.get(c))
            .unwrap_or(&self.default)
    }

    pub fn max_grid_cells(&self) -> usize {
        self.max_grid_cells
    }

    pub fn default_settings(&self) -> &CatchmentSettings {
        &self.default
    }

    pub fn category_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.categories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
