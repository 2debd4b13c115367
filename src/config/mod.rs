// src/config/mod.rs
pub mod catchment;

pub use catchment::{CatchmentSettings, CatchmentSettingsTable};
