//! Core library for the `weather` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Weather sources and their capabilities
//! - Per-feature routing, parameter resolution and concurrent dispatch
//! - Merging of per-source results into one weather aggregate
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod coalesce;
pub mod config;
pub mod error;
pub mod feature;
pub mod index;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::{Config, ProviderConfig};
pub use error::WeatherError;
pub use feature::Feature;
pub use model::{
    AirQuality, Alert, AlertSeverity, Current, Daily, FeatureUpdate, Hourly, Location, Minutely,
    Normals, Pollen, ProviderResult, SourceParameters, Weather,
};
pub use orchestrator::{OrchestratorOptions, RefreshOutcome, WeatherOrchestrator};
pub use provider::{Capability, ProviderId, Source};
pub use registry::SourceRegistry;
pub use store::{JsonLocationStore, LocationStore};
