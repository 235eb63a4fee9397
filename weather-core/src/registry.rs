//! Process-wide list of sources.
//!
//! Every typed view is a filter over the same master list. Dispatch targets must
//! be picked through the `configured_*` views so an unusable source is never
//! called.

use std::sync::Arc;

use crate::{
    WeatherError,
    provider::{Capability, Source},
};

#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn Source>>,
}

impl SourceRegistry {
    /// Later duplicates of an id are ignored.
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        let mut unique: Vec<Arc<dyn Source>> = Vec::with_capacity(sources.len());
        for source in sources {
            if unique.iter().any(|s| s.id() == source.id()) {
                tracing::warn!(source = source.id(), "duplicate source id ignored");
                continue;
            }
            unique.push(source);
        }
        Self { sources: unique }
    }

    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    pub fn get_source(&self, id: &str) -> Option<&Arc<dyn Source>> {
        self.sources.iter().find(|s| s.id() == id)
    }

    pub fn sources_with(&self, capability: Capability) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.iter().filter(move |s| s.has_capability(capability))
    }

    /// Like [`sources_with`](Self::sources_with), without unconfigured sources.
    pub fn configured_sources(&self, capability: Capability) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources_with(capability).filter(|s| s.is_configured())
    }

    pub fn main_weather_sources(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources_with(Capability::MainWeather)
    }

    pub fn secondary_weather_sources(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources_with(Capability::SecondaryWeather)
    }

    pub fn parameter_sources(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources_with(Capability::LocationParameters)
    }

    pub fn reverse_geocoding_sources(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources_with(Capability::ReverseGeocoding)
    }

    /// A configured source with `capability`, by id.
    pub fn configured_source(&self, id: &str, capability: Capability) -> Option<&Arc<dyn Source>> {
        self.configured_sources(capability).find(|s| s.id() == id)
    }

    /// The primary source for a location, or why it cannot be used.
    pub fn configured_main_source(&self, id: &str) -> Result<&Arc<dyn Source>, WeatherError> {
        let source = self
            .main_weather_sources()
            .find(|s| s.id() == id)
            .ok_or_else(|| WeatherError::SourceNotFound { source_id: id.to_string() })?;

        if !source.is_configured() {
            return Err(WeatherError::ApiKeyMissing { source_id: id.to_string() });
        }
        Ok(source)
    }
}
