use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

use super::Weather;
use crate::Feature;

/// Opaque identifiers a source derived for a location, e.g. a station code.
pub type SourceParameters = BTreeMap<String, String>;

/// Coordinates closer than this are treated as the same place.
const COORDINATE_EPSILON: f64 = 1e-5;

/// A place the user asked weather for, with its routing choices and cached state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Tz,

    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,

    /// Source answering current, daily and hourly data.
    pub main_source: String,

    /// Per-feature source overrides for secondary features.
    #[serde(default)]
    pub feature_overrides: BTreeMap<Feature, String>,

    /// Parameters per source id. Each inner map is only ever replaced whole.
    #[serde(default)]
    parameters: BTreeMap<String, Arc<SourceParameters>>,

    /// Last successfully merged weather, if any.
    #[serde(default)]
    pub weather: Option<Arc<Weather>>,
}

impl Location {
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        timezone: Tz,
        main_source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            timezone,
            city: None,
            region: None,
            country: None,
            country_code: None,
            main_source: main_source.into(),
            feature_overrides: BTreeMap::new(),
            parameters: BTreeMap::new(),
            weather: None,
        }
    }

    pub fn display_name(&self) -> String {
        match (&self.city, &self.country) {
            (Some(city), Some(country)) => format!("{city}, {country}"),
            (Some(city), None) => city.clone(),
            _ => format!("{:.4}, {:.4}", self.latitude, self.longitude),
        }
    }

    pub fn override_for(&self, feature: Feature) -> Option<&str> {
        self.feature_overrides.get(&feature).map(String::as_str)
    }

    pub fn with_override(mut self, feature: Feature, source_id: impl Into<String>) -> Self {
        self.feature_overrides.insert(feature, source_id.into());
        self
    }

    pub fn parameters_for(&self, source_id: &str) -> Option<&SourceParameters> {
        self.parameters.get(source_id).map(Arc::as_ref)
    }

    pub fn parameter(&self, source_id: &str, key: &str) -> Option<&str> {
        self.parameters_for(source_id)?.get(key).map(String::as_str)
    }

    pub fn parameter_sources(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    /// Replace the whole parameter map of one source.
    pub fn with_parameters(mut self, source_id: &str, parameters: SourceParameters) -> Self {
        self.parameters.insert(source_id.to_string(), Arc::new(parameters));
        self
    }

    /// Drop every cached parameter, e.g. after the coordinates moved.
    pub fn without_parameters(mut self) -> Self {
        self.parameters.clear();
        self
    }

    /// A copy that only carries `source_id`'s parameters, handed to that source.
    pub fn scoped_to(&self, source_id: &str) -> Self {
        let mut scoped = self.clone();
        scoped.parameters.retain(|id, _| id == source_id);
        scoped.weather = None;
        scoped
    }

    pub fn with_weather(mut self, weather: Arc<Weather>) -> Self {
        self.weather = Some(weather);
        self
    }

    pub fn coordinates_differ(&self, other: &Location) -> bool {
        (self.latitude - other.latitude).abs() > COORDINATE_EPSILON
            || (self.longitude - other.longitude).abs() > COORDINATE_EPSILON
    }
}
