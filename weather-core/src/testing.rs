//! Scripted sources, stores and fixtures for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    Daily, Feature, Hourly, Location, ProviderResult, SourceParameters, WeatherError,
    provider::{LocationParametersSource, MainWeatherSource, SecondaryWeatherSource, Source},
    store::LocationStore,
};

/// A source whose capabilities, latency and answers are set by the test.
#[derive(Debug, Clone)]
pub struct MockSource {
    id: String,
    configured: bool,
    main_features: Option<Vec<Feature>>,
    secondary_features: Option<Vec<Feature>>,
    rejected_for_location: BTreeSet<Feature>,
    parameter_keys: Option<Vec<String>>,
    delay: Duration,
    response: Result<ProviderResult, WeatherError>,
    resolution: Result<SourceParameters, WeatherError>,
    pub calls: Arc<AtomicUsize>,
    pub resolve_calls: Arc<AtomicUsize>,
    pub completed: Arc<AtomicUsize>,
    pub requested: Arc<Mutex<Vec<BTreeSet<Feature>>>>,
    pub seen_parameter_sources: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockSource {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            configured: true,
            main_features: None,
            secondary_features: None,
            rejected_for_location: BTreeSet::new(),
            parameter_keys: None,
            delay: Duration::ZERO,
            response: Ok(ProviderResult::default()),
            resolution: Ok(SourceParameters::new()),
            calls: Arc::default(),
            resolve_calls: Arc::default(),
            completed: Arc::default(),
            requested: Arc::default(),
            seen_parameter_sources: Arc::default(),
        }
    }

    pub fn main(id: &str, features: &[Feature]) -> Self {
        Self { main_features: Some(features.to_vec()), ..Self::new(id) }
    }

    pub fn secondary(id: &str, features: &[Feature]) -> Self {
        Self { secondary_features: Some(features.to_vec()), ..Self::new(id) }
    }

    pub fn also_secondary(mut self, features: &[Feature]) -> Self {
        self.secondary_features = Some(features.to_vec());
        self
    }

    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    /// The region predicate rejects `feature` everywhere.
    pub fn rejecting(mut self, feature: Feature) -> Self {
        self.rejected_for_location.insert(feature);
        self
    }

    /// Requires `keys` to be present in its parameters.
    pub fn with_parameters(mut self, keys: &[&str]) -> Self {
        self.parameter_keys = Some(keys.iter().map(|k| k.to_string()).collect());
        let resolved = keys.iter().map(|k| (k.to_string(), format!("{}-{k}", self.id))).collect();
        self.resolution = Ok(resolved);
        self
    }

    pub fn resolving_to(mut self, resolution: Result<SourceParameters, WeatherError>) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn responding(mut self, response: Result<ProviderResult, WeatherError>) -> Self {
        self.response = response;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn resolve_count(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn requested_features(&self) -> Vec<BTreeSet<Feature>> {
        self.requested.lock().unwrap().clone()
    }

    async fn answer(&self, location: &Location, features: &BTreeSet<Feature>) -> Result<ProviderResult, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(features.clone());

        let seen = location.parameter_sources().map(str::to_string).collect();
        self.seen_parameter_sources.lock().unwrap().push(seen);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

impl Source for MockSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn as_main(&self) -> Option<&dyn MainWeatherSource> {
        self.main_features.as_ref().map(|_| self as &dyn MainWeatherSource)
    }

    fn as_secondary(&self) -> Option<&dyn SecondaryWeatherSource> {
        self.secondary_features.as_ref().map(|_| self as &dyn SecondaryWeatherSource)
    }

    fn as_parameter_source(&self) -> Option<&dyn LocationParametersSource> {
        self.parameter_keys.as_ref().map(|_| self as &dyn LocationParametersSource)
    }
}

#[async_trait]
impl MainWeatherSource for MockSource {
    fn main_features(&self) -> &[Feature] {
        self.main_features.as_deref().unwrap_or_default()
    }

    async fn request_weather(
        &self,
        location: &Location,
        features: &BTreeSet<Feature>,
    ) -> Result<ProviderResult, WeatherError> {
        self.answer(location, features).await
    }
}

#[async_trait]
impl SecondaryWeatherSource for MockSource {
    fn secondary_features(&self) -> &[Feature] {
        self.secondary_features.as_deref().unwrap_or_default()
    }

    fn supports_for_location(&self, _location: &Location, feature: Feature) -> bool {
        self.secondary_features().contains(&feature) && !self.rejected_for_location.contains(&feature)
    }

    async fn request_secondary_weather(
        &self,
        location: &Location,
        features: &BTreeSet<Feature>,
    ) -> Result<ProviderResult, WeatherError> {
        self.answer(location, features).await
    }
}

#[async_trait]
impl LocationParametersSource for MockSource {
    fn needs_refresh(&self, location: &Location, coordinates_changed: bool, _features: &BTreeSet<Feature>) -> bool {
        coordinates_changed
            || self
                .parameter_keys
                .iter()
                .flatten()
                .any(|key| location.parameter(&self.id, key).is_none_or(str::is_empty))
    }

    async fn resolve_parameters(&self, _location: &Location) -> Result<SourceParameters, WeatherError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.resolution.clone()
    }
}

/// Keeps locations in memory.
#[derive(Debug, Default)]
pub struct MemoryLocationStore {
    locations: Mutex<BTreeMap<String, Location>>,
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn load(&self, id: &str) -> anyhow::Result<Option<Location>> {
        Ok(self.locations.lock().unwrap().get(id).cloned())
    }

    async fn save(&self, location: &Location) -> anyhow::Result<()> {
        self.locations.lock().unwrap().insert(location.id.clone(), location.clone());
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<Location>> {
        Ok(self.locations.lock().unwrap().values().cloned().collect())
    }
}

pub fn location(main_source: &str) -> Location {
    Location::new("home", 48.8566, 2.3522, chrono_tz::UTC, main_source)
}

pub fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 4, 1).unwrap() + ChronoDuration::days(offset)
}

pub fn hour(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap() + ChronoDuration::hours(offset)
}

pub fn days(count: i64) -> Vec<Daily> {
    (0..count)
        .map(|i| Daily { temperature_max_c: Some(15.0 + i as f64), ..Daily::new(day(i)) })
        .collect()
}

pub fn hours(count: i64) -> Vec<Hourly> {
    (0..count)
        .map(|i| Hourly { temperature_c: Some(10.0 + i as f64), ..Hourly::new(hour(i)) })
        .collect()
}

/// A primary result with current, three days and 48 hours.
pub fn baseline() -> ProviderResult {
    ProviderResult {
        current: Some(crate::Current {
            observation_time: Some(hour(1)),
            temperature_c: Some(12.0),
            ..Default::default()
        }),
        daily: Some(days(3)),
        hourly: Some(hours(48)),
        ..Default::default()
    }
}
