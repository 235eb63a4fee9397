//! One refresh of one location: route, resolve parameters, fan out, join, merge.
//!
//! Each distinct routed source gets exactly one call carrying only its
//! features. All calls run concurrently and are joined together, failures
//! included, before merging; a failure is turned into an outcome for that
//! source and never cuts the join short. Dropping the refresh future drops
//! every outstanding call with it.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use chrono_tz::Tz;
use futures::future::join_all;
use tracing::{Instrument, error, info, info_span};

use crate::{
    Config, Feature, Location, ProviderResult, SourceParameters, Weather, WeatherError,
    coalesce::RequestCoalescer,
    merge::{SourceOutcomes, WeatherMerger},
    registry::SourceRegistry,
    resolver::{ParameterResolver, ResolvedLocation},
    router::{FeatureRouter, RoutingPlan},
};

const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Upper bound for each parameter resolution and each provider call.
    pub provider_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self { provider_timeout: DEFAULT_PROVIDER_TIMEOUT }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self { provider_timeout: config.provider_timeout() }
    }
}

/// A successful refresh: the location with its new parameters and weather.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub location: Location,
    pub weather: Arc<Weather>,
}

type RefreshResult = Result<RefreshOutcome, WeatherError>;

/// Everything a refresh result depends on. Two refreshes are only shared when
/// they would have produced the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RefreshKey {
    id: String,
    latitude: u64,
    longitude: u64,
    timezone: Tz,
    main_source: String,
    feature_overrides: BTreeMap<Feature, String>,
    parameters: BTreeMap<String, SourceParameters>,
    coordinates_changed: bool,
    features: BTreeSet<Feature>,
}

impl RefreshKey {
    fn new(location: &Location, coordinates_changed: bool, features: &BTreeSet<Feature>) -> Self {
        let parameters = location
            .parameter_sources()
            .filter_map(|id| Some((id.to_string(), location.parameters_for(id)?.clone())))
            .collect();

        Self {
            id: location.id.clone(),
            latitude: location.latitude.to_bits(),
            longitude: location.longitude.to_bits(),
            timezone: location.timezone,
            main_source: location.main_source.clone(),
            feature_overrides: location.feature_overrides.clone(),
            parameters,
            coordinates_changed,
            features: features.clone(),
        }
    }
}

#[derive(Clone)]
pub struct WeatherOrchestrator {
    registry: Arc<SourceRegistry>,
    options: OrchestratorOptions,
    coalescer: RequestCoalescer<RefreshKey, RefreshResult>,
}

impl WeatherOrchestrator {
    pub fn new(registry: Arc<SourceRegistry>, options: OrchestratorOptions) -> Self {
        Self { registry, options, coalescer: RequestCoalescer::new() }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Refresh `location`, sharing the work with any identical refresh already running.
    ///
    /// On error the caller keeps its previous location and weather untouched.
    pub async fn refresh(
        &self,
        location: &Location,
        coordinates_changed: bool,
        features: &BTreeSet<Feature>,
    ) -> RefreshResult {
        let key = RefreshKey::new(location, coordinates_changed, features);
        let this = self.clone();
        let location = location.clone();
        let features = features.clone();

        self.coalescer
            .run(key, move || async move {
                this.refresh_uncoalesced(&location, coordinates_changed, &features).await
            })
            .await
    }

    /// Refresh without request deduplication.
    pub async fn refresh_uncoalesced(
        &self,
        location: &Location,
        coordinates_changed: bool,
        features: &BTreeSet<Feature>,
    ) -> RefreshResult {
        let plan = FeatureRouter::new(&self.registry).route(location, features)?;

        let base = if coordinates_changed {
            location.clone().without_parameters()
        } else {
            location.clone()
        };

        let resolver = ParameterResolver::new(&self.registry, self.options.provider_timeout);
        let resolved = resolver.resolve(&base, coordinates_changed, &plan).await;

        let outcomes = self.dispatch(&resolved, &plan).await;

        let weather = WeatherMerger::new(&plan, location.timezone, Utc::now()).merge(&outcomes)?;
        let weather = Arc::new(weather);

        info!(
            location = %location.id,
            sources = outcomes.len(),
            failed_features = weather.failures.len(),
            dropped_features = plan.dropped().len(),
            "weather refreshed"
        );

        Ok(RefreshOutcome { location: resolved.location.with_weather(Arc::clone(&weather)), weather })
    }

    /// One concurrent call per source in `plan`, all joined.
    async fn dispatch(&self, resolved: &ResolvedLocation, plan: &RoutingPlan) -> SourceOutcomes {
        let groups = plan.groups();

        let calls = groups.iter().map(|(source_id, features)| async move {
            let outcome = match resolved.failures.get(*source_id) {
                Some(err) => Err(err.clone()),
                None => {
                    self.call_source(source_id, &resolved.location, features)
                        .instrument(info_span!("provider", source = %source_id))
                        .await
                }
            };
            (source_id.to_string(), outcome)
        });

        join_all(calls).await.into_iter().collect::<BTreeMap<_, _>>()
    }

    async fn call_source(
        &self,
        source_id: &str,
        location: &Location,
        features: &BTreeSet<Feature>,
    ) -> Result<ProviderResult, WeatherError> {
        let source = self
            .registry
            .get_source(source_id)
            .ok_or_else(|| WeatherError::SourceNotFound { source_id: source_id.to_string() })?;

        if !source.is_configured() {
            error!(source = source_id, "unconfigured source reached dispatch");
            return Err(WeatherError::ApiKeyMissing { source_id: source_id.to_string() });
        }

        let unsupported = |feature: Option<&Feature>| WeatherError::UnsupportedFeatureForSource {
            source_id: source_id.to_string(),
            feature: feature.copied().unwrap_or(Feature::Current),
        };

        let scoped = location.scoped_to(source_id);
        let request = if features.iter().any(|f| !f.is_secondary()) {
            let main = source.as_main().ok_or_else(|| unsupported(features.first()))?;
            main.request_weather(&scoped, features)
        } else {
            let secondary = source.as_secondary().ok_or_else(|| unsupported(features.first()))?;
            secondary.request_secondary_weather(&scoped, features)
        };

        match tokio::time::timeout(self.options.provider_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(WeatherError::Timeout { source_id: source_id.to_string() }),
        }
    }
}
