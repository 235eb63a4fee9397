//! Location parameter resolution.
//!
//! Some sources can only be queried with identifiers of their own (a station
//! code, an internal location id). Before dispatch, every routed source that
//! declares the parameters capability is asked whether its cached parameters
//! are stale; stale ones are refreshed concurrently. A source's new map
//! replaces its old map as a whole, and a resolution failure only affects the
//! features routed to that source.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use futures::future::join_all;
use tracing::{Instrument, debug, info_span, warn};

use crate::{
    Feature, Location, SourceParameters, WeatherError, provider::Capability,
    registry::SourceRegistry, router::RoutingPlan,
};

/// Location with refreshed parameters, plus the sources that could not be resolved.
#[derive(Debug, Clone)]
pub struct ResolvedLocation {
    pub location: Location,
    pub failures: BTreeMap<String, WeatherError>,
}

pub struct ParameterResolver<'a> {
    registry: &'a SourceRegistry,
    timeout: Duration,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(registry: &'a SourceRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Whether `source_id` must refresh its parameters before serving `features`.
    pub fn needs_refresh(
        &self,
        source_id: &str,
        location: &Location,
        coordinates_changed: bool,
        features: &BTreeSet<Feature>,
    ) -> bool {
        self.registry
            .configured_source(source_id, Capability::LocationParameters)
            .and_then(|s| s.as_parameter_source())
            .is_some_and(|p| p.needs_refresh(&location.scoped_to(source_id), coordinates_changed, features))
    }

    /// Resolve parameters for one source.
    pub async fn resolve_parameters(
        &self,
        source_id: &str,
        location: &Location,
    ) -> Result<SourceParameters, WeatherError> {
        let source = self
            .registry
            .configured_source(source_id, Capability::LocationParameters)
            .ok_or_else(|| WeatherError::SourceNotFound { source_id: source_id.to_string() })?;
        let Some(parameters) = source.as_parameter_source() else {
            return Err(WeatherError::SourceNotFound { source_id: source_id.to_string() });
        };

        let scoped = location.scoped_to(source_id);
        match tokio::time::timeout(self.timeout, parameters.resolve_parameters(&scoped)).await {
            Ok(result) => result,
            Err(_) => Err(WeatherError::Timeout { source_id: source_id.to_string() }),
        }
    }

    /// Refresh stale parameters for every source in `plan`.
    pub async fn resolve(
        &self,
        location: &Location,
        coordinates_changed: bool,
        plan: &RoutingPlan,
    ) -> ResolvedLocation {
        let stale: Vec<&str> = plan
            .groups()
            .into_iter()
            .filter(|(source_id, features)| {
                self.needs_refresh(source_id, location, coordinates_changed, features)
            })
            .map(|(source_id, _)| source_id)
            .collect();

        let mut resolved = location.clone();
        let mut failures = BTreeMap::new();

        if stale.is_empty() {
            return ResolvedLocation { location: resolved, failures };
        }

        let calls = stale.iter().map(|source_id| {
            self.resolve_parameters(source_id, location)
                .instrument(info_span!("resolve_parameters", source = %source_id))
        });
        let results = join_all(calls).await;

        for (source_id, result) in stale.into_iter().zip(results) {
            match result {
                Ok(parameters) => {
                    debug!(source = source_id, keys = parameters.len(), "location parameters refreshed");
                    resolved = resolved.with_parameters(source_id, parameters);
                }
                Err(err) => {
                    warn!(source = source_id, error = %err, "location parameter resolution failed");
                    failures.insert(source_id.to_string(), err);
                }
            }
        }

        ResolvedLocation { location: resolved, failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        router::FeatureRouter,
        testing::{MockSource, location},
    };
    use std::sync::Arc;

    const BASE: &[Feature] = &[Feature::Current, Feature::Daily, Feature::Hourly];

    fn all_features() -> BTreeSet<Feature> {
        Feature::all().iter().copied().collect()
    }

    #[test]
    fn coordinate_change_always_needs_refresh() {
        let source = MockSource::main("params", BASE).with_parameters(&["station"]);
        let registry = SourceRegistry::new(vec![Arc::new(source)]);
        let resolver = ParameterResolver::new(&registry, Duration::from_secs(1));

        let mut params = SourceParameters::new();
        params.insert("station".into(), "LFPG".into());
        let cached = location("params").with_parameters("params", params);

        assert!(!resolver.needs_refresh("params", &cached, false, &all_features()));
        assert!(resolver.needs_refresh("params", &cached, true, &all_features()));
    }

    #[test]
    fn empty_parameter_value_needs_refresh() {
        let source = MockSource::main("params", BASE).with_parameters(&["station"]);
        let registry = SourceRegistry::new(vec![Arc::new(source)]);
        let resolver = ParameterResolver::new(&registry, Duration::from_secs(1));

        let mut params = SourceParameters::new();
        params.insert("station".into(), String::new());
        let cached = location("params").with_parameters("params", params);

        assert!(resolver.needs_refresh("params", &cached, false, &all_features()));
        assert!(resolver.needs_refresh("params", &location("params"), false, &all_features()));
    }

    #[test]
    fn sources_without_parameters_never_refresh() {
        let registry = SourceRegistry::new(vec![Arc::new(MockSource::main("plain", BASE))]);
        let resolver = ParameterResolver::new(&registry, Duration::from_secs(1));
        assert!(!resolver.needs_refresh("plain", &location("plain"), true, &all_features()));
    }

    #[tokio::test]
    async fn resolves_stale_sources_and_isolates_failures() {
        let primary = MockSource::main("primary", BASE).with_parameters(&["grid"]);
        let broken = MockSource::secondary("aq", &[Feature::AirQuality])
            .with_parameters(&["station"])
            .resolving_to(Err(WeatherError::invalid_location("aq", "no station nearby")));
        let registry = SourceRegistry::new(vec![Arc::new(primary.clone()), Arc::new(broken)]);

        let loc = location("primary").with_override(Feature::AirQuality, "aq");
        let plan = FeatureRouter::new(&registry).route(&loc, &all_features()).unwrap();

        let resolver = ParameterResolver::new(&registry, Duration::from_secs(1));
        let resolved = resolver.resolve(&loc, false, &plan).await;

        assert_eq!(resolved.location.parameter("primary", "grid"), Some("primary-grid"));
        assert!(resolved.location.parameters_for("aq").is_none());
        assert!(matches!(resolved.failures.get("aq"), Some(WeatherError::InvalidLocation { .. })));
        assert!(!resolved.failures.contains_key("primary"));
        assert_eq!(primary.resolve_count(), 1);
    }

    #[tokio::test]
    async fn fresh_parameters_are_not_resolved_again() {
        let primary = MockSource::main("primary", BASE).with_parameters(&["grid"]);
        let registry = SourceRegistry::new(vec![Arc::new(primary.clone())]);

        let mut params = SourceParameters::new();
        params.insert("grid".into(), "cached".into());
        let loc = location("primary").with_parameters("primary", params);
        let plan = FeatureRouter::new(&registry).route(&loc, &all_features()).unwrap();

        let resolved = ParameterResolver::new(&registry, Duration::from_secs(1))
            .resolve(&loc, false, &plan)
            .await;

        assert_eq!(resolved.location.parameter("primary", "grid"), Some("cached"));
        assert_eq!(primary.resolve_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_resolution_times_out() {
        let primary = MockSource::main("primary", BASE)
            .with_parameters(&["grid"])
            .delayed(Duration::from_secs(30));
        let registry = SourceRegistry::new(vec![Arc::new(primary)]);

        let loc = location("primary");
        let plan = FeatureRouter::new(&registry).route(&loc, &all_features()).unwrap();
        let resolved = ParameterResolver::new(&registry, Duration::from_secs(5))
            .resolve(&loc, false, &plan)
            .await;

        assert_eq!(
            resolved.failures.get("primary"),
            Some(&WeatherError::Timeout { source_id: "primary".into() })
        );
    }
}
