//! Per-feature source selection.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::{
    Feature, Location, WeatherError, provider::Capability, registry::SourceRegistry,
};

/// Which source answers which feature for one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingPlan {
    main_source: String,
    assignments: BTreeMap<Feature, String>,
    dropped: BTreeSet<Feature>,
}

impl RoutingPlan {
    /// A plan with explicit assignments; base features default to `main_source`.
    pub fn new(main_source: impl Into<String>, assignments: BTreeMap<Feature, String>) -> Self {
        let main_source = main_source.into();
        let mut all = assignments;
        for feature in Feature::base() {
            all.entry(*feature).or_insert_with(|| main_source.clone());
        }
        Self { main_source, assignments: all, dropped: BTreeSet::new() }
    }

    pub fn main_source(&self) -> &str {
        &self.main_source
    }

    pub fn source_for(&self, feature: Feature) -> Option<&str> {
        self.assignments.get(&feature).map(String::as_str)
    }

    pub fn assignments(&self) -> &BTreeMap<Feature, String> {
        &self.assignments
    }

    /// Requested features nobody can answer for this location.
    pub fn dropped(&self) -> &BTreeSet<Feature> {
        &self.dropped
    }

    /// Features grouped by source: one call per distinct source.
    pub fn groups(&self) -> BTreeMap<&str, BTreeSet<Feature>> {
        let mut groups: BTreeMap<&str, BTreeSet<Feature>> = BTreeMap::new();
        for (feature, source_id) in &self.assignments {
            groups.entry(source_id.as_str()).or_default().insert(*feature);
        }
        groups
    }
}

pub struct FeatureRouter<'a> {
    registry: &'a SourceRegistry,
}

impl<'a> FeatureRouter<'a> {
    pub fn new(registry: &'a SourceRegistry) -> Self {
        Self { registry }
    }

    /// Assign each requested feature to a single source.
    ///
    /// Current, daily and hourly are always requested from the main source so
    /// the merge has a baseline. Fails only when the main source itself is
    /// unknown or unconfigured.
    pub fn route(
        &self,
        location: &Location,
        requested: &BTreeSet<Feature>,
    ) -> Result<RoutingPlan, WeatherError> {
        let main = self.registry.configured_main_source(&location.main_source)?;
        let main_id = main.id().to_string();
        let main_caps = main.as_main();

        let mut assignments = BTreeMap::new();
        let mut dropped = BTreeSet::new();

        for feature in Feature::base() {
            assignments.insert(*feature, main_id.clone());
        }

        for feature in requested.iter().copied().filter(Feature::is_secondary) {
            if let Some(source_id) = self.override_for(location, feature) {
                assignments.insert(feature, source_id.to_string());
                continue;
            }

            if main_caps.is_some_and(|m| m.supports_in_main(location, feature)) {
                assignments.insert(feature, main_id.clone());
            } else {
                debug!(%feature, location = %location.id, "no source for feature, dropping");
                dropped.insert(feature);
            }
        }

        Ok(RoutingPlan { main_source: main_id, assignments, dropped })
    }

    /// The override source for `feature`, if it is configured and covers the location.
    fn override_for(&self, location: &Location, feature: Feature) -> Option<&'a str> {
        let id = location.override_for(feature)?;

        let Some(source) = self.registry.configured_source(id, Capability::SecondaryWeather) else {
            debug!(%feature, source = id, "override source unavailable, falling back");
            return None;
        };

        let supported = source
            .as_secondary()
            .is_some_and(|s| s.supports_for_location(location, feature));
        if !supported {
            debug!(%feature, source = id, "override source does not cover location, falling back");
            return None;
        }

        Some(source.id())
    }
}
