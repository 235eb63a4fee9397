//! Combining per-source results into one [`Weather`].
//!
//! The main source's result is the base. Each other routed feature is then
//! written from the result of the source it was routed to, which always wins
//! over anything the main source reported for that feature. Daily values are
//! matched by local date and hourly values by timestamp; secondary values with
//! no matching row are dropped rather than added as rows of their own.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::{
    AirQuality, Feature, FeatureUpdate, Weather, WeatherError,
    model::{AirQualityData, PollenData, ProviderResult},
    router::RoutingPlan,
};

/// Secondary hourly points further than this from a row are not used for it.
const HOURLY_MATCH_TOLERANCE_MINUTES: i64 = 30;

/// Outcome of every dispatched call, keyed by source id.
pub type SourceOutcomes = BTreeMap<String, Result<ProviderResult, WeatherError>>;

pub struct WeatherMerger<'a> {
    plan: &'a RoutingPlan,
    timezone: Tz,
    now: DateTime<Utc>,
}

impl<'a> WeatherMerger<'a> {
    pub fn new(plan: &'a RoutingPlan, timezone: Tz, now: DateTime<Utc>) -> Self {
        Self { plan, timezone, now }
    }

    /// Merge all outcomes.
    ///
    /// Fails only when the main source produced no usable baseline; every
    /// other failure ends up in [`Weather::failures`].
    pub fn merge(&self, outcomes: &SourceOutcomes) -> Result<Weather, WeatherError> {
        let main_id = self.plan.main_source();
        let primary = match outcomes.get(main_id) {
            Some(Ok(result)) => result,
            Some(Err(err)) => return Err(err.clone()),
            None => return Err(WeatherError::incomplete(main_id, "main source was not called")),
        };

        if !Feature::base().iter().any(|f| primary.provides(*f)) {
            return Err(WeatherError::incomplete(main_id, "no current, daily or hourly data"));
        }

        let mut weather = Weather {
            current: primary.current.clone(),
            daily: primary.daily.clone().unwrap_or_default(),
            hourly: primary.hourly.clone().unwrap_or_default(),
            minutely: Vec::new(),
            alerts: Vec::new(),
            normals: None,
            refresh_time: self.now,
            updates: BTreeMap::new(),
            failures: BTreeMap::new(),
        };

        // Row-level slots are only ever filled from the routed source's data.
        if let Some(current) = weather.current.as_mut() {
            current.air_quality = None;
            current.pollen = None;
        }
        for daily in &mut weather.daily {
            daily.air_quality = None;
            daily.pollen = None;
        }
        for hourly in &mut weather.hourly {
            hourly.air_quality = None;
        }

        for (feature, source_id) in self.plan.assignments() {
            let feature = *feature;
            let result = match outcomes.get(source_id) {
                Some(Ok(result)) => result,
                Some(Err(err)) => {
                    weather.failures.insert(feature, err.clone());
                    continue;
                }
                None => {
                    let err = WeatherError::incomplete(source_id, "source was not called");
                    weather.failures.insert(feature, err);
                    continue;
                }
            };

            if let Some(err) = result.failures.get(&feature) {
                weather.failures.insert(feature, err.clone());
                continue;
            }

            if self.apply(&mut weather, feature, result) {
                let update = FeatureUpdate { source_id: source_id.clone(), time: self.now };
                weather.updates.insert(feature, update);
            } else {
                let err = WeatherError::incomplete(source_id, format!("no {feature} data"));
                weather.failures.insert(feature, err);
            }
        }

        for (feature, err) in &weather.failures {
            warn!(%feature, error = %err, "feature could not be populated");
        }
        debug!(
            daily = weather.daily.len(),
            hourly = weather.hourly.len(),
            populated = weather.updates.len(),
            failed = weather.failures.len(),
            "weather merged"
        );

        Ok(weather)
    }

    /// Write one feature from `result`; false when the result has no data for it.
    fn apply(&self, weather: &mut Weather, feature: Feature, result: &ProviderResult) -> bool {
        match feature {
            // Already copied from the main result.
            Feature::Current | Feature::Daily | Feature::Hourly => result.provides(feature),
            Feature::Minutely => result.minutely.as_ref().is_some_and(|minutely| {
                weather.minutely = minutely.clone();
                true
            }),
            Feature::Alert => result.alerts.as_ref().is_some_and(|alerts| {
                weather.alerts = alerts.clone();
                true
            }),
            Feature::Normals => result.normals.as_ref().is_some_and(|normals| {
                weather.normals = Some(normals.clone());
                true
            }),
            Feature::AirQuality => result.air_quality.as_ref().is_some_and(|data| {
                self.apply_air_quality(weather, data);
                true
            }),
            Feature::Pollen => result.pollen.as_ref().is_some_and(|data| {
                self.apply_pollen(weather, data);
                true
            }),
        }
    }

    fn apply_air_quality(&self, weather: &mut Weather, data: &AirQualityData) {
        let derived = self.daily_means(&data.hourly);

        for daily in &mut weather.daily {
            daily.air_quality =
                data.daily.get(&daily.date).or_else(|| derived.get(&daily.date)).cloned();
        }

        for hourly in &mut weather.hourly {
            hourly.air_quality = nearest(&data.hourly, hourly.time).cloned();
        }

        if let Some(current) = weather.current.as_mut() {
            let at = current.observation_time.unwrap_or(self.now);
            current.air_quality = data.current.clone().or_else(|| nearest(&data.hourly, at).cloned());
        }
    }

    fn apply_pollen(&self, weather: &mut Weather, data: &PollenData) {
        for daily in &mut weather.daily {
            daily.pollen = data.daily.get(&daily.date).cloned();
        }

        if let Some(current) = weather.current.as_mut() {
            let today = self.now.with_timezone(&self.timezone).date_naive();
            current.pollen = data.current.clone().or_else(|| data.daily.get(&today).cloned());
        }
    }

    /// Hourly samples averaged per local calendar day.
    fn daily_means(&self, hourly: &BTreeMap<DateTime<Utc>, AirQuality>) -> BTreeMap<NaiveDate, AirQuality> {
        let mut by_day: BTreeMap<NaiveDate, Vec<&AirQuality>> = BTreeMap::new();
        for (time, sample) in hourly {
            let date = time.with_timezone(&self.timezone).date_naive();
            by_day.entry(date).or_default().push(sample);
        }

        by_day
            .into_iter()
            .filter_map(|(date, samples)| AirQuality::mean(samples).map(|mean| (date, mean)))
            .collect()
    }
}

/// The entry at `at`, else the closest one within the tolerance; ties go to the earlier one.
fn nearest<T>(series: &BTreeMap<DateTime<Utc>, T>, at: DateTime<Utc>) -> Option<&T> {
    if let Some(exact) = series.get(&at) {
        return Some(exact);
    }

    let before = series.range(..at).next_back().map(|(t, v)| (at - *t, v));
    let after = series.range(at..).next().map(|(t, v)| (*t - at, v));

    let closest = match (before, after) {
        (Some(b), Some(a)) => Some(if a.0 < b.0 { a } else { b }),
        (b, a) => b.or(a),
    };

    let tolerance = TimeDelta::minutes(HOURLY_MATCH_TOLERANCE_MINUTES);
    closest.filter(|(distance, _)| *distance <= tolerance).map(|(_, v)| v)
}
