use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Alert, AirQuality, Current, Daily, Hourly, Minutely, Normals, Pollen};
use crate::{Feature, WeatherError};

/// Air quality as reported by one source, keyed by time rather than by row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AirQualityData {
    pub current: Option<AirQuality>,
    pub hourly: BTreeMap<DateTime<Utc>, AirQuality>,
    pub daily: BTreeMap<NaiveDate, AirQuality>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollenData {
    pub current: Option<Pollen>,
    pub daily: BTreeMap<NaiveDate, Pollen>,
}

/// Partial weather returned by one source for one request.
///
/// Every field is optional; a source only fills what it was asked for and
/// managed to get. Air quality and pollen are reported through
/// [`AirQualityData`] / [`PollenData`], the matching fields on rows are
/// output slots filled by the merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub current: Option<Current>,
    pub daily: Option<Vec<Daily>>,
    pub hourly: Option<Vec<Hourly>>,
    pub minutely: Option<Vec<Minutely>>,
    pub alerts: Option<Vec<Alert>>,
    pub normals: Option<Normals>,
    pub air_quality: Option<AirQualityData>,
    pub pollen: Option<PollenData>,

    /// Features the source tried and failed while the rest of the call succeeded.
    pub failures: BTreeMap<Feature, WeatherError>,
}

impl ProviderResult {
    /// Whether the result carries data for `feature`.
    pub fn provides(&self, feature: Feature) -> bool {
        match feature {
            Feature::Current => self.current.is_some(),
            Feature::Daily => self.daily.as_ref().is_some_and(|d| !d.is_empty()),
            Feature::Hourly => self.hourly.as_ref().is_some_and(|h| !h.is_empty()),
            Feature::Minutely => self.minutely.is_some(),
            Feature::AirQuality => self.air_quality.is_some(),
            Feature::Pollen => self.pollen.is_some(),
            Feature::Alert => self.alerts.is_some(),
            Feature::Normals => self.normals.is_some(),
        }
    }

    pub fn record_failure(&mut self, feature: Feature, error: WeatherError) {
        self.failures.insert(feature, error);
    }
}
