use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{AirQuality, Pollen};
use crate::{Feature, WeatherError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Current {
    pub observation_time: Option<DateTime<Utc>>,
    pub temperature_c: Option<f64>,
    pub feels_like_c: Option<f64>,
    pub condition: Option<String>,
    pub humidity_pct: Option<u8>,
    pub wind_speed_mps: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub uv_index: Option<f64>,
    pub air_quality: Option<AirQuality>,
    pub pollen: Option<Pollen>,
}

/// One local calendar day of forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Daily {
    pub date: NaiveDate,
    pub temperature_max_c: Option<f64>,
    pub temperature_min_c: Option<f64>,
    pub condition: Option<String>,
    pub precipitation_mm: Option<f64>,
    pub precipitation_probability_pct: Option<u8>,
    pub air_quality: Option<AirQuality>,
    pub pollen: Option<Pollen>,
}

impl Daily {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            temperature_max_c: None,
            temperature_min_c: None,
            condition: None,
            precipitation_mm: None,
            precipitation_probability_pct: None,
            air_quality: None,
            pollen: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hourly {
    pub time: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub condition: Option<String>,
    pub precipitation_mm: Option<f64>,
    pub precipitation_probability_pct: Option<u8>,
    pub wind_speed_mps: Option<f64>,
    pub air_quality: Option<AirQuality>,
}

impl Hourly {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            temperature_c: None,
            condition: None,
            precipitation_mm: None,
            precipitation_probability_pct: None,
            wind_speed_mps: None,
            air_quality: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Minutely {
    pub time: DateTime<Utc>,
    pub precipitation_intensity_mm_h: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Unknown,
    Minor,
    Moderate,
    Severe,
    Extreme,
}

impl AlertSeverity {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "minor" => AlertSeverity::Minor,
            "moderate" => AlertSeverity::Moderate,
            "severe" => AlertSeverity::Severe,
            "extreme" => AlertSeverity::Extreme,
            _ => AlertSeverity::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub headline: String,
    pub description: Option<String>,
    pub severity: AlertSeverity,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub issuer: Option<String>,
}

/// Climate normals for the current month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normals {
    pub month: u32,
    pub temperature_max_c: Option<f64>,
    pub temperature_min_c: Option<f64>,
}

/// The merged weather for one location and one refresh.
///
/// Built once by the merge engine and shared behind an `Arc`; never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub current: Option<Current>,
    pub daily: Vec<Daily>,
    pub hourly: Vec<Hourly>,
    pub minutely: Vec<Minutely>,
    pub alerts: Vec<Alert>,
    pub normals: Option<Normals>,
    pub refresh_time: DateTime<Utc>,

    /// When each populated feature was last written, and by which source.
    pub updates: BTreeMap<Feature, FeatureUpdate>,

    /// Features that were routed to a source but could not be populated.
    pub failures: BTreeMap<Feature, WeatherError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureUpdate {
    pub source_id: String,
    pub time: DateTime<Utc>,
}

impl Weather {
    pub fn today(&self, today: NaiveDate) -> Option<&Daily> {
        self.daily.iter().find(|d| d.date == today)
    }

    pub fn is_populated(&self, feature: Feature) -> bool {
        self.updates.contains_key(&feature)
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
