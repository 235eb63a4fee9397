use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::{
    AirQuality, Feature, Location, Pollen, ProviderResult, WeatherError,
    model::{AirQualityData, PollenData},
    provider::{SecondaryWeatherSource, Source, fetch_json, unix_to_utc},
};

const SOURCE_ID: &str = "openmeteo";
const DEFAULT_INSTANCE_URL: &str = "https://air-quality-api.open-meteo.com";
const FORECAST_DAYS: u8 = 4;

const SECONDARY_FEATURES: &[Feature] = &[Feature::AirQuality, Feature::Pollen];

const AIR_QUALITY_VARIABLES: &[&str] = &[
    "pm2_5",
    "pm10",
    "ozone",
    "nitrogen_dioxide",
    "sulphur_dioxide",
    "carbon_monoxide",
];
const POLLEN_VARIABLES: &[&str] = &[
    "alder_pollen",
    "birch_pollen",
    "grass_pollen",
    "mugwort_pollen",
    "olive_pollen",
    "ragweed_pollen",
];

/// Pollen comes from the European CAMS domain only.
const POLLEN_LATITUDE: (f64, f64) = (30.05, 71.95);
const POLLEN_LONGITUDE: (f64, f64) = (-24.95, 44.95);

/// Open-Meteo air quality API. Keyless; may point at a self-hosted instance.
#[derive(Debug, Clone)]
pub struct OpenMeteoSource {
    instance_url: String,
    http: Client,
}

impl OpenMeteoSource {
    pub fn new(instance_url: Option<String>) -> Self {
        let instance_url = instance_url
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_INSTANCE_URL.to_string());

        Self { instance_url, http: Client::new() }
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    async fn fetch_hourly(&self, location: &Location, variables: &[&str]) -> Result<OmHourly, WeatherError> {
        let url = format!("{}/v1/air-quality", self.instance_url);
        let query = [
            ("latitude", location.latitude.to_string()),
            ("longitude", location.longitude.to_string()),
            ("hourly", variables.join(",")),
            ("timeformat", "unixtime".to_string()),
            ("forecast_days", FORECAST_DAYS.to_string()),
        ];

        let parsed: OmResponse = fetch_json(&self.http, SOURCE_ID, &url, &query).await?;
        parsed.hourly.ok_or_else(|| WeatherError::incomplete(SOURCE_ID, "response had no hourly block"))
    }
}

fn in_pollen_domain(location: &Location) -> bool {
    (POLLEN_LATITUDE.0..=POLLEN_LATITUDE.1).contains(&location.latitude)
        && (POLLEN_LONGITUDE.0..=POLLEN_LONGITUDE.1).contains(&location.longitude)
}

impl Source for OpenMeteoSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn name(&self) -> &str {
        "Open-Meteo"
    }

    fn as_secondary(&self) -> Option<&dyn SecondaryWeatherSource> {
        Some(self)
    }
}

#[async_trait]
impl SecondaryWeatherSource for OpenMeteoSource {
    fn secondary_features(&self) -> &[Feature] {
        SECONDARY_FEATURES
    }

    fn supports_for_location(&self, location: &Location, feature: Feature) -> bool {
        match feature {
            Feature::AirQuality => true,
            Feature::Pollen => in_pollen_domain(location),
            _ => false,
        }
    }

    async fn request_secondary_weather(
        &self,
        location: &Location,
        features: &BTreeSet<Feature>,
    ) -> Result<ProviderResult, WeatherError> {
        let mut result = ProviderResult::default();
        let mut variables = Vec::new();

        for feature in features {
            match feature {
                Feature::AirQuality => variables.extend_from_slice(AIR_QUALITY_VARIABLES),
                Feature::Pollen if in_pollen_domain(location) => variables.extend_from_slice(POLLEN_VARIABLES),
                other => {
                    debug!(feature = %other, "feature not available for this location");
                    result.record_failure(
                        *other,
                        WeatherError::UnsupportedFeatureForSource {
                            source_id: SOURCE_ID.to_string(),
                            feature: *other,
                        },
                    );
                }
            }
        }

        if variables.is_empty() {
            return Ok(result);
        }

        let hourly = self.fetch_hourly(location, &variables).await?;
        if hourly.time.is_empty() {
            return Err(WeatherError::incomplete(SOURCE_ID, "response had no hourly entries"));
        }

        if features.contains(&Feature::AirQuality) {
            result.air_quality = Some(air_quality_from(&hourly));
        }
        if features.contains(&Feature::Pollen) && in_pollen_domain(location) {
            result.pollen = Some(pollen_from(&hourly, location.timezone));
        }

        Ok(result)
    }
}

#[derive(Debug, Default, Deserialize)]
struct OmHourly {
    time: Vec<i64>,

    // µg/m³
    #[serde(default)]
    pm2_5: Vec<Option<f64>>,
    #[serde(default)]
    pm10: Vec<Option<f64>>,
    #[serde(default)]
    ozone: Vec<Option<f64>>,
    #[serde(default)]
    nitrogen_dioxide: Vec<Option<f64>>,
    #[serde(default)]
    sulphur_dioxide: Vec<Option<f64>>,
    #[serde(default)]
    carbon_monoxide: Vec<Option<f64>>,

    // grains/m³
    #[serde(default)]
    alder_pollen: Vec<Option<f64>>,
    #[serde(default)]
    birch_pollen: Vec<Option<f64>>,
    #[serde(default)]
    grass_pollen: Vec<Option<f64>>,
    #[serde(default)]
    mugwort_pollen: Vec<Option<f64>>,
    #[serde(default)]
    olive_pollen: Vec<Option<f64>>,
    #[serde(default)]
    ragweed_pollen: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    hourly: Option<OmHourly>,
}

fn at(series: &[Option<f64>], i: usize) -> Option<f64> {
    series.get(i).copied().flatten()
}

fn times(hourly: &OmHourly) -> impl Iterator<Item = (usize, DateTime<Utc>)> + '_ {
    hourly.time.iter().enumerate().filter_map(|(i, ts)| Some((i, unix_to_utc(*ts)?)))
}

/// Hourly samples only; daily values are derived from them during the merge.
fn air_quality_from(hourly: &OmHourly) -> AirQualityData {
    let samples = times(hourly)
        .map(|(i, time)| {
            let sample = AirQuality {
                pm25: at(&hourly.pm2_5, i),
                pm10: at(&hourly.pm10, i),
                o3: at(&hourly.ozone, i),
                no2: at(&hourly.nitrogen_dioxide, i),
                so2: at(&hourly.sulphur_dioxide, i),
                // µg/m³ to mg/m³
                co: at(&hourly.carbon_monoxide, i).map(|co| co / 1000.0),
            };
            (time, sample)
        })
        .filter(|(_, sample)| !sample.is_empty())
        .collect();

    AirQualityData { current: None, hourly: samples, daily: BTreeMap::new() }
}

fn keep_max(slot: &mut Option<f64>, value: Option<f64>) {
    if let Some(value) = value {
        *slot = Some(slot.map_or(value, |current| current.max(value)));
    }
}

/// Daily peak of each pollen kind, per local date.
fn pollen_from(hourly: &OmHourly, timezone: Tz) -> PollenData {
    let mut daily: BTreeMap<NaiveDate, Pollen> = BTreeMap::new();

    for (i, time) in times(hourly) {
        let day = daily.entry(time.with_timezone(&timezone).date_naive()).or_default();
        keep_max(&mut day.alder, at(&hourly.alder_pollen, i));
        keep_max(&mut day.birch, at(&hourly.birch_pollen, i));
        keep_max(&mut day.grass, at(&hourly.grass_pollen, i));
        keep_max(&mut day.mugwort, at(&hourly.mugwort_pollen, i));
        keep_max(&mut day.olive, at(&hourly.olive_pollen, i));
        keep_max(&mut day.ragweed, at(&hourly.ragweed_pollen, i));
    }

    daily.retain(|_, pollen| !pollen.is_empty());
    PollenData { current: None, daily }
}
