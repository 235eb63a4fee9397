use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::{
    AirQuality, Current, Daily, Feature, Hourly, Location, ProviderResult, WeatherError,
    model::AirQualityData,
    provider::{MainWeatherSource, SecondaryWeatherSource, Source, fetch_json, unix_to_utc},
};

const SOURCE_ID: &str = "openweather";
const BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

const MAIN_FEATURES: &[Feature] =
    &[Feature::Current, Feature::Daily, Feature::Hourly, Feature::AirQuality];
const SECONDARY_FEATURES: &[Feature] = &[Feature::AirQuality];

/// OpenWeather free tier: current conditions, a 5 day / 3 hour forecast and air pollution.
#[derive(Debug, Clone)]
pub struct OpenWeatherSource {
    api_key: Option<String>,
    http: Client,
}

impl OpenWeatherSource {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key, http: Client::new() }
    }

    fn query(&self, location: &Location) -> Result<Vec<(&'static str, String)>, WeatherError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| WeatherError::ApiKeyMissing { source_id: SOURCE_ID.to_string() })?;

        Ok(vec![
            ("lat", location.latitude.to_string()),
            ("lon", location.longitude.to_string()),
            ("appid", key.to_string()),
            ("units", "metric".to_string()),
        ])
    }

    async fn fetch_current(&self, location: &Location) -> Result<Current, WeatherError> {
        let url = format!("{BASE_URL}/weather");
        let parsed: OwCurrentResponse = fetch_json(&self.http, SOURCE_ID, &url, &self.query(location)?).await?;
        Ok(current_from(parsed))
    }

    async fn fetch_forecast(&self, location: &Location) -> Result<(Vec<Daily>, Vec<Hourly>), WeatherError> {
        let url = format!("{BASE_URL}/forecast");
        let parsed: OwForecastResponse = fetch_json(&self.http, SOURCE_ID, &url, &self.query(location)?).await?;
        forecast_from(parsed, location.timezone)
    }

    async fn fetch_air_quality(&self, location: &Location) -> Result<AirQualityData, WeatherError> {
        let query = self.query(location)?;
        let current_url = format!("{BASE_URL}/air_pollution");
        let forecast_url = format!("{BASE_URL}/air_pollution/forecast");

        let (current, forecast) = futures::try_join!(
            fetch_json::<OwAirResponse>(&self.http, SOURCE_ID, &current_url, &query),
            fetch_json::<OwAirResponse>(&self.http, SOURCE_ID, &forecast_url, &query),
        )?;

        air_quality_from(current, forecast)
    }
}

impl Source for OpenWeatherSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn name(&self) -> &str {
        "OpenWeather"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn as_main(&self) -> Option<&dyn MainWeatherSource> {
        Some(self)
    }

    fn as_secondary(&self) -> Option<&dyn SecondaryWeatherSource> {
        Some(self)
    }
}

#[async_trait]
impl MainWeatherSource for OpenWeatherSource {
    fn main_features(&self) -> &[Feature] {
        MAIN_FEATURES
    }

    async fn request_weather(
        &self,
        location: &Location,
        features: &BTreeSet<Feature>,
    ) -> Result<ProviderResult, WeatherError> {
        let wants_forecast = features.contains(&Feature::Daily) || features.contains(&Feature::Hourly);
        let wants_air_quality = features.contains(&Feature::AirQuality);

        let (current, forecast, air_quality) = futures::join!(
            async {
                if features.contains(&Feature::Current) {
                    self.fetch_current(location).await.map(Some)
                } else {
                    Ok(None)
                }
            },
            async {
                if wants_forecast {
                    self.fetch_forecast(location).await.map(Some)
                } else {
                    Ok(None)
                }
            },
            async {
                if wants_air_quality {
                    Some(self.fetch_air_quality(location).await)
                } else {
                    None
                }
            },
        );

        let current = current?;
        let (daily, hourly) = forecast?.unzip();

        let mut result = ProviderResult {
            current,
            daily: daily.filter(|_| features.contains(&Feature::Daily)),
            hourly: hourly.filter(|_| features.contains(&Feature::Hourly)),
            ..Default::default()
        };

        match air_quality {
            Some(Ok(data)) => result.air_quality = Some(data),
            Some(Err(err)) => {
                warn!(error = %err, "air quality request failed, keeping weather");
                result.record_failure(Feature::AirQuality, err);
            }
            None => {}
        }

        Ok(result)
    }
}

#[async_trait]
impl SecondaryWeatherSource for OpenWeatherSource {
    fn secondary_features(&self) -> &[Feature] {
        SECONDARY_FEATURES
    }

    async fn request_secondary_weather(
        &self,
        location: &Location,
        features: &BTreeSet<Feature>,
    ) -> Result<ProviderResult, WeatherError> {
        if let Some(feature) = features.iter().find(|f| !SECONDARY_FEATURES.contains(f)) {
            return Err(WeatherError::UnsupportedFeatureForSource {
                source_id: SOURCE_ID.to_string(),
                feature: *feature,
            });
        }

        let air_quality = self.fetch_air_quality(location).await?;
        Ok(ProviderResult { air_quality: Some(air_quality), ..Default::default() })
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: Option<f64>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    pressure: Option<f64>,
    humidity: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct OwWind {
    speed: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwPrecipitation {
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    dt: i64,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
    /// Probability of precipitation, 0..1.
    pop: Option<f64>,
    #[serde(default)]
    rain: OwPrecipitation,
    #[serde(default)]
    snow: OwPrecipitation,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    list: Vec<OwForecastEntry>,
}

/// Concentrations in µg/m³.
#[derive(Debug, Deserialize)]
struct OwComponents {
    co: Option<f64>,
    no2: Option<f64>,
    o3: Option<f64>,
    so2: Option<f64>,
    pm2_5: Option<f64>,
    pm10: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwAirEntry {
    dt: i64,
    components: OwComponents,
}

#[derive(Debug, Deserialize)]
struct OwAirResponse {
    list: Vec<OwAirEntry>,
}

fn condition(weather: &[OwWeather]) -> Option<String> {
    weather.first().map(|w| w.description.clone())
}

fn current_from(parsed: OwCurrentResponse) -> Current {
    Current {
        observation_time: unix_to_utc(parsed.dt),
        temperature_c: Some(parsed.main.temp),
        feels_like_c: parsed.main.feels_like,
        condition: condition(&parsed.weather),
        humidity_pct: parsed.main.humidity,
        wind_speed_mps: parsed.wind.speed,
        pressure_hpa: parsed.main.pressure,
        ..Default::default()
    }
}

fn probability_pct(pop: Option<f64>) -> Option<u8> {
    pop.map(|p| (p.clamp(0.0, 1.0) * 100.0).round() as u8)
}

fn entry_precipitation(entry: &OwForecastEntry) -> f64 {
    entry.rain.three_hours.unwrap_or(0.0) + entry.snow.three_hours.unwrap_or(0.0)
}

/// 3-hourly entries become hourly rows; days are built from the entries of each local date.
fn forecast_from(parsed: OwForecastResponse, timezone: Tz) -> Result<(Vec<Daily>, Vec<Hourly>), WeatherError> {
    if parsed.list.is_empty() {
        return Err(WeatherError::incomplete(SOURCE_ID, "forecast contained no entries"));
    }

    let mut hourly = Vec::with_capacity(parsed.list.len());
    let mut by_day: BTreeMap<NaiveDate, Vec<(DateTime<Utc>, &OwForecastEntry)>> = BTreeMap::new();

    for entry in &parsed.list {
        let Some(time) = unix_to_utc(entry.dt) else {
            debug!(dt = entry.dt, "skipping forecast entry with invalid timestamp");
            continue;
        };

        hourly.push(Hourly {
            temperature_c: Some(entry.main.temp),
            condition: condition(&entry.weather),
            precipitation_mm: Some(entry_precipitation(entry)),
            precipitation_probability_pct: probability_pct(entry.pop),
            wind_speed_mps: entry.wind.speed,
            ..Hourly::new(time)
        });

        let date = time.with_timezone(&timezone).date_naive();
        by_day.entry(date).or_default().push((time, entry));
    }

    let daily = by_day
        .into_iter()
        .map(|(date, entries)| {
            let midday = entries
                .iter()
                .min_by_key(|(time, _)| (i64::from(time.with_timezone(&timezone).hour()) - 12).abs())
                .map(|(_, entry)| *entry);

            Daily {
                temperature_max_c: entries
                    .iter()
                    .map(|(_, e)| e.main.temp_max.unwrap_or(e.main.temp))
                    .reduce(f64::max),
                temperature_min_c: entries
                    .iter()
                    .map(|(_, e)| e.main.temp_min.unwrap_or(e.main.temp))
                    .reduce(f64::min),
                condition: midday.and_then(|e| condition(&e.weather)),
                precipitation_mm: Some(entries.iter().map(|(_, e)| entry_precipitation(e)).sum()),
                precipitation_probability_pct: probability_pct(
                    entries.iter().filter_map(|(_, e)| e.pop).reduce(f64::max),
                ),
                ..Daily::new(date)
            }
        })
        .collect();

    Ok((daily, hourly))
}

fn air_quality_sample(components: &OwComponents) -> AirQuality {
    AirQuality {
        pm25: components.pm2_5,
        pm10: components.pm10,
        o3: components.o3,
        no2: components.no2,
        so2: components.so2,
        // µg/m³ to mg/m³
        co: components.co.map(|co| co / 1000.0),
    }
}

fn air_quality_from(current: OwAirResponse, forecast: OwAirResponse) -> Result<AirQualityData, WeatherError> {
    let hourly: BTreeMap<DateTime<Utc>, AirQuality> = forecast
        .list
        .iter()
        .filter_map(|entry| Some((unix_to_utc(entry.dt)?, air_quality_sample(&entry.components))))
        .collect();

    let current = current.list.first().map(|entry| air_quality_sample(&entry.components));

    if current.is_none() && hourly.is_empty() {
        return Err(WeatherError::incomplete(SOURCE_ID, "air pollution response contained no data"));
    }

    Ok(AirQualityData { current, hourly, daily: BTreeMap::new() })
}
