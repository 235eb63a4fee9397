use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::debug;

use crate::{
    AirQuality, Alert, AlertSeverity, Current, Daily, Feature, Hourly, Location, ProviderResult,
    SourceParameters, WeatherError,
    model::AirQualityData,
    provider::{
        LocationParametersSource, MainWeatherSource, ReverseGeocodingSource, SecondaryWeatherSource,
        Source, fetch_json, fetch_text, parse_json, status_error, unix_to_utc,
    },
};

const SOURCE_ID: &str = "weatherapi";
const BASE_URL: &str = "https://api.weatherapi.com/v1";
const FORECAST_DAYS: u8 = 3;

/// Parameter key holding WeatherAPI's own id for the location.
pub const LOCATION_ID: &str = "location_id";

/// WeatherAPI error code for "No matching location found".
const NO_MATCHING_LOCATION: u32 = 1006;

const MAIN_FEATURES: &[Feature] = &[
    Feature::Current,
    Feature::Daily,
    Feature::Hourly,
    Feature::AirQuality,
    Feature::Alert,
];
const SECONDARY_FEATURES: &[Feature] = &[Feature::AirQuality, Feature::Alert];

#[derive(Debug, Clone)]
pub struct WeatherApiSource {
    api_key: Option<String>,
    http: Client,
}

impl WeatherApiSource {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key, http: Client::new() }
    }

    fn key(&self) -> Result<String, WeatherError> {
        self.api_key
            .clone()
            .ok_or_else(|| WeatherError::ApiKeyMissing { source_id: SOURCE_ID.to_string() })
    }

    /// `id:<location_id>` when resolved, coordinates otherwise.
    fn location_query(location: &Location) -> String {
        match location.parameter(SOURCE_ID, LOCATION_ID).filter(|id| !id.is_empty()) {
            Some(id) => format!("id:{id}"),
            None => coordinates(location),
        }
    }

    async fn fetch_forecast(
        &self,
        location: &Location,
        air_quality: bool,
        alerts: bool,
    ) -> Result<WaForecastResponse, WeatherError> {
        let yes_no = |flag: bool| String::from(if flag { "yes" } else { "no" });
        let query = [
            ("key", self.key()?),
            ("q", Self::location_query(location)),
            ("days", FORECAST_DAYS.to_string()),
            ("aqi", yes_no(air_quality)),
            ("alerts", yes_no(alerts)),
        ];

        let url = format!("{BASE_URL}/forecast.json");
        let (status, body) = fetch_text(&self.http, SOURCE_ID, &url, &query).await?;

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        parse_json(SOURCE_ID, &body)
    }

    async fn search(&self, location: &Location) -> Result<WaSearchResult, WeatherError> {
        let query = [("key", self.key()?), ("q", coordinates(location))];
        let url = format!("{BASE_URL}/search.json");

        let results: Vec<WaSearchResult> = fetch_json(&self.http, SOURCE_ID, &url, &query).await?;

        results
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::invalid_location(SOURCE_ID, "no location near these coordinates"))
    }
}

fn coordinates(location: &Location) -> String {
    format!("{},{}", location.latitude, location.longitude)
}

fn api_error(status: reqwest::StatusCode, body: &str) -> WeatherError {
    match serde_json::from_str::<WaErrorResponse>(body) {
        Ok(parsed) if parsed.error.code == NO_MATCHING_LOCATION => {
            WeatherError::invalid_location(SOURCE_ID, parsed.error.message)
        }
        _ => status_error(SOURCE_ID, status, body),
    }
}

impl Source for WeatherApiSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn name(&self) -> &str {
        "WeatherAPI.com"
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

    fn as_parameter_source(&self) -> Option<&dyn LocationParametersSource> {
        Some(self)
    }

    fn as_reverse_geocoding(&self) -> Option<&dyn ReverseGeocodingSource> {
        Some(self)
    }
}

#[async_trait]
impl MainWeatherSource for WeatherApiSource {
    fn main_features(&self) -> &[Feature] {
        MAIN_FEATURES
    }

    async fn request_weather(
        &self,
        location: &Location,
        features: &BTreeSet<Feature>,
    ) -> Result<ProviderResult, WeatherError> {
        let parsed = self
            .fetch_forecast(
                location,
                features.contains(&Feature::AirQuality),
                features.contains(&Feature::Alert),
            )
            .await?;

        result_from(parsed, features)
    }
}

#[async_trait]
impl SecondaryWeatherSource for WeatherApiSource {
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

        self.request_weather(location, features).await
    }
}

#[async_trait]
impl LocationParametersSource for WeatherApiSource {
    fn needs_refresh(&self, location: &Location, coordinates_changed: bool, _features: &BTreeSet<Feature>) -> bool {
        coordinates_changed || location.parameter(SOURCE_ID, LOCATION_ID).is_none_or(str::is_empty)
    }

    async fn resolve_parameters(&self, location: &Location) -> Result<SourceParameters, WeatherError> {
        let found = self.search(location).await?;
        debug!(id = found.id, name = %found.name, "resolved weatherapi location");

        Ok(SourceParameters::from([(LOCATION_ID.to_string(), found.id.to_string())]))
    }
}

#[async_trait]
impl ReverseGeocodingSource for WeatherApiSource {
    async fn reverse_geocode(&self, location: &Location) -> Result<Location, WeatherError> {
        let found = self.search(location).await?;
        let non_empty = |s: String| Some(s).filter(|s| !s.trim().is_empty());

        let mut named = location.clone();
        named.city = non_empty(found.name);
        named.region = non_empty(found.region);
        named.country = non_empty(found.country);
        Ok(named)
    }
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
}

/// Concentrations in µg/m³.
#[derive(Debug, Deserialize)]
struct WaAirQuality {
    co: Option<f64>,
    no2: Option<f64>,
    o3: Option<f64>,
    so2: Option<f64>,
    pm2_5: Option<f64>,
    pm10: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    last_updated_epoch: Option<i64>,
    temp_c: f64,
    feelslike_c: Option<f64>,
    condition: WaCondition,
    humidity: Option<u8>,
    wind_kph: Option<f64>,
    pressure_mb: Option<f64>,
    uv: Option<f64>,
    air_quality: Option<WaAirQuality>,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    maxtemp_c: Option<f64>,
    mintemp_c: Option<f64>,
    totalprecip_mm: Option<f64>,
    daily_chance_of_rain: Option<u8>,
    condition: WaCondition,
    air_quality: Option<WaAirQuality>,
}

#[derive(Debug, Deserialize)]
struct WaHour {
    time_epoch: i64,
    temp_c: Option<f64>,
    condition: WaCondition,
    precip_mm: Option<f64>,
    chance_of_rain: Option<u8>,
    wind_kph: Option<f64>,
    air_quality: Option<WaAirQuality>,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: NaiveDate,
    day: WaDay,
    #[serde(default)]
    hour: Vec<WaHour>,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaAlert {
    headline: Option<String>,
    event: Option<String>,
    severity: Option<String>,
    desc: Option<String>,
    effective: Option<String>,
    expires: Option<String>,
    note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WaAlerts {
    #[serde(default)]
    alert: Vec<WaAlert>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    current: WaCurrent,
    forecast: WaForecast,
    alerts: Option<WaAlerts>,
}

#[derive(Debug, Deserialize)]
struct WaSearchResult {
    id: u64,
    name: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
}

#[derive(Debug, Deserialize)]
struct WaErrorBody {
    code: u32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WaErrorResponse {
    error: WaErrorBody,
}

fn kph_to_mps(kph: f64) -> f64 {
    kph / 3.6
}

fn air_quality_sample(aq: &WaAirQuality) -> AirQuality {
    AirQuality {
        pm25: aq.pm2_5,
        pm10: aq.pm10,
        o3: aq.o3,
        no2: aq.no2,
        so2: aq.so2,
        // µg/m³ to mg/m³
        co: aq.co.map(|co| co / 1000.0),
    }
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn alert_from(index: usize, alert: WaAlert) -> Alert {
    let start = parse_time(alert.effective.as_deref());
    let headline = alert
        .headline
        .clone()
        .or_else(|| alert.event.clone())
        .unwrap_or_else(|| "Weather alert".to_string());

    Alert {
        id: format!("{}-{index}", start.map(|t| t.timestamp()).unwrap_or_default()),
        headline,
        description: alert.desc.filter(|d| !d.trim().is_empty()),
        severity: alert.severity.as_deref().map(AlertSeverity::parse).unwrap_or(AlertSeverity::Unknown),
        start,
        end: parse_time(alert.expires.as_deref()),
        issuer: alert.note.filter(|n| !n.trim().is_empty()),
    }
}

/// Keep only the parts of the forecast response covering `features`.
fn result_from(parsed: WaForecastResponse, features: &BTreeSet<Feature>) -> Result<ProviderResult, WeatherError> {
    let wants = |feature: Feature| features.contains(&feature);

    if parsed.forecast.forecastday.is_empty() && (wants(Feature::Daily) || wants(Feature::Hourly)) {
        return Err(WeatherError::incomplete(SOURCE_ID, "forecast contained no days"));
    }

    let mut result = ProviderResult::default();

    if wants(Feature::AirQuality) {
        let mut data = AirQualityData {
            current: parsed.current.air_quality.as_ref().map(air_quality_sample),
            ..Default::default()
        };
        for day in &parsed.forecast.forecastday {
            if let Some(aq) = &day.day.air_quality {
                data.daily.insert(day.date, air_quality_sample(aq));
            }
            for hour in &day.hour {
                if let (Some(time), Some(aq)) = (unix_to_utc(hour.time_epoch), &hour.air_quality) {
                    data.hourly.insert(time, air_quality_sample(aq));
                }
            }
        }

        if data.current.is_none() && data.daily.is_empty() && data.hourly.is_empty() {
            result.record_failure(
                Feature::AirQuality,
                WeatherError::incomplete(SOURCE_ID, "response carried no air quality"),
            );
        } else {
            result.air_quality = Some(data);
        }
    }

    if wants(Feature::Alert) {
        let alerts = parsed.alerts.unwrap_or_default().alert;
        result.alerts = Some(alerts.into_iter().enumerate().map(|(i, a)| alert_from(i, a)).collect());
    }

    if wants(Feature::Current) {
        let current = &parsed.current;
        result.current = Some(Current {
            observation_time: current.last_updated_epoch.and_then(unix_to_utc),
            temperature_c: Some(current.temp_c),
            feels_like_c: current.feelslike_c,
            condition: Some(current.condition.text.clone()),
            humidity_pct: current.humidity,
            wind_speed_mps: current.wind_kph.map(kph_to_mps),
            pressure_hpa: current.pressure_mb,
            uv_index: current.uv,
            ..Default::default()
        });
    }

    if wants(Feature::Daily) {
        let daily = parsed
            .forecast
            .forecastday
            .iter()
            .map(|day| Daily {
                temperature_max_c: day.day.maxtemp_c,
                temperature_min_c: day.day.mintemp_c,
                condition: Some(day.day.condition.text.clone()),
                precipitation_mm: day.day.totalprecip_mm,
                precipitation_probability_pct: day.day.daily_chance_of_rain,
                ..Daily::new(day.date)
            })
            .collect();
        result.daily = Some(daily);
    }

    if wants(Feature::Hourly) {
        let hourly: Vec<Hourly> = parsed
            .forecast
            .forecastday
            .iter()
            .flat_map(|day| &day.hour)
            .filter_map(|hour| {
                Some(Hourly {
                    temperature_c: hour.temp_c,
                    condition: Some(hour.condition.text.clone()),
                    precipitation_mm: hour.precip_mm,
                    precipitation_probability_pct: hour.chance_of_rain,
                    wind_speed_mps: hour.wind_kph.map(kph_to_mps),
                    ..Hourly::new(unix_to_utc(hour.time_epoch)?)
                })
            })
            .collect();
        result.hourly = Some(hourly);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::location;

    // 2026-04-01 00:00 and 01:00 UTC
    const FORECAST: &str = r#"{
        "location": {"name": "Paris", "region": "Ile-de-France", "country": "France", "tz_id": "Europe/Paris"},
        "current": {
            "last_updated_epoch": 1775001600, "temp_c": 11.0, "feelslike_c": 9.5,
            "condition": {"text": "Partly cloudy"}, "humidity": 76, "wind_kph": 18.0,
            "pressure_mb": 1012.0, "uv": 3.0,
            "air_quality": {"co": 270.4, "no2": 14.2, "o3": 52.0, "so2": 2.1, "pm2_5": 6.5, "pm10": 9.1, "us-epa-index": 1}
        },
        "forecast": {"forecastday": [{
            "date": "2026-04-01",
            "day": {
                "maxtemp_c": 16.1, "mintemp_c": 7.4, "totalprecip_mm": 0.8, "daily_chance_of_rain": 71,
                "condition": {"text": "Patchy rain nearby"},
                "air_quality": {"co": 300.0, "no2": 10.0, "o3": 60.0, "so2": 2.0, "pm2_5": 7.0, "pm10": 10.0}
            },
            "hour": [
                {"time_epoch": 1775001600, "temp_c": 9.0, "condition": {"text": "Clear"}, "precip_mm": 0.0,
                 "chance_of_rain": 0, "wind_kph": 7.2,
                 "air_quality": {"co": 250.0, "no2": 20.0, "o3": 40.0, "so2": 1.0, "pm2_5": 5.0, "pm10": 8.0}},
                {"time_epoch": 1775005200, "temp_c": 8.5, "condition": {"text": "Clear"}, "precip_mm": 0.0,
                 "chance_of_rain": 0, "wind_kph": 3.6}
            ]
        }]},
        "alerts": {"alert": [{
            "headline": "Yellow wind warning", "severity": "Moderate", "event": "Wind",
            "desc": "Gusts up to 80 km/h.", "effective": "2026-04-01T06:00:00+02:00",
            "expires": "2026-04-01T22:00:00+02:00", "note": "Meteo-France"
        }]}
    }"#;

    fn parsed() -> WaForecastResponse {
        serde_json::from_str(FORECAST).unwrap()
    }

    #[test]
    fn base_features_only_fill_base_fields() {
        let features = BTreeSet::from([Feature::Current, Feature::Daily, Feature::Hourly]);
        let result = result_from(parsed(), &features).unwrap();

        let current = result.current.unwrap();
        assert_eq!(current.condition.as_deref(), Some("Partly cloudy"));
        assert_eq!(current.wind_speed_mps, Some(5.0));
        assert_eq!(current.uv_index, Some(3.0));

        let daily = result.daily.unwrap();
        assert_eq!(daily[0].precipitation_probability_pct, Some(71));
        assert_eq!(result.hourly.unwrap().len(), 2);

        assert!(result.air_quality.is_none());
        assert!(result.alerts.is_none());
    }

    #[test]
    fn air_quality_is_keyed_by_date_and_time() {
        let features = BTreeSet::from([Feature::AirQuality]);
        let result = result_from(parsed(), &features).unwrap();
        assert!(result.current.is_none());

        let data = result.air_quality.unwrap();
        assert_eq!(data.current.unwrap().pm25, Some(6.5));
        assert_eq!(data.daily[&NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()].pm10, Some(10.0));
        // only the first hour carries air quality
        assert_eq!(data.hourly.len(), 1);
        assert!((data.hourly.values().next().unwrap().co.unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn alerts_are_converted() {
        let features = BTreeSet::from([Feature::Alert]);
        let alerts = result_from(parsed(), &features).unwrap().alerts.unwrap();

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.headline, "Yellow wind warning");
        assert_eq!(alert.severity, AlertSeverity::Moderate);
        assert_eq!(alert.start, unix_to_utc(1775016000));
        assert_eq!(alert.issuer.as_deref(), Some("Meteo-France"));
    }

    #[test]
    fn missing_alert_block_means_no_alerts() {
        let mut response = parsed();
        response.alerts = None;
        let alerts = result_from(response, &BTreeSet::from([Feature::Alert])).unwrap().alerts;
        assert_eq!(alerts, Some(Vec::new()));
    }

    #[test]
    fn missing_air_quality_is_a_feature_failure() {
        let body = FORECAST.replace("\"air_quality\"", "\"unused\"");
        let response: WaForecastResponse = serde_json::from_str(&body).unwrap();

        let features = BTreeSet::from([Feature::Current, Feature::AirQuality]);
        let result = result_from(response, &features).unwrap();
        assert!(result.current.is_some());
        assert!(matches!(result.failures[&Feature::AirQuality], WeatherError::InvalidOrIncompleteData { .. }));
    }

    #[test]
    fn unknown_location_error_maps_to_invalid_location() {
        let body = r#"{"error": {"code": 1006, "message": "No matching location found."}}"#;
        let err = api_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert_eq!(err, WeatherError::invalid_location(SOURCE_ID, "No matching location found."));

        let err = api_error(reqwest::StatusCode::FORBIDDEN, r#"{"error": {"code": 2008, "message": "disabled"}}"#);
        assert!(matches!(err, WeatherError::Network { .. }));
    }

    #[test]
    fn query_prefers_resolved_location_id() {
        let loc = location(SOURCE_ID);
        assert_eq!(WeatherApiSource::location_query(&loc), "48.8566,2.3522");

        let params = SourceParameters::from([(LOCATION_ID.to_string(), "2801268".to_string())]);
        let loc = loc.with_parameters(SOURCE_ID, params);
        assert_eq!(WeatherApiSource::location_query(&loc), "id:2801268");
    }

    #[test]
    fn parameters_refresh_when_missing_or_moved() {
        let source = WeatherApiSource::new(Some("KEY".into()));
        let features = BTreeSet::from([Feature::Current]);

        let loc = location(SOURCE_ID);
        assert!(source.needs_refresh(&loc, false, &features));

        let params = SourceParameters::from([(LOCATION_ID.to_string(), "2801268".to_string())]);
        let loc = loc.with_parameters(SOURCE_ID, params);
        assert!(!source.needs_refresh(&loc, false, &features));
        assert!(source.needs_refresh(&loc, true, &features));
    }

    #[test]
    fn search_results_parse() {
        let body = r#"[{"id": 2801268, "name": "Paris", "region": "Ile-de-France", "country": "France",
                        "lat": 48.87, "lon": 2.33, "url": "paris-ile-de-france-france"}]"#;
        let results: Vec<WaSearchResult> = parse_json(SOURCE_ID, body).unwrap();
        assert_eq!(results[0].id, 2801268);
        assert_eq!(results[0].country, "France");
    }

    #[tokio::test]
    async fn parameter_resolution_needs_a_key() {
        let err = WeatherApiSource::new(None).resolve_parameters(&location(SOURCE_ID)).await.unwrap_err();
        assert_eq!(err, WeatherError::ApiKeyMissing { source_id: SOURCE_ID.into() });
    }
}
