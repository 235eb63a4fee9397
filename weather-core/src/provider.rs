//! Source capabilities and the built-in sources.
//!
//! A source is one object implementing [`Source`]; each capability it offers is
//! exposed through an `as_*` accessor returning that capability's trait object.
//! The registry filters on those accessors instead of downcasting.

use crate::{
    Config, Feature, Location, ProviderResult, SourceParameters, WeatherError,
    provider::{openmeteo::OpenMeteoSource, openweather::OpenWeatherSource, weatherapi::WeatherApiSource},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::{collections::BTreeSet, convert::TryFrom, fmt::Debug, sync::Arc};

pub mod openmeteo;
pub mod openweather;
pub mod weatherapi;

/// Built-in source ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
    OpenMeteo,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
            ProviderId::OpenMeteo => "openmeteo",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi, ProviderId::OpenMeteo]
    }

    /// Whether the source cannot work without an API key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderId::OpenMeteo)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            "openmeteo" | "open-meteo" => Ok(ProviderId::OpenMeteo),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi, openmeteo."
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    MainWeather,
    SecondaryWeather,
    LocationParameters,
    ReverseGeocoding,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::MainWeather => "main",
            Capability::SecondaryWeather => "secondary",
            Capability::LocationParameters => "parameters",
            Capability::ReverseGeocoding => "reverse-geocoding",
        }
    }
}

/// Common metadata of every source.
pub trait Source: Send + Sync + Debug {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Whether the source has the credentials or instance it needs.
    fn is_configured(&self) -> bool {
        true
    }

    fn as_main(&self) -> Option<&dyn MainWeatherSource> {
        None
    }

    fn as_secondary(&self) -> Option<&dyn SecondaryWeatherSource> {
        None
    }

    fn as_parameter_source(&self) -> Option<&dyn LocationParametersSource> {
        None
    }

    fn as_reverse_geocoding(&self) -> Option<&dyn ReverseGeocodingSource> {
        None
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        let mut caps = BTreeSet::new();
        if self.as_main().is_some() {
            caps.insert(Capability::MainWeather);
        }
        if self.as_secondary().is_some() {
            caps.insert(Capability::SecondaryWeather);
        }
        if self.as_parameter_source().is_some() {
            caps.insert(Capability::LocationParameters);
        }
        if self.as_reverse_geocoding().is_some() {
            caps.insert(Capability::ReverseGeocoding);
        }
        caps
    }

    fn has_capability(&self, capability: Capability) -> bool {
        match capability {
            Capability::MainWeather => self.as_main().is_some(),
            Capability::SecondaryWeather => self.as_secondary().is_some(),
            Capability::LocationParameters => self.as_parameter_source().is_some(),
            Capability::ReverseGeocoding => self.as_reverse_geocoding().is_some(),
        }
    }

    /// Every feature the source can serve through any capability.
    fn supported_features(&self) -> BTreeSet<Feature> {
        let main = self.as_main().map(|m| m.main_features()).unwrap_or_default();
        let secondary = self.as_secondary().map(|s| s.secondary_features()).unwrap_or_default();
        main.iter().chain(secondary).copied().collect()
    }
}

/// A source that can be a location's primary provider.
#[async_trait]
pub trait MainWeatherSource: Send + Sync {
    /// Features answered by [`request_weather`](Self::request_weather).
    fn main_features(&self) -> &[Feature];

    /// Whether the main call can provide `feature` for `location`.
    fn supports_in_main(&self, location: &Location, feature: Feature) -> bool {
        let _ = location;
        self.main_features().contains(&feature)
    }

    async fn request_weather(
        &self,
        location: &Location,
        features: &BTreeSet<Feature>,
    ) -> Result<ProviderResult, WeatherError>;
}

/// A source that can answer individual features on behalf of another primary.
#[async_trait]
pub trait SecondaryWeatherSource: Send + Sync {
    fn secondary_features(&self) -> &[Feature];

    /// Regional predicate; must be cheap and must not perform I/O.
    fn supports_for_location(&self, location: &Location, feature: Feature) -> bool {
        let _ = location;
        self.secondary_features().contains(&feature)
    }

    async fn request_secondary_weather(
        &self,
        location: &Location,
        features: &BTreeSet<Feature>,
    ) -> Result<ProviderResult, WeatherError>;
}

/// A source that needs its own identifiers for a location before it can be queried.
#[async_trait]
pub trait LocationParametersSource: Send + Sync {
    fn needs_refresh(
        &self,
        location: &Location,
        coordinates_changed: bool,
        features: &BTreeSet<Feature>,
    ) -> bool;

    async fn resolve_parameters(&self, location: &Location) -> Result<SourceParameters, WeatherError>;
}

#[async_trait]
pub trait ReverseGeocodingSource: Send + Sync {
    /// Returns `location` with city, region and country filled in.
    async fn reverse_geocode(&self, location: &Location) -> Result<Location, WeatherError>;
}

/// Construct one built-in source from config.
///
/// Sources are always constructed, configured or not; `is_configured` decides
/// whether they may be dispatched to.
pub fn source_from_config(id: ProviderId, config: &Config) -> Arc<dyn Source> {
    let api_key = config.provider_api_key(id).map(str::to_owned);
    let instance_url = config.provider_instance_url(id).map(str::to_owned);

    match id {
        ProviderId::OpenWeather => Arc::new(OpenWeatherSource::new(api_key)),
        ProviderId::WeatherApi => Arc::new(WeatherApiSource::new(api_key)),
        ProviderId::OpenMeteo => Arc::new(OpenMeteoSource::new(instance_url)),
    }
}

/// Construct every built-in source.
pub fn sources_from_config(config: &Config) -> Vec<Arc<dyn Source>> {
    ProviderId::all().iter().map(|id| source_from_config(*id, config)).collect()
}

/// GET `url` and return the status with the raw body.
pub(crate) async fn fetch_text(
    http: &Client,
    source_id: &str,
    url: &str,
    query: &[(&str, String)],
) -> Result<(StatusCode, String), WeatherError> {
    let res = http
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|err| WeatherError::network(source_id, err))?;

    let status = res.status();
    let body = res.text().await.map_err(|err| WeatherError::network(source_id, err))?;

    Ok((status, body))
}

/// GET `url` and decode a successful JSON body.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    http: &Client,
    source_id: &str,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, WeatherError> {
    let (status, body) = fetch_text(http, source_id, url, query).await?;

    if !status.is_success() {
        return Err(status_error(source_id, status, &body));
    }

    parse_json(source_id, &body)
}

pub(crate) fn parse_json<T: DeserializeOwned>(source_id: &str, body: &str) -> Result<T, WeatherError> {
    serde_json::from_str(body)
        .map_err(|err| WeatherError::incomplete(source_id, format!("failed to parse response: {err}")))
}

pub(crate) fn status_error(source_id: &str, status: StatusCode, body: &str) -> WeatherError {
    WeatherError::Network {
        source_id: source_id.to_string(),
        reason: format!("request failed with status {status}: {}", truncate_body(body)),
    }
}

pub(crate) fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

/// Truncate a response body for inclusion in an error message.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}
