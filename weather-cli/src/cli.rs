use std::{collections::BTreeSet, sync::Arc};

use anyhow::{Context, Result, anyhow, bail};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use inquire::{Confirm, Password, PasswordDisplayMode, Text};
use tracing::{info, warn};
use weather_core::{
    Config, Feature, JsonLocationStore, Location, LocationStore, OrchestratorOptions, ProviderId,
    SourceRegistry, WeatherOrchestrator, provider::sources_from_config,
};

use crate::output;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather CLI")]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set, e.g. "info" or "weather_core=debug".
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather", "weatherapi" or "openmeteo".
        provider: String,
    },

    /// List providers with their capabilities and configuration state.
    Providers,

    /// Refresh and show weather for a saved location, creating it if needed.
    Show {
        /// Name of the saved location.
        name: String,

        /// Latitude; required when the location does not exist yet.
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude; required when the location does not exist yet.
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,

        /// IANA timezone such as "Europe/Paris". Defaults to UTC for new locations.
        #[arg(long)]
        timezone: Option<String>,

        /// Main provider for current, daily and hourly data.
        #[arg(long)]
        provider: Option<String>,

        /// Per-feature source, e.g. `--override pollen=openmeteo`. Repeatable.
        #[arg(long = "override", value_name = "FEATURE=PROVIDER")]
        overrides: Vec<String>,

        /// Comma separated features to refresh; all of them when absent.
        #[arg(long)]
        features: Option<String>,

        /// Print the merged weather as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List saved locations.
    Locations,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Providers => {
                let config = Config::load()?;
                let registry = SourceRegistry::new(sources_from_config(&config));
                output::print_providers(&registry);
                Ok(())
            }
            Command::Show { name, lat, lon, timezone, provider, overrides, features, json } => {
                let request = ShowRequest { name, lat, lon, timezone, provider, overrides, features, json };
                show(request).await
            }
            Command::Locations => {
                let store = JsonLocationStore::open_default()?;
                output::print_locations(&store.list().await?);
                Ok(())
            }
        }
    }
}

fn configure(provider: &str) -> Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    if id.requires_api_key() {
        let key = Password::new(&format!("{id} API key:"))
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()
            .context("Failed to read API key")?;

        if key.trim().is_empty() {
            bail!("API key must not be empty");
        }
        config.upsert_provider_api_key(id, key.trim().to_string());
    } else {
        let url = Text::new(&format!("{id} instance URL (leave empty for the public service):"))
            .prompt()
            .context("Failed to read instance URL")?;

        if !url.trim().is_empty() {
            config.set_instance_url(id, url.trim().to_string());
        }
    }

    let current_default = config.default_provider_id().ok();
    let can_be_main = sources_from_config(&config)
        .iter()
        .any(|s| s.id() == id.as_str() && s.as_main().is_some());

    if can_be_main && current_default != Some(id) {
        let make_default = Confirm::new(&format!("Use {id} as the default provider?"))
            .with_default(current_default.is_none())
            .prompt()
            .context("Failed to read answer")?;
        if make_default {
            config.set_default_provider(id);
        }
    }

    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

#[derive(Debug)]
struct ShowRequest {
    name: String,
    lat: Option<f64>,
    lon: Option<f64>,
    timezone: Option<String>,
    provider: Option<String>,
    overrides: Vec<String>,
    features: Option<String>,
    json: bool,
}

async fn show(request: ShowRequest) -> Result<()> {
    let config = Config::load()?;
    let store = JsonLocationStore::open_default()?;

    let features = match &request.features {
        Some(list) => Feature::parse_list(list)?,
        None => Feature::all().iter().copied().collect(),
    };

    let saved = store.load(&request.name).await?;
    let is_new = saved.is_none();
    let (location, coordinates_changed) = prepare_location(saved, &request, &config)?;

    let registry = Arc::new(SourceRegistry::new(sources_from_config(&config)));
    let orchestrator = WeatherOrchestrator::new(Arc::clone(&registry), OrchestratorOptions::from_config(&config));

    let location = if is_new && location.city.is_none() {
        reverse_geocode(&registry, location).await
    } else {
        location
    };

    let outcome = match orchestrator.refresh(&location, coordinates_changed, &features).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(location = %location.id, error = %err, "refresh failed, keeping saved weather");
            return Err(anyhow!(err).context(format!("Could not refresh weather for '{}'", location.id)));
        }
    };

    store.save(&outcome.location).await?;
    info!(location = %outcome.location.id, "location saved");

    if request.json {
        println!("{}", serde_json::to_string_pretty(outcome.weather.as_ref())?);
    } else {
        output::print_weather(&outcome.location, &outcome.weather);
    }

    Ok(())
}

/// Apply command-line settings to the saved location, or build a new one.
///
/// Returns the location and whether its coordinates moved.
fn prepare_location(saved: Option<Location>, request: &ShowRequest, config: &Config) -> Result<(Location, bool)> {
    let timezone = request.timezone.as_deref().map(parse_timezone).transpose()?;
    let provider = request.provider.as_deref().map(ProviderId::try_from).transpose()?;
    let overrides = request
        .overrides
        .iter()
        .map(|o| parse_override(o))
        .collect::<Result<Vec<_>>>()?;

    let (mut location, coordinates_changed) = match saved {
        Some(saved) => {
            let mut updated = saved.clone();
            if let Some(lat) = request.lat {
                updated.latitude = lat;
            }
            if let Some(lon) = request.lon {
                updated.longitude = lon;
            }
            let moved = updated.coordinates_differ(&saved);
            if moved {
                updated.city = None;
                updated.region = None;
                updated.country = None;
                updated.country_code = None;
            }
            (updated, moved)
        }
        None => {
            let (Some(lat), Some(lon)) = (request.lat, request.lon) else {
                bail!(
                    "Location '{}' is not saved yet.\n\
                     Hint: pass --lat and --lon to create it.",
                    request.name
                );
            };
            let main = match provider {
                Some(id) => id,
                None => config.default_provider_id()?,
            };

            let mut location = Location::new(&request.name, lat, lon, timezone.unwrap_or(Tz::UTC), main.as_str());
            for (feature, id) in config.feature_overrides()? {
                location = location.with_override(feature, id.as_str());
            }
            (location, true)
        }
    };

    validate_coordinates(location.latitude, location.longitude)?;

    if let Some(tz) = timezone {
        location.timezone = tz;
    }
    if let Some(id) = provider {
        location.main_source = id.as_str().to_string();
    }
    for (feature, id) in overrides {
        location = location.with_override(feature, id.as_str());
    }

    Ok((location, coordinates_changed))
}

async fn reverse_geocode(registry: &SourceRegistry, location: Location) -> Location {
    let Some(geocoder) = registry
        .configured_sources(weather_core::Capability::ReverseGeocoding)
        .find_map(|s| s.as_reverse_geocoding())
    else {
        return location;
    };

    match geocoder.reverse_geocode(&location).await {
        Ok(named) => named,
        Err(err) => {
            warn!(error = %err, "reverse geocoding failed, keeping coordinates as name");
            location
        }
    }
}

fn parse_timezone(value: &str) -> Result<Tz> {
    value.parse::<Tz>().map_err(|err| anyhow!("Invalid timezone '{value}': {err}"))
}

fn validate_coordinates(lat: f64, lon: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        bail!("Coordinates out of range: {lat}, {lon}");
    }
    Ok(())
}

/// Parse `feature=provider`.
fn parse_override(value: &str) -> Result<(Feature, ProviderId)> {
    let (feature, provider) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid override '{value}', expected FEATURE=PROVIDER"))?;

    let feature = Feature::try_from(feature.trim())?;
    if !feature.is_secondary() {
        bail!("Feature '{feature}' always comes from the main provider and cannot be overridden");
    }

    Ok((feature, ProviderId::try_from(provider.trim())?))
}
