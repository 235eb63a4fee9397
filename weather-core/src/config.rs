use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::PathBuf,
    time::Duration,
};

use crate::{Feature, provider::ProviderId};

const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 20;

/// Configuration for a single provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Alternative host for self-hosted instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Optional default provider id, e.g. "openweather" or "weatherapi".
    pub default_provider: Option<String>,

    /// Upper bound for any single provider call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_timeout_secs: Option<u64>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Secondary sources applied to newly created locations.
    ///
    /// [feature_overrides]
    /// pollen = "openmeteo"
    #[serde(default)]
    pub feature_overrides: BTreeMap<String, String>,
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        let s = self.default_provider.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "No default provider configured.\n\
                 Hint: run `weather configure <provider>` (e.g. `weather configure openweather`) first."
            )
        })?;

        ProviderId::try_from(s.as_str())
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS))
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(contents)?;

        cfg.feature_overrides()?;

        Ok(cfg)
    }

    /// Default per-feature overrides, validated.
    pub fn feature_overrides(&self) -> Result<BTreeMap<Feature, ProviderId>> {
        self.feature_overrides
            .iter()
            .map(|(feature, id)| {
                let feature = Feature::try_from(feature.as_str())?;
                if !feature.is_secondary() {
                    return Err(anyhow!("Feature '{feature}' always comes from the main provider"));
                }
                let id = ProviderId::try_from(id.as_str())
                    .with_context(|| format!("Invalid feature override source '{id}'"))?;
                Ok((feature, id))
            })
            .collect()
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "weather-task", "weather-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Path to the saved locations file.
    pub fn locations_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().join("locations.json"))
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.entry(provider_id.as_str().to_string()).or_default().api_key = Some(api_key);

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    pub fn set_instance_url(&mut self, provider_id: ProviderId, url: String) {
        self.providers.entry(provider_id.as_str().to_string()).or_default().instance_url = Some(url);
    }

    /// Returns API key for a provider, if present and non-empty.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.provider_config(provider_id)
            .and_then(|cfg| cfg.api_key.as_deref())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn provider_instance_url(&self, provider_id: ProviderId) -> Option<&str> {
        self.provider_config(provider_id).and_then(|cfg| cfg.instance_url.as_deref())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        !provider_id.requires_api_key() || self.provider_api_key(provider_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;

    #[test]
    fn default_provider_id_errors_when_not_set() {
        let cfg = Config::default();
        let err = cfg.default_provider_id().unwrap_err();

        assert!(err.to_string().contains("No default provider configured"));
    }

    #[test]
    fn set_api_key_and_default_for_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::OpenWeather);

        let key = cfg.provider_api_key(ProviderId::OpenWeather);
        assert_eq!(key, Some("OPEN_KEY"));
        assert!(cfg.is_provider_configured(ProviderId::OpenWeather));
    }

    #[test]
    fn upsert_does_not_override_existing_default() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "WEATHER_KEY".into());

        let default = cfg.default_provider_id().expect("default provider must exist");

        assert_eq!(default, ProviderId::OpenWeather);
        assert!(cfg.is_provider_configured(ProviderId::WeatherApi));
    }

    #[test]
    fn upsert_keeps_instance_url() {
        let mut cfg = Config::default();
        cfg.set_instance_url(ProviderId::OpenMeteo, "https://meteo.example.org".into());
        cfg.upsert_provider_api_key(ProviderId::OpenMeteo, "KEY".into());

        assert_eq!(cfg.provider_instance_url(ProviderId::OpenMeteo), Some("https://meteo.example.org"));
        assert_eq!(cfg.provider_api_key(ProviderId::OpenMeteo), Some("KEY"));
    }

    #[test]
    fn keyless_provider_is_always_configured() {
        let cfg = Config::default();
        assert!(cfg.is_provider_configured(ProviderId::OpenMeteo));
        assert!(!cfg.is_provider_configured(ProviderId::WeatherApi));
    }

    #[test]
    fn blank_api_key_is_not_configured() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "   ".into());
        assert!(!cfg.is_provider_configured(ProviderId::WeatherApi));
    }

    #[test]
    fn parses_toml_with_overrides() {
        let cfg = Config::from_toml(
            r#"
            default_provider = "weatherapi"
            provider_timeout_secs = 5

            [providers.weatherapi]
            api_key = "abc"

            [feature_overrides]
            pollen = "openmeteo"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.default_provider_id().unwrap(), ProviderId::WeatherApi);
        let overrides = cfg.feature_overrides().unwrap();
        assert_eq!(overrides.get(&Feature::Pollen), Some(&ProviderId::OpenMeteo));
        assert_eq!(cfg.provider_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_unknown_override_source() {
        let err = Config::from_toml("[feature_overrides]\npollen = \"nowhere\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("Unknown provider"));
    }

    #[test]
    fn rejects_override_of_base_feature() {
        let err = Config::from_toml("[feature_overrides]\ndaily = \"openmeteo\"\n").unwrap_err();
        assert!(err.to_string().contains("always comes from the main provider"));
    }

    #[test]
    fn default_timeout_applies() {
        assert_eq!(Config::default().provider_timeout(), Duration::from_secs(20));
    }
}
