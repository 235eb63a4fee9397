use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, convert::TryFrom, fmt};

/// One independently-requestable category of weather data.
///
/// The declaration order is the canonical order used everywhere features are
/// iterated (routing plans, failure maps, merge passes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Current,
    Daily,
    Hourly,
    Minutely,
    AirQuality,
    Pollen,
    Alert,
    Normals,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Current => "current",
            Feature::Daily => "daily",
            Feature::Hourly => "hourly",
            Feature::Minutely => "minutely",
            Feature::AirQuality => "air_quality",
            Feature::Pollen => "pollen",
            Feature::Alert => "alert",
            Feature::Normals => "normals",
        }
    }

    pub const fn all() -> &'static [Feature] {
        &[
            Feature::Current,
            Feature::Daily,
            Feature::Hourly,
            Feature::Minutely,
            Feature::AirQuality,
            Feature::Pollen,
            Feature::Alert,
            Feature::Normals,
        ]
    }

    /// Features that always come from the location's primary source.
    pub const fn base() -> &'static [Feature] {
        &[Feature::Current, Feature::Daily, Feature::Hourly]
    }

    /// Features that may be overridden per location.
    pub fn is_secondary(&self) -> bool {
        !Self::base().contains(self)
    }

    /// Parse a comma separated list such as `"current,pollen,air_quality"`.
    pub fn parse_list(value: &str) -> anyhow::Result<BTreeSet<Feature>> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Feature::try_from)
            .collect()
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Feature {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase().replace('-', "_");

        Feature::all()
            .iter()
            .copied()
            .find(|f| f.as_str() == lower)
            .or(match lower.as_str() {
                "alerts" => Some(Feature::Alert),
                "aqi" => Some(Feature::AirQuality),
                _ => None,
            })
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown feature '{value}'. Supported features: current, daily, hourly, \
                     minutely, air_quality, pollen, alert, normals."
                )
            })
    }
}
