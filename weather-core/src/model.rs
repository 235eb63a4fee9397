mod air_quality;
mod location;
mod pollen;
mod result;
mod weather;

pub use air_quality::{AQI_LABELS, AQI_SCALE, AirQuality, Pollutant};
pub use location::{Location, SourceParameters};
pub use pollen::{POLLEN_LABELS, POLLEN_SCALE, Pollen, PollenKind};
pub use result::{AirQualityData, PollenData, ProviderResult};
pub use weather::{
    Alert, AlertSeverity, Current, Daily, FeatureUpdate, Hourly, Minutely, Normals, Weather,
};
