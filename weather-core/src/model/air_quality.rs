use serde::{Deserialize, Serialize};

use crate::index::{BreakpointTable, LevelLabels, level_in};

/// Index scale shared by every pollutant.
pub const AQI_SCALE: &[f64] = &[0.0, 20.0, 50.0, 100.0, 150.0, 250.0];

pub const AQI_LABELS: LevelLabels = LevelLabels {
    names: &["Excellent", "Fair", "Poor", "Unhealthy", "Very unhealthy", "Dangerous"],
    colors: &["#00e59b", "#ffc302", "#ff712b", "#f62a55", "#c72eaa", "#9930ff"],
};

// Concentrations in µg/m³, CO in mg/m³.
static PM25: BreakpointTable =
    BreakpointTable::from_static(&[0.0, 5.0, 15.0, 30.0, 60.0, 150.0], AQI_SCALE);
static PM10: BreakpointTable =
    BreakpointTable::from_static(&[0.0, 15.0, 45.0, 80.0, 160.0, 400.0], AQI_SCALE);
static O3: BreakpointTable =
    BreakpointTable::from_static(&[0.0, 50.0, 100.0, 160.0, 240.0, 480.0], AQI_SCALE);
static NO2: BreakpointTable =
    BreakpointTable::from_static(&[0.0, 10.0, 25.0, 200.0, 400.0, 1000.0], AQI_SCALE);
static SO2: BreakpointTable =
    BreakpointTable::from_static(&[0.0, 20.0, 40.0, 270.0, 500.0, 960.0], AQI_SCALE);
static CO: BreakpointTable =
    BreakpointTable::from_static(&[0.0, 2.0, 4.0, 35.0, 100.0, 230.0], AQI_SCALE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pollutant {
    Pm25,
    Pm10,
    O3,
    No2,
    So2,
    Co,
}

impl Pollutant {
    pub const fn all() -> &'static [Pollutant] {
        &[Pollutant::Pm25, Pollutant::Pm10, Pollutant::O3, Pollutant::No2, Pollutant::So2, Pollutant::Co]
    }

    pub fn table(&self) -> &'static BreakpointTable {
        match self {
            Pollutant::Pm25 => &PM25,
            Pollutant::Pm10 => &PM10,
            Pollutant::O3 => &O3,
            Pollutant::No2 => &NO2,
            Pollutant::So2 => &SO2,
            Pollutant::Co => &CO,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "PM2.5",
            Pollutant::Pm10 => "PM10",
            Pollutant::O3 => "O3",
            Pollutant::No2 => "NO2",
            Pollutant::So2 => "SO2",
            Pollutant::Co => "CO",
        }
    }
}

/// Pollutant concentrations for one point in time or one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AirQuality {
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub o3: Option<f64>,
    pub no2: Option<f64>,
    pub so2: Option<f64>,
    pub co: Option<f64>,
}

impl AirQuality {
    pub fn concentration(&self, pollutant: Pollutant) -> Option<f64> {
        match pollutant {
            Pollutant::Pm25 => self.pm25,
            Pollutant::Pm10 => self.pm10,
            Pollutant::O3 => self.o3,
            Pollutant::No2 => self.no2,
            Pollutant::So2 => self.so2,
            Pollutant::Co => self.co,
        }
    }

    fn concentration_mut(&mut self, pollutant: Pollutant) -> &mut Option<f64> {
        match pollutant {
            Pollutant::Pm25 => &mut self.pm25,
            Pollutant::Pm10 => &mut self.pm10,
            Pollutant::O3 => &mut self.o3,
            Pollutant::No2 => &mut self.no2,
            Pollutant::So2 => &mut self.so2,
            Pollutant::Co => &mut self.co,
        }
    }

    pub fn pollutant_index(&self, pollutant: Pollutant) -> Option<u32> {
        pollutant.table().index(self.concentration(pollutant))
    }

    /// Overall index: the worst pollutant wins.
    pub fn index(&self) -> Option<u32> {
        Pollutant::all().iter().filter_map(|p| self.pollutant_index(*p)).max()
    }

    pub fn level(&self) -> Option<usize> {
        self.index().and_then(|index| level_in(AQI_SCALE, f64::from(index)))
    }

    pub fn name(&self) -> Option<&'static str> {
        AQI_LABELS.name(self.level())
    }

    pub fn color(&self) -> Option<&'static str> {
        AQI_LABELS.color(self.level())
    }

    pub fn is_empty(&self) -> bool {
        Pollutant::all().iter().all(|p| self.concentration(*p).is_none())
    }

    /// Per-pollutant arithmetic mean, skipping missing samples.
    pub fn mean<'a>(samples: impl IntoIterator<Item = &'a AirQuality>) -> Option<AirQuality> {
        let samples: Vec<&AirQuality> = samples.into_iter().collect();
        if samples.is_empty() {
            return None;
        }

        let mut mean = AirQuality::default();
        for pollutant in Pollutant::all() {
            let values: Vec<f64> = samples.iter().filter_map(|s| s.concentration(*pollutant)).collect();
            if !values.is_empty() {
                *mean.concentration_mut(*pollutant) = Some(values.iter().sum::<f64>() / values.len() as f64);
            }
        }
        Some(mean)
    }
}
