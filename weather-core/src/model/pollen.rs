use serde::{Deserialize, Serialize};

use crate::index::{BreakpointTable, LevelLabels, level_in};

pub const POLLEN_SCALE: &[f64] = &[0.0, 25.0, 50.0, 75.0, 100.0];

pub const POLLEN_LABELS: LevelLabels = LevelLabels {
    names: &["None", "Low", "Moderate", "High", "Very high"],
    colors: &["#bfbfbf", "#08c286", "#6ad555", "#ffd741", "#ffab40"],
};

// Grains per m³.
static TREE: BreakpointTable = BreakpointTable::from_static(&[0.0, 10.0, 50.0, 100.0, 500.0], POLLEN_SCALE);
static GRASS: BreakpointTable = BreakpointTable::from_static(&[0.0, 5.0, 20.0, 50.0, 200.0], POLLEN_SCALE);
static WEED: BreakpointTable = BreakpointTable::from_static(&[0.0, 5.0, 10.0, 50.0, 100.0], POLLEN_SCALE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollenKind {
    Alder,
    Birch,
    Grass,
    Mugwort,
    Olive,
    Ragweed,
}

impl PollenKind {
    pub const fn all() -> &'static [PollenKind] {
        &[
            PollenKind::Alder,
            PollenKind::Birch,
            PollenKind::Grass,
            PollenKind::Mugwort,
            PollenKind::Olive,
            PollenKind::Ragweed,
        ]
    }

    pub fn table(&self) -> &'static BreakpointTable {
        match self {
            PollenKind::Alder | PollenKind::Birch | PollenKind::Olive => &TREE,
            PollenKind::Grass => &GRASS,
            PollenKind::Mugwort | PollenKind::Ragweed => &WEED,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PollenKind::Alder => "alder",
            PollenKind::Birch => "birch",
            PollenKind::Grass => "grass",
            PollenKind::Mugwort => "mugwort",
            PollenKind::Olive => "olive",
            PollenKind::Ragweed => "ragweed",
        }
    }
}

/// Pollen counts for one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pollen {
    pub alder: Option<f64>,
    pub birch: Option<f64>,
    pub grass: Option<f64>,
    pub mugwort: Option<f64>,
    pub olive: Option<f64>,
    pub ragweed: Option<f64>,
}

impl Pollen {
    pub fn concentration(&self, kind: PollenKind) -> Option<f64> {
        match kind {
            PollenKind::Alder => self.alder,
            PollenKind::Birch => self.birch,
            PollenKind::Grass => self.grass,
            PollenKind::Mugwort => self.mugwort,
            PollenKind::Olive => self.olive,
            PollenKind::Ragweed => self.ragweed,
        }
    }

    pub fn kind_index(&self, kind: PollenKind) -> Option<u32> {
        kind.table().index(self.concentration(kind))
    }

    pub fn kind_level(&self, kind: PollenKind) -> Option<usize> {
        kind.table().level(self.concentration(kind))
    }

    pub fn index(&self) -> Option<u32> {
        PollenKind::all().iter().filter_map(|k| self.kind_index(*k)).max()
    }

    pub fn level(&self) -> Option<usize> {
        self.index().and_then(|index| level_in(POLLEN_SCALE, f64::from(index)))
    }

    pub fn name(&self) -> Option<&'static str> {
        POLLEN_LABELS.name(self.level())
    }

    pub fn color(&self) -> Option<&'static str> {
        POLLEN_LABELS.color(self.level())
    }

    pub fn is_empty(&self) -> bool {
        PollenKind::all().iter().all(|k| self.concentration(*k).is_none())
    }
}
