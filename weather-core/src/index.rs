//! Breakpoint-interpolated index scales.
//!
//! A [`BreakpointTable`] maps a raw measurement (a pollutant concentration, a
//! pollen count) onto a normalized index by piecewise-linear interpolation
//! between paired thresholds. Above the top breakpoint the index keeps growing
//! along the line from the origin through the last point, without a cap.
//!
//! Every air-quality pollutant and pollen kind is described by a table; the
//! interpolation itself lives here only once.

use std::borrow::Cow;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BreakpointTableError {
    #[error("breakpoint table needs at least two entries, got {0}")]
    TooShort(usize),

    #[error("raw thresholds ({raw}) and scale thresholds ({scale}) differ in length")]
    LengthMismatch { raw: usize, scale: usize },

    #[error("{which} thresholds are not strictly ascending at position {position}")]
    NotAscending { which: &'static str, position: usize },

    #[error("top raw threshold must be positive")]
    NonPositiveTop,
}

/// Paired ascending raw thresholds and index thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointTable {
    raw: Cow<'static, [f64]>,
    scale: Cow<'static, [f64]>,
}

impl BreakpointTable {
    /// Build a table from compile-time arrays.
    ///
    /// Shape is checked at compile time when used in a `static`. Ordering is
    /// checked by the unit tests of the modules that declare tables; use
    /// [`BreakpointTable::new`] for tables coming from elsewhere.
    pub const fn from_static(raw: &'static [f64], scale: &'static [f64]) -> Self {
        assert!(raw.len() == scale.len(), "raw and scale thresholds differ in length");
        assert!(raw.len() >= 2, "breakpoint table needs at least two entries");
        Self { raw: Cow::Borrowed(raw), scale: Cow::Borrowed(scale) }
    }

    pub fn new(raw: Vec<f64>, scale: Vec<f64>) -> Result<Self, BreakpointTableError> {
        let table = Self { raw: Cow::Owned(raw), scale: Cow::Owned(scale) };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), BreakpointTableError> {
        if self.raw.len() != self.scale.len() {
            return Err(BreakpointTableError::LengthMismatch {
                raw: self.raw.len(),
                scale: self.scale.len(),
            });
        }
        if self.raw.len() < 2 {
            return Err(BreakpointTableError::TooShort(self.raw.len()));
        }
        for (which, values) in [("raw", &self.raw), ("scale", &self.scale)] {
            if let Some(position) = values.windows(2).position(|w| w[0] >= w[1]) {
                return Err(BreakpointTableError::NotAscending { which, position: position + 1 });
            }
        }
        if self.raw[self.raw.len() - 1] <= 0.0 {
            return Err(BreakpointTableError::NonPositiveTop);
        }
        Ok(())
    }

    pub fn raw_thresholds(&self) -> &[f64] {
        &self.raw
    }

    pub fn scale_thresholds(&self) -> &[f64] {
        &self.scale
    }

    /// Index of the highest raw threshold that `value` reaches.
    ///
    /// `None` for a missing value and for values below the table's domain.
    pub fn level(&self, value: Option<f64>) -> Option<usize> {
        level_in(&self.raw, value?)
    }

    /// Normalized index for a raw measurement.
    pub fn index(&self, value: Option<f64>) -> Option<u32> {
        let value = value?;
        let level = level_in(&self.raw, value)?;
        let top = self.raw.len().min(self.scale.len()).checked_sub(1)?;

        let index = if level < top {
            let (t0, t1) = (self.raw[level], self.raw[level + 1]);
            let (s0, s1) = (self.scale[level], self.scale[level + 1]);
            (s1 - s0) / (t1 - t0) * (value - t0) + s0
        } else {
            value * self.scale[top] / self.raw[top]
        };

        Some(index.round() as u32)
    }
}

/// Greatest `i` such that `value >= thresholds[i]`.
pub fn level_in(thresholds: &[f64], value: f64) -> Option<usize> {
    if value.is_nan() {
        return None;
    }
    thresholds.iter().rposition(|threshold| value >= *threshold)
}

/// An index scale with a label and a color for every level.
///
/// Level 0 is the "none"/"good" bucket.
#[derive(Debug, Clone, Copy)]
pub struct LevelLabels {
    pub names: &'static [&'static str],
    pub colors: &'static [&'static str],
}

impl LevelLabels {
    pub fn name(&self, level: Option<usize>) -> Option<&'static str> {
        level.and_then(|l| self.names.get(l.min(self.names.len().saturating_sub(1))).copied())
    }

    pub fn color(&self, level: Option<usize>) -> Option<&'static str> {
        level.and_then(|l| self.colors.get(l.min(self.colors.len().saturating_sub(1))).copied())
    }

    pub fn is_none_level(level: Option<usize>) -> bool {
        level == Some(0)
    }
}

/// Checks that `table` is valid, maps every breakpoint exactly onto its
/// scale value and is monotonic across and beyond its range.
#[cfg(test)]
pub(crate) fn assert_breakpoint_properties(name: &str, table: &BreakpointTable) {
    table.validate().unwrap_or_else(|e| panic!("{name}: {e}"));

    for (raw, scale) in table.raw_thresholds().iter().zip(table.scale_thresholds()) {
        assert_eq!(table.index(Some(*raw)), Some(scale.round() as u32), "{name}: breakpoint {raw}");
    }

    let top = table.raw_thresholds()[table.raw_thresholds().len() - 1];
    let step = top / 500.0;
    let mut previous = 0;
    for i in 0..=1000 {
        let value = step * f64::from(i);
        let index = table.index(Some(value)).unwrap_or_else(|| panic!("{name}: no index at {value}"));
        assert!(index >= previous, "{name}: index decreased at {value}");
        previous = index;
    }
}
