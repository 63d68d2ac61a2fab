//! Correlation coefficients keyed by ordered view pair
//!
//! The table is immutable once built and always complete: construction walks
//! every ordered pair of distinct views and refuses to produce a table with a
//! gap.

use crate::error::ConfigError;
use crate::view::{View, ViewPair};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Affine coefficients mapping a normalized click position to a slice position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Coefficients {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    /// Unrounded slice position for a click at normalized `(x, y)`
    ///
    /// `y` is measured from the bottom of the image.
    pub fn apply(&self, x: f64, y: f64) -> f64 {
        self.a * y + self.b * x - self.c
    }

    fn check_finite(&self, pair: ViewPair) -> Result<(), ConfigError> {
        for (name, value) in [("a", self.a), ("b", self.b), ("c", self.c)] {
            if !value.is_finite() {
                return Err(ConfigError::NonFiniteCoefficient { pair, name });
            }
        }
        Ok(())
    }
}

/// Coefficients as written in the config file: `[coefficients.<source>.<target>]`
pub type RawCoefficients = BTreeMap<View, BTreeMap<View, Coefficients>>;

/// Complete, validated coefficient table
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientTable {
    entries: HashMap<ViewPair, Coefficients>,
}

impl CoefficientTable {
    /// Build a table from `(source, target, coefficients)` entries
    ///
    /// Fails on self pairs, non-finite values, or any missing ordered pair.
    /// A repeated pair keeps its last value.
    pub fn from_entries<I>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (View, View, Coefficients)>,
    {
        let mut table = HashMap::new();

        for (source, target, coefficients) in entries {
            let pair = ViewPair::new(source, target).ok_or(ConfigError::SelfPair(source))?;
            coefficients.check_finite(pair)?;
            table.insert(pair, coefficients);
        }

        for pair in ViewPair::all() {
            if !table.contains_key(&pair) {
                return Err(ConfigError::MissingCoefficients(pair));
            }
        }

        Ok(Self { entries: table })
    }

    /// Build a table from the nested config-file layout
    pub fn from_raw(raw: &RawCoefficients) -> Result<Self, ConfigError> {
        Self::from_entries(raw.iter().flat_map(|(source, targets)| {
            targets
                .iter()
                .map(move |(target, coefficients)| (*source, *target, *coefficients))
        }))
    }

    /// Coefficients for an ordered pair
    pub fn get(&self, source: View, target: View) -> Result<Coefficients, ConfigError> {
        let pair = ViewPair::new(source, target).ok_or(ConfigError::SelfPair(source))?;
        self.entries
            .get(&pair)
            .copied()
            .ok_or(ConfigError::MissingCoefficients(pair))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
