//! Cross-view slice correlation
//!
//! Maps a normalized click position in one view to the slice of another view
//! that passes through the clicked point. The mapping is a per-pair affine
//! formula, `a·y + b·x − c`, rounded to the nearest slice and clamped into the
//! target view's range.

use osv_common::{CoefficientTable, ConfigError, View, ViewMap};
use std::sync::Arc;

/// Pure correlation engine
///
/// Holds only immutable configuration, so it can be shared across tasks and
/// called any number of times with identical results.
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    table: Arc<CoefficientTable>,
    slice_counts: ViewMap<usize>,
}

impl CorrelationEngine {
    pub fn new(table: CoefficientTable, slice_counts: ViewMap<usize>) -> Self {
        Self {
            table: Arc::new(table),
            slice_counts,
        }
    }

    /// Slice of `target` matching a click at `(x, y)` in `source`
    ///
    /// `x` and `y` are normalized against the rendered surface, with `y = 0`
    /// at the bottom of the image. The result is always a valid slice of
    /// `target`; only a missing coefficient entry is an error.
    pub fn compute(&self, source: View, target: View, x: f64, y: f64) -> Result<usize, ConfigError> {
        let coefficients = self.table.get(source, target)?;
        let raw = coefficients.apply(x, y);
        let slice = clamp_slice(raw, self.slice_counts[target]);

        tracing::trace!(
            source = %source,
            target = %target,
            x,
            y,
            raw,
            slice,
            "Correlated click"
        );

        Ok(slice)
    }

    /// Slices of every other view for a click in `source`
    pub fn compute_siblings(&self, source: View, x: f64, y: f64) -> Result<Vec<(View, usize)>, ConfigError> {
        source
            .others()
            .map(|target| self.compute(source, target, x, y).map(|slice| (target, slice)))
            .collect()
    }

    pub fn slice_count(&self, view: View) -> usize {
        self.slice_counts[view]
    }

    pub fn coefficients(&self) -> &CoefficientTable {
        &self.table
    }
}

/// Round to the nearest slice and clamp into `[0, count - 1]`
///
/// NaN lands on slice 0.
pub fn clamp_slice(raw: f64, count: usize) -> usize {
    let max = count.saturating_sub(1);
    let rounded = raw.round();

    if rounded.is_nan() || rounded <= 0.0 {
        0
    } else if rounded >= max as f64 {
        max
    } else {
        rounded as usize
    }
}
