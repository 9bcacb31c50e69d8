//! Period-over-period comparison.

use serde::{Deserialize, Serialize};

/// Percentage change from `baseline` to `current`.
///
/// A zero baseline yields `0` when `current` is also zero and `100` otherwise.
/// This keeps the dashboard's long-standing "+100% from nothing" convention,
/// which understates growth from a zero base of any size. All other inputs
/// return `(current - baseline) / baseline * 100`, unclamped.
#[must_use]
pub fn percent_change(current: f64, baseline: f64) -> f64 {
    if baseline == 0.0 {
        return if current == 0.0 { 0.0 } else { 100.0 };
    }
    (current - baseline) / baseline * 100.0
}

/// Direction of a change, for arrow icons and colouring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Current exceeds baseline.
    Up,
    /// Current is below baseline.
    Down,
    /// No change.
    Flat,
}

/// A current figure measured against a baseline.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    /// Figure for the selected period.
    pub current: f64,
    /// Figure for the baseline period.
    pub baseline: f64,
    /// See [`percent_change`].
    pub percent_change: f64,
}

impl ComparisonResult {
    /// Compares `current` against `baseline`.
    #[must_use]
    pub fn new(current: f64, baseline: f64) -> Self {
        Self {
            current,
            baseline,
            percent_change: percent_change(current, baseline),
        }
    }

    /// False when either figure or the change is `inf` or `NaN`, which happens
    /// once sums overflow or a baseline is tiny enough to divide into infinity.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.current.is_finite() && self.baseline.is_finite() && self.percent_change.is_finite()
    }

    /// Direction of the change.
    #[must_use]
    pub fn trend(&self) -> Trend {
        if self.percent_change > 0.0 {
            Trend::Up
        } else if self.percent_change < 0.0 {
            Trend::Down
        } else {
            Trend::Flat
        }
    }

    /// Label such as `+12.5% vs Nov 2025`.
    #[must_use]
    pub fn label(&self, baseline_name: &str) -> String {
        format!("{:+.1}% vs {baseline_name}", self.percent_change)
    }
}
