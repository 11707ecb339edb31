//! Spend ratio classification.

use serde::{Deserialize, Serialize};

/// Default ratio at which spend is reported as a warning.
pub const DEFAULT_WARN_THRESHOLD: f64 = 0.8;

/// Default ratio at which spend becomes critical and triggers a shutdown.
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 1.0;

/// Classification of a cost/budget ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", content = "ratio", rename_all = "lowercase")]
pub enum RatioClass {
    Safe(f64),
    Warning(f64),
    Critical(f64),
}

impl RatioClass {
    /// The ratio this classification was derived from.
    pub fn ratio(&self) -> f64 {
        match self {
            Self::Safe(r) | Self::Warning(r) | Self::Critical(r) => *r,
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical(_))
    }
}

impl std::fmt::Display for RatioClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe(r) => write!(f, "safe ({:.2}%)", r * 100.0),
            Self::Warning(r) => write!(f, "warning ({:.2}%)", r * 100.0),
            Self::Critical(r) => write!(f, "critical ({:.2}%)", r * 100.0),
        }
    }
}

/// Warning and critical cut-offs, both expressed as cost/budget ratios.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warn: f64,
    pub critical: f64,
}

impl Thresholds {
    pub fn new(warn: f64, critical: f64) -> Self {
        Self { warn, critical }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warn: DEFAULT_WARN_THRESHOLD,
            critical: DEFAULT_CRITICAL_THRESHOLD,
        }
    }
}

/// Classify spend against a budget.
///
/// Total: a zero budget or any input that is not a finite non-negative
/// number yields `Safe(0.0)`, so malformed figures can never cause a
/// shutdown.
pub fn classify(cost_amount: f64, budget_amount: f64, thresholds: Thresholds) -> RatioClass {
    let valid = |v: f64| v.is_finite() && v >= 0.0;
    if !valid(cost_amount) || !valid(budget_amount) || budget_amount == 0.0 {
        return RatioClass::Safe(0.0);
    }

    let ratio = cost_amount / budget_amount;
    if !ratio.is_finite() {
        // Subnormal budgets can overflow the division.
        return RatioClass::Safe(0.0);
    }

    if ratio >= thresholds.critical {
        RatioClass::Critical(ratio)
    } else if ratio >= thresholds.warn {
        RatioClass::Warning(ratio)
    } else {
        RatioClass::Safe(ratio)
    }
}
