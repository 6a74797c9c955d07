//! Output transforms and truncation for field parameters.
//!
//! Field values are stored raw; a [`FieldTransform`] and a [`Truncation`] are
//! applied per element at export time only. Both are deterministic functions of
//! their inputs and are usable independently of any storage state.
//!
//! Truncation is applied strictly after the named transform.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// A named output transform applied to field values on export.
///
/// Unrecognised or empty transform names map to [`FieldTransform::None`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FieldTransform {
    /// Identity.
    #[default]
    None,
    /// Natural logarithm (`LN` / `LOG`).
    Ln,
    /// Natural logarithm plus `1e-6` (`LN0`).
    Ln0,
    /// Base-10 logarithm (`LOG10`).
    Log10,
    /// Exponential (`EXP`).
    Exp,
    /// Exponential plus `1e-6` (`EXP0`).
    Exp0,
    /// `10^x` (`POW10`).
    Pow10,
    /// `10^max(x, 0.001)` (`TRUNC_POW10`).
    TruncPow10,
}

impl FieldTransform {
    /// Resolve a transform from its stored name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "LN" | "LOG" => Self::Ln,
            "LN0" => Self::Ln0,
            "LOG10" => Self::Log10,
            "EXP" => Self::Exp,
            "EXP0" => Self::Exp0,
            "POW10" => Self::Pow10,
            "TRUNC_POW10" => Self::TruncPow10,
            _ => Self::None,
        }
    }

    /// Apply the transform to a single value.
    #[must_use]
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Self::None => x,
            Self::Ln => x.ln(),
            Self::Ln0 => x.ln() + 1e-6,
            Self::Log10 => x.log10(),
            Self::Exp => x.exp(),
            Self::Exp0 => x.exp() + 1e-6,
            Self::Pow10 => 10_f64.powf(x),
            Self::TruncPow10 => 10_f64.powf(x.max(0.001)),
        }
    }

    /// Apply the transform element-wise.
    #[must_use]
    pub fn transform(&self, data: &ArrayD<f64>) -> ArrayD<f64> {
        if *self == Self::None {
            data.clone()
        } else {
            data.mapv(|x| self.apply(x))
        }
    }
}

/// Which bounds a [`Truncation`] clamps against.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationMode {
    /// No clamping.
    #[default]
    None,
    /// Clamp below to the minimum.
    Min,
    /// Clamp above to the maximum.
    Max,
    /// Clamp to both bounds.
    MinMax,
}

/// A truncation policy: a mode and its bounds.
///
/// Bounds for inactive sides are ignored; `MinMax` with `min > max` clamps to
/// `max` (the maximum bound is applied first, matching per-element
/// `max(min(x, max), min)`).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Truncation {
    /// Active bounds.
    pub mode: TruncationMode,
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl Truncation {
    /// Create a truncation policy.
    #[must_use]
    pub const fn new(mode: TruncationMode, min: f64, max: f64) -> Self {
        Self { mode, min, max }
    }

    /// Apply the truncation to a single value.
    #[must_use]
    pub fn apply(&self, x: f64) -> f64 {
        match self.mode {
            TruncationMode::None => x,
            TruncationMode::Min => x.max(self.min),
            TruncationMode::Max => x.min(self.max),
            TruncationMode::MinMax => x.min(self.max).max(self.min),
        }
    }

    /// Apply the truncation element-wise.
    #[must_use]
    pub fn truncate(&self, data: &ArrayD<f64>) -> ArrayD<f64> {
        if self.mode == TruncationMode::None {
            data.clone()
        } else {
            data.mapv(|x| self.apply(x))
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn transform_names() {
        assert_eq!(FieldTransform::from_name("LN"), FieldTransform::Ln);
        assert_eq!(FieldTransform::from_name("LOG"), FieldTransform::Ln);
        assert_eq!(FieldTransform::from_name("POW10"), FieldTransform::Pow10);
        assert_eq!(FieldTransform::from_name(""), FieldTransform::None);
        assert_eq!(FieldTransform::from_name("NOT_A_NAME"), FieldTransform::None);
    }

    #[test]
    fn transform_values() {
        let e = std::f64::consts::E;
        assert!((FieldTransform::Ln.apply(e) - 1.0).abs() < 1e-12);
        assert!((FieldTransform::Ln0.apply(e) - (1.0 + 1e-6)).abs() < 1e-12);
        assert!((FieldTransform::Log10.apply(100.0) - 2.0).abs() < 1e-12);
        assert!((FieldTransform::Exp.apply(0.0) - 1.0).abs() < 1e-12);
        assert!((FieldTransform::Exp0.apply(0.0) - (1.0 + 1e-6)).abs() < 1e-12);
        assert!((FieldTransform::Pow10.apply(2.0) - 100.0).abs() < 1e-12);
    }

    #[test]
    fn trunc_pow10_clamps_exponent() {
        let expected = 10_f64.powf(0.001);
        assert!((FieldTransform::TruncPow10.apply(-5.0) - expected).abs() < 1e-12);
        // Above the clamp the transform matches POW10.
        assert!((FieldTransform::TruncPow10.apply(2.0) - 100.0).abs() < 1e-12);
    }

    #[test]
    fn truncate_both_ends() {
        let truncation = Truncation::new(TruncationMode::MinMax, 0.0, 10.0);
        let data = array![-3.0, 15.0, 5.0].into_dyn();
        let truncated = truncation.truncate(&data);
        assert_eq!(truncated, array![0.0, 10.0, 5.0].into_dyn());
    }

    #[test]
    fn truncate_single_sided() {
        let min_only = Truncation::new(TruncationMode::Min, 1.0, -1.0);
        assert_eq!(min_only.apply(0.0), 1.0);
        assert_eq!(min_only.apply(2.0), 2.0);
        let max_only = Truncation::new(TruncationMode::Max, 1.0, 3.0);
        assert_eq!(max_only.apply(5.0), 3.0);
        assert_eq!(max_only.apply(2.0), 2.0);
        let none = Truncation::default();
        assert_eq!(none.apply(1e12), 1e12);
    }
}
