//! Approximate equality between a reference tensor and a device-computed tensor.
//!
//! A comparison passes when two independent criteria hold:
//!
//!   - **Elementwise closeness**: every element satisfies `|reference - actual| <= atol + rtol * |reference|`, with
//!     the absolute and relative tolerances combined additively as in NumPy's `isclose`.
//!   - **Correlation**: the
//!     [Pearson correlation coefficient](https://en.wikipedia.org/wiki/Pearson_correlation_coefficient) (PCC) of the
//!     flattened tensors is at least the configured threshold.
//!
//! NaN and infinite values are not special-cased beyond IEEE 754 semantics: comparisons against NaN are false, so a
//! NaN anywhere in either tensor fails the closeness check and usually turns the PCC into NaN as well. Elements that
//! compare exactly equal (including matching infinities) are always considered close.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensors::HostTensor;

/// Error type for tensor comparisons.
///
/// These errors signal misuse by the caller and are distinct from a comparison that ran and did not pass, which is
/// reported through [`EqualityVerdict::passed`].
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonError {
    /// Error returned when the compared tensors have different shapes.
    #[error("reference shape {reference:?} does not match actual shape {actual:?}")]
    ShapeMismatch { reference: Vec<usize>, actual: Vec<usize> },
}

/// Acceptance thresholds of a comparison.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    /// Minimum Pearson correlation coefficient.
    pub pcc: f64,

    /// Relative tolerance, scaled by the magnitude of the reference element.
    pub rtol: f64,

    /// Absolute tolerance.
    pub atol: f64,
}

impl Tolerance {
    pub fn new(pcc: f64, rtol: f64, atol: f64) -> Self {
        Self { pcc, rtol, atol }
    }

    /// Tolerance that only accepts bit-for-bit identical, perfectly correlated tensors.
    pub fn exact() -> Self {
        Self { pcc: 1.0, rtol: 0.0, atol: 0.0 }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { pcc: 0.999, rtol: 0.01, atol: 0.01 }
    }
}

/// Outcome of comparing a reference tensor against an actual tensor.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EqualityVerdict {
    passed: bool,
    all_close: bool,
    correlation_score: f64,
    max_abs_diff: f64,
    mean_abs_diff: f64,
    max_rel_diff: f64,
    tolerance: Tolerance,
}

impl EqualityVerdict {
    /// `true` iff every element is close and the correlation score meets the threshold.
    pub fn passed(&self) -> bool {
        self.passed
    }

    /// `true` iff every element is within `atol + rtol * |reference|` of its reference.
    pub fn all_close(&self) -> bool {
        self.all_close
    }

    /// Pearson correlation coefficient between the flattened tensors.
    pub fn correlation_score(&self) -> f64 {
        self.correlation_score
    }

    pub fn max_abs_diff(&self) -> f64 {
        self.max_abs_diff
    }

    pub fn mean_abs_diff(&self) -> f64 {
        self.mean_abs_diff
    }

    /// Largest `|reference - actual| / |actual|` over elements where it is defined.
    pub fn max_rel_diff(&self) -> f64 {
        self.max_rel_diff
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Converts this verdict into the `(passed, message)` pair that sweep runs report.
    pub fn into_result_tuple(self) -> (bool, String) {
        (self.passed, self.to_string())
    }
}

impl Display for EqualityVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Max ATOL Delta: {}, Max RTOL Delta: {}, PCC: {}",
            self.max_abs_diff, self.max_rel_diff, self.correlation_score,
        )?;
        if !self.all_close {
            write!(f, ", Allclose check failed (rtol={}, atol={})", self.tolerance.rtol, self.tolerance.atol)?;
        }
        if !(self.correlation_score >= self.tolerance.pcc) {
            write!(f, ", PCC check failed (expected >= {})", self.tolerance.pcc)?;
        }
        Ok(())
    }
}

/// Compares `actual` against `reference` using both elementwise closeness and correlation.
pub fn check_allclose_and_pcc(
    reference: &HostTensor,
    actual: &HostTensor,
    tolerance: &Tolerance,
) -> Result<EqualityVerdict, ComparisonError> {
    check_shapes(reference, actual)?;

    let mut all_close = true;
    let mut max_abs_diff = 0f64;
    let mut sum_abs_diff = 0f64;
    let mut max_rel_diff = 0f64;
    for (&expected, &calculated) in reference.data().iter().zip(actual.data()) {
        let (expected, calculated) = (f64::from(expected), f64::from(calculated));
        let abs_diff = if expected == calculated { 0.0 } else { (expected - calculated).abs() };
        if !(expected == calculated || abs_diff <= tolerance.atol + tolerance.rtol * expected.abs()) {
            all_close = false;
        }
        if abs_diff > max_abs_diff {
            max_abs_diff = abs_diff;
        }
        sum_abs_diff += abs_diff;
        let rel_diff = abs_diff / calculated.abs();
        if abs_diff > 0.0 && rel_diff > max_rel_diff {
            max_rel_diff = rel_diff;
        }
    }
    let mean_abs_diff = if reference.is_empty() { 0.0 } else { sum_abs_diff / reference.len() as f64 };

    let correlation_score = pearson_correlation(reference.data(), actual.data());
    let passed = all_close && correlation_score >= tolerance.pcc;
    let verdict = EqualityVerdict {
        passed,
        all_close,
        correlation_score,
        max_abs_diff,
        mean_abs_diff,
        max_rel_diff,
        tolerance: *tolerance,
    };
    tracing::debug!(passed, pcc = correlation_score, max_abs_diff, mean_abs_diff, "compared tensors");
    Ok(verdict)
}

/// Compares `actual` against `reference` using only the correlation threshold, returning `(passed, pcc)` where the
/// second element is the formatted correlation score.
pub fn check_with_pcc(
    reference: &HostTensor,
    actual: &HostTensor,
    pcc: f64,
) -> Result<(bool, String), ComparisonError> {
    check_shapes(reference, actual)?;
    let correlation_score = pearson_correlation(reference.data(), actual.data());
    Ok((correlation_score >= pcc, correlation_score.to_string()))
}

/// Computes the Pearson correlation coefficient of two equally long sequences in double precision.
///
/// When at least one of the sequences is constant the coefficient is undefined. In that case this returns `1.0` if
/// both sequences are constant and element-wise equal, and `0.0` otherwise. Two empty sequences are considered
/// perfectly correlated.
pub fn pearson_correlation(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 1.0;
    }

    if is_constant(a) || is_constant(b) {
        let equal = is_constant(a) && is_constant(b) && a.iter().zip(b).all(|(x, y)| x == y);
        return if equal { 1.0 } else { 0.0 };
    }

    let count = a.len() as f64;
    let mean_a = a.iter().map(|&value| f64::from(value)).sum::<f64>() / count;
    let mean_b = b.iter().map(|&value| f64::from(value)).sum::<f64>() / count;
    let mut covariance = 0f64;
    let mut variance_a = 0f64;
    let mut variance_b = 0f64;
    for (&x, &y) in a.iter().zip(b) {
        let dx = f64::from(x) - mean_a;
        let dy = f64::from(y) - mean_b;
        covariance += dx * dy;
        variance_a += dx * dx;
        variance_b += dy * dy;
    }
    (covariance / (variance_a * variance_b).sqrt()).clamp(-1.0, 1.0)
}

fn is_constant(values: &[f32]) -> bool {
    values.iter().all(|&value| value == values[0])
}

fn check_shapes(reference: &HostTensor, actual: &HostTensor) -> Result<(), ComparisonError> {
    if reference.shape() != actual.shape() {
        return Err(ComparisonError::ShapeMismatch {
            reference: reference.shape().to_vec(),
            actual: actual.shape().to_vec(),
        });
    }
    Ok(())
}
