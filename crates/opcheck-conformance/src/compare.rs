//! Element-wise tolerance comparison of kernel output against reference data.

use opcheck_core::{OpError, Result};
use serde::{Deserialize, Serialize};

use crate::buffer::HostBuffer;

/// Relative and absolute tolerance for [`compare`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub rtol: f32,
    pub atol: f32,
    /// Treat NaN in both positions as a match.
    #[serde(default)]
    pub equal_nan: bool,
}

impl Tolerance {
    pub const fn new(rtol: f32, atol: f32) -> Self {
        Self {
            rtol,
            atol,
            equal_nan: false,
        }
    }

    pub const fn with_equal_nan(mut self, equal_nan: bool) -> Self {
        self.equal_nan = equal_nan;
        self
    }

    /// Whether `actual` is acceptable for `expected`.
    pub fn accepts(&self, actual: f32, expected: f32) -> bool {
        if actual == expected {
            return true;
        }
        if actual.is_nan() || expected.is_nan() {
            return self.equal_nan && actual.is_nan() && expected.is_nan();
        }
        if !actual.is_finite() || !expected.is_finite() {
            return false;
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::new(5e-3, 1e-8)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Mismatch {
    pub index: usize,
    pub actual: f32,
    pub expected: f32,
}

/// Outcome of comparing two buffers element by element.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub passed: bool,
    pub total: usize,
    pub mismatches: usize,
    /// Largest `|actual - expected|` over pairs where both are finite.
    pub max_abs_diff: f32,
    /// Largest `|actual - expected| / |expected|` over finite pairs.
    pub max_rel_diff: f32,
    pub first_mismatch: Option<Mismatch>,
}

/// Compare `actual` against `expected` with the given tolerances.
///
/// Element `i` passes when `actual[i] == expected[i]` or both are finite and
/// `|actual[i] - expected[i]| <= abs_tol + rel_tol * |expected[i]|`. NaN on
/// either side is a mismatch.
pub fn compare(
    actual: &[f32],
    expected: &[f32],
    rel_tol: f32,
    abs_tol: f32,
) -> Result<ComparisonResult> {
    compare_with(actual, expected, &Tolerance::new(rel_tol, abs_tol))
}

pub fn compare_with(actual: &[f32], expected: &[f32], tol: &Tolerance) -> Result<ComparisonResult> {
    if actual.len() != expected.len() {
        return Err(OpError::ShapeMismatch {
            expected: vec![expected.len() as i64],
            got: vec![actual.len() as i64],
        });
    }

    let mut mismatches = 0;
    let mut first_mismatch = None;
    let mut max_abs_diff = 0.0f32;
    let mut max_rel_diff = 0.0f32;

    for (index, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        if a.is_finite() && e.is_finite() {
            let diff = (a - e).abs();
            max_abs_diff = max_abs_diff.max(diff);
            let rel = if e != 0.0 {
                diff / e.abs()
            } else if diff == 0.0 {
                0.0
            } else {
                f32::INFINITY
            };
            max_rel_diff = max_rel_diff.max(rel);
        }
        if !tol.accepts(a, e) {
            mismatches += 1;
            first_mismatch.get_or_insert(Mismatch {
                index,
                actual: a,
                expected: e,
            });
        }
    }

    Ok(ComparisonResult {
        passed: mismatches == 0,
        total: actual.len(),
        mismatches,
        max_abs_diff,
        max_rel_diff,
        first_mismatch,
    })
}

/// Compare two host buffers; shapes must match exactly.
pub fn compare_buffers(
    actual: &HostBuffer,
    expected: &HostBuffer,
    tol: &Tolerance,
) -> Result<ComparisonResult> {
    if actual.shape != expected.shape {
        return Err(OpError::ShapeMismatch {
            expected: expected.shape.0.clone(),
            got: actual.shape.0.clone(),
        });
    }
    compare_with(&actual.data, &expected.data, tol)
}

/// Assert two f32 slices are element-wise close.
pub fn assert_allclose(a: &[f32], b: &[f32], atol: f32, rtol: f32) {
    assert_eq!(
        a.len(),
        b.len(),
        "length mismatch: actual={} expected={}",
        a.len(),
        b.len()
    );
    let tol = Tolerance::new(rtol, atol);
    let result = compare_with(a, b, &tol).expect("lengths already checked");
    if let Some(m) = result.first_mismatch {
        panic!(
            "mismatch at [{}]: actual={} expected={} \
             ({} of {} elements outside atol={atol} rtol={rtol})",
            m.index, m.actual, m.expected, result.mismatches, result.total
        );
    }
}
