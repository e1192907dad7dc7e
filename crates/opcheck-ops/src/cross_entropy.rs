//! Per-row cross-entropy loss over probability distributions.

use opcheck_core::{OpError, Result, Tensor};
use tracing::debug;

use crate::dtype::DTypeSet;
use crate::validate::{
    check_shape, normalize_axis, validate_dtype_allowed, validate_dtypes_equal,
    validate_same_stream, validate_shapes_equal,
};

pub const DEFAULT_AXIS: i32 = -1;

/// `loss[r] = -sum_j labels[r, j] * ln(logits[r, j])`.
///
/// Both inputs must be rank-2 with identical shape and float dtype, and only
/// the last axis may be reduced. `logits` are used as probabilities directly:
/// no softmax is applied, so callers must normalize rows themselves.
/// Non-positive logits produce non-finite losses.
pub fn cross_entropy_loss(labels: &Tensor, logits: &Tensor, axis: i32) -> Result<Tensor> {
    for t in [labels, logits] {
        check_shape(t.shape())?;
        if t.shape().ndim() != 2 {
            return Err(OpError::InvalidShape {
                shape: t.shape().0.clone(),
                reason: format!("expected rank 2, got rank {}", t.shape().ndim()),
            });
        }
    }
    validate_shapes_equal(labels.meta(), logits.meta())?;
    validate_dtype_allowed(labels.meta(), DTypeSet::ALL_FLOAT)?;
    validate_dtype_allowed(logits.meta(), DTypeSet::ALL_FLOAT)?;
    validate_dtypes_equal(labels.meta(), logits.meta())?;
    validate_same_stream(labels, logits)?;

    let ndim = logits.shape().ndim();
    let axis_n = normalize_axis(axis, ndim)?;
    if axis_n != ndim - 1 {
        return Err(OpError::UnsupportedAxis {
            axis: i64::from(axis),
            ndim,
        });
    }

    let log_likelihood = labels.mul(&logits.log())?;
    let loss = log_likelihood.sum(&[axis_n], false)?.scale(-1.0);

    debug!(
        nodes = logits.stream().graph_node_count(),
        rows = loss.numel(),
        "built cross_entropy_loss"
    );
    Ok(loss)
}
