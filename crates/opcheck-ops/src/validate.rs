//! Shape and dtype contracts checked before any graph node is recorded.
//!
//! All checks except [`validate_same_stream`] are pure functions over
//! [`TensorMeta`] so the same contracts can be applied ahead of time by a
//! kernel builder that never touches a stream.

use std::sync::Arc;

use opcheck_core::{DType, OpError, Result, Shape, Tensor, TensorMeta};

use crate::dtype::DTypeSet;

/// Rank must be at least 1 and every dimension strictly positive.
pub fn check_shape(shape: &Shape) -> Result<()> {
    if shape.ndim() == 0 {
        return Err(OpError::InvalidShape {
            shape: shape.0.clone(),
            reason: "rank-0 tensors are not supported".into(),
        });
    }
    if !shape.has_positive_dims() {
        return Err(OpError::InvalidShape {
            shape: shape.0.clone(),
            reason: "every dimension must be positive".into(),
        });
    }
    Ok(())
}

/// Fails with `ShapeMismatch` unless both shapes are identical.
pub fn validate_shapes_equal(a: &TensorMeta, b: &TensorMeta) -> Result<Shape> {
    if a.shape != b.shape {
        return Err(OpError::ShapeMismatch {
            expected: a.shape.0.clone(),
            got: b.shape.0.clone(),
        });
    }
    Ok(a.shape.clone())
}

/// Fails with `ShapeMismatch` unless the shapes broadcast together.
pub fn validate_broadcastable(a: &TensorMeta, b: &TensorMeta) -> Result<Shape> {
    Shape::broadcast_shapes(&a.shape, &b.shape).ok_or_else(|| OpError::ShapeMismatch {
        expected: a.shape.0.clone(),
        got: b.shape.0.clone(),
    })
}

pub fn validate_dtype_allowed(t: &TensorMeta, allowed: DTypeSet) -> Result<()> {
    if !allowed.contains(t.dtype) {
        return Err(OpError::UnsupportedDtype {
            dtype: t.dtype,
            allowed: allowed.to_string(),
        });
    }
    Ok(())
}

pub fn validate_dtypes_equal(a: &TensorMeta, b: &TensorMeta) -> Result<DType> {
    if a.dtype != b.dtype {
        return Err(OpError::DtypeMismatch {
            lhs: a.dtype,
            rhs: b.dtype,
        });
    }
    Ok(a.dtype)
}

/// Both operands must record into the same stream.
pub fn validate_same_stream(a: &Tensor, b: &Tensor) -> Result<()> {
    if !Arc::ptr_eq(a.stream(), b.stream()) {
        return Err(OpError::InvalidArgument("operands belong to different streams".into()));
    }
    Ok(())
}

/// Resolve a possibly negative axis against `ndim`.
pub fn normalize_axis(axis: i32, ndim: usize) -> Result<usize> {
    let ndim_i = ndim as i64;
    let resolved = if axis < 0 {
        ndim_i + i64::from(axis)
    } else {
        i64::from(axis)
    };
    if resolved < 0 || resolved >= ndim_i {
        return Err(OpError::UnsupportedAxis {
            axis: i64::from(axis),
            ndim,
        });
    }
    Ok(resolved as usize)
}

/// Resolve a list of axes; `None` means every axis. Duplicates are rejected.
pub fn normalize_axes(axes: Option<&[i32]>, ndim: usize) -> Result<Vec<usize>> {
    let Some(axes) = axes else {
        return Ok((0..ndim).collect());
    };
    let mut out = Vec::with_capacity(axes.len());
    for &axis in axes {
        let resolved = normalize_axis(axis, ndim)?;
        if out.contains(&resolved) {
            return Err(OpError::UnsupportedAxis {
                axis: i64::from(axis),
                ndim,
            });
        }
        out.push(resolved);
    }
    out.sort_unstable();
    Ok(out)
}
