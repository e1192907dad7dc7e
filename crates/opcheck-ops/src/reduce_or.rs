use opcheck_core::{Result, Tensor};
use tracing::debug;

use crate::dtype::DTypeSet;
use crate::validate::{check_shape, normalize_axes, validate_dtype_allowed};

/// Logical-or reduction of a `Bool` tensor.
///
/// `axis = None` reduces every axis. Negative axes count from the end and
/// repeating an axis is an error. Reducing all axes without `keepdims` yields
/// shape `[1]` rather than a rank-0 tensor.
pub fn reduce_or(x: &Tensor, axis: Option<&[i32]>, keepdims: bool) -> Result<Tensor> {
    check_shape(x.shape())?;
    validate_dtype_allowed(x.meta(), DTypeSet::BOOL)?;
    let axes = normalize_axes(axis, x.shape().ndim())?;

    let out = x.any(&axes, keepdims)?;
    debug!(axes = ?axes, keepdims, out_shape = %out.shape(), "built reduce_or");
    Ok(out)
}
