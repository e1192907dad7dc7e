use opcheck_core::{Result, Tensor};
use tracing::debug;

use crate::dtype::DTypeSet;
use crate::validate::{
    check_shape, validate_broadcastable, validate_dtype_allowed, validate_dtypes_equal,
    validate_same_stream,
};

/// Element-wise minimum with NumPy broadcasting. NaN propagates.
pub fn minimum(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    check_shape(lhs.shape())?;
    check_shape(rhs.shape())?;
    validate_dtype_allowed(lhs.meta(), DTypeSet::ALL_FLOAT)?;
    validate_dtype_allowed(rhs.meta(), DTypeSet::ALL_FLOAT)?;
    validate_dtypes_equal(lhs.meta(), rhs.meta())?;
    validate_same_stream(lhs, rhs)?;
    let shape = validate_broadcastable(lhs.meta(), rhs.meta())?;

    let out = lhs.minimum(rhs)?;
    debug!(shape = %shape, "built minimum");
    Ok(out)
}
