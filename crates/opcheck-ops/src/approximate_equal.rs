//! Element-wise "equal within an absolute tolerance".

use opcheck_core::{CmpOp, DType, OpError, Result, Tensor};
use tracing::debug;

use crate::dtype::DTypeSet;
use crate::fallback::{Target, narrow_for_select};
use crate::validate::{
    check_shape, validate_dtype_allowed, validate_dtypes_equal, validate_same_stream,
    validate_shapes_equal,
};

pub const DEFAULT_TOLERANCE: f32 = 1e-5;

fn check_tolerance(tolerance: f32) -> Result<()> {
    if tolerance.is_nan() || tolerance < 0.0 {
        return Err(OpError::InvalidParameter(format!(
            "tolerance must be a non-negative number, got {tolerance}"
        )));
    }
    Ok(())
}

/// `out[i] = |x[i] - y[i]| <= tolerance`, as a `Bool` tensor.
///
/// `x` and `y` must share shape and a float dtype. On targets without native
/// f32 compare/select the absolute difference and the tolerance are rounded
/// to f16 before comparing, so results near the threshold follow f16
/// precision. A NaN on either side always yields `false`.
pub fn approximate_equal(
    x: &Tensor,
    y: &Tensor,
    tolerance: f32,
    target: Target,
) -> Result<Tensor> {
    check_tolerance(tolerance)?;
    check_shape(x.shape())?;
    check_shape(y.shape())?;
    validate_shapes_equal(x.meta(), y.meta())?;
    validate_dtype_allowed(x.meta(), DTypeSet::ALL_FLOAT)?;
    validate_dtype_allowed(y.meta(), DTypeSet::ALL_FLOAT)?;
    validate_dtypes_equal(x.meta(), y.meta())?;
    validate_same_stream(x, y)?;

    let abs_diff = x.sub(y)?.abs();
    let value = narrow_for_select(&abs_diff, target.capabilities());
    let work = value.dtype();
    let shape = value.shape().clone();

    let on_true = Tensor::full(x.stream(), &shape, work, 1.0);
    let on_false = Tensor::full(x.stream(), &shape, work, 0.0);
    let res = value.select(CmpOp::Le, work.quantize(tolerance), &on_true, &on_false)?;
    let out = res.cast(DType::F16).cast(DType::Bool);

    debug!(
        target = %target,
        work_dtype = %work,
        nodes = x.stream().graph_node_count(),
        "built approximate_equal"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcheck_core::{Shape, cpu_stream};

    fn s(dims: &[i64]) -> Shape {
        Shape::new(dims.to_vec())
    }

    #[test]
    fn test_basic_float32() {
        let stream = cpu_stream();
        let x = Tensor::parameter(&stream, 0, &s(&[4]), DType::F32);
        let y = Tensor::parameter(&stream, 1, &s(&[4]), DType::F32);
        let out = approximate_equal(&x, &y, 0.5, Target::Cuda).unwrap();
        assert_eq!(out.dtype(), DType::Bool);
        assert_eq!(out.shape(), &s(&[4]));

        let got = out
            .run(&[&[1.0, 2.0, 3.0, f32::NAN], &[1.4, 2.6, 3.0, 1.0]])
            .unwrap();
        assert_eq!(got, vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let stream = cpu_stream();
        let x = Tensor::from_data(&stream, &[1.0, 1.0], &s(&[2]), DType::F32).unwrap();
        let y = Tensor::from_data(&stream, &[1.5, 1.25], &s(&[2]), DType::F32).unwrap();
        let out = approximate_equal(&x, &y, 0.5, Target::Cloud).unwrap();
        assert_eq!(out.run(&[]).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_zero_tolerance_is_exact_equality() {
        let stream = cpu_stream();
        let x = Tensor::from_data(&stream, &[1.0, 2.0], &s(&[2]), DType::F32).unwrap();
        let y = Tensor::from_data(&stream, &[1.0, 2.0001], &s(&[2]), DType::F32).unwrap();
        let out = approximate_equal(&x, &y, 0.0, Target::Cuda).unwrap();
        assert_eq!(out.run(&[]).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_rejects_negative_and_nan_tolerance() {
        let stream = cpu_stream();
        let x = Tensor::parameter(&stream, 0, &s(&[2]), DType::F32);
        let y = Tensor::parameter(&stream, 1, &s(&[2]), DType::F32);
        let before = stream.graph_node_count();
        assert!(matches!(
            approximate_equal(&x, &y, -1e-5, Target::Cuda),
            Err(OpError::InvalidParameter(_))
        ));
        assert!(matches!(
            approximate_equal(&x, &y, f32::NAN, Target::Cuda),
            Err(OpError::InvalidParameter(_))
        ));
        assert_eq!(stream.graph_node_count(), before);
    }

    #[test]
    fn test_rejects_shape_and_dtype_mismatch() {
        let stream = cpu_stream();
        let x = Tensor::parameter(&stream, 0, &s(&[2, 3]), DType::F32);
        let y = Tensor::parameter(&stream, 1, &s(&[3, 2]), DType::F32);
        assert!(matches!(
            approximate_equal(&x, &y, 1e-5, Target::Cuda),
            Err(OpError::ShapeMismatch { .. })
        ));

        let h = Tensor::parameter(&stream, 2, &s(&[2, 3]), DType::F16);
        assert!(matches!(
            approximate_equal(&x, &h, 1e-5, Target::Cuda),
            Err(OpError::DtypeMismatch { .. })
        ));

        let i = Tensor::parameter(&stream, 3, &s(&[2, 3]), DType::I32);
        assert!(matches!(
            approximate_equal(&i, &i, 1e-5, Target::Cuda),
            Err(OpError::UnsupportedDtype { dtype: DType::I32, .. })
        ));
    }

    #[test]
    fn test_mini_target_narrows_to_f16() {
        let stream = cpu_stream();
        let x = Tensor::parameter(&stream, 0, &s(&[2]), DType::F32);
        let y = Tensor::parameter(&stream, 1, &s(&[2]), DType::F32);
        let out = approximate_equal(&x, &y, 1e-3, Target::Mini).unwrap();

        // |diff| = 1.0004e-3 is above 1e-3 in f32 but rounds onto the same
        // f16 value as the tolerance.
        let got = out.run(&[&[0.0, 0.0], &[1.0004e-3, 0.5]]).unwrap();
        assert_eq!(got, vec![1.0, 0.0]);

        let stream = cpu_stream();
        let x = Tensor::parameter(&stream, 0, &s(&[2]), DType::F32);
        let y = Tensor::parameter(&stream, 1, &s(&[2]), DType::F32);
        let out = approximate_equal(&x, &y, 1e-3, Target::Cuda).unwrap();
        let got = out.run(&[&[0.0, 0.0], &[1.0004e-3, 0.5]]).unwrap();
        assert_eq!(got, vec![0.0, 0.0]);
    }

    #[test]
    fn test_f16_inputs_skip_the_narrowing_cast() {
        let stream = cpu_stream();
        let x = Tensor::parameter(&stream, 0, &s(&[3]), DType::F16);
        let y = Tensor::parameter(&stream, 1, &s(&[3]), DType::F16);
        let out = approximate_equal(&x, &y, 0.1, Target::Mini).unwrap();
        let got = out.run(&[&[1.0, 2.0, 3.0], &[1.05, 2.5, 3.0]]).unwrap();
        assert_eq!(got, vec![1.0, 0.0, 1.0]);
    }
}
