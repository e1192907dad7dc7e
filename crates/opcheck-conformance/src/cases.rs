//! Built-in operator cases run by `opcheck smoke`.

use opcheck_core::{DType, Shape, TensorMeta};
use opcheck_ops::Target;
use opcheck_ops::approximate_equal::DEFAULT_TOLERANCE;
use opcheck_ops::cross_entropy::DEFAULT_AXIS;

use crate::kernel::{BuildOptions, OperatorKind, OperatorSpec};

fn meta(dims: &[i64], dtype: DType) -> TensorMeta {
    TensorMeta::new(Shape::new(dims.to_vec()), dtype)
}

fn pair(dims: &[i64], dtype: DType) -> Vec<TensorMeta> {
    vec![meta(dims, dtype), meta(dims, dtype)]
}

/// One representative case per operator and dtype, all on `target`.
pub fn builtin_suite(target: Target) -> Vec<OperatorSpec> {
    let mut specs = Vec::new();
    for dtype in [DType::F32, DType::F16] {
        specs.push(OperatorSpec::new(
            OperatorKind::ApproximateEqual {
                tolerance: DEFAULT_TOLERANCE,
            },
            pair(&[2, 3], dtype),
        ));
        specs.push(OperatorSpec::new(
            OperatorKind::ApproximateEqual { tolerance: 1e-3 },
            pair(&[16, 16], dtype),
        ));
        specs.push(OperatorSpec::new(
            OperatorKind::CrossEntropyLoss { axis: DEFAULT_AXIS },
            pair(&[8, 10], dtype),
        ));
        specs.push(OperatorSpec::new(OperatorKind::Minimum, pair(&[2, 3], dtype)));
    }
    specs.push(OperatorSpec::new(
        OperatorKind::Minimum,
        vec![meta(&[4, 1], DType::F32), meta(&[3], DType::F32)],
    ));
    specs.push(OperatorSpec::new(
        OperatorKind::ReduceOr {
            axis: None,
            keepdims: false,
        },
        vec![meta(&[4, 4], DType::Bool)],
    ));
    specs.push(
        OperatorSpec::new(
            OperatorKind::ReduceOr {
                axis: Some(vec![-1]),
                keepdims: true,
            },
            vec![meta(&[3, 5], DType::Bool)],
        )
        .with_options(BuildOptions { poly_sch: true }),
    );

    specs.into_iter().map(|s| s.with_target(target)).collect()
}
