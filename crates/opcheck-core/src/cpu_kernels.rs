//! Built-in CPU reference backend, the correctness oracle.
//!
//! This is an intentionally simple, safe Rust implementation of every primitive
//! op. It prioritizes correctness and readability over performance.

use crate::backend::{Backend, NodeInput};
use crate::graph::{CmpOp, OpKind, TensorMeta};
use crate::types::Shape;
use crate::{OpError, Result};

/// Reference CPU backend.
pub struct CpuRefBackend;

impl Backend for CpuRefBackend {
    fn name(&self) -> &'static str {
        "cpu-ref"
    }

    fn eval_node(
        &self,
        op: &OpKind,
        inputs: &[NodeInput<'_>],
        output_meta: &TensorMeta,
    ) -> Result<Vec<f32>> {
        match op {
            OpKind::Constant | OpKind::Parameter { .. } => Err(OpError::InvalidArgument(
                "Constant/Parameter nodes are bound by the stream".into(),
            )),
            OpKind::Sub => binary_elementwise(inputs, output_meta, |a, b| a - b),
            OpKind::Mul => binary_elementwise(inputs, output_meta, |a, b| a * b),
            OpKind::Minimum => binary_elementwise(inputs, output_meta, nan_minimum),
            OpKind::Abs => unary_elementwise(inputs, f32::abs),
            OpKind::Log => unary_elementwise(inputs, f32::ln),
            OpKind::Scale { factor } => {
                let a = require_input(inputs, 0)?;
                Ok(a.data.iter().map(|&x| x * factor).collect())
            }
            OpKind::Cast { to } => {
                let a = require_input(inputs, 0)?;
                Ok(a.data.iter().map(|&x| to.quantize(x)).collect())
            }
            OpKind::Select { cmp, threshold } => select(inputs, *cmp, *threshold),
            OpKind::Sum { axes, keepdims } => {
                reduce_axes(inputs, axes, *keepdims, output_meta, 0.0, |acc, x| acc + x)
            }
            OpKind::Any { axes, keepdims } => {
                reduce_axes(inputs, axes, *keepdims, output_meta, 0.0, |acc, x| {
                    if acc != 0.0 || x != 0.0 { 1.0 } else { 0.0 }
                })
            }
        }
    }
}

/// NumPy `minimum`: NaN in either operand propagates.
fn nan_minimum(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else {
        a.min(b)
    }
}

fn require_input<'a>(inputs: &'a [NodeInput<'_>], idx: usize) -> Result<&'a NodeInput<'a>> {
    inputs
        .get(idx)
        .ok_or_else(|| OpError::InvalidArgument(format!("expected input at index {idx}")))
}

fn unary_elementwise(inputs: &[NodeInput<'_>], f: fn(f32) -> f32) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    Ok(a.data.iter().map(|&x| f(x)).collect())
}

fn binary_elementwise(
    inputs: &[NodeInput<'_>],
    out: &TensorMeta,
    f: fn(f32, f32) -> f32,
) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let b = require_input(inputs, 1)?;
    if a.shape == b.shape && *a.shape == out.shape {
        return Ok(a
            .data
            .iter()
            .zip(b.data.iter())
            .map(|(&x, &y)| f(x, y))
            .collect());
    }
    let lhs = broadcast(a, &out.shape)?;
    let rhs = broadcast(b, &out.shape)?;
    Ok(lhs.iter().zip(rhs.iter()).map(|(&x, &y)| f(x, y)).collect())
}

/// Materialize `a` at `target_shape` under NumPy broadcasting rules.
fn broadcast(a: &NodeInput<'_>, target_shape: &Shape) -> Result<Vec<f32>> {
    let in_shape = &a.shape.0;
    let out_shape = &target_shape.0;
    if Shape::broadcast_shapes(a.shape, target_shape).as_ref() != Some(target_shape) {
        return Err(OpError::ShapeMismatch {
            expected: out_shape.clone(),
            got: in_shape.clone(),
        });
    }
    let out_ndim = out_shape.len();
    let pad = out_ndim - in_shape.len();
    let total: usize = out_shape.iter().product::<i64>() as usize;

    let mut result = vec![0.0f32; total];
    for (out_flat, out) in result.iter_mut().enumerate() {
        let mut remaining = out_flat;
        let mut in_flat = 0usize;
        let mut in_stride = 1usize;

        for d in (0..out_ndim).rev() {
            let out_dim = out_shape[d] as usize;
            let coord = remaining % out_dim;
            remaining /= out_dim;

            if d >= pad {
                let in_dim = in_shape[d - pad] as usize;
                let in_coord = if in_dim == 1 { 0 } else { coord };
                in_flat += in_coord * in_stride;
                in_stride *= in_dim;
            }
        }
        *out = a.data[in_flat];
    }
    Ok(result)
}

fn select(inputs: &[NodeInput<'_>], cmp: CmpOp, threshold: f32) -> Result<Vec<f32>> {
    let value = require_input(inputs, 0)?;
    let on_true = require_input(inputs, 1)?;
    let on_false = require_input(inputs, 2)?;
    for branch in [on_true, on_false] {
        if branch.data.len() != value.data.len() {
            return Err(OpError::ShapeMismatch {
                expected: value.shape.0.clone(),
                got: branch.shape.0.clone(),
            });
        }
    }
    Ok(value
        .data
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if cmp.apply(v, threshold) {
                on_true.data[i]
            } else {
                on_false.data[i]
            }
        })
        .collect())
}

/// Fold every element into the output slot it reduces to.
fn reduce_axes(
    inputs: &[NodeInput<'_>],
    axes: &[usize],
    keepdims: bool,
    out: &TensorMeta,
    init: f32,
    fold: impl Fn(f32, f32) -> f32,
) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let ndim = a.shape.ndim();
    if let Some(&bad) = axes.iter().find(|&&ax| ax >= ndim) {
        return Err(OpError::UnsupportedAxis {
            axis: bad as i64,
            ndim,
        });
    }
    let reduced = a.shape.reduced(axes, keepdims);
    if reduced != out.shape {
        return Err(OpError::ShapeMismatch {
            expected: out.shape.0.clone(),
            got: reduced.0,
        });
    }

    // Strides of the kept axes in the (keepdims) output layout.
    let kept = a.shape.reduced(axes, true);
    let kept_strides = kept.strides();
    let in_strides = a.shape.strides();

    let mut result = vec![init; out.shape.numel() as usize];
    for (flat, &x) in a.data.iter().enumerate() {
        let mut out_flat = 0usize;
        for d in 0..ndim {
            if axes.contains(&d) {
                continue;
            }
            let coord = (flat / in_strides[d]) % a.shape.0[d] as usize;
            out_flat += coord * kept_strides[d];
        }
        result[out_flat] = fold(result[out_flat], x);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;

    fn meta(shape: Vec<i64>, dtype: DType) -> TensorMeta {
        TensorMeta {
            shape: Shape::new(shape),
            dtype,
        }
    }

    fn input(data: &[f32], shape: Vec<i64>) -> NodeInput<'_> {
        // Leak the shape to get a reference that outlives the call.
        NodeInput {
            data,
            shape: Box::leak(Box::new(Shape::new(shape))),
            dtype: DType::F32,
        }
    }

    #[test]
    fn test_sub() {
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Sub,
                &[input(&[4.0, 5.0, 6.0], vec![3]), input(&[1.0, 1.0, 1.0], vec![3])],
                &meta(vec![3], DType::F32),
            )
            .unwrap();
        assert_eq!(result, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_minimum_broadcasts_row() {
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Minimum,
                &[
                    input(&[1.0, 5.0, 3.0, 0.0, 9.0, 2.0], vec![2, 3]),
                    input(&[2.0, 2.0, 2.0], vec![3]),
                ],
                &meta(vec![2, 3], DType::F32),
            )
            .unwrap();
        assert_eq!(result, vec![1.0, 2.0, 2.0, 0.0, 2.0, 2.0]);
    }

    #[test]
    fn test_minimum_propagates_nan() {
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Minimum,
                &[input(&[f32::NAN, 1.0], vec![2]), input(&[0.0, f32::NAN], vec![2])],
                &meta(vec![2], DType::F32),
            )
            .unwrap();
        assert!(result.iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_broadcast_incompatible() {
        let err = CpuRefBackend
            .eval_node(
                &OpKind::Mul,
                &[input(&[1.0, 2.0], vec![2]), input(&[1.0, 2.0, 3.0], vec![3])],
                &meta(vec![3], DType::F32),
            )
            .unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_abs_log_scale() {
        let abs = CpuRefBackend
            .eval_node(&OpKind::Abs, &[input(&[-1.5, 2.0], vec![2])], &meta(vec![2], DType::F32))
            .unwrap();
        assert_eq!(abs, vec![1.5, 2.0]);

        let log = CpuRefBackend
            .eval_node(
                &OpKind::Log,
                &[input(&[1.0, std::f32::consts::E], vec![2])],
                &meta(vec![2], DType::F32),
            )
            .unwrap();
        assert!((log[0]).abs() < 1e-7);
        assert!((log[1] - 1.0).abs() < 1e-6);

        let scaled = CpuRefBackend
            .eval_node(
                &OpKind::Scale { factor: -1.0 },
                &[input(&[0.5, -2.0], vec![2])],
                &meta(vec![2], DType::F32),
            )
            .unwrap();
        assert_eq!(scaled, vec![-0.5, 2.0]);
    }

    #[test]
    fn test_cast_to_bool() {
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Cast { to: DType::Bool },
                &[input(&[0.0, 1.0, 0.5, -3.0], vec![4])],
                &meta(vec![4], DType::Bool),
            )
            .unwrap();
        assert_eq!(result, vec![0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_select_le() {
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Select {
                    cmp: CmpOp::Le,
                    threshold: 0.5,
                },
                &[
                    input(&[0.1, 0.5, 0.9], vec![3]),
                    input(&[1.0, 1.0, 1.0], vec![3]),
                    input(&[0.0, 0.0, 0.0], vec![3]),
                ],
                &meta(vec![3], DType::F32),
            )
            .unwrap();
        assert_eq!(result, vec![1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_select_nan_takes_false_branch() {
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Select {
                    cmp: CmpOp::Lt,
                    threshold: 1.0,
                },
                &[
                    input(&[f32::NAN, 0.0], vec![2]),
                    input(&[1.0, 1.0], vec![2]),
                    input(&[0.0, 0.0], vec![2]),
                ],
                &meta(vec![2], DType::F32),
            )
            .unwrap();
        assert_eq!(result, vec![0.0, 1.0]);
    }

    #[test]
    fn test_reduce_sum_last_axis() {
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Sum {
                    axes: vec![1],
                    keepdims: false,
                },
                &[input(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3])],
                &meta(vec![2], DType::F32),
            )
            .unwrap();
        assert_eq!(result, vec![6.0, 15.0]);
    }

    #[test]
    fn test_reduce_sum_first_axis_keepdims() {
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Sum {
                    axes: vec![0],
                    keepdims: true,
                },
                &[input(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3])],
                &meta(vec![1, 3], DType::F32),
            )
            .unwrap();
        assert_eq!(result, vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_reduce_any_all_axes_is_rank_one() {
        let data = [0.0, 0.0, 1.0, 0.0];
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Any {
                    axes: vec![0, 1],
                    keepdims: false,
                },
                &[input(&data, vec![2, 2])],
                &meta(vec![1], DType::Bool),
            )
            .unwrap();
        assert_eq!(result, vec![1.0]);
    }

    #[test]
    fn test_reduce_any_middle_axis() {
        // shape [2, 2, 2]; reduce axis 1.
        let data = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Any {
                    axes: vec![1],
                    keepdims: false,
                },
                &[input(&data, vec![2, 2, 2])],
                &meta(vec![2, 2], DType::Bool),
            )
            .unwrap();
        assert_eq!(result, vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_reduce_rejects_wrong_output_shape() {
        let err = CpuRefBackend
            .eval_node(
                &OpKind::Sum {
                    axes: vec![1],
                    keepdims: false,
                },
                &[input(&[1.0, 2.0, 3.0, 4.0], vec![2, 2])],
                &meta(vec![2, 1], DType::F32),
            )
            .unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { .. }));
    }
}
