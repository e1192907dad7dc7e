//! Property tests for the operator builders and their validation contracts.

use opcheck_core::{DType, OpError, Shape, Tensor, cpu_stream};
use opcheck_ops::validate::{check_shape, normalize_axis};
use opcheck_ops::{Target, approximate_equal, cross_entropy_loss, reduce_or};
use proptest::prelude::*;

// ── Strategies ───────────────────────────────────────────────────────────

fn dim() -> impl Strategy<Value = i64> {
    1i64..=6
}

fn arb_shape() -> impl Strategy<Value = Shape> {
    prop::collection::vec(dim(), 1..=3).prop_map(Shape::new)
}

/// A shape plus two f32 buffers of matching length whose values sit close
/// together, so both sides of the tolerance get exercised.
fn close_pair() -> impl Strategy<Value = (Shape, Vec<f32>, Vec<f32>)> {
    arb_shape().prop_flat_map(|shape| {
        let n = shape.numel() as usize;
        (
            Just(shape),
            prop::collection::vec(-10.0f32..10.0, n),
            prop::collection::vec(-1e-2f32..1e-2, n),
        )
            .prop_map(|(shape, x, noise)| {
                let y = x.iter().zip(&noise).map(|(a, d)| a + d).collect();
                (shape, x, y)
            })
    })
}

/// One-hot labels and strictly positive logits for a `[rows, cols]` batch.
fn one_hot_batch() -> impl Strategy<Value = (i64, i64, Vec<usize>, Vec<f32>)> {
    (1i64..=5, 2i64..=6).prop_flat_map(|(rows, cols)| {
        let n = (rows * cols) as usize;
        (
            Just(rows),
            Just(cols),
            prop::collection::vec(0..cols as usize, rows as usize),
            prop::collection::vec(0.05f32..1.0, n),
        )
    })
}

// ── approximate_equal ────────────────────────────────────────────────────

proptest! {
    /// On a full-precision target the output is exactly |x - y| <= tol.
    #[test]
    fn approximate_equal_matches_definition(
        (shape, x, y) in close_pair(),
        tol in 0.0f32..1e-2,
    ) {
        let stream = cpu_stream();
        let a = Tensor::parameter(&stream, 0, &shape, DType::F32);
        let b = Tensor::parameter(&stream, 1, &shape, DType::F32);
        let out = approximate_equal(&a, &b, tol, Target::Cuda).unwrap();
        prop_assert_eq!(out.shape(), &shape);
        prop_assert_eq!(out.dtype(), DType::Bool);

        let got = out.run(&[&x, &y]).unwrap();
        for i in 0..x.len() {
            let expected = if (x[i] - y[i]).abs() <= tol { 1.0 } else { 0.0 };
            prop_assert_eq!(got[i], expected, "index {}", i);
        }
    }

    /// Identical inputs are always equal, whatever the target.
    #[test]
    fn approximate_equal_reflexive(
        (shape, x, _y) in close_pair(),
        target in prop_oneof![Just(Target::Cloud), Just(Target::Mini), Just(Target::Cuda)],
    ) {
        let stream = cpu_stream();
        let a = Tensor::parameter(&stream, 0, &shape, DType::F32);
        let b = Tensor::parameter(&stream, 1, &shape, DType::F32);
        let out = approximate_equal(&a, &b, 0.0, target).unwrap();
        let got = out.run(&[&x, &x]).unwrap();
        prop_assert!(got.iter().all(|&v| v == 1.0));
    }

    /// Any negative tolerance is rejected before the graph grows.
    #[test]
    fn negative_tolerance_rejected(shape in arb_shape(), tol in -1e3f32..-1e-9) {
        let stream = cpu_stream();
        let a = Tensor::parameter(&stream, 0, &shape, DType::F32);
        let b = Tensor::parameter(&stream, 1, &shape, DType::F32);
        let before = stream.graph_node_count();
        let is_invalid_parameter = matches!(
            approximate_equal(&a, &b, tol, Target::Cuda),
            Err(OpError::InvalidParameter(_))
        );
        prop_assert!(is_invalid_parameter);
        prop_assert_eq!(stream.graph_node_count(), before);
    }

    /// Differing shapes always fail with ShapeMismatch.
    #[test]
    fn mismatched_shapes_rejected(a in arb_shape(), b in arb_shape()) {
        prop_assume!(a != b);
        let stream = cpu_stream();
        let x = Tensor::parameter(&stream, 0, &a, DType::F32);
        let y = Tensor::parameter(&stream, 1, &b, DType::F32);
        let is_shape_mismatch = matches!(
            approximate_equal(&x, &y, 1e-5, Target::Cuda),
            Err(OpError::ShapeMismatch { .. })
        );
        prop_assert!(is_shape_mismatch);
    }
}

// ── cross_entropy_loss ───────────────────────────────────────────────────

proptest! {
    /// With one-hot labels the loss of a row is -ln of the hot logit.
    #[test]
    fn one_hot_loss_picks_hot_logit((rows, cols, hot, logits) in one_hot_batch()) {
        let mut labels = vec![0.0f32; (rows * cols) as usize];
        for (r, &c) in hot.iter().enumerate() {
            labels[r * cols as usize + c] = 1.0;
        }
        let shape = Shape::new(vec![rows, cols]);
        let stream = cpu_stream();
        let l = Tensor::parameter(&stream, 0, &shape, DType::F32);
        let p = Tensor::parameter(&stream, 1, &shape, DType::F32);
        let loss = cross_entropy_loss(&l, &p, -1).unwrap();
        prop_assert_eq!(loss.shape(), &Shape::new(vec![rows]));

        let got = loss.run(&[&labels, &logits]).unwrap();
        for (r, &c) in hot.iter().enumerate() {
            let expected = -logits[r * cols as usize + c].ln();
            prop_assert!((got[r] - expected).abs() <= 1e-5 + 1e-5 * expected.abs(),
                "row {}: {} vs {}", r, got[r], expected);
        }
    }
}

// ── Validation helpers ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn normalized_axis_in_range(ndim in 1usize..=5, axis in -8i32..8) {
        match normalize_axis(axis, ndim) {
            Ok(a) => {
                prop_assert!(a < ndim);
                prop_assert!(axis >= -(ndim as i32) && axis < ndim as i32);
            }
            Err(e) => {
                let is_unsupported_axis = matches!(e, OpError::UnsupportedAxis { .. });
                prop_assert!(is_unsupported_axis);
                prop_assert!(axis < -(ndim as i32) || axis >= ndim as i32);
            }
        }
    }

    #[test]
    fn positive_shapes_are_well_formed(shape in arb_shape()) {
        prop_assert!(check_shape(&shape).is_ok());
    }

    #[test]
    fn zero_dim_is_rejected(mut dims in prop::collection::vec(dim(), 1..=4), at in 0usize..4) {
        let at = at % dims.len();
        dims[at] = 0;
        prop_assert!(check_shape(&Shape::new(dims)).is_err());
    }
}

// ── Concrete scenarios ───────────────────────────────────────────────────

#[test]
fn tolerance_decides_between_close_tensors() {
    let shape = Shape::new(vec![2, 3]);
    let x = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let y: Vec<f32> = x.iter().map(|v| v + 1e-4).collect();

    let stream = cpu_stream();
    let a = Tensor::parameter(&stream, 0, &shape, DType::F32);
    let b = Tensor::parameter(&stream, 1, &shape, DType::F32);
    let loose = approximate_equal(&a, &b, 1e-3, Target::Cuda).unwrap();
    let strict = approximate_equal(&a, &b, 1e-5, Target::Cuda).unwrap();

    assert_eq!(loose.run(&[&x, &y]).unwrap(), vec![1.0; 6]);
    assert_eq!(strict.run(&[&x, &y]).unwrap(), vec![0.0; 6]);
}

#[test]
fn single_far_entry_is_the_only_false() {
    let shape = Shape::new(vec![2, 3]);
    let x = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let mut y = x;
    y[4] += 1e-3;

    for target in [Target::Cuda, Target::Cloud, Target::Mini] {
        let stream = cpu_stream();
        let a = Tensor::parameter(&stream, 0, &shape, DType::F32);
        let b = Tensor::parameter(&stream, 1, &shape, DType::F32);
        let out = approximate_equal(&a, &b, 1e-5, target).unwrap();
        assert_eq!(
            out.run(&[&x, &y]).unwrap(),
            vec![1.0, 1.0, 1.0, 1.0, 0.0, 1.0],
            "{target}"
        );
    }
}

#[test]
fn cross_entropy_two_by_two() {
    let stream = cpu_stream();
    let shape = Shape::new(vec![2, 2]);
    let labels = Tensor::from_data(&stream, &[1.0, 0.0, 0.0, 1.0], &shape, DType::F32).unwrap();
    let logits = Tensor::from_data(&stream, &[0.9, 0.1, 0.2, 0.8], &shape, DType::F32).unwrap();
    let loss = cross_entropy_loss(&labels, &logits, -1).unwrap().run(&[]).unwrap();
    assert!((loss[0] - 0.10536).abs() < 1e-5);
    assert!((loss[1] - 0.22314).abs() < 1e-5);
}

/// The loss takes logits as probabilities. Raw scores are not normalized, so
/// a logit above 1 yields a negative loss where a softmax cross-entropy
/// would stay positive.
#[test]
fn logits_are_not_softmax_normalized() {
    let stream = cpu_stream();
    let shape = Shape::new(vec![1, 2]);
    let labels = Tensor::from_data(&stream, &[1.0, 0.0], &shape, DType::F32).unwrap();
    let logits = Tensor::from_data(&stream, &[2.0, 1.0], &shape, DType::F32).unwrap();
    let loss = cross_entropy_loss(&labels, &logits, -1).unwrap().run(&[]).unwrap();

    assert!((loss[0] + 2.0f32.ln()).abs() < 1e-6);
    let softmax_loss = -(2.0f32.exp() / (2.0f32.exp() + 1.0f32.exp())).ln();
    assert!(softmax_loss > 0.0);
    assert!((loss[0] - softmax_loss).abs() > 0.1);
}

#[test]
fn reduce_or_all_axes_is_rank_one() {
    let stream = cpu_stream();
    let x = Tensor::parameter(&stream, 0, &Shape::new(vec![4, 4]), DType::Bool);
    let out = reduce_or(&x, None, false).unwrap();
    assert_eq!(out.shape(), &Shape::new(vec![1]));
}
