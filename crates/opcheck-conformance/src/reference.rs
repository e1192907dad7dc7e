//! Seeded input generation and trusted host-side reference formulas.
//!
//! Every formula here is a direct loop over host buffers with no graph
//! involved, so it can serve as the oracle for the kernel under test.

use opcheck_core::{DType, OpError, Result, Shape, TensorMeta};
use opcheck_ops::validate::normalize_axes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};

use crate::buffer::HostBuffer;
use crate::kernel::{OperatorKind, OperatorSpec};

/// Inputs, a pre-filled output and the expected result for one launch.
#[derive(Clone, Debug)]
pub struct CaseData {
    pub inputs: Vec<HostBuffer>,
    /// Output buffer pre-filled with [`sentinel_output`].
    pub output: HostBuffer,
    pub expected: HostBuffer,
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

// ── Generators ──────────────────────────────────────────────────────────

/// Normally distributed values rounded onto `dtype`.
pub fn random_gaussian<R: Rng + ?Sized>(
    rng: &mut R,
    shape: &Shape,
    mean: f32,
    sigma: f32,
    dtype: DType,
) -> Result<HostBuffer> {
    if !(sigma >= 0.0 && sigma.is_finite()) {
        return Err(OpError::InvalidParameter(format!(
            "gaussian sigma must be finite and non-negative, got {sigma}"
        )));
    }
    let normal = Normal::new(mean, sigma).map_err(|e| {
        OpError::InvalidParameter(format!("gaussian(mean={mean}, sigma={sigma}): {e}"))
    })?;
    let n = shape.numel() as usize;
    let data = (0..n).map(|_| normal.sample(rng)).collect();
    HostBuffer::new(shape.clone(), dtype, data)
}

/// Uniform integers in `[low, high)`; for `Bool` use `0..2`.
pub fn random_int<R: Rng + ?Sized>(
    rng: &mut R,
    shape: &Shape,
    low: i32,
    high: i32,
    dtype: DType,
) -> Result<HostBuffer> {
    if low >= high {
        return Err(OpError::InvalidParameter(format!(
            "empty integer range [{low}, {high})"
        )));
    }
    let n = shape.numel() as usize;
    let data = (0..n).map(|_| rng.random_range(low..high) as f32).collect();
    HostBuffer::new(shape.clone(), dtype, data)
}

/// Output pre-fill that a correct kernel must overwrite.
///
/// Floats get NaN, which never compares equal to a finite reference value.
/// Integer and boolean outputs get zero, so a kernel that skips writing them
/// is only caught where the reference is non-zero.
pub fn sentinel_output(shape: &Shape, dtype: DType) -> HostBuffer {
    let fill = if dtype.is_float() { f32::NAN } else { 0.0 };
    HostBuffer::filled(shape.clone(), dtype, fill)
}

/// A partner for `x` where roughly half the elements sit well inside
/// `tolerance` and the rest well outside it.
fn near_pair<R: Rng + ?Sized>(
    rng: &mut R,
    x: &HostBuffer,
    dtype: DType,
    tolerance: f32,
) -> Result<HostBuffer> {
    let data = x
        .data
        .iter()
        .map(|&v| {
            let offset = if rng.random_bool(0.5) {
                tolerance * 0.25 * rng.random::<f32>()
            } else {
                tolerance * (4.0 + rng.random::<f32>()) + 0.05
            };
            if rng.random_bool(0.5) { v + offset } else { v - offset }
        })
        .collect();
    HostBuffer::new(x.shape.clone(), dtype, data)
}

/// One-hot rows plus strictly positive logits that sum to one per row.
fn one_hot_batch<R: Rng + ?Sized>(
    rng: &mut R,
    meta: &TensorMeta,
) -> Result<(HostBuffer, HostBuffer)> {
    let (rows, cols) = rank2(&meta.shape)?;
    let uniform = Uniform::new(0.1f32, 1.0)
        .map_err(|e| OpError::InvalidParameter(format!("uniform logits: {e}")))?;

    let mut labels = vec![0.0; rows * cols];
    let mut logits = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        labels[r * cols + rng.random_range(0..cols)] = 1.0;
        let row: Vec<f32> = (0..cols).map(|_| uniform.sample(rng)).collect();
        let sum: f32 = row.iter().sum();
        logits.extend(row.iter().map(|v| v / sum));
    }
    Ok((
        HostBuffer::new(meta.shape.clone(), meta.dtype, labels)?,
        HostBuffer::new(meta.shape.clone(), meta.dtype, logits)?,
    ))
}

fn input(spec: &OperatorSpec, index: usize) -> Result<&TensorMeta> {
    spec.inputs.get(index).ok_or_else(|| {
        OpError::InvalidArgument(format!("{} is missing input {index}", spec.name()))
    })
}

/// Inputs and expected output for `spec`, drawn from `rng`.
pub fn generate_case<R: Rng + ?Sized>(spec: &OperatorSpec, rng: &mut R) -> Result<CaseData> {
    let (inputs, expected) = match &spec.kind {
        OperatorKind::ApproximateEqual { tolerance } => {
            let (mx, my) = (input(spec, 0)?, input(spec, 1)?);
            let x = random_gaussian(rng, &mx.shape, 1.0, 0.1, mx.dtype)?;
            let y = near_pair(rng, &x, my.dtype, *tolerance)?;
            let expected = approximate_equal_ref(&x, &y, *tolerance)?;
            (vec![x, y], expected)
        }
        OperatorKind::CrossEntropyLoss { .. } => {
            let (labels, logits) = one_hot_batch(rng, input(spec, 1)?)?;
            let expected = cross_entropy_ref(&labels, &logits)?;
            (vec![labels, logits], expected)
        }
        OperatorKind::Minimum => {
            let (ma, mb) = (input(spec, 0)?, input(spec, 1)?);
            let a = random_gaussian(rng, &ma.shape, 1.0, 0.1, ma.dtype)?;
            let b = random_gaussian(rng, &mb.shape, 1.0, 0.1, mb.dtype)?;
            let expected = minimum_ref(&a, &b)?;
            (vec![a, b], expected)
        }
        OperatorKind::ReduceOr { axis, keepdims } => {
            let m = input(spec, 0)?;
            let x = random_int(rng, &m.shape, 0, 2, m.dtype)?;
            let expected = reduce_any_ref(&x, axis.as_deref(), *keepdims)?;
            (vec![x], expected)
        }
    };
    let output = sentinel_output(&expected.shape, expected.dtype);
    Ok(CaseData {
        inputs,
        output,
        expected,
    })
}

// ── Reference formulas ──────────────────────────────────────────────────

fn rank2(shape: &Shape) -> Result<(usize, usize)> {
    match shape.0.as_slice() {
        &[rows, cols] if rows > 0 && cols > 0 => Ok((rows as usize, cols as usize)),
        _ => Err(OpError::InvalidShape {
            shape: shape.0.clone(),
            reason: "expected a rank-2 shape".into(),
        }),
    }
}

fn same_shape(a: &HostBuffer, b: &HostBuffer) -> Result<()> {
    if a.shape != b.shape {
        return Err(OpError::ShapeMismatch {
            expected: a.shape.0.clone(),
            got: b.shape.0.clone(),
        });
    }
    Ok(())
}

/// `|x - y| <= tolerance` per element; NaN compares false.
///
/// The difference and the tolerance are both rounded onto the input dtype
/// before comparing, the way the kernel evaluates them.
pub fn approximate_equal_ref(x: &HostBuffer, y: &HostBuffer, tolerance: f32) -> Result<HostBuffer> {
    same_shape(x, y)?;
    let dtype = x.dtype;
    let threshold = dtype.quantize(tolerance);
    let data = x
        .data
        .iter()
        .zip(&y.data)
        .map(|(a, b)| {
            if dtype.quantize((a - b).abs()) <= threshold {
                1.0
            } else {
                0.0
            }
        })
        .collect();
    HostBuffer::new(x.shape.clone(), DType::Bool, data)
}

/// `-sum_j labels[r, j] * ln(logits[r, j])` per row, accumulated in f64.
pub fn cross_entropy_ref(labels: &HostBuffer, logits: &HostBuffer) -> Result<HostBuffer> {
    same_shape(labels, logits)?;
    let (rows, cols) = rank2(&logits.shape)?;
    let data = (0..rows)
        .map(|r| {
            let row = r * cols..(r + 1) * cols;
            let ll: f64 = labels.data[row.clone()]
                .iter()
                .zip(&logits.data[row])
                .map(|(&l, &p)| f64::from(l) * f64::from(p).ln())
                .sum();
            (-ll) as f32
        })
        .collect();
    HostBuffer::new(Shape::new(vec![rows as i64]), logits.dtype, data)
}

/// Flat index into `src` for element `out_idx` of the broadcast result.
fn broadcast_source(out_idx: usize, out_shape: &Shape, src: &Shape) -> usize {
    let out_strides = out_shape.strides();
    let src_strides = src.strides();
    let offset = out_shape.ndim() - src.ndim();
    let mut rem = out_idx;
    let mut idx = 0;
    for (axis, &stride) in out_strides.iter().enumerate() {
        let coord = rem / stride;
        rem %= stride;
        if axis >= offset && src.0[axis - offset] != 1 {
            idx += coord * src_strides[axis - offset];
        }
    }
    idx
}

/// Element-wise minimum with NumPy broadcasting; NaN propagates.
pub fn minimum_ref(a: &HostBuffer, b: &HostBuffer) -> Result<HostBuffer> {
    let shape = Shape::broadcast_shapes(&a.shape, &b.shape).ok_or_else(|| OpError::ShapeMismatch {
        expected: a.shape.0.clone(),
        got: b.shape.0.clone(),
    })?;
    let n = shape.numel() as usize;
    let data = (0..n)
        .map(|i| {
            let x = a.data[broadcast_source(i, &shape, &a.shape)];
            let y = b.data[broadcast_source(i, &shape, &b.shape)];
            if x.is_nan() || y.is_nan() { f32::NAN } else { x.min(y) }
        })
        .collect();
    HostBuffer::new(shape, a.dtype, data)
}

/// Logical-or over `axis` (every axis when `None`).
///
/// Reducing every axis without `keepdims` gives shape `[1]`.
pub fn reduce_any_ref(x: &HostBuffer, axis: Option<&[i32]>, keepdims: bool) -> Result<HostBuffer> {
    let ndim = x.shape.ndim();
    let axes = normalize_axes(axis, ndim)?;
    let out_shape = x.shape.reduced(&axes, keepdims);

    let kept = Shape::new(
        (0..ndim)
            .filter(|a| !axes.contains(a))
            .map(|a| x.shape.0[a])
            .collect::<Vec<_>>(),
    );
    let kept_strides = kept.strides();
    let in_strides = x.shape.strides();

    let mut out = vec![0.0f32; out_shape.numel() as usize];
    for (i, &v) in x.data.iter().enumerate() {
        if v == 0.0 {
            continue;
        }
        let mut rem = i;
        let mut dst = 0;
        let mut k = 0;
        for (a, &stride) in in_strides.iter().enumerate() {
            let coord = rem / stride;
            rem %= stride;
            if !axes.contains(&a) {
                dst += coord * kept_strides[k];
                k += 1;
            }
        }
        out[dst] = 1.0;
    }
    HostBuffer::new(out_shape, DType::Bool, out)
}
