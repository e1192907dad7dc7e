//! Core type definitions: DType, Shape.

use half::f16;
use serde::{Deserialize, Serialize};

/// Supported data types for tensor elements.
///
/// Buffers carry every dtype as `f32` lanes; [`DType::quantize`] rounds a
/// value onto the set representable by the dtype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "float16")]
    F16,
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "bool")]
    Bool,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::Bool => 1,
        }
    }

    /// Whether this is a floating-point dtype.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::F32)
    }

    /// Round `value` to the nearest value representable in this dtype.
    ///
    /// Integers truncate toward zero; booleans map any non-zero (including
    /// NaN) to `1.0`.
    pub fn quantize(self, value: f32) -> f32 {
        match self {
            DType::F32 => value,
            DType::F16 => f16::from_f32(value).to_f32(),
            DType::I32 => {
                if value.is_nan() {
                    0.0
                } else {
                    value.trunc().clamp(i32::MIN as f32, i32::MAX as f32)
                }
            }
            DType::Bool => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Canonical lowercase name (`"float16"`, `"float32"`, `"int32"`, `"bool"`).
    pub fn name(self) -> &'static str {
        match self {
            DType::F16 => "float16",
            DType::F32 => "float32",
            DType::I32 => "int32",
            DType::Bool => "bool",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DType {
    type Err = crate::OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float16" | "f16" => Ok(DType::F16),
            "float32" | "f32" => Ok(DType::F32),
            "int32" | "i32" => Ok(DType::I32),
            "bool" => Ok(DType::Bool),
            other => Err(crate::OpError::InvalidArgument(format!(
                "unknown dtype '{other}'"
            ))),
        }
    }
}

/// Tensor shape (dimensions).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(pub Vec<i64>);

impl Shape {
    pub fn new(dims: impl Into<Vec<i64>>) -> Self {
        Self(dims.into())
    }

    /// Scalar (rank-0) shape.
    pub fn scalar() -> Self {
        Self(vec![])
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements.
    pub fn numel(&self) -> i64 {
        self.0.iter().product()
    }

    /// Get dimension at axis (supports negative indexing).
    pub fn dim(&self, axis: i32) -> Option<i64> {
        let ndim = self.0.len() as i32;
        let idx = if axis < 0 { ndim + axis } else { axis };
        if idx >= 0 && idx < ndim {
            Some(self.0[idx as usize])
        } else {
            None
        }
    }

    /// True when every dimension is strictly positive.
    pub fn has_positive_dims(&self) -> bool {
        self.0.iter().all(|&d| d > 0)
    }

    /// Shape left after reducing over `axes` (already normalized).
    ///
    /// Reduced axes are kept as size 1 when `keepdims` is set. A reduction
    /// that removes every axis yields `[1]`, never a rank-0 shape.
    pub fn reduced(&self, axes: &[usize], keepdims: bool) -> Shape {
        let mut dims = Vec::with_capacity(self.0.len());
        for (i, &d) in self.0.iter().enumerate() {
            if axes.contains(&i) {
                if keepdims {
                    dims.push(1);
                }
            } else {
                dims.push(d);
            }
        }
        if dims.is_empty() {
            dims.push(1);
        }
        Shape::new(dims)
    }

    /// Row-major strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.0.len()];
        for i in (0..self.0.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1] as usize;
        }
        strides
    }

    /// Compute the broadcast shape of two shapes, or None if incompatible.
    pub fn broadcast_shapes(a: &Shape, b: &Shape) -> Option<Shape> {
        let a_dims = &a.0;
        let b_dims = &b.0;
        let max_ndim = a_dims.len().max(b_dims.len());

        let mut result = Vec::with_capacity(max_ndim);

        for i in 0..max_ndim {
            let da = if i < a_dims.len() {
                a_dims[a_dims.len() - 1 - i]
            } else {
                1
            };
            let db = if i < b_dims.len() {
                b_dims[b_dims.len() - 1 - i]
            } else {
                1
            };

            if da == db {
                result.push(da);
            } else if da == 1 {
                result.push(db);
            } else if db == 1 {
                result.push(da);
            } else {
                return None;
            }
        }

        result.reverse();
        Some(Shape::new(result))
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}
