//! Host-side materialized arrays exchanged with kernels.

use opcheck_core::{DType, OpError, Shape, TensorMeta};
use serde::Serialize;

/// A dense row-major array on the host.
///
/// Values are `f32` lanes already rounded onto `dtype`: f16 data is stored at
/// f16 precision and booleans as `0.0`/`1.0`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostBuffer {
    pub shape: Shape,
    pub dtype: DType,
    pub data: Vec<f32>,
}

impl HostBuffer {
    pub fn new(shape: Shape, dtype: DType, data: Vec<f32>) -> Result<Self, OpError> {
        let expected = shape.numel() as usize;
        if data.len() != expected {
            return Err(OpError::InvalidArgument(format!(
                "buffer of {} elements does not match shape {shape} ({expected} elements)",
                data.len()
            )));
        }
        let data = data.into_iter().map(|v| dtype.quantize(v)).collect();
        Ok(Self { shape, dtype, data })
    }

    /// Buffer with every element set to `value`.
    pub fn filled(shape: Shape, dtype: DType, value: f32) -> Self {
        let n = shape.numel().max(0) as usize;
        Self {
            data: vec![dtype.quantize(value); n],
            shape,
            dtype,
        }
    }

    pub fn meta(&self) -> TensorMeta {
        TensorMeta::new(self.shape.clone(), self.dtype)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}
