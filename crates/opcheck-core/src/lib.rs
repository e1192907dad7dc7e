//! Tensor handles, lazy graph IR and the CPU reference backend.
//!
//! `opcheck-core` provides the foundational types (`Tensor`, `DType`, `Shape`)
//! that operator builders compose, and the `Stream`/`Backend` pair that
//! executes a recorded graph.
//!
//! # Backends
//!
//! - `CpuRefBackend`: pure Rust correctness oracle for every primitive op.

pub mod backend;
pub mod cpu_kernels;
pub mod graph;
pub mod schedule;
pub mod tensor;
pub mod types;

pub use backend::{Backend, Stream, cpu_stream};
pub use graph::{CmpOp, NodeId, OpKind, TensorMeta};
pub use schedule::{Schedule, ScheduleStrategy};
pub use tensor::Tensor;
pub use types::{DType, Shape};

pub type Result<T> = std::result::Result<T, OpError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OpError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<i64>, got: Vec<i64> },

    #[error("Invalid shape {shape:?}: {reason}")]
    InvalidShape { shape: Vec<i64>, reason: String },

    #[error("Dtype mismatch: {lhs} vs {rhs}")]
    DtypeMismatch { lhs: DType, rhs: DType },

    #[error("Unsupported dtype {dtype}, expected one of {allowed}")]
    UnsupportedDtype { dtype: DType, allowed: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported axis {axis} for ndim {ndim}")]
    UnsupportedAxis { axis: i64, ndim: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Graph error: {0}")]
    Graph(&'static str),
}

impl OpError {
    /// Errors that mean the test case itself is malformed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OpError::ShapeMismatch { .. }
                | OpError::InvalidShape { .. }
                | OpError::DtypeMismatch { .. }
                | OpError::UnsupportedDtype { .. }
                | OpError::InvalidParameter(_)
                | OpError::UnsupportedAxis { .. }
        )
    }
}
