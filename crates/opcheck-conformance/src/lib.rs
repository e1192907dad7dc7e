//! Operator conformance testing infrastructure.
//!
//! Builds a kernel for an operator description, feeds it seeded reference
//! data, compares the launch output against a trusted host-side formula and
//! optionally profiles the kernel once it is known to be correct.

pub mod buffer;
pub mod cases;
pub mod compare;
pub mod config;
pub mod harness;
pub mod kernel;
pub mod profile;
pub mod reference;

pub use buffer::HostBuffer;
pub use cases::builtin_suite;
pub use compare::{ComparisonResult, Mismatch, Tolerance, assert_allclose, compare};
pub use config::HarnessConfig;
pub use harness::{CaseFailure, CaseReport, Harness, ProfileOutcome, Stage};
pub use kernel::{
    BuildOptions, GraphKernelBuilder, Kernel, KernelBuilder, OperatorKind, OperatorSpec,
};
pub use profile::{DEFAULT_PROFILE_REPEATS, Profiler, ProfilingSample, WallClockProfiler};
pub use reference::CaseData;

use opcheck_core::OpError;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(thiserror::Error, Debug)]
pub enum HarnessError {
    /// The case itself is malformed; nothing was launched.
    #[error(transparent)]
    Validation(#[from] OpError),

    #[error("kernel launch failed: {message}")]
    ExecutionFailure {
        message: String,
        kernel_source: Option<String>,
    },

    #[error(
        "{} of {} elements outside tolerance (max abs diff {})",
        .result.mismatches,
        .result.total,
        .result.max_abs_diff
    )]
    ComparisonFailure {
        result: ComparisonResult,
        kernel_source: Option<String>,
    },

    #[error("profiling failed: {0}")]
    ProfilingFailure(String),
}

impl HarnessError {
    /// Generated kernel text attached to launch and comparison failures.
    pub fn kernel_source(&self) -> Option<&str> {
        match self {
            HarnessError::ExecutionFailure { kernel_source, .. }
            | HarnessError::ComparisonFailure { kernel_source, .. } => kernel_source.as_deref(),
            _ => None,
        }
    }
}
