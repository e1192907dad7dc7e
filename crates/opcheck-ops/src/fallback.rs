//! Execution-target capabilities and the dtype fallbacks they force.
//!
//! Some targets cannot run the compare/select primitives on 32-bit floats.
//! Builders consult [`Capabilities`] and route values through
//! [`narrow_for_select`] instead of special-casing the target inline.

use opcheck_core::{DType, OpError, Tensor};
use serde::{Deserialize, Serialize};

/// Device family a kernel is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Full-featured accelerator.
    Cloud,
    /// Constrained device: no f32 compare/select, no direct float-to-bool cast.
    Mini,
    #[default]
    Cuda,
}

impl Target {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Target::Cloud | Target::Cuda => Capabilities::FULL,
            Target::Mini => Capabilities::CONSTRAINED,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Target::Cloud => "cloud",
            Target::Mini => "mini",
            Target::Cuda => "cuda",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Target {
    type Err = OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cloud" => Ok(Target::Cloud),
            "mini" => Ok(Target::Mini),
            "cuda" | "gpu" => Ok(Target::Cuda),
            other => Err(OpError::InvalidArgument(format!("unknown target '{other}'"))),
        }
    }
}

/// Numeric operations a target supports natively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Compare and select run on float32 operands.
    pub f32_select: bool,
}

impl Capabilities {
    pub const FULL: Capabilities = Capabilities { f32_select: true };
    pub const CONSTRAINED: Capabilities = Capabilities { f32_select: false };

    /// Dtype a value of `dtype` must be narrowed to before compare/select.
    pub fn select_dtype(self, dtype: DType) -> DType {
        if dtype == DType::F32 && !self.f32_select {
            DType::F16
        } else {
            dtype
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::FULL
    }
}

/// Narrow `value` to the dtype the target can compare and select on.
///
/// This trades accuracy for compatibility: on a constrained target float32
/// values are rounded to float16 first. Identity when no narrowing is needed.
pub fn narrow_for_select(value: &Tensor, caps: Capabilities) -> Tensor {
    value.cast(caps.select_dtype(value.dtype()))
}
