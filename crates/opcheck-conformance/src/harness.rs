//! Build → generate → launch → compare → report, for one operator case.
//!
//! Stages run strictly in order and the first failure ends the case. A
//! failure records the first stage that was not reached together with its
//! cause. Profiling happens only after a passing comparison and its outcome
//! is kept apart from the verdict.

use opcheck_core::TensorMeta;
use opcheck_ops::Target;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::buffer::HostBuffer;
use crate::compare::{ComparisonResult, compare_buffers};
use crate::config::HarnessConfig;
use crate::kernel::{GraphKernelBuilder, Kernel, KernelBuilder, OperatorKind, OperatorSpec};
use crate::profile::{Profiler, ProfilingSample, WallClockProfiler};
use crate::reference::{CaseData, generate_case, seeded_rng};
use crate::HarnessError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Built,
    DataGenerated,
    Executed,
    Compared,
    Reported,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Built => "built",
            Stage::DataGenerated => "data_generated",
            Stage::Executed => "executed",
            Stage::Compared => "compared",
            Stage::Reported => "reported",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProfileOutcome {
    Completed(ProfilingSample),
    Failed { message: String },
}

/// A case that passed comparison.
#[derive(Clone, Debug, Serialize)]
pub struct CaseReport {
    pub op: String,
    pub kernel: String,
    pub target: Target,
    pub stages: Vec<Stage>,
    pub comparison: ComparisonResult,
    pub profile: Option<ProfileOutcome>,
}

/// A case that stopped before reaching `stage`.
#[derive(thiserror::Error, Debug)]
#[error("{op} did not reach stage {stage}: {error}")]
pub struct CaseFailure {
    pub op: String,
    pub stage: Stage,
    #[source]
    pub error: HarnessError,
}

impl CaseFailure {
    pub fn comparison(&self) -> Option<&ComparisonResult> {
        match &self.error {
            HarnessError::ComparisonFailure { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn kernel_source(&self) -> Option<&str> {
        self.error.kernel_source()
    }
}

impl Serialize for CaseFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("CaseFailure", 5)?;
        s.serialize_field("op", &self.op)?;
        s.serialize_field("stage", &self.stage)?;
        s.serialize_field("error", &self.error.to_string())?;
        s.serialize_field("comparison", &self.comparison())?;
        s.serialize_field("kernel_source", &self.kernel_source())?;
        s.end()
    }
}

pub struct Harness {
    config: HarnessConfig,
    builder: Box<dyn KernelBuilder>,
    profiler: Box<dyn Profiler>,
}

impl Harness {
    /// Harness on the in-tree graph builder and wall-clock profiler.
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            builder: Box::new(GraphKernelBuilder),
            profiler: Box::new(WallClockProfiler),
        }
    }

    pub fn with_builder(mut self, builder: impl KernelBuilder + 'static) -> Self {
        self.builder = Box::new(builder);
        self
    }

    pub fn with_profiler(mut self, profiler: impl Profiler + 'static) -> Self {
        self.profiler = Box::new(profiler);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// A spec for the configured target.
    pub fn spec(&self, kind: OperatorKind, inputs: Vec<TensorMeta>) -> OperatorSpec {
        OperatorSpec::new(kind, inputs).with_target(self.config.target)
    }

    pub fn run_case(&self, spec: &OperatorSpec) -> Result<CaseReport, CaseFailure> {
        let op = spec.name();
        let fail = |stage: Stage, error: HarnessError| {
            warn!(op, stage = %stage, error = %error, "case failed");
            CaseFailure {
                op: op.to_string(),
                stage,
                error,
            }
        };
        info!(op, target = %spec.target, poly_sch = spec.options.poly_sch, "running case");

        let kernel = self
            .builder
            .build(spec)
            .map_err(|e| fail(Stage::Built, e.into()))?;
        let mut stages = vec![Stage::Built];
        debug!(op, kernel = kernel.name(), "stage built");

        let mut rng = seeded_rng(self.config.seed);
        let CaseData {
            inputs,
            mut output,
            expected,
        } = generate_case(spec, &mut rng).map_err(|e| fail(Stage::DataGenerated, e.into()))?;
        stages.push(Stage::DataGenerated);
        debug!(op, inputs = inputs.len(), out_shape = %expected.shape, "stage data_generated");

        if let Err(e) = kernel.launch(&inputs, &mut output, Some(&expected)) {
            return Err(fail(
                Stage::Executed,
                HarnessError::ExecutionFailure {
                    message: e.to_string(),
                    kernel_source: kernel.source(),
                },
            ));
        }
        stages.push(Stage::Executed);

        let result = compare_buffers(&output, &expected, &self.config.tolerance)
            .map_err(|e| fail(Stage::Compared, e.into()))?;
        if !result.passed {
            return Err(fail(
                Stage::Compared,
                HarnessError::ComparisonFailure {
                    result,
                    kernel_source: kernel.source(),
                },
            ));
        }
        stages.push(Stage::Compared);

        let profile = self
            .config
            .profile
            .then(|| self.profile(kernel.as_ref(), &inputs, &expected));
        stages.push(Stage::Reported);

        info!(
            op,
            kernel = kernel.name(),
            max_abs_diff = result.max_abs_diff,
            "case passed"
        );
        Ok(CaseReport {
            op: op.to_string(),
            kernel: kernel.name().to_string(),
            target: spec.target,
            stages,
            comparison: result,
            profile,
        })
    }

    /// Run every spec, continuing past failures.
    pub fn run_all(&self, specs: &[OperatorSpec]) -> Vec<Result<CaseReport, CaseFailure>> {
        specs.iter().map(|spec| self.run_case(spec)).collect()
    }

    fn profile(
        &self,
        kernel: &dyn Kernel,
        inputs: &[HostBuffer],
        expected: &HostBuffer,
    ) -> ProfileOutcome {
        match self
            .profiler
            .profile(kernel, inputs, expected, self.config.profile_repeats)
        {
            Ok(sample) => {
                info!(
                    kernel = kernel.name(),
                    repeats = sample.repeats,
                    mean_us = sample.mean_us,
                    "profiled"
                );
                ProfileOutcome::Completed(sample)
            }
            Err(e) => {
                warn!(kernel = kernel.name(), error = %e, "profiling failed");
                ProfileOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Harness::new(HarnessConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcheck_core::{DType, Shape};

    fn meta(dims: &[i64], dtype: DType) -> TensorMeta {
        TensorMeta::new(Shape::new(dims.to_vec()), dtype)
    }

    #[test]
    fn test_passing_case_reaches_reported() {
        let harness = Harness::default();
        let spec = harness.spec(
            OperatorKind::Minimum,
            vec![meta(&[2, 3], DType::F32), meta(&[2, 3], DType::F32)],
        );
        let report = harness.run_case(&spec).unwrap();
        assert_eq!(
            report.stages,
            vec![
                Stage::Built,
                Stage::DataGenerated,
                Stage::Executed,
                Stage::Compared,
                Stage::Reported
            ]
        );
        assert!(report.comparison.passed);
        assert!(report.profile.is_none());
    }

    #[test]
    fn test_validation_failure_stops_at_build() {
        let harness = Harness::default();
        let spec = harness.spec(
            OperatorKind::CrossEntropyLoss { axis: 0 },
            vec![meta(&[2, 3], DType::F32), meta(&[2, 3], DType::F32)],
        );
        let failure = harness.run_case(&spec).unwrap_err();
        assert_eq!(failure.stage, Stage::Built);
        assert!(matches!(failure.error, HarnessError::Validation(_)));
        assert!(failure.kernel_source().is_none());
    }

    #[test]
    fn test_profiling_attached_when_enabled() {
        let harness = Harness::new(HarnessConfig::default().with_profiling(3));
        let spec = harness.spec(
            OperatorKind::ReduceOr {
                axis: None,
                keepdims: false,
            },
            vec![meta(&[4, 4], DType::Bool)],
        );
        let report = harness.run_case(&spec).unwrap();
        match report.profile {
            Some(ProfileOutcome::Completed(sample)) => assert_eq!(sample.repeats, 3),
            other => panic!("unexpected profile outcome {other:?}"),
        }
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Built < Stage::DataGenerated);
        assert!(Stage::Compared < Stage::Reported);
        assert_eq!(Stage::DataGenerated.to_string(), "data_generated");
    }
}
