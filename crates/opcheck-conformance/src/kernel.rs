//! Operator descriptions and the builder/kernel seam.
//!
//! The harness only talks to [`KernelBuilder`] and [`Kernel`]; compilation
//! and device launch live behind those traits. [`GraphKernelBuilder`] is the
//! in-tree implementation: it records the operator on a CPU stream and runs
//! the resulting schedule on launch.

use std::sync::Arc;

use opcheck_core::{
    OpError, Result, Schedule, ScheduleStrategy, Stream, Tensor, TensorMeta, cpu_stream,
};
use opcheck_ops::{Target, approximate_equal, cross_entropy_loss, minimum, reduce_or};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::HostBuffer;

/// Operator identity plus its scalar parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperatorKind {
    ApproximateEqual { tolerance: f32 },
    CrossEntropyLoss { axis: i32 },
    Minimum,
    ReduceOr { axis: Option<Vec<i32>>, keepdims: bool },
}

impl OperatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::ApproximateEqual { .. } => "approximate_equal",
            OperatorKind::CrossEntropyLoss { .. } => "cross_entropy_loss",
            OperatorKind::Minimum => "minimum",
            OperatorKind::ReduceOr { .. } => "reduce_or",
        }
    }

    /// Number of input tensors the operator takes.
    pub fn arity(&self) -> usize {
        match self {
            OperatorKind::ApproximateEqual { .. }
            | OperatorKind::CrossEntropyLoss { .. }
            | OperatorKind::Minimum => 2,
            OperatorKind::ReduceOr { .. } => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Use the polyhedral scheduling path.
    pub poly_sch: bool,
}

impl BuildOptions {
    pub fn strategy(self) -> ScheduleStrategy {
        if self.poly_sch {
            ScheduleStrategy::Polyhedral
        } else {
            ScheduleStrategy::DepthFirst
        }
    }
}

/// Everything a builder needs to produce a kernel for one test case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub kind: OperatorKind,
    pub inputs: Vec<TensorMeta>,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub options: BuildOptions,
}

impl OperatorSpec {
    pub fn new(kind: OperatorKind, inputs: Vec<TensorMeta>) -> Self {
        Self {
            kind,
            inputs,
            target: Target::default(),
            options: BuildOptions::default(),
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// A compiled operator that can be launched repeatedly.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    /// Run once, writing every element of `output`.
    ///
    /// `expected` is handed to runtimes that verify results on the device;
    /// kernels are free to ignore it.
    fn launch(
        &self,
        inputs: &[HostBuffer],
        output: &mut HostBuffer,
        expected: Option<&HostBuffer>,
    ) -> Result<()>;

    /// Generated kernel text, when the backend can provide it.
    fn source(&self) -> Option<String> {
        None
    }
}

pub trait KernelBuilder: Send + Sync {
    /// Validate `spec` and produce a launchable kernel.
    fn build(&self, spec: &OperatorSpec) -> Result<Box<dyn Kernel>>;
}

/// Builds kernels on a fresh CPU reference stream per spec.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphKernelBuilder;

impl KernelBuilder for GraphKernelBuilder {
    fn build(&self, spec: &OperatorSpec) -> Result<Box<dyn Kernel>> {
        let arity = spec.kind.arity();
        if spec.inputs.len() != arity {
            return Err(OpError::InvalidArgument(format!(
                "{} takes {arity} inputs, got {}",
                spec.name(),
                spec.inputs.len()
            )));
        }

        let stream = cpu_stream();
        let params: Vec<Tensor> = spec
            .inputs
            .iter()
            .enumerate()
            .map(|(i, meta)| Tensor::parameter(&stream, i, &meta.shape, meta.dtype))
            .collect();

        let out = match &spec.kind {
            OperatorKind::ApproximateEqual { tolerance } => {
                approximate_equal(&params[0], &params[1], *tolerance, spec.target)?
            }
            OperatorKind::CrossEntropyLoss { axis } => {
                cross_entropy_loss(&params[0], &params[1], *axis)?
            }
            OperatorKind::Minimum => minimum(&params[0], &params[1])?,
            OperatorKind::ReduceOr { axis, keepdims } => {
                reduce_or(&params[0], axis.as_deref(), *keepdims)?
            }
        };

        let schedule = stream.schedule(&[out.node_id()], spec.options.strategy())?;
        debug!(
            op = spec.name(),
            target = %spec.target,
            strategy = ?schedule.strategy,
            scheduled = schedule.topo.len(),
            "built kernel"
        );

        Ok(Box::new(GraphKernel {
            name: format!("{}_{}", spec.name(), spec.target),
            stream,
            schedule,
            inputs: spec.inputs.clone(),
            output: out.meta().clone(),
        }))
    }
}

/// A scheduled graph bound to its own stream.
pub struct GraphKernel {
    name: String,
    stream: Arc<Stream>,
    schedule: Schedule,
    inputs: Vec<TensorMeta>,
    output: TensorMeta,
}

impl GraphKernel {
    pub fn output_meta(&self) -> &TensorMeta {
        &self.output
    }

    fn check_inputs(&self, inputs: &[HostBuffer]) -> Result<()> {
        if inputs.len() != self.inputs.len() {
            return Err(OpError::InvalidArgument(format!(
                "kernel {} expects {} inputs, got {}",
                self.name,
                self.inputs.len(),
                inputs.len()
            )));
        }
        for (i, (buf, meta)) in inputs.iter().zip(&self.inputs).enumerate() {
            if buf.shape != meta.shape {
                return Err(OpError::ShapeMismatch {
                    expected: meta.shape.0.clone(),
                    got: buf.shape.0.clone(),
                });
            }
            if buf.dtype != meta.dtype {
                return Err(OpError::InvalidArgument(format!(
                    "input {i} is {}, kernel expects {}",
                    buf.dtype, meta.dtype
                )));
            }
        }
        Ok(())
    }
}

impl Kernel for GraphKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn launch(
        &self,
        inputs: &[HostBuffer],
        output: &mut HostBuffer,
        _expected: Option<&HostBuffer>,
    ) -> Result<()> {
        self.check_inputs(inputs)?;
        if output.shape != self.output.shape {
            return Err(OpError::ShapeMismatch {
                expected: self.output.shape.0.clone(),
                got: output.shape.0.clone(),
            });
        }
        if output.dtype != self.output.dtype {
            return Err(OpError::DtypeMismatch {
                lhs: self.output.dtype,
                rhs: output.dtype,
            });
        }

        let args: Vec<&[f32]> = inputs.iter().map(HostBuffer::as_slice).collect();
        let result = self
            .stream
            .run(&self.schedule, &args)?
            .pop()
            .ok_or(OpError::Graph("kernel produced no output"))?;
        if result.len() != output.data.len() {
            return Err(OpError::Graph("kernel output length disagrees with its shape"));
        }
        output.data.copy_from_slice(&result);
        Ok(())
    }

    fn source(&self) -> Option<String> {
        Some(format!(
            "// {} ({:?} schedule)\n{}",
            self.name,
            self.schedule.strategy,
            self.stream.render(&self.schedule)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcheck_core::{DType, Shape};

    fn meta(dims: &[i64], dtype: DType) -> TensorMeta {
        TensorMeta::new(Shape::new(dims.to_vec()), dtype)
    }

    fn buf(dims: &[i64], dtype: DType, data: &[f32]) -> HostBuffer {
        HostBuffer::new(Shape::new(dims.to_vec()), dtype, data.to_vec()).unwrap()
    }

    #[test]
    fn test_build_and_launch_minimum() {
        let spec = OperatorSpec::new(
            OperatorKind::Minimum,
            vec![meta(&[3], DType::F32), meta(&[3], DType::F32)],
        );
        let kernel = GraphKernelBuilder.build(&spec).unwrap();
        assert_eq!(kernel.name(), "minimum_cuda");

        let inputs = [
            buf(&[3], DType::F32, &[1.0, 5.0, 3.0]),
            buf(&[3], DType::F32, &[2.0, 4.0, 3.0]),
        ];
        let mut out = HostBuffer::filled(Shape::new(vec![3]), DType::F32, f32::NAN);
        kernel.launch(&inputs, &mut out, None).unwrap();
        assert_eq!(out.data, vec![1.0, 4.0, 3.0]);
    }

    #[test]
    fn test_build_rejects_wrong_arity() {
        let spec = OperatorSpec::new(OperatorKind::Minimum, vec![meta(&[3], DType::F32)]);
        assert!(matches!(
            GraphKernelBuilder.build(&spec),
            Err(OpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_build_propagates_validation() {
        let spec = OperatorSpec::new(
            OperatorKind::ApproximateEqual { tolerance: -1.0 },
            vec![meta(&[2], DType::F32), meta(&[2], DType::F32)],
        );
        let err = GraphKernelBuilder.build(&spec).err().unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn test_launch_rejects_wrong_output_shape() {
        let spec = OperatorSpec::new(
            OperatorKind::ReduceOr {
                axis: None,
                keepdims: false,
            },
            vec![meta(&[2, 2], DType::Bool)],
        );
        let kernel = GraphKernelBuilder.build(&spec).unwrap();
        let inputs = [buf(&[2, 2], DType::Bool, &[0.0, 1.0, 0.0, 0.0])];
        let mut wrong = HostBuffer::filled(Shape::new(vec![2]), DType::Bool, 0.0);
        assert!(kernel.launch(&inputs, &mut wrong, None).is_err());

        let mut out = HostBuffer::filled(Shape::new(vec![1]), DType::Bool, 0.0);
        kernel.launch(&inputs, &mut out, None).unwrap();
        assert_eq!(out.data, vec![1.0]);
    }

    #[test]
    fn test_poly_sch_source_and_result() {
        let metas = vec![meta(&[2, 2], DType::F32), meta(&[2, 2], DType::F32)];
        let inputs = [
            buf(&[2, 2], DType::F32, &[1.0, 0.0, 0.0, 1.0]),
            buf(&[2, 2], DType::F32, &[0.9, 0.1, 0.2, 0.8]),
        ];
        let mut outs = Vec::new();
        for poly_sch in [false, true] {
            let spec = OperatorSpec::new(OperatorKind::CrossEntropyLoss { axis: -1 }, metas.clone())
                .with_options(BuildOptions { poly_sch });
            let kernel = GraphKernelBuilder.build(&spec).unwrap();
            let source = kernel.source().unwrap();
            assert!(source.contains("log"), "{source}");
            assert!(source.contains("reduce_sum"), "{source}");
            let mut out = HostBuffer::filled(Shape::new(vec![2]), DType::F32, f32::NAN);
            kernel.launch(&inputs, &mut out, None).unwrap();
            outs.push(out.data);
        }
        assert_eq!(outs[0], outs[1]);
    }

    #[test]
    fn test_spec_json_shape() {
        let spec = OperatorSpec::new(
            OperatorKind::ApproximateEqual { tolerance: 1e-5 },
            vec![meta(&[2], DType::F16), meta(&[2], DType::F16)],
        )
        .with_target(Target::Mini);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"]["op"], "approximate_equal");
        assert_eq!(json["target"], "mini");
        assert_eq!(json["inputs"][0]["dtype"], "float16");
    }
}
