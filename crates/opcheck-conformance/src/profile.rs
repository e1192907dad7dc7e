//! Repeated-launch timing of a kernel that already passed comparison.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::buffer::HostBuffer;
use crate::kernel::Kernel;
use crate::{HarnessError, Result};

pub const DEFAULT_PROFILE_REPEATS: usize = 400;

/// Per-launch timings over a profiling run, in microseconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProfilingSample {
    pub repeats: usize,
    pub total_us: f64,
    pub min_us: f64,
    pub mean_us: f64,
    pub max_us: f64,
}

impl ProfilingSample {
    /// Summarize a non-empty list of launch durations.
    pub fn from_durations(durations: &[Duration]) -> Option<Self> {
        let first = durations.first()?;
        let us = |d: &Duration| d.as_secs_f64() * 1e6;
        let mut min = us(first);
        let mut max = min;
        let mut total = 0.0;
        for d in durations {
            let t = us(d);
            min = min.min(t);
            max = max.max(t);
            total += t;
        }
        Some(Self {
            repeats: durations.len(),
            total_us: total,
            min_us: min,
            mean_us: total / durations.len() as f64,
            max_us: max,
        })
    }
}

pub trait Profiler: Send + Sync {
    /// Launch `kernel` `repeats` times and summarize the timings.
    fn profile(
        &self,
        kernel: &dyn Kernel,
        inputs: &[HostBuffer],
        expected: &HostBuffer,
        repeats: usize,
    ) -> Result<ProfilingSample>;
}

/// Times each launch with a monotonic host clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClockProfiler;

impl Profiler for WallClockProfiler {
    fn profile(
        &self,
        kernel: &dyn Kernel,
        inputs: &[HostBuffer],
        expected: &HostBuffer,
        repeats: usize,
    ) -> Result<ProfilingSample> {
        if repeats == 0 {
            return Err(HarnessError::ProfilingFailure(
                "repeat count must be positive".into(),
            ));
        }
        let mut scratch = HostBuffer::filled(expected.shape.clone(), expected.dtype, 0.0);
        let mut durations = Vec::with_capacity(repeats);
        for _ in 0..repeats {
            let start = Instant::now();
            kernel
                .launch(inputs, &mut scratch, Some(expected))
                .map_err(|e| HarnessError::ProfilingFailure(e.to_string()))?;
            durations.push(start.elapsed());
        }
        debug!(kernel = kernel.name(), repeats, "profiled kernel");
        ProfilingSample::from_durations(&durations)
            .ok_or_else(|| HarnessError::ProfilingFailure("no launches recorded".into()))
    }
}
