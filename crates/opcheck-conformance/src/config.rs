//! Harness configuration with environment overrides.

use opcheck_ops::Target;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compare::Tolerance;
use crate::profile::DEFAULT_PROFILE_REPEATS;

pub const ENV_TARGET: &str = "OPCHECK_TARGET";
pub const ENV_SEED: &str = "OPCHECK_SEED";
pub const ENV_PROFILE_REPEATS: &str = "OPCHECK_PROFILE_REPEATS";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub tolerance: Tolerance,
    /// Profile kernels that pass comparison.
    pub profile: bool,
    pub profile_repeats: usize,
    pub seed: u64,
    pub target: Target,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::default(),
            profile: false,
            profile_repeats: DEFAULT_PROFILE_REPEATS,
            seed: 0,
            target: Target::default(),
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by `OPCHECK_TARGET` (`cuda`, `cloud` or `mini`),
    /// `OPCHECK_SEED` and `OPCHECK_PROFILE_REPEATS`.
    ///
    /// Unrecognized values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(val) = lookup(ENV_TARGET) {
            match val.parse() {
                Ok(target) => config.target = target,
                Err(_) => warn!(var = ENV_TARGET, value = %val, "ignoring unrecognized target"),
            }
        }
        if let Some(val) = lookup(ENV_SEED) {
            match val.trim().parse() {
                Ok(seed) => config.seed = seed,
                Err(_) => warn!(var = ENV_SEED, value = %val, "ignoring invalid seed"),
            }
        }
        if let Some(val) = lookup(ENV_PROFILE_REPEATS) {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.profile_repeats = n,
                _ => warn!(
                    var = ENV_PROFILE_REPEATS,
                    value = %val,
                    "ignoring invalid repeat count"
                ),
            }
        }
        config
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_profiling(mut self, repeats: usize) -> Self {
        self.profile = true;
        self.profile_repeats = repeats;
        self
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }
}
