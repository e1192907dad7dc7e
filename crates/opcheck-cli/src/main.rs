use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use opcheck_conformance::{
    BuildOptions, CaseFailure, CaseReport, Harness, HarnessConfig, OperatorKind, OperatorSpec,
    ProfileOutcome, builtin_suite,
};
use opcheck_core::{DType, Shape, TensorMeta};
use opcheck_ops::Target;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "opcheck")]
#[command(about = "Operator correctness and performance checks")]
struct Args {
    /// Execution target (cuda, cloud or mini). Defaults to OPCHECK_TARGET.
    #[arg(long, global = true)]
    target: Option<Target>,

    /// Seed for generated inputs. Defaults to OPCHECK_SEED.
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Check a single operator case.
    Run(RunArgs),
    /// Run the built-in suite of cases.
    Smoke,
}

#[derive(Clone, Copy, ValueEnum)]
enum Op {
    ApproximateEqual,
    CrossEntropyLoss,
    Minimum,
    ReduceOr,
}

#[derive(clap::Args)]
struct RunArgs {
    op: Op,

    /// Shape of the first input, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "2,3")]
    shape: Vec<i64>,

    /// Shape of the second input; defaults to `--shape`.
    #[arg(long, value_delimiter = ',')]
    shape2: Option<Vec<i64>>,

    /// Element type (float16, float32, int32, bool). Defaults per operator.
    #[arg(long)]
    dtype: Option<DType>,

    #[arg(long, default_value_t = opcheck_ops::approximate_equal::DEFAULT_TOLERANCE)]
    tolerance: f32,

    /// Axes to reduce, comma separated. Negative values count from the end.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    axis: Option<Vec<i32>>,

    #[arg(long)]
    keepdims: bool,

    /// Use the polyhedral scheduling path.
    #[arg(long)]
    poly_sch: bool,

    /// Profile the kernel after a passing comparison.
    #[arg(long)]
    profile: bool,

    /// Launches per profiling run. Defaults to OPCHECK_PROFILE_REPEATS or 400.
    #[arg(long)]
    repeats: Option<usize>,
}

impl RunArgs {
    fn spec(&self, target: Target) -> OperatorSpec {
        let kind = match self.op {
            Op::ApproximateEqual => OperatorKind::ApproximateEqual {
                tolerance: self.tolerance,
            },
            Op::CrossEntropyLoss => OperatorKind::CrossEntropyLoss {
                axis: self
                    .axis
                    .as_ref()
                    .and_then(|a| a.first().copied())
                    .unwrap_or(opcheck_ops::cross_entropy::DEFAULT_AXIS),
            },
            Op::Minimum => OperatorKind::Minimum,
            Op::ReduceOr => OperatorKind::ReduceOr {
                axis: self.axis.clone(),
                keepdims: self.keepdims,
            },
        };
        let dtype = self.dtype.unwrap_or(match self.op {
            Op::ReduceOr => DType::Bool,
            _ => DType::F32,
        });
        let first = TensorMeta::new(Shape::new(self.shape.clone()), dtype);
        let inputs = if kind.arity() == 2 {
            let second = self.shape2.clone().unwrap_or_else(|| self.shape.clone());
            vec![first, TensorMeta::new(Shape::new(second), dtype)]
        } else {
            vec![first]
        };
        OperatorSpec::new(kind, inputs)
            .with_target(target)
            .with_options(BuildOptions {
                poly_sch: self.poly_sch,
            })
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let mut config = HarnessConfig::from_env();
    if let Some(target) = args.target {
        config.target = target;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let specs = match &args.cmd {
        Cmd::Run(run) => {
            config.profile = run.profile;
            if let Some(n) = run.repeats {
                config.profile_repeats = n;
            }
            vec![run.spec(config.target)]
        }
        Cmd::Smoke => builtin_suite(config.target),
    };

    info!(cases = specs.len(), target = %config.target, seed = config.seed, "starting");
    let harness = Harness::new(config);
    let results = harness.run_all(&specs);
    let failed = results.iter().filter(|r| r.is_err()).count();

    if args.json {
        print_json(&results);
    } else {
        for result in &results {
            print_human(result);
        }
        println!("\n{} passed, {failed} failed", results.len() - failed);
    }

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_human(result: &Result<CaseReport, CaseFailure>) {
    match result {
        Ok(report) => {
            println!(
                "PASS {} ({} elements, max abs diff {:e}, max rel diff {:e})",
                report.kernel,
                report.comparison.total,
                report.comparison.max_abs_diff,
                report.comparison.max_rel_diff
            );
            match &report.profile {
                Some(ProfileOutcome::Completed(s)) => println!(
                    "     profile: {} launches, mean {:.2}us, min {:.2}us, max {:.2}us",
                    s.repeats, s.mean_us, s.min_us, s.max_us
                ),
                Some(ProfileOutcome::Failed { message }) => {
                    println!("     profile failed: {message}")
                }
                None => {}
            }
        }
        Err(failure) => {
            println!("FAIL {failure}");
            if let Some(m) = failure.comparison().and_then(|c| c.first_mismatch) {
                println!(
                    "     first mismatch at [{}]: actual={} expected={}",
                    m.index, m.actual, m.expected
                );
            }
            if let Some(source) = failure.kernel_source() {
                println!("     kernel source:");
                for line in source.lines() {
                    println!("       {line}");
                }
            }
        }
    }
}

fn print_json(results: &[Result<CaseReport, CaseFailure>]) {
    let values: Vec<serde_json::Value> = results
        .iter()
        .map(|r| match r {
            Ok(report) => serde_json::json!({ "passed": true, "report": report }),
            Err(failure) => serde_json::json!({ "passed": false, "failure": failure }),
        })
        .collect();
    match serde_json::to_string_pretty(&values) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to encode reports: {e}"),
    }
}
