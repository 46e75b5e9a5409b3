//! Execution of sweep vectors against a [`Device`].

use std::path::Path;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use shardcheck_core::comparison::{Tolerance, check_allclose_and_pcc, check_with_pcc};

use crate::config::SweepConfig;
use crate::device::Device;
use crate::errors::Result;
use crate::ops::UnaryOp;
use crate::vectors::{SweepVector, generate_sharded_specs, invalidate_vector};

/// Exclusive upper bound of the per-run data seeds derived from the suite seed.
const MAX_DATA_SEED: u64 = 20_000_000;

/// How device outputs are compared against the host reference.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    /// Only the Pearson correlation coefficient is checked.
    #[default]
    Pcc,

    /// Both elementwise tolerances and the Pearson correlation coefficient are checked.
    AllcloseAndPcc,
}

/// Parameters of a single [`run`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RunOptions {
    /// Seed that the input data seed is derived from.
    pub seed: u64,
    pub tolerance: Tolerance,
    pub check: CheckMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { seed: 0, tolerance: Tolerance::default(), check: CheckMode::Pcc }
    }
}

/// Result of running one sweep vector.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepOutcome {
    passed: bool,
    message: String,
    e2e_perf: Duration,
}

impl SweepOutcome {
    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Correlation score, or the full comparison summary when elementwise tolerances are also checked.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Time spent running the operation on the device.
    pub fn e2e_perf(&self) -> Duration {
        self.e2e_perf
    }
}

/// Runs `op` on the input described by `vector` and compares the device output against the host reference.
///
/// Errors are returned for failures that prevent the comparison from happening at all (an unresolvable shard spec,
/// a device failure, or a mismatched output shape). A comparison that runs and does not pass is reported through
/// [`SweepOutcome::passed`].
pub fn run<D: Device>(vector: &SweepVector, op: UnaryOp, device: &D, options: &RunOptions) -> Result<SweepOutcome> {
    let data_seed = StdRng::seed_from_u64(options.seed).gen_range(0..MAX_DATA_SEED);
    let mut rng = StdRng::seed_from_u64(data_seed);

    let parsed = vector.input_spec.parse().sanitize();
    let input = op.generate_input(parsed.input_shape.clone(), &mut rng)?;
    let golden = op.golden(&input);

    let memory_config = parsed.resolve()?.into_memory_config();
    let device_input = device.from_host(&input, vector.input_a_dtype, parsed.layout, &memory_config)?;

    let start = Instant::now();
    let device_output = device.unary(op, &device_input, &memory_config)?;
    let e2e_perf = start.elapsed();
    let output = device.to_host(&device_output)?;

    let (passed, message) = match options.check {
        CheckMode::Pcc => check_with_pcc(&golden, &output, options.tolerance.pcc)?,
        CheckMode::AllcloseAndPcc => check_allclose_and_pcc(&golden, &output, &options.tolerance)?.into_result_tuple(),
    };
    tracing::debug!(
        op = %op,
        shape = ?parsed.input_shape,
        dtype = %vector.input_a_dtype,
        data_seed,
        passed,
        e2e_perf_us = e2e_perf.as_micros() as u64,
        "ran sweep vector"
    );
    Ok(SweepOutcome { passed, message, e2e_perf })
}

// ---------------------------------------------------------------------------
// Suites
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStatus {
    Passed,
    Failed,

    /// The vector was invalidated and not run.
    Skipped,

    /// The run could not complete.
    Errored,
}

/// Outcome of one vector within a [`SuiteReport`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorResult {
    pub index: usize,
    pub vector: SweepVector,
    pub status: VectorStatus,

    /// Comparison message, invalidation reason, or error description, depending on the status.
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub e2e_perf_ns: Option<u64>,
}

/// Results of running every vector of a suite.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub op: UnaryOp,
    pub device: String,
    pub results: Vec<VectorResult>,
}

impl SuiteReport {
    /// Number of vectors with the given status.
    pub fn count(&self, status: VectorStatus) -> usize {
        self.results.iter().filter(|result| result.status == status).count()
    }

    /// Returns `true` if no vector failed or errored.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|result| matches!(result.status, VectorStatus::Passed | VectorStatus::Skipped))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        tracing::info!(path = %path.display(), "wrote suite report");
        Ok(())
    }
}

/// Builds the vectors of the suite described by `config`, in generation order.
pub fn suite_vectors(config: &SweepConfig) -> Vec<SweepVector> {
    let mut rng = StdRng::seed_from_u64(config.suite.seed);
    let specs = generate_sharded_specs(config.suite.num_shapes, &config.generation_options(), &mut rng);
    specs
        .into_iter()
        .flat_map(|input_spec| {
            config
                .suite
                .dtypes
                .iter()
                .map(move |&input_a_dtype| SweepVector { input_spec: input_spec.clone(), input_a_dtype })
        })
        .collect()
}

/// Generates, screens, and runs every vector of the suite described by `config` on `device`.
///
/// Individual vector failures are recorded in the report rather than returned, so a single bad vector never aborts
/// the suite.
pub fn run_suite<D: Device>(config: &SweepConfig, device: &D) -> Result<SuiteReport> {
    config.validate()?;
    let vectors = suite_vectors(config);
    tracing::info!(
        suite = %config.suite.name,
        op = %config.suite.op,
        device = device.name(),
        vector_count = vectors.len(),
        "running sweep suite"
    );

    let mut results = Vec::with_capacity(vectors.len());
    for (index, vector) in vectors.into_iter().enumerate() {
        let (status, message, e2e_perf_ns) = match invalidate_vector(&vector) {
            Some(reason) => (VectorStatus::Skipped, reason, None),
            None => {
                let options = RunOptions {
                    seed: config.suite.seed.wrapping_add(index as u64),
                    tolerance: config.tolerance,
                    check: config.suite.check,
                };
                match run(&vector, config.suite.op, device, &options) {
                    Ok(outcome) => {
                        let status = if outcome.passed() { VectorStatus::Passed } else { VectorStatus::Failed };
                        let e2e_perf_ns = u64::try_from(outcome.e2e_perf().as_nanos()).unwrap_or(u64::MAX);
                        (status, outcome.message, Some(e2e_perf_ns))
                    }
                    Err(error) => {
                        tracing::warn!(index, error = %error, "sweep vector errored");
                        (VectorStatus::Errored, error.to_string(), None)
                    }
                }
            }
        };
        results.push(VectorResult { index, vector, status, message, e2e_perf_ns });
    }

    let report = SuiteReport {
        suite: config.suite.name.clone(),
        op: config.suite.op,
        device: device.name().to_string(),
        results,
    };
    tracing::info!(
        passed = report.count(VectorStatus::Passed),
        failed = report.count(VectorStatus::Failed),
        skipped = report.count(VectorStatus::Skipped),
        errored = report.count(VectorStatus::Errored),
        "finished sweep suite"
    );
    Ok(report)
}
