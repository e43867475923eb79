//! Scenario runner - executes hide-and-seek scenarios and judges the outcome.
//!
//! A run passes when every round completes, every seeker ends within
//! [`ERROR_BOUND_SIGMAS`] standard deviations of the truth, and no seeker
//! claims more information than the centralized reference (which would mean
//! something was counted twice).

use crate::error::SimError;
use crate::exporter::SimExport;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use nalgebra::SymmetricEigen;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Largest tolerated position error, in standard deviations of the estimate
pub const ERROR_BOUND_SIGMAS: f64 = 6.0;

/// Tolerated excess information over the centralized filter (relative)
pub const CONSISTENCY_TOLERANCE: f64 = 1e-3;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all checks
    pub passed: bool,

    /// Rounds executed
    pub steps: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Per-step estimate history
    pub export: SimExport,
}

/// Metrics collected at the end of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Novel-information messages delivered
    pub messages_sent: u64,

    /// Worst final position error over all seekers
    pub max_position_error: f64,

    /// Worst final trace(Y) ratio of a linked seeker to the centralized filter
    pub max_information_ratio: f64,

    /// Same ratio for the unlinked control seekers, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_information_ratio: Option<f64>,
}

/// Runs scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    /// Master seed
    seed: u64,

    /// Rounds per scenario (scenario default when unset)
    steps: Option<u64>,

    /// Feed true measurements
    noiseless: bool,

    /// Use the tokio executor
    concurrent: bool,

    /// Channels exchange every n-th step
    communication_interval: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            steps: None,
            noiseless: false,
            concurrent: false,
            communication_interval: 1,
        }
    }

    /// Sets the number of rounds.
    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Disables sensor noise.
    pub fn with_noiseless(mut self, noiseless: bool) -> Self {
        self.noiseless = noiseless;
        self
    }

    /// Runs seekers as concurrent tasks.
    pub fn with_concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Sets the communication interval.
    pub fn with_communication_interval(mut self, interval: u64) -> Self {
        self.communication_interval = interval.max(1);
        self
    }

    /// Configuration a scenario will run with.
    pub fn config(&self, scenario: ScenarioId) -> SimConfig {
        SimConfig {
            seed: self.seed,
            steps: self.steps.unwrap_or_else(|| scenario.default_steps()),
            noiseless: self.noiseless,
            communication_interval: self.communication_interval,
        }
    }

    /// Runs a scenario and returns the result.
    ///
    /// Fusion errors abort the run and are returned as `Err`; a run that
    /// completes but fails a check returns `Ok` with `passed == false`.
    pub fn run(&self, scenario: ScenarioId) -> Result<ScenarioResult, SimError> {
        let config = self.config(scenario);
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let mut world = scenario.world(config)?.build()?;
        if self.concurrent {
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(world.run_concurrent())?;
        } else {
            world.run()?;
        }

        let (metrics, failures) = evaluate(&world);
        let passed = failures.is_empty();
        let failure_reason = if passed { None } else { Some(failures.join("; ")) };

        let mut export = SimExport::from_world(scenario.name(), &world);
        export.finalize(passed, Some(metrics.max_position_error));

        info!(
            "✓ {} complete: {} steps, {} messages, max error {:.3}, info ratio {:.4}",
            scenario.name(),
            world.current_step(),
            metrics.messages_sent,
            metrics.max_position_error,
            metrics.max_information_ratio
        );

        Ok(ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            steps: world.current_step(),
            failure_reason,
            metrics,
            export,
        })
    }
}

/// Computes end-of-run metrics and the list of failed checks.
fn evaluate(world: &SimWorld) -> (ScenarioMetrics, Vec<String>) {
    let step = world.current_step();
    let mut metrics = ScenarioMetrics {
        messages_sent: world.messages_sent(),
        ..Default::default()
    };
    let mut failures = Vec::new();

    for target in world.targets() {
        let truth = match world.oracle().truth(target, step) {
            Some(truth) => truth.clone(),
            None => {
                failures.push(format!("no truth for {} at step {}", target, step));
                continue;
            }
        };
        let reference = match world.centralized(target) {
            Some(filter) => filter.latest().matrix.clone(),
            None => continue,
        };
        let reference_trace = reference.trace();

        for seeker in world.seekers() {
            let Some(info) = world.network().node(seeker.id).and_then(|n| n.latest(target)) else {
                failures.push(format!("{} has no estimate of {}", seeker.id, target));
                continue;
            };

            let ratio = if reference_trace > 0.0 {
                info.matrix.trace() / reference_trace
            } else {
                0.0
            };
            if seeker.linked {
                metrics.max_information_ratio = metrics.max_information_ratio.max(ratio);

                let excess = SymmetricEigen::new(&info.matrix - &reference).eigenvalues.max();
                if excess > CONSISTENCY_TOLERANCE * reference_trace {
                    failures.push(format!(
                        "{} is overconfident about {} (excess information {:.3e})",
                        seeker.id, target, excess
                    ));
                }
            } else {
                let worst = metrics.control_information_ratio.unwrap_or(0.0);
                metrics.control_information_ratio = Some(worst.max(ratio));
            }

            match info.to_estimate() {
                Ok(estimate) => {
                    let dx = estimate.mean[0] - truth[0];
                    let dy = estimate.mean[1] - truth[1];
                    let error = dx.hypot(dy);
                    let sigma = (estimate.covariance[(0, 0)] + estimate.covariance[(1, 1)]).sqrt();
                    metrics.max_position_error = metrics.max_position_error.max(error);

                    if error > ERROR_BOUND_SIGMAS * sigma + 1e-9 {
                        failures.push(format!(
                            "{} misses {} by {:.3} (bound {:.3})",
                            seeker.id,
                            target,
                            error,
                            ERROR_BOUND_SIGMAS * sigma
                        ));
                    }
                }
                Err(e) => failures.push(format!("{} cannot estimate {}: {}", seeker.id, target, e)),
            }
        }
    }

    for failure in &failures {
        warn!("  {}", failure);
    }
    (metrics, failures)
}
