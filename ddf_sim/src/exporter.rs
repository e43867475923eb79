//! JSON exporter for estimate histories.
//!
//! Dumps every seeker's estimate, two-sigma bounds and 95% covariance
//! ellipse per step, next to the truth and the centralized reference, for
//! plotting outside the simulator.

use crate::error::SimError;
use crate::world::{SeekerInfo, SimWorld};
use ddf_core::{AgentId, CovarianceEllipse, InformationState, TargetId, CHI2_2DOF_95};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// True position of a hider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiderPosition {
    pub target: TargetId,
    pub x: f64,
    pub y: f64,
}

/// One belief at one step, in display form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateRecord {
    /// Seeker holding the belief (`None` for the centralized reference)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentId>,

    pub target: TargetId,

    /// Trace of the information matrix
    pub information: f64,

    /// Mean, once the belief is fully observable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<Vec<f64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_sigma: Option<Vec<f64>>,

    /// 95% ellipse of the position marginal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ellipse: Option<CovarianceEllipse>,
}

impl EstimateRecord {
    pub fn new(agent: Option<AgentId>, target: TargetId, info: &InformationState) -> Self {
        let estimate = info.to_estimate().ok();
        Self {
            agent,
            target,
            information: info.matrix.trace(),
            mean: estimate.as_ref().map(|e| e.mean.iter().copied().collect()),
            two_sigma: estimate.as_ref().map(|e| e.two_sigma_bounds().iter().copied().collect()),
            ellipse: estimate.as_ref().and_then(|e| e.covariance_ellipse(0, 1, CHI2_2DOF_95)),
        }
    }
}

/// A single step of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFrame {
    pub step: u64,
    pub hiders: Vec<HiderPosition>,
    pub estimates: Vec<EstimateRecord>,
    pub centralized: Vec<EstimateRecord>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    pub noiseless: bool,

    pub seekers: Vec<SeekerInfo>,

    /// All frames
    pub frames: Vec<StepFrame>,

    /// Final results
    pub passed: bool,

    /// Final worst position error if applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_position_error: Option<f64>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, noiseless: bool) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            noiseless,
            seekers: Vec::new(),
            frames: Vec::new(),
            passed: false,
            final_position_error: None,
        }
    }

    /// Collects every committed step of `world`.
    pub fn from_world(scenario: &str, world: &SimWorld) -> Self {
        let mut export = Self::new(scenario, world.config.seed, world.config.noiseless);
        export.seekers = world.seekers().to_vec();
        let targets = world.targets();

        for step in 0..=world.current_step() {
            let hiders = targets
                .iter()
                .filter_map(|&target| {
                    let [x, y] = world.oracle().hider(target)?.position(step)?;
                    Some(HiderPosition { target, x, y })
                })
                .collect();

            let mut estimates = Vec::new();
            for node in world.network().nodes() {
                for &target in &targets {
                    if let Some(info) = node.history(target).and_then(|h| h.get(step as usize)) {
                        estimates.push(EstimateRecord::new(Some(node.id()), target, info));
                    }
                }
            }

            let centralized = targets
                .iter()
                .filter_map(|&target| {
                    let info = world.centralized(target)?.history().get(step as usize)?;
                    Some(EstimateRecord::new(None, target, info))
                })
                .collect();

            export.add_frame(StepFrame {
                step,
                hiders,
                estimates,
                centralized,
            });
        }

        export
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: StepFrame) {
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, position_error: Option<f64>) {
        self.passed = passed;
        self.final_position_error = position_error;
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> Result<(), SimError> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
