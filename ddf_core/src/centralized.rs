//! Centralized information filter used as a reference.
//!
//! A single filter that sees every agent's measurement of one target. With
//! independent sensor noise its posterior is the best any decentralized
//! scheme can reach, so fused estimates should never carry more information
//! than it does.

use crate::error::FusionError;
use crate::ids::{AgentId, TargetId};
use crate::information::InformationState;
use crate::information_filter;
use crate::model::LinearGaussianModel;
use crate::source::MeasurementSource;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct CentralizedFilter {
    target: TargetId,

    /// Target dynamics
    dynamics: LinearGaussianModel,

    /// Per-sensor models (same dynamics, each with its own R)
    sensors: BTreeMap<AgentId, LinearGaussianModel>,

    history: Vec<InformationState>,
}

impl CentralizedFilter {
    /// Creates a filter for `target` starting from a flat prior.
    pub fn new(target: TargetId, dynamics: LinearGaussianModel) -> Self {
        let prior = InformationState::zeros(0, dynamics.state_dim());
        Self {
            target,
            dynamics,
            sensors: BTreeMap::new(),
            history: vec![prior],
        }
    }

    /// Registers the sensor of `agent`.
    pub fn add_sensor(
        &mut self,
        agent: AgentId,
        model: LinearGaussianModel,
    ) -> Result<(), FusionError> {
        let n = self.latest().dim();
        if model.state_dim() != n {
            return Err(FusionError::dimension("sensor model state", n, model.state_dim()));
        }
        self.sensors.insert(agent, model);
        Ok(())
    }

    /// Predicts to `step` and adds every sensor's measurement.
    pub fn step(
        &mut self,
        source: &mut dyn MeasurementSource,
        step: u64,
    ) -> Result<&InformationState, FusionError> {
        let prior = self.latest();
        if step <= prior.step {
            return Err(FusionError::StepMismatch {
                prior: prior.step,
                update: step,
            });
        }

        let (vector, matrix) = information_filter::predict_steps(
            &self.dynamics,
            &prior.vector,
            &prior.matrix,
            step - prior.step,
        )?;
        let mut posterior = InformationState::new(step, vector, matrix)?;

        for (&agent, model) in &self.sensors {
            let measurement = source.measure(agent, self.target, step)?;
            let (vector_info, matrix_info) =
                information_filter::observation_information(model, &measurement.value)?;
            posterior.add_information(&vector_info, &matrix_info)?;
        }

        self.history.push(posterior);
        Ok(self.latest())
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn latest(&self) -> &InformationState {
        &self.history[self.history.len() - 1]
    }

    pub fn history(&self) -> &[InformationState] {
        &self.history
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }
}
