//! Measurement feed consumed by the fusion nodes.

use crate::error::FusionError;
use crate::ids::{AgentId, TargetId};
use crate::information::Measurement;
use std::collections::BTreeMap;

/// Supplies the measurement a given agent takes of a given target.
///
/// Implementations may be deterministic (true measurements from a truth
/// model) or stochastic (sampled sensor noise). The engine treats a missing
/// measurement as fatal.
pub trait MeasurementSource {
    /// Returns the measurement `agent` takes of `target` at `step`.
    ///
    /// # Errors
    /// `MissingMeasurement` when no observation exists for that step.
    fn measure(
        &mut self,
        agent: AgentId,
        target: TargetId,
        step: u64,
    ) -> Result<Measurement, FusionError>;
}

/// A pre-recorded measurement log.
///
/// Useful for replaying a fixed data set through several filters so that
/// all of them see exactly the same numbers.
#[derive(Debug, Clone, Default)]
pub struct RecordedMeasurements {
    entries: BTreeMap<(AgentId, TargetId, u64), Measurement>,
}

impl RecordedMeasurements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a measurement; a later insert for the same key replaces it.
    pub fn insert(&mut self, agent: AgentId, target: TargetId, measurement: Measurement) {
        self.entries.insert((agent, target, measurement.step), measurement);
    }

    /// Looks up a recorded measurement without consuming it.
    pub fn get(&self, agent: AgentId, target: TargetId, step: u64) -> Option<&Measurement> {
        self.entries.get(&(agent, target, step))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MeasurementSource for RecordedMeasurements {
    fn measure(
        &mut self,
        agent: AgentId,
        target: TargetId,
        step: u64,
    ) -> Result<Measurement, FusionError> {
        self.get(agent, target, step)
            .cloned()
            .ok_or(FusionError::MissingMeasurement { agent, target, step })
    }
}

impl<S: MeasurementSource + ?Sized> MeasurementSource for &mut S {
    fn measure(
        &mut self,
        agent: AgentId,
        target: TargetId,
        step: u64,
    ) -> Result<Measurement, FusionError> {
        (**self).measure(agent, target, step)
    }
}
