//! Ground truth oracle for simulation.
//!
//! The Oracle owns every hider's true trajectory. Each hider's initial state
//! is propagated with its own transition matrix (x_{k+1} = F x_k), so the
//! truth follows exactly the dynamics the seekers assume. True measurements
//! are H x_k; sensor noise is added by [`crate::sensor::Sensor`].

use ddf_core::{LinearGaussianModel, ModelProvider, TargetId};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A hider and its true trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hider {
    /// Target id
    pub id: TargetId,

    /// Dynamics shared with every seeker (R is a placeholder)
    pub model: LinearGaussianModel,

    /// True state at steps 0..=N
    pub trajectory: Vec<DVector<f64>>,
}

impl Hider {
    /// Planar position at `step` (first two state components).
    pub fn position(&self, step: u64) -> Option<[f64; 2]> {
        let state = self.trajectory.get(step as usize)?;
        if state.len() < 2 {
            return None;
        }
        Some([state[0], state[1]])
    }
}

/// The Oracle - knows where every hider really is.
#[derive(Debug, Clone, Default)]
pub struct Oracle {
    hiders: BTreeMap<TargetId, Hider>,

    /// Last step with a propagated truth
    horizon: u64,
}

impl Oracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hider with the given dynamics and initial state.
    ///
    /// The trajectory is propagated to the current horizon immediately.
    pub fn spawn_hider(&mut self, id: TargetId, model: LinearGaussianModel, initial: DVector<f64>) {
        let mut hider = Hider {
            id,
            model,
            trajectory: vec![initial],
        };
        Self::extend(&mut hider, self.horizon);
        self.hiders.insert(id, hider);
    }

    /// Propagates every trajectory up to and including `horizon`.
    pub fn propagate_to(&mut self, horizon: u64) {
        if horizon <= self.horizon {
            return;
        }
        self.horizon = horizon;
        for hider in self.hiders.values_mut() {
            Self::extend(hider, horizon);
        }
    }

    fn extend(hider: &mut Hider, horizon: u64) {
        while (hider.trajectory.len() as u64) <= horizon {
            let last = &hider.trajectory[hider.trajectory.len() - 1];
            let next = hider.model.f() * last;
            hider.trajectory.push(next);
        }
    }

    /// True state of `target` at `step`.
    pub fn truth(&self, target: TargetId, step: u64) -> Option<&DVector<f64>> {
        self.hiders.get(&target)?.trajectory.get(step as usize)
    }

    /// Noise-free measurement H x of `target` at `step`.
    pub fn true_measurement(&self, target: TargetId, step: u64) -> Option<DVector<f64>> {
        let hider = self.hiders.get(&target)?;
        let state = hider.trajectory.get(step as usize)?;
        Some(hider.model.h() * state)
    }

    pub fn hider(&self, target: TargetId) -> Option<&Hider> {
        self.hiders.get(&target)
    }

    pub fn hiders(&self) -> impl Iterator<Item = &Hider> + '_ {
        self.hiders.values()
    }

    pub fn horizon(&self) -> u64 {
        self.horizon
    }
}

impl ModelProvider for Oracle {
    fn model(&self, target: TargetId) -> Option<&LinearGaussianModel> {
        self.hiders.get(&target).map(|h| &h.model)
    }
}
