//! Seeker sensors: true measurements plus correlated Gaussian noise.
//!
//! Noise is drawn as z = H x + L n with R = L Lᵀ (Cholesky) and n standard
//! normal. Each sample uses its own RNG seeded from (agent seed, target,
//! step), so a measurement does not depend on how many samples were drawn
//! before it. The synchronous and concurrent executors, and the centralized
//! reference, therefore all see the very same numbers.

use crate::oracle::Oracle;
use ddf_core::{linalg, AgentId, FusionError, Measurement, MeasurementSource, TargetId};
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One seeker's sensor.
#[derive(Debug, Clone)]
pub struct Sensor {
    agent: AgentId,

    /// Observation noise covariance R
    noise: DMatrix<f64>,

    /// Lower Cholesky factor of R
    noise_factor: DMatrix<f64>,

    /// Base seed for this sensor's samples
    seed: u64,

    /// Return true measurements without noise
    noiseless: bool,

    oracle: Arc<Oracle>,
}

impl Sensor {
    /// Creates a sensor with noise covariance `noise`.
    ///
    /// # Errors
    /// `SingularMatrix` if `noise` is not symmetric positive definite.
    pub fn new(
        agent: AgentId,
        noise: DMatrix<f64>,
        seed: u64,
        oracle: Arc<Oracle>,
    ) -> Result<Self, FusionError> {
        let noise_factor = linalg::cholesky(&noise, "sensor noise R")?.l();
        Ok(Self {
            agent,
            noise,
            noise_factor,
            seed,
            noiseless: false,
            oracle,
        })
    }

    /// Disables the noise (true measurements only).
    pub fn noiseless(mut self, noiseless: bool) -> Self {
        self.noiseless = noiseless;
        self
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }

    pub fn noise(&self) -> &DMatrix<f64> {
        &self.noise
    }

    /// Adds one draw of sensor noise to a true measurement.
    pub fn sample(&self, target: TargetId, step: u64, truth: &DVector<f64>) -> DVector<f64> {
        if self.noiseless {
            return truth.clone();
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.sample_seed(target, step));
        let standard = DVector::from_fn(truth.len(), |_, _| StandardNormal.sample(&mut rng));
        truth + &self.noise_factor * standard
    }

    fn sample_seed(&self, target: TargetId, step: u64) -> u64 {
        self.seed
            ^ (target.index() as u64 + 1).wrapping_mul(0xbf58476d1ce4e5b9)
            ^ step.wrapping_mul(0x94d049bb133111eb)
    }
}

impl MeasurementSource for Sensor {
    fn measure(
        &mut self,
        agent: AgentId,
        target: TargetId,
        step: u64,
    ) -> Result<Measurement, FusionError> {
        if agent != self.agent {
            return Err(FusionError::UnknownAgent(agent));
        }

        let truth = self
            .oracle
            .true_measurement(target, step)
            .ok_or(FusionError::MissingMeasurement { agent, target, step })?;
        if truth.len() != self.noise.nrows() {
            return Err(FusionError::dimension("sensor noise R", truth.len(), self.noise.nrows()));
        }

        Ok(Measurement::new(step, self.sample(target, step, &truth)))
    }
}

/// All seekers' sensors, addressed by agent.
#[derive(Debug, Clone, Default)]
pub struct SensorSuite {
    sensors: BTreeMap<AgentId, Sensor>,
}

impl SensorSuite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sensor: Sensor) {
        self.sensors.insert(sensor.agent(), sensor);
    }

    pub fn get(&self, agent: AgentId) -> Option<&Sensor> {
        self.sensors.get(&agent)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Splits the suite into per-agent sensors.
    pub fn into_sensors(self) -> BTreeMap<AgentId, Sensor> {
        self.sensors
    }
}

impl MeasurementSource for SensorSuite {
    fn measure(
        &mut self,
        agent: AgentId,
        target: TargetId,
        step: u64,
    ) -> Result<Measurement, FusionError> {
        self.sensors
            .get_mut(&agent)
            .ok_or(FusionError::UnknownAgent(agent))?
            .measure(agent, target, step)
    }
}

/// Derives a per-agent sensor seed from the master seed.
pub fn agent_seed(master: u64, agent: AgentId) -> u64 {
    master.wrapping_mul(0x9e3779b97f4a7c15)
        ^ (agent.index() as u64 + 1).wrapping_mul(0x517cc1b727220a95)
}
