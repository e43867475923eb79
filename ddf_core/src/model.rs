//! Discrete linear-Gaussian state-space models.
//!
//! x_{k+1} = F x_k + G u_k + w_k,  w_k ~ N(0, Q)
//! z_k     = H x_k + v_k,          v_k ~ N(0, R)

use crate::error::FusionError;
use crate::linalg;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Immutable linear-Gaussian model for one target as seen by one sensor.
///
/// The target contributes the dynamics (F, G, M, Q, dt); the observing
/// agent contributes its sensor noise R via [`with_observation_noise`].
/// F and Q are checked for invertibility at construction because the
/// information-form time update inverts both.
///
/// [`with_observation_noise`]: LinearGaussianModel::with_observation_noise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearGaussianModel {
    /// State transition matrix (n × n)
    f: DMatrix<f64>,

    /// Control input matrix (n × p)
    g: DMatrix<f64>,

    /// Observation matrix (m × n)
    h: DMatrix<f64>,

    /// Process noise input matrix (kept for completeness, never used)
    m: DMatrix<f64>,

    /// Process noise covariance (n × n)
    q: DMatrix<f64>,

    /// Observation noise covariance (m × m)
    r: DMatrix<f64>,

    /// Time step in seconds
    dt: f64,
}

impl LinearGaussianModel {
    /// Creates a validated model with zero control and noise-input matrices.
    ///
    /// # Errors
    /// `DimensionMismatch` when shapes disagree, `SingularMatrix` when F is
    /// singular or Q / R is not symmetric positive definite.
    pub fn new(
        f: DMatrix<f64>,
        h: DMatrix<f64>,
        q: DMatrix<f64>,
        r: DMatrix<f64>,
        dt: f64,
    ) -> Result<Self, FusionError> {
        let n = f.nrows();
        let model = Self {
            g: DMatrix::zeros(n, n),
            m: DMatrix::zeros(n, n),
            f,
            h,
            q,
            r,
            dt,
        };
        model.validate()?;
        Ok(model)
    }

    /// Constant-position model: F = H = I, Q = q·I, R = r·I.
    pub fn constant_position(
        dim: usize,
        process_variance: f64,
        observation_variance: f64,
        dt: f64,
    ) -> Result<Self, FusionError> {
        Self::new(
            DMatrix::identity(dim, dim),
            DMatrix::identity(dim, dim),
            DMatrix::identity(dim, dim) * process_variance,
            DMatrix::identity(dim, dim) * observation_variance,
            dt,
        )
    }

    /// Planar constant-velocity model with state [px, py, vx, vy].
    ///
    /// Position is observed; Q is the discretized white-noise acceleration
    /// model scaled by `accel_variance`.
    pub fn constant_velocity(
        dt: f64,
        accel_variance: f64,
        observation_variance: f64,
    ) -> Result<Self, FusionError> {
        let mut f = DMatrix::identity(4, 4);
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;

        let mut h = DMatrix::zeros(2, 4);
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;

        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let mut q = DMatrix::zeros(4, 4);
        for axis in 0..2 {
            q[(axis, axis)] = dt3 / 3.0;
            q[(axis, axis + 2)] = dt2 / 2.0;
            q[(axis + 2, axis)] = dt2 / 2.0;
            q[(axis + 2, axis + 2)] = dt;
        }
        q *= accel_variance;

        Self::new(
            f,
            h,
            q,
            DMatrix::identity(2, 2) * observation_variance,
            dt,
        )
    }

    /// Sets the control input matrix G (n × p).
    pub fn with_control_input(mut self, g: DMatrix<f64>) -> Result<Self, FusionError> {
        if g.nrows() != self.state_dim() {
            return Err(FusionError::dimension("G rows", self.state_dim(), g.nrows()));
        }
        self.g = g;
        Ok(self)
    }

    /// Sets the (unused) process noise input matrix M.
    pub fn with_noise_input(mut self, m: DMatrix<f64>) -> Self {
        self.m = m;
        self
    }

    /// Returns a copy of this model observed through a different sensor.
    pub fn with_observation_noise(&self, r: DMatrix<f64>) -> Result<Self, FusionError> {
        let model = Self {
            r,
            ..self.clone()
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), FusionError> {
        let n = self.f.nrows();
        if self.f.ncols() != n {
            return Err(FusionError::dimension("F columns", n, self.f.ncols()));
        }
        if self.h.ncols() != n {
            return Err(FusionError::dimension("H columns", n, self.h.ncols()));
        }
        if self.q.shape() != (n, n) {
            return Err(FusionError::dimension("Q rows", n, self.q.nrows()));
        }
        let m = self.h.nrows();
        if self.r.shape() != (m, m) {
            return Err(FusionError::dimension("R rows", m, self.r.nrows()));
        }
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(FusionError::singular(format!("time step dt = {}", self.dt)));
        }

        linalg::lu_inverse(&self.f, "transition matrix F")?;
        linalg::cholesky(&self.q, "process noise Q")?;
        linalg::cholesky(&self.r, "observation noise R")?;
        Ok(())
    }

    /// Returns (n, m): state and observation dimensions.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.f.nrows(), self.h.nrows())
    }

    /// State dimension n.
    pub fn state_dim(&self) -> usize {
        self.f.nrows()
    }

    /// Observation dimension m.
    pub fn observation_dim(&self) -> usize {
        self.h.nrows()
    }

    pub fn f(&self) -> &DMatrix<f64> {
        &self.f
    }

    pub fn g(&self) -> &DMatrix<f64> {
        &self.g
    }

    pub fn h(&self) -> &DMatrix<f64> {
        &self.h
    }

    pub fn m(&self) -> &DMatrix<f64> {
        &self.m
    }

    pub fn q(&self) -> &DMatrix<f64> {
        &self.q
    }

    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }
}

/// Supplies the dynamics model of each target.
///
/// The returned model carries a placeholder R; each agent swaps in its own
/// sensor noise with [`LinearGaussianModel::with_observation_noise`].
pub trait ModelProvider {
    /// Returns the model for `target`, or `None` if the target is unknown.
    fn model(&self, target: crate::ids::TargetId) -> Option<&LinearGaussianModel>;
}
