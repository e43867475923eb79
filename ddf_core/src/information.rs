//! Information-form beliefs, measurements and their mean/covariance views.

use crate::error::FusionError;
use crate::linalg;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Gaussian belief in information form at one time step.
///
/// `vector` is y = P⁻¹x and `matrix` is Y = P⁻¹. A zero matrix is the flat
/// prior (no information); the mean/covariance form only exists once Y is
/// invertible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationState {
    /// Step index this belief refers to
    pub step: u64,

    /// Information vector y (n)
    pub vector: DVector<f64>,

    /// Information matrix Y (n × n)
    pub matrix: DMatrix<f64>,
}

impl InformationState {
    /// Creates a state, checking that y and Y agree in dimension.
    pub fn new(step: u64, vector: DVector<f64>, matrix: DMatrix<f64>) -> Result<Self, FusionError> {
        let n = vector.len();
        if matrix.shape() != (n, n) {
            return Err(FusionError::dimension(
                "information matrix",
                n,
                matrix.nrows().max(matrix.ncols()),
            ));
        }
        Ok(Self { step, vector, matrix })
    }

    /// Zero information (flat prior) of dimension `dim`.
    pub fn zeros(step: u64, dim: usize) -> Self {
        Self {
            step,
            vector: DVector::zeros(dim),
            matrix: DMatrix::zeros(dim, dim),
        }
    }

    /// Converts a mean/covariance pair into information form.
    pub fn from_moments(
        step: u64,
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
    ) -> Result<Self, FusionError> {
        if covariance.shape() != (mean.len(), mean.len()) {
            return Err(FusionError::dimension("covariance", mean.len(), covariance.nrows()));
        }
        let matrix = linalg::spd_inverse(covariance, "covariance")?;
        let vector = &matrix * mean;
        Ok(Self { step, vector, matrix })
    }

    /// State dimension n.
    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    /// True when no information has been accumulated.
    pub fn is_uninformed(&self) -> bool {
        self.matrix.iter().all(|v| *v == 0.0)
    }

    /// Adds another belief's information (fusion of independent sources).
    pub fn add_information(
        &mut self,
        vector: &DVector<f64>,
        matrix: &DMatrix<f64>,
    ) -> Result<(), FusionError> {
        self.check_shape(vector, matrix)?;
        self.vector += vector;
        self.matrix += matrix;
        Ok(())
    }

    /// Returns `self - other`, keeping this state's step.
    pub fn difference(&self, other: &InformationState) -> Result<InformationState, FusionError> {
        self.check_shape(&other.vector, &other.matrix)?;
        Ok(Self {
            step: self.step,
            vector: &self.vector - &other.vector,
            matrix: &self.matrix - &other.matrix,
        })
    }

    /// Returns `self + other`, keeping this state's step.
    pub fn sum(&self, other: &InformationState) -> Result<InformationState, FusionError> {
        let mut total = self.clone();
        total.add_information(&other.vector, &other.matrix)?;
        Ok(total)
    }

    /// Recovers the mean/covariance view: P = Y⁻¹, x = P y.
    ///
    /// # Errors
    /// `SingularMatrix` while the belief is not yet fully observable.
    pub fn to_estimate(&self) -> Result<StateEstimate, FusionError> {
        let covariance = linalg::spd_inverse(&self.matrix, "information matrix Y")?;
        let mean = linalg::spd_solve_vector(&self.matrix, &self.vector, "information matrix Y")?;
        Ok(StateEstimate {
            step: self.step,
            mean,
            covariance,
        })
    }

    fn check_shape(&self, vector: &DVector<f64>, matrix: &DMatrix<f64>) -> Result<(), FusionError> {
        let n = self.dim();
        if vector.len() != n {
            return Err(FusionError::dimension("information vector", n, vector.len()));
        }
        if matrix.shape() != (n, n) {
            return Err(FusionError::dimension("information matrix", n, matrix.nrows()));
        }
        Ok(())
    }
}

/// An observation of one target taken at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Step at which the observation was taken
    pub step: u64,

    /// Observation vector z (m)
    pub value: DVector<f64>,
}

impl Measurement {
    pub fn new(step: u64, value: DVector<f64>) -> Self {
        Self { step, value }
    }
}

/// Mean/covariance view of an [`InformationState`], used for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEstimate {
    pub step: u64,
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

/// 95% confidence in two dimensions (χ² with 2 DOF).
pub const CHI2_2DOF_95: f64 = 5.991;

impl StateEstimate {
    /// Two-sigma bound of state component `index`.
    pub fn two_sigma(&self, index: usize) -> Option<f64> {
        if index >= self.mean.len() {
            return None;
        }
        Some(2.0 * self.covariance[(index, index)].max(0.0).sqrt())
    }

    /// Two-sigma bounds of all state components.
    pub fn two_sigma_bounds(&self) -> DVector<f64> {
        self.covariance.diagonal().map(|v| 2.0 * v.max(0.0).sqrt())
    }

    /// Confidence ellipse of the (`i`, `j`) marginal.
    ///
    /// `chi2` scales the ellipse; [`CHI2_2DOF_95`] gives the 95% region.
    pub fn covariance_ellipse(&self, i: usize, j: usize, chi2: f64) -> Option<CovarianceEllipse> {
        let n = self.mean.len();
        if i >= n || j >= n || i == j {
            return None;
        }

        let a = self.covariance[(i, i)];
        let b = self.covariance[(i, j)];
        let c = self.covariance[(j, j)];

        // Closed-form eigen decomposition of the 2×2 block
        let half_trace = 0.5 * (a + c);
        let radius = (0.25 * (a - c) * (a - c) + b * b).sqrt();
        let major = (half_trace + radius).max(0.0);
        let minor = (half_trace - radius).max(0.0);
        let orientation = 0.5 * (2.0 * b).atan2(a - c);

        Some(CovarianceEllipse {
            center: [self.mean[i], self.mean[j]],
            semi_major: (chi2 * major).sqrt(),
            semi_minor: (chi2 * minor).sqrt(),
            orientation,
        })
    }
}

/// Confidence ellipse of a 2D marginal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CovarianceEllipse {
    pub center: [f64; 2],
    pub semi_major: f64,
    pub semi_minor: f64,
    /// Angle of the major axis from the first component's axis (radians)
    pub orientation: f64,
}
