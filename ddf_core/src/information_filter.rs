//! The information filter: Kalman filtering in inverse-covariance form.
//!
//! Prediction is the expensive half (it inverts F and Q); correction is a
//! plain addition of H·R⁻¹ terms, which is what makes information from
//! independent sensors additive and fusion cheap.
//!
//! All functions are pure over an explicit model and state.

use crate::error::FusionError;
use crate::information::{InformationState, Measurement};
use crate::linalg;
use crate::model::LinearGaussianModel;
use nalgebra::{DMatrix, DVector};

/// Information-form prediction one step ahead.
///
/// With Mₖ = F⁻ᵀ Y F⁻¹ and Lₖ = I − Mₖ (Mₖ + Q⁻¹)⁻¹:
///
/// y⁻ = Lₖ F⁻ᵀ y,   Y⁻ = Lₖ Mₖ
///
/// A zero-information prior stays at zero information.
pub fn time_update(
    model: &LinearGaussianModel,
    vector: &DVector<f64>,
    matrix: &DMatrix<f64>,
) -> Result<(DVector<f64>, DMatrix<f64>), FusionError> {
    let n = model.state_dim();
    check_state(n, vector, matrix)?;

    let f_inv = linalg::lu_inverse(model.f(), "transition matrix F")?;
    let q_inv = linalg::spd_inverse(model.q(), "process noise Q")?;
    let f_inv_t = f_inv.transpose();

    // Information projected through the inverse dynamics
    let m_k = linalg::symmetrize(&(&f_inv_t * matrix * &f_inv));

    // M (M + Q⁻¹)⁻¹ = ((M + Q⁻¹)⁻¹ M)ᵀ since both factors are symmetric
    let gain = linalg::spd_solve(&(&m_k + &q_inv), &m_k, "M + Q⁻¹")?.transpose();
    let l_k = DMatrix::identity(n, n) - gain;

    let vector_pred = &l_k * &f_inv_t * vector;
    let matrix_pred = linalg::symmetrize(&(&l_k * &m_k));

    Ok((vector_pred, matrix_pred))
}

/// Information-form correction with observation `z`.
///
/// y⁺ = y⁻ + Hᵀ R⁻¹ z,   Y⁺ = Y⁻ + Hᵀ R⁻¹ H
pub fn measurement_update(
    model: &LinearGaussianModel,
    vector: &DVector<f64>,
    matrix: &DMatrix<f64>,
    z: &DVector<f64>,
) -> Result<(DVector<f64>, DMatrix<f64>), FusionError> {
    check_state(model.state_dim(), vector, matrix)?;
    let (vector_info, matrix_info) = observation_information(model, z)?;
    Ok((vector + vector_info, matrix + matrix_info))
}

/// The information contributed by a single observation: (Hᵀ R⁻¹ z, Hᵀ R⁻¹ H).
pub fn observation_information(
    model: &LinearGaussianModel,
    z: &DVector<f64>,
) -> Result<(DVector<f64>, DMatrix<f64>), FusionError> {
    if z.len() != model.observation_dim() {
        return Err(FusionError::dimension(
            "measurement vector",
            model.observation_dim(),
            z.len(),
        ));
    }

    let h = model.h();
    let r_inv_z = linalg::spd_solve_vector(model.r(), z, "observation noise R")?;
    let r_inv_h = linalg::spd_solve(model.r(), h, "observation noise R")?;

    let vector_info = h.transpose() * r_inv_z;
    let matrix_info = linalg::symmetrize(&(h.transpose() * r_inv_h));
    Ok((vector_info, matrix_info))
}

/// One full filter cycle: predict from `prior`, then correct with `measurement`.
///
/// The returned state is tagged with the measurement's step. Steps skipped
/// between the prior and the measurement are predicted through in turn.
pub fn run(
    model: &LinearGaussianModel,
    prior: &InformationState,
    measurement: &Measurement,
) -> Result<InformationState, FusionError> {
    if measurement.step <= prior.step {
        return Err(FusionError::StepMismatch {
            prior: prior.step,
            update: measurement.step,
        });
    }

    let (vector_pred, matrix_pred) =
        predict_steps(model, &prior.vector, &prior.matrix, measurement.step - prior.step)?;
    let (vector_post, matrix_post) =
        measurement_update(model, &vector_pred, &matrix_pred, &measurement.value)?;

    Ok(InformationState {
        step: measurement.step,
        vector: vector_post,
        matrix: matrix_post,
    })
}

/// Applies [`time_update`] `steps` times.
pub fn predict_steps(
    model: &LinearGaussianModel,
    vector: &DVector<f64>,
    matrix: &DMatrix<f64>,
    steps: u64,
) -> Result<(DVector<f64>, DMatrix<f64>), FusionError> {
    let mut vector = vector.clone();
    let mut matrix = matrix.clone();
    for _ in 0..steps {
        let (v, m) = time_update(model, &vector, &matrix)?;
        vector = v;
        matrix = m;
    }
    Ok((vector, matrix))
}

fn check_state(n: usize, vector: &DVector<f64>, matrix: &DMatrix<f64>) -> Result<(), FusionError> {
    if vector.len() != n {
        return Err(FusionError::dimension("information vector", n, vector.len()));
    }
    if matrix.shape() != (n, n) {
        return Err(FusionError::dimension("information matrix", n, matrix.nrows()));
    }
    Ok(())
}
