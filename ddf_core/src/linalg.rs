//! Linear algebra helpers shared by the filter recursions.
//!
//! Symmetric positive definite matrices (noise covariances, information
//! sums) are inverted through a Cholesky factorization; general square
//! matrices (the transition matrix) through LU with a pivot check.
//! Anything near-singular fails fast with [`FusionError::SingularMatrix`].

use crate::error::FusionError;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Relative pivot / asymmetry tolerance used for all singularity checks.
pub const SINGULARITY_TOLERANCE: f64 = 1e-12;

/// Factorizes a symmetric positive definite matrix.
pub fn cholesky(mat: &DMatrix<f64>, context: &str) -> Result<Cholesky<f64, Dyn>, FusionError> {
    ensure_square(mat, context)?;
    ensure_symmetric(mat, context)?;

    mat.clone()
        .cholesky()
        .ok_or_else(|| FusionError::singular(format!("{} is not positive definite", context)))
}

/// Inverts a symmetric positive definite matrix via Cholesky.
pub fn spd_inverse(mat: &DMatrix<f64>, context: &str) -> Result<DMatrix<f64>, FusionError> {
    let inverse = cholesky(mat, context)?.inverse();
    ensure_finite(&inverse, context)?;
    Ok(symmetrize(&inverse))
}

/// Inverts a general square matrix via LU, rejecting tiny pivots.
pub fn lu_inverse(mat: &DMatrix<f64>, context: &str) -> Result<DMatrix<f64>, FusionError> {
    ensure_square(mat, context)?;

    let scale = mat.amax();
    if scale == 0.0 {
        return Err(FusionError::singular(format!("{} is the zero matrix", context)));
    }

    let lu = mat.clone().lu();
    let min_pivot = lu
        .u()
        .diagonal()
        .iter()
        .fold(f64::INFINITY, |acc, p| acc.min(p.abs()));
    if min_pivot <= SINGULARITY_TOLERANCE * scale {
        return Err(FusionError::singular(format!(
            "{} has pivot {:e} below tolerance",
            context, min_pivot
        )));
    }

    let inverse = lu
        .try_inverse()
        .ok_or_else(|| FusionError::singular(context.to_string()))?;
    ensure_finite(&inverse, context)?;
    Ok(inverse)
}

/// Solves `A x = b` for symmetric positive definite `A`.
pub fn spd_solve_vector(
    mat: &DMatrix<f64>,
    rhs: &DVector<f64>,
    context: &str,
) -> Result<DVector<f64>, FusionError> {
    let solution = cholesky(mat, context)?.solve(rhs);
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(FusionError::singular(format!("{} produced a non-finite solve", context)));
    }
    Ok(solution)
}

/// Solves `A X = B` for symmetric positive definite `A`.
pub fn spd_solve(
    mat: &DMatrix<f64>,
    rhs: &DMatrix<f64>,
    context: &str,
) -> Result<DMatrix<f64>, FusionError> {
    let solution = cholesky(mat, context)?.solve(rhs);
    ensure_finite(&solution, context)?;
    Ok(solution)
}

/// Returns `(A + Aᵀ) / 2`.
pub fn symmetrize(mat: &DMatrix<f64>) -> DMatrix<f64> {
    (mat + mat.transpose()) * 0.5
}

fn ensure_square(mat: &DMatrix<f64>, context: &str) -> Result<(), FusionError> {
    if mat.nrows() != mat.ncols() {
        return Err(FusionError::dimension(
            format!("{} (square)", context),
            mat.nrows(),
            mat.ncols(),
        ));
    }
    Ok(())
}

fn ensure_symmetric(mat: &DMatrix<f64>, context: &str) -> Result<(), FusionError> {
    let scale = mat.amax().max(1.0);
    let asymmetry = (mat - mat.transpose()).amax();
    if asymmetry > 1e-9 * scale {
        return Err(FusionError::singular(format!(
            "{} is not symmetric (asymmetry {:e})",
            context, asymmetry
        )));
    }
    Ok(())
}

fn ensure_finite(mat: &DMatrix<f64>, context: &str) -> Result<(), FusionError> {
    if mat.iter().any(|v| !v.is_finite()) {
        return Err(FusionError::singular(format!("{} produced non-finite values", context)));
    }
    Ok(())
}
