//! Conjugate gradient for Hermitian positive-definite linear operators.

use num_traits::{Float, Zero};
use serde::{Deserialize, Serialize};

use crate::array::Array;
use crate::dtype::{RealScalar, Scalar};
use crate::error::{ADMMError, Result};
use crate::linop::LinearOperator;

/// Stopping parameters for [`cg`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgOptions {
    /// Relative tolerance on `||b - A x|| / ||b||`.
    pub tol: f64,
    /// Absolute tolerance on `||b - A x||`.
    pub atol: f64,
    /// Maximum number of iterations.
    pub max_iter: usize,
}

impl Default for CgOptions {
    fn default() -> Self {
        CgOptions {
            tol: 1e-4,
            atol: 0.0,
            max_iter: 100,
        }
    }
}

/// Outcome of a [`cg`] run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CgInfo {
    /// Iterations performed.
    pub iterations: usize,
    /// Final residual norm `||b - A x||`.
    pub residual: f64,
    /// Whether `residual <= max(tol * ||b||, atol)` was reached.
    pub converged: bool,
}

/// Solve `A x = b` by conjugate gradient, starting from `x0`.
///
/// Stops once `||b - A x|| <= max(tol * ||b||, atol)` or after
/// `options.max_iter` iterations. Running out of iterations is not an error:
/// the last iterate is returned with `converged == false`.
///
/// # Arguments
///
/// * `a` - Hermitian positive-definite operator with equal input and output shapes
/// * `b` - Right-hand side
/// * `x0` - Initial iterate
/// * `options` - Tolerances and iteration cap
///
/// # Returns
///
/// * `Ok((x, info))` with the final iterate and convergence information
/// * `Err(ADMMError::ShapeMismatch)` if the shapes are inconsistent
/// * `Err(ADMMError::Numerical)` if a search direction has non-positive or
///   non-finite curvature, which means `A` is not positive definite
pub fn cg<T: Scalar>(
    a: &LinearOperator<T>,
    b: &Array<T>,
    x0: &Array<T>,
    options: &CgOptions,
) -> Result<(Array<T>, CgInfo)> {
    if a.input_shape() != a.output_shape() {
        return Err(ADMMError::shape(
            "conjugate gradient operator",
            a.input_shape(),
            a.output_shape(),
        ));
    }
    let b_shape = b.shape();
    if &b_shape != a.output_shape() {
        return Err(ADMMError::shape(
            "conjugate gradient right-hand side",
            a.output_shape(),
            &b_shape,
        ));
    }

    let threshold = (options.tol * b.norm().as_f64()).max(options.atol);
    let mut x = x0.clone();
    let mut r = b.try_sub(&a.apply(&x)?)?;
    let mut p = r.clone();
    let mut rs = r.norm_sqr();
    let mut iterations = 0;

    while rs.sqrt().as_f64() > threshold && iterations < options.max_iter {
        let ap = a.apply(&p)?;
        let p_ap = p.vdot(&ap)?.re();
        if !(p_ap > T::Real::zero()) || !p_ap.is_finite() {
            return Err(ADMMError::Numerical(format!(
                "conjugate gradient curvature {} is not positive at iteration {}",
                p_ap, iterations
            )));
        }
        let alpha = T::from_real(rs / p_ap);
        x.add_scaled(alpha, &p)?;
        r.add_scaled(-alpha, &ap)?;
        let rs_new = r.norm_sqr();
        iterations += 1;
        let beta = T::from_real(rs_new / rs);
        p = r.try_add(&p.scaled(beta))?;
        rs = rs_new;
    }

    let residual = rs.sqrt().as_f64();
    Ok((
        x,
        CgInfo {
            iterations,
            residual,
            converged: residual <= threshold,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    use crate::array::Shape;
    use crate::linop;

    #[test]
    fn test_solves_spd_system() {
        let a = linop::matrix(array![[4.0f64, 1.0], [1.0, 3.0]]);
        let b = Array::from_vec(vec![1.0, 2.0]);
        let options = CgOptions {
            tol: 1e-12,
            ..CgOptions::default()
        };
        let (x, info) = cg(&a, &b, &Array::zeros(&Shape::from(2)), &options).unwrap();
        assert!(info.converged);
        assert!(info.iterations <= 2);
        let expected = Array::from_vec(vec![1.0 / 11.0, 7.0 / 11.0]);
        assert!(x.allclose(&expected, 1e-10, 1e-12));
    }

    #[test]
    fn test_already_converged_returns_immediately() {
        let a = linop::identity::<f64>(Shape::from(3));
        let b = Array::from_vec(vec![1.0, 2.0, 3.0]);
        let (x, info) = cg(&a, &b, &b, &CgOptions::default()).unwrap();
        assert_eq!(info.iterations, 0);
        assert!(info.converged);
        assert_eq!(x, b);
    }

    #[test]
    fn test_iteration_cap_is_not_an_error() {
        let a = linop::diagonal(Array::from_vec(vec![1.0f64, 10.0, 100.0]));
        let b = Array::from_vec(vec![1.0, 1.0, 1.0]);
        let options = CgOptions {
            tol: 1e-14,
            atol: 0.0,
            max_iter: 1,
        };
        let (_, info) = cg(&a, &b, &Array::zeros(&Shape::from(3)), &options).unwrap();
        assert_eq!(info.iterations, 1);
        assert!(!info.converged);
    }

    #[test]
    fn test_indefinite_operator_is_fatal() {
        let a = linop::diagonal(Array::from_vec(vec![-1.0f64, -2.0]));
        let b = Array::from_vec(vec![1.0, 1.0]);
        let err = cg(&a, &b, &Array::zeros(&Shape::from(2)), &CgOptions::default()).unwrap_err();
        assert!(matches!(err, ADMMError::Numerical(_)));
    }
}
