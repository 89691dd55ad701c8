//! Data-fidelity losses.

use num_traits::{One, Zero};

use crate::array::Array;
use crate::dtype::Scalar;
use crate::error::{ADMMError, Result};
use crate::functional::Functional;
use crate::linop::LinearOperator;

/// Weighted squared error `scale * ||y - A x||^2` with `scale = 1/2` by default.
///
/// The proximal operator has a closed form when `A` acts elementwise (an
/// identity or a diagonal operator, possibly scaled or summed). For any other
/// forward operator `prox` returns [`ADMMError::Unsupported`] and the ADMM
/// x-update should use [`crate::subproblem::LinearSubproblemSolver`].
pub struct SquaredL2Loss<T: Scalar> {
    y: Array<T>,
    a: LinearOperator<T>,
    scale: T::Real,
    diagonal: Option<Array<T>>,
}

impl<T: Scalar> SquaredL2Loss<T> {
    /// # Arguments
    ///
    /// * `y` - Observation, with shape `a.output_shape()`
    /// * `a` - Forward operator
    ///
    /// # Returns
    ///
    /// * `Err(ADMMError::ShapeMismatch)` if `y` does not match the operator output
    pub fn new(y: Array<T>, a: LinearOperator<T>) -> Result<Self> {
        let got = y.shape();
        if &got != a.output_shape() {
            return Err(ADMMError::shape("squared l2 loss observation", a.output_shape(), &got));
        }
        let diagonal = a.diagonal_entries();
        let half = T::Real::one() / (T::Real::one() + T::Real::one());
        Ok(SquaredL2Loss {
            y,
            a,
            scale: half,
            diagonal,
        })
    }

    /// The same loss with its scale multiplied by `s`.
    pub fn scaled(mut self, s: T::Real) -> Result<Self> {
        if !(s > T::Real::zero()) {
            return Err(ADMMError::Configuration(format!(
                "loss scale must be positive, got {}",
                s
            )));
        }
        self.scale = self.scale * s;
        Ok(self)
    }

    pub fn y(&self) -> &Array<T> {
        &self.y
    }

    pub fn a(&self) -> &LinearOperator<T> {
        &self.a
    }

    pub fn scale(&self) -> T::Real {
        self.scale
    }

    /// Copy of this loss with its scale multiplied by `s`, which the caller
    /// has already validated.
    pub(crate) fn rescaled(&self, s: T::Real) -> Self {
        SquaredL2Loss {
            scale: self.scale * s,
            ..self.clone()
        }
    }

    fn residual(&self, x: &Array<T>) -> Result<Array<T>> {
        self.a.apply(x)?.try_sub(&self.y)
    }
}

impl<T: Scalar> Clone for SquaredL2Loss<T> {
    fn clone(&self) -> Self {
        SquaredL2Loss {
            y: self.y.clone(),
            a: self.a.clone(),
            scale: self.scale,
            diagonal: self.diagonal.clone(),
        }
    }
}

impl<T: Scalar> Functional<T> for SquaredL2Loss<T> {
    fn name(&self) -> &str {
        "SquaredL2Loss"
    }

    fn is_smooth(&self) -> bool {
        true
    }

    fn has_prox(&self) -> bool {
        self.diagonal.is_some()
    }

    fn value(&self, x: &Array<T>) -> Result<T::Real> {
        Ok(self.scale * self.residual(x)?.norm_sqr())
    }

    /// `(v + 2 s t conj(d) y) / (1 + 2 s t |d|^2)` elementwise for diagonal `d`.
    fn prox(&self, v: &Array<T>, step: T::Real) -> Result<Array<T>> {
        let d = self.diagonal.as_ref().ok_or_else(|| {
            ADMMError::Unsupported(format!(
                "SquaredL2Loss prox requires an elementwise forward operator, got {:?}",
                self.a
            ))
        })?;
        let c = self.scale * step;
        let c2 = c + c;
        let num = d.zip_map(&self.y, "squared l2 loss prox", |di, yi| {
            di.conj() * yi * T::from_real(c2)
        })?;
        let num = v.try_add(&num)?;
        let den = d.map(|di| T::from_real(T::Real::one() + c2 * di.modulus_sqr()));
        num.zip_map(&den, "squared l2 loss prox", |n, q| n / q)
    }

    /// `2 s A^H (A x - y)`.
    fn grad(&self, x: &Array<T>) -> Result<Array<T>> {
        let g = self.a.adjoint(&self.residual(x)?)?;
        Ok(g.scaled(T::from_real(self.scale + self.scale)))
    }

    fn as_squared_l2_loss(&self) -> Option<&SquaredL2Loss<T>> {
        Some(self)
    }
}
