//! Strategies for the ADMM x-update.
//!
//! The x-update minimizes the augmented objective
//!
//! ```text
//! f(x) + sum_i (rho_i / 2) ||C_i x - z_i + u_i||^2
//! ```
//!
//! [`GenericSubproblemSolver`] only needs the gradient of `f`.
//! [`LinearSubproblemSolver`] requires `f` to be a [`SquaredL2Loss`] and
//! solves the normal equations by conjugate gradient.

use num_traits::{One, Zero};

use crate::array::Array;
use crate::cg::{CgInfo, CgOptions, cg};
use crate::dtype::Scalar;
use crate::error::{ADMMError, Result};
use crate::functional::Functional;
use crate::linop::LinearOperator;
use crate::loss::SquaredL2Loss;

/// Borrowed view of the solver state needed by an x-update.
pub struct XUpdate<'a, T: Scalar> {
    pub f: &'a dyn Functional<T>,
    pub c_list: &'a [LinearOperator<T>],
    pub rho_list: &'a [T::Real],
    pub z_list: &'a [Array<T>],
    pub u_list: &'a [Array<T>],
}

impl<T: Scalar> XUpdate<'_, T> {
    /// `f(x) + sum_i (rho_i / 2) ||C_i x - z_i + u_i||^2`.
    pub fn objective(&self, x: &Array<T>) -> Result<T::Real> {
        let mut total = self.f.value(x)?;
        let terms = self.c_list.iter().zip(self.rho_list).zip(self.z_list).zip(self.u_list);
        for (((c, &rho), z), u) in terms {
            let r = c.apply(x)?.try_sub(z)?.try_add(u)?;
            total = total + rho * r.norm_sqr() / (T::Real::one() + T::Real::one());
        }
        Ok(total)
    }

    /// Gradient of [`XUpdate::objective`].
    pub fn gradient(&self, x: &Array<T>) -> Result<Array<T>> {
        let mut g = self.f.grad(x)?;
        let terms = self.c_list.iter().zip(self.rho_list).zip(self.z_list).zip(self.u_list);
        for (((c, &rho), z), u) in terms {
            let r = c.apply(x)?.try_sub(z)?.try_add(u)?;
            g.add_scaled(T::from_real(rho), &c.adjoint(&r)?)?;
        }
        Ok(g)
    }
}

/// Result of one x-update.
#[derive(Debug, Clone)]
pub struct SubproblemReport<T> {
    pub x: Array<T>,
    /// Inner linear solve information, for strategies that run one.
    pub linear_solve: Option<CgInfo>,
}

/// A strategy for the x-update.
pub trait SubproblemSolver<T: Scalar>: Send {
    /// Called once by the ADMM solver before the first iteration.
    fn setup(
        &mut self,
        f: &dyn Functional<T>,
        c_list: &[LinearOperator<T>],
        rho_list: &[T::Real],
    ) -> Result<()>;

    /// Compute the next x from the current iterate `x`.
    fn solve(&mut self, update: &XUpdate<'_, T>, x: &Array<T>) -> Result<SubproblemReport<T>>;
}

/// Gradient descent with backtracking line search on the augmented objective.
///
/// Each x-update runs a fixed number of steps, warm started from the
/// current iterate. The step size carries over between calls: it is halved
/// until the sufficient decrease condition holds and doubled after each
/// accepted step.
pub struct GenericSubproblemSolver<T: Scalar> {
    inner_iter: usize,
    step: T::Real,
}

impl<T: Scalar> GenericSubproblemSolver<T> {
    /// Maximum number of step halvings per line search.
    const MAX_BACKTRACK: usize = 60;

    pub fn new(inner_iter: usize) -> Self {
        GenericSubproblemSolver {
            inner_iter,
            step: T::Real::one(),
        }
    }

    pub fn inner_iter(&self) -> usize {
        self.inner_iter
    }
}

impl<T: Scalar> Default for GenericSubproblemSolver<T> {
    fn default() -> Self {
        GenericSubproblemSolver::new(10)
    }
}

impl<T: Scalar> SubproblemSolver<T> for GenericSubproblemSolver<T> {
    fn setup(
        &mut self,
        f: &dyn Functional<T>,
        _c_list: &[LinearOperator<T>],
        _rho_list: &[T::Real],
    ) -> Result<()> {
        if self.inner_iter == 0 {
            return Err(ADMMError::Configuration(
                "generic subproblem solver needs at least one inner iteration".to_string(),
            ));
        }
        log::debug!(
            "Generic x-update: {} gradient steps per iteration on {}",
            self.inner_iter,
            f.name()
        );
        Ok(())
    }

    fn solve(&mut self, update: &XUpdate<'_, T>, x: &Array<T>) -> Result<SubproblemReport<T>> {
        let half = T::Real::one() / (T::Real::one() + T::Real::one());
        let mut x = x.clone();
        for _ in 0..self.inner_iter {
            let g = update.gradient(&x)?;
            let g_sq = g.norm_sqr();
            if g_sq == T::Real::zero() {
                break;
            }
            let phi = update.objective(&x)?;
            let mut t = self.step;
            let mut accepted = None;
            for _ in 0..Self::MAX_BACKTRACK {
                let mut candidate = x.clone();
                candidate.add_scaled(-T::from_real(t), &g)?;
                if update.objective(&candidate)? <= phi - half * t * g_sq {
                    accepted = Some(candidate);
                    break;
                }
                t = t * half;
            }
            match accepted {
                Some(candidate) => x = candidate,
                None => {
                    log::warn!("Line search found no decrease; keeping the current iterate");
                    break;
                }
            }
            self.step = t + t;
        }
        Ok(SubproblemReport {
            x,
            linear_solve: None,
        })
    }
}

/// Conjugate gradient solve of the x-update normal equations.
///
/// For `f(x) = s ||y - A x||^2` the x-update is the solution of
///
/// ```text
/// (2 s A^H A + sum_i rho_i C_i^H C_i) x = 2 s A^H y + sum_i rho_i C_i^H (z_i - u_i)
/// ```
///
/// which for the default `s = 1/2` is `(A^H A + sum_i rho_i C_i^H C_i) x = A^H y + ...`.
/// The left-hand side and the constant part of the right-hand side are
/// built once in [`SubproblemSolver::setup`]. Failing to reach the CG
/// tolerance within the iteration cap is logged and reported, and the last
/// CG iterate is used.
pub struct LinearSubproblemSolver<T: Scalar> {
    options: CgOptions,
    lhs: Option<LinearOperator<T>>,
    rhs_base: Option<Array<T>>,
}

impl<T: Scalar> LinearSubproblemSolver<T> {
    pub fn new(options: CgOptions) -> Self {
        LinearSubproblemSolver {
            options,
            lhs: None,
            rhs_base: None,
        }
    }

    pub fn options(&self) -> &CgOptions {
        &self.options
    }

    /// The normal-equations operator, available after setup.
    pub fn lhs(&self) -> Option<&LinearOperator<T>> {
        self.lhs.as_ref()
    }

    fn loss<'a>(f: &'a dyn Functional<T>) -> Result<&'a SquaredL2Loss<T>> {
        f.as_squared_l2_loss().ok_or_else(|| {
            ADMMError::Configuration(format!(
                "LinearSubproblemSolver requires f to be a SquaredL2Loss, got {}",
                f.name()
            ))
        })
    }
}

impl<T: Scalar> Default for LinearSubproblemSolver<T> {
    fn default() -> Self {
        LinearSubproblemSolver::new(CgOptions::default())
    }
}

impl<T: Scalar> SubproblemSolver<T> for LinearSubproblemSolver<T> {
    fn setup(
        &mut self,
        f: &dyn Functional<T>,
        c_list: &[LinearOperator<T>],
        rho_list: &[T::Real],
    ) -> Result<()> {
        let loss = Self::loss(f)?;
        let two_s = T::from_real(loss.scale() + loss.scale());
        let mut lhs = loss.a().gram_op().scale(two_s);
        for (c, &rho) in c_list.iter().zip(rho_list) {
            lhs = lhs.try_add(&c.gram_op().scale(T::from_real(rho)))?;
        }
        self.rhs_base = Some(loss.a().adjoint(loss.y())?.scaled(two_s));
        log::debug!("Linear x-update operator: {:?}", lhs);
        self.lhs = Some(lhs);
        Ok(())
    }

    fn solve(&mut self, update: &XUpdate<'_, T>, x: &Array<T>) -> Result<SubproblemReport<T>> {
        let (lhs, rhs_base) = match (&self.lhs, &self.rhs_base) {
            (Some(lhs), Some(rhs)) => (lhs, rhs),
            _ => {
                return Err(ADMMError::Configuration(
                    "LinearSubproblemSolver used before setup".to_string(),
                ));
            }
        };
        let mut rhs = rhs_base.clone();
        for (((c, &rho), z), u) in update
            .c_list
            .iter()
            .zip(update.rho_list)
            .zip(update.z_list)
            .zip(update.u_list)
        {
            rhs.add_scaled(T::from_real(rho), &c.adjoint(&z.try_sub(u)?)?)?;
        }
        let (x, info) = cg(lhs, &rhs, x, &self.options)?;
        if !info.converged {
            log::warn!(
                "CG did not reach tolerance {:e} in {} iterations (residual {:.3e})",
                self.options.tol,
                info.iterations,
                info.residual
            );
        }
        Ok(SubproblemReport {
            x,
            linear_solve: Some(info),
        })
    }
}
