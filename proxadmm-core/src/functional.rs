//! Scalar-valued functionals and their proximal operators.
//!
//! For a functional `g` and step `t > 0` the proximal operator is
//!
//! ```text
//! prox_{g,t}(v) = argmin_u (1 / (2 t)) ||u - v||^2 + g(u)
//! ```
//!
//! Penalties used by the ADMM z-update implement [`Functional::prox`] in
//! closed form. Smooth data terms implement [`Functional::grad`] instead.

use std::sync::Arc;

use ndarray::{ArrayD, Axis};
use num_traits::{Float, One, Zero};

use crate::array::{Array, Shape};
use crate::dtype::{DType, Scalar};
use crate::error::{ADMMError, Result};
use crate::loss::SquaredL2Loss;

/// A scalar-valued function of an array.
pub trait Functional<T: Scalar>: Send + Sync {
    /// Short name used in messages.
    fn name(&self) -> &str;

    /// Whether the functional is differentiable.
    fn is_smooth(&self) -> bool;

    /// Whether [`Functional::value`] can be evaluated.
    fn has_eval(&self) -> bool {
        true
    }

    /// Whether [`Functional::prox`] is available.
    fn has_prox(&self) -> bool;

    fn value(&self, x: &Array<T>) -> Result<T::Real>;

    /// Proximal operator with step `step`.
    fn prox(&self, v: &Array<T>, step: T::Real) -> Result<Array<T>> {
        let _ = (v, step);
        Err(ADMMError::Unsupported(format!("{} has no proximal operator", self.name())))
    }

    /// Gradient, for smooth functionals.
    fn grad(&self, x: &Array<T>) -> Result<Array<T>> {
        let _ = x;
        Err(ADMMError::Unsupported(format!("{} has no gradient", self.name())))
    }

    /// Downcast used by solvers that exploit least-squares structure.
    fn as_squared_l2_loss(&self) -> Option<&SquaredL2Loss<T>> {
        None
    }
}

/// `scale * g` for a positive scalar.
///
/// The scale is folded into the proximal step: `prox_{s g, t}(v) = prox_{g, s t}(v)`.
/// A scaled [`SquaredL2Loss`] is still a squared-error loss, with scale `s` times
/// the inner one.
pub struct ScaledFunctional<T: Scalar> {
    scale: T::Real,
    inner: Arc<dyn Functional<T>>,
    name: String,
    loss: Option<SquaredL2Loss<T>>,
}

impl<T: Scalar> ScaledFunctional<T> {
    /// # Returns
    ///
    /// * `Err(ADMMError::Configuration)` unless `scale` is positive and finite
    pub fn new(scale: T::Real, inner: Arc<dyn Functional<T>>) -> Result<Self> {
        if !(scale > T::Real::zero() && scale.is_finite()) {
            return Err(ADMMError::Configuration(format!(
                "functional scale must be positive and finite, got {}",
                scale
            )));
        }
        let name = format!("{} * {}", scale, inner.name());
        let loss = inner.as_squared_l2_loss().map(|l| l.rescaled(scale));
        Ok(ScaledFunctional {
            scale,
            inner,
            name,
            loss,
        })
    }

    pub fn scale(&self) -> T::Real {
        self.scale
    }
}

impl<T: Scalar> Functional<T> for ScaledFunctional<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_smooth(&self) -> bool {
        self.inner.is_smooth()
    }

    fn has_eval(&self) -> bool {
        self.inner.has_eval()
    }

    fn has_prox(&self) -> bool {
        self.inner.has_prox()
    }

    fn value(&self, x: &Array<T>) -> Result<T::Real> {
        Ok(self.scale * self.inner.value(x)?)
    }

    fn prox(&self, v: &Array<T>, step: T::Real) -> Result<Array<T>> {
        self.inner.prox(v, self.scale * step)
    }

    fn grad(&self, x: &Array<T>) -> Result<Array<T>> {
        Ok(self.inner.grad(x)?.scaled(T::from_real(self.scale)))
    }

    fn as_squared_l2_loss(&self) -> Option<&SquaredL2Loss<T>> {
        self.loss.as_ref()
    }
}

/// Scaling by a positive constant for any concrete functional.
pub trait FunctionalExt<T: Scalar>: Functional<T> + Sized + 'static {
    fn scaled(self, scale: T::Real) -> Result<ScaledFunctional<T>> {
        ScaledFunctional::new(scale, Arc::new(self))
    }
}

impl<T: Scalar, F: Functional<T> + 'static> FunctionalExt<T> for F {}

/// The zero functional.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroFunctional;

impl<T: Scalar> Functional<T> for ZeroFunctional {
    fn name(&self) -> &str {
        "ZeroFunctional"
    }

    fn is_smooth(&self) -> bool {
        true
    }

    fn has_prox(&self) -> bool {
        true
    }

    fn value(&self, _x: &Array<T>) -> Result<T::Real> {
        Ok(T::Real::zero())
    }

    fn prox(&self, v: &Array<T>, _step: T::Real) -> Result<Array<T>> {
        Ok(v.clone())
    }

    fn grad(&self, x: &Array<T>) -> Result<Array<T>> {
        Ok(Array::zeros(&x.shape()))
    }
}

/// `sum |x_i|`.
#[derive(Clone, Copy, Debug, Default)]
pub struct L1Norm;

/// `v * max(0, 1 - t / |v|)`, the complex-aware soft threshold.
fn shrink<T: Scalar>(v: T, t: T::Real) -> T {
    let m = v.modulus();
    if m <= t {
        T::zero()
    } else {
        v * T::from_real((m - t) / m)
    }
}

impl<T: Scalar> Functional<T> for L1Norm {
    fn name(&self) -> &str {
        "L1Norm"
    }

    fn is_smooth(&self) -> bool {
        false
    }

    fn has_prox(&self) -> bool {
        true
    }

    fn value(&self, x: &Array<T>) -> Result<T::Real> {
        Ok(x.elements().fold(T::Real::zero(), |acc, v| acc + v.modulus()))
    }

    fn prox(&self, v: &Array<T>, step: T::Real) -> Result<Array<T>> {
        Ok(v.map(|x| shrink(x, step)))
    }
}

/// Mixed `l2,1` norm: the sum over groups of the `l2` norm within each group.
///
/// For a flat array a group is a line along `l2_axis`. For a blocked array
/// the groups run across blocks, which must all have the same shape; this is
/// the isotropic total variation penalty when applied to stacked finite
/// differences.
#[derive(Clone, Copy, Debug)]
pub struct L21Norm {
    pub l2_axis: usize,
}

impl Default for L21Norm {
    fn default() -> Self {
        L21Norm { l2_axis: 0 }
    }
}

impl L21Norm {
    pub fn new(l2_axis: usize) -> Self {
        L21Norm { l2_axis }
    }

    /// Group norms, with the grouped axis kept as length 1 for broadcasting.
    fn group_norms<T: Scalar>(&self, x: &Array<T>) -> Result<ArrayD<T::Real>> {
        match x {
            Array::Flat(a) => {
                if self.l2_axis >= a.ndim() {
                    return Err(ADMMError::Configuration(format!(
                        "l2 axis {} out of range for array of shape {}",
                        self.l2_axis,
                        x.shape()
                    )));
                }
                Ok(a.mapv(|v| v.modulus_sqr())
                    .sum_axis(Axis(self.l2_axis))
                    .mapv(Float::sqrt)
                    .insert_axis(Axis(self.l2_axis)))
            }
            Array::Blocked(blocks) => {
                let first = blocks.first().ok_or_else(|| {
                    ADMMError::Configuration("l2,1 norm of an empty blocked array".to_string())
                })?;
                let mut acc = first.mapv(|v| v.modulus_sqr());
                for b in &blocks[1..] {
                    if b.shape() != first.shape() {
                        return Err(ADMMError::shape(
                            "l2,1 norm across blocks",
                            &Shape::from(first.shape()),
                            &Shape::from(b.shape()),
                        ));
                    }
                    acc.zip_mut_with(b, |s, &v| *s = *s + v.modulus_sqr());
                }
                Ok(acc.mapv(Float::sqrt))
            }
        }
    }
}

impl<T: Scalar> Functional<T> for L21Norm {
    fn name(&self) -> &str {
        "L21Norm"
    }

    fn is_smooth(&self) -> bool {
        false
    }

    fn has_prox(&self) -> bool {
        true
    }

    fn value(&self, x: &Array<T>) -> Result<T::Real> {
        Ok(self.group_norms(x)?.sum())
    }

    fn prox(&self, v: &Array<T>, step: T::Real) -> Result<Array<T>> {
        let norms = self.group_norms(v)?;
        let factor = norms.mapv(|n| {
            if n <= step {
                T::zero()
            } else {
                T::from_real((n - step) / n)
            }
        });
        let scale_block = |b: &ArrayD<T>| -> Result<ArrayD<T>> {
            let f = factor.broadcast(b.shape()).ok_or_else(|| {
                ADMMError::shape("l2,1 prox", &Shape::from(b.shape()), &Shape::from(factor.shape()))
            })?;
            Ok(&f * b)
        };
        match v {
            Array::Flat(a) => Ok(Array::Flat(scale_block(a)?)),
            Array::Blocked(blocks) => blocks
                .iter()
                .map(scale_block)
                .collect::<Result<Vec<_>>>()
                .map(Array::Blocked),
        }
    }
}

/// `||x||_2^2`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SquaredL2Norm;

impl<T: Scalar> Functional<T> for SquaredL2Norm {
    fn name(&self) -> &str {
        "SquaredL2Norm"
    }

    fn is_smooth(&self) -> bool {
        true
    }

    fn has_prox(&self) -> bool {
        true
    }

    fn value(&self, x: &Array<T>) -> Result<T::Real> {
        Ok(x.norm_sqr())
    }

    fn prox(&self, v: &Array<T>, step: T::Real) -> Result<Array<T>> {
        let one = T::Real::one();
        let denom = one + step + step;
        Ok(v.scaled(T::from_real(one / denom)))
    }

    fn grad(&self, x: &Array<T>) -> Result<Array<T>> {
        Ok(x.scaled(T::from_f64(2.0)))
    }
}

/// Indicator of the non-negative orthant: 0 where every entry is `>= 0`,
/// infinity elsewhere. Real arrays only.
#[derive(Clone, Copy, Debug, Default)]
pub struct NonNegativeIndicator;

impl NonNegativeIndicator {
    fn require_real(dtype: DType) -> Result<()> {
        if dtype.is_complex() {
            return Err(ADMMError::Type(format!(
                "non-negative indicator requires real-valued input, got {}",
                dtype
            )));
        }
        Ok(())
    }
}

impl<T: Scalar> Functional<T> for NonNegativeIndicator {
    fn name(&self) -> &str {
        "NonNegativeIndicator"
    }

    fn is_smooth(&self) -> bool {
        false
    }

    fn has_prox(&self) -> bool {
        true
    }

    fn value(&self, x: &Array<T>) -> Result<T::Real> {
        Self::require_real(x.dtype())?;
        if x.elements().all(|v| v.re() >= T::Real::zero()) {
            Ok(T::Real::zero())
        } else {
            Ok(T::Real::infinity())
        }
    }

    fn prox(&self, v: &Array<T>, _step: T::Real) -> Result<Array<T>> {
        Self::require_real(v.dtype())?;
        Ok(v.map(|x| T::from_real(x.re().max(T::Real::zero()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    #[test]
    fn test_l1_prox_soft_threshold() {
        let v = Array::from_vec(vec![3.0f64, -0.5, -2.0]);
        let p = L1Norm.prox(&v, 1.0).unwrap();
        assert_eq!(p.to_vec(), vec![2.0, 0.0, -1.0]);
        assert_eq!(Functional::<f64>::value(&L1Norm, &v).unwrap(), 5.5);
    }

    #[test]
    fn test_l1_prox_complex_keeps_phase() {
        let v = Array::from_vec(vec![Complex::new(3.0f64, 4.0)]);
        let p = L1Norm.prox(&v, 2.5).unwrap().to_vec();
        assert!((p[0] - Complex::new(1.5, 2.0)).norm() < 1e-12);
    }

    #[test]
    fn test_scaled_prox_folds_scale_into_step() {
        let g = FunctionalExt::<f64>::scaled(L1Norm, 2.0).unwrap();
        let v = Array::from_vec(vec![3.0f64, -0.5]);
        assert_eq!(g.prox(&v, 0.5).unwrap(), L1Norm.prox(&v, 1.0).unwrap());
        assert_eq!(g.value(&v).unwrap(), 7.0);
        assert!(matches!(
            FunctionalExt::<f64>::scaled(L1Norm, -1.0),
            Err(ADMMError::Configuration(_))
        ));
    }

    #[test]
    fn test_scaled_loss_keeps_least_squares_structure() {
        let y = Array::from_vec(vec![1.0f64, -2.0]);
        let loss = SquaredL2Loss::new(y, crate::linop::identity(Shape::from(2))).unwrap();
        let g = FunctionalExt::<f64>::scaled(loss, 3.0).unwrap();
        assert_eq!(g.as_squared_l2_loss().unwrap().scale(), 1.5);
        let gg = FunctionalExt::<f64>::scaled(g, 2.0).unwrap();
        assert_eq!(gg.as_squared_l2_loss().unwrap().scale(), 3.0);
        let x = Array::from_vec(vec![0.0f64, 0.0]);
        assert_eq!(gg.value(&x).unwrap(), gg.as_squared_l2_loss().unwrap().value(&x).unwrap());

        let h = FunctionalExt::<f64>::scaled(L1Norm, 2.0).unwrap();
        assert!(h.as_squared_l2_loss().is_none());
    }

    #[test]
    fn test_l21_groups_along_axis() {
        // two groups along axis 0: columns (3, 4) and (0, 0)
        let v = Array::from_shape_vec(&[2, 2], vec![3.0f64, 0.0, 4.0, 0.0]).unwrap();
        let g = L21Norm::default();
        assert_eq!(g.value(&v).unwrap(), 5.0);
        let p = g.prox(&v, 2.5).unwrap();
        assert!(p.allclose(
            &Array::from_shape_vec(&[2, 2], vec![1.5, 0.0, 2.0, 0.0]).unwrap(),
            1e-12,
            1e-12
        ));
    }

    #[test]
    fn test_l21_blocked_groups_across_blocks() {
        let v: Array<f64> = Array::from_flat_vec(
            &Shape::blocked(vec![vec![2], vec![2]]),
            vec![3.0, 1.0, 4.0, 0.0],
        )
        .unwrap();
        assert_eq!(L21Norm::default().value(&v).unwrap(), 6.0);
        let mismatched: Array<f64> =
            Array::from_flat_vec(&Shape::blocked(vec![vec![2], vec![3]]), vec![0.0; 5]).unwrap();
        assert!(L21Norm::default().value(&mismatched).is_err());
    }

    #[test]
    fn test_squared_l2_prox() {
        let v = Array::from_vec(vec![3.0f64]);
        assert_eq!(SquaredL2Norm.prox(&v, 1.0).unwrap().to_vec(), vec![1.0]);
    }

    #[test]
    fn test_nonnegative_rejects_complex() {
        let v = Array::from_vec(vec![Complex::new(1.0f32, 0.0)]);
        assert!(matches!(NonNegativeIndicator.prox(&v, 1.0), Err(ADMMError::Type(_))));
        let r = Array::from_vec(vec![-1.0f32, 2.0]);
        assert_eq!(NonNegativeIndicator.prox(&r, 1.0).unwrap().to_vec(), vec![0.0, 2.0]);
        assert!(Functional::<f32>::value(&NonNegativeIndicator, &r).unwrap().is_infinite());
    }
}
