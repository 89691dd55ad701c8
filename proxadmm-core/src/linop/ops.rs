//! Operator overloading for [`LinearOperator`].
//!
//! Operations that can fail on shapes return [`Result`]:
//!
//! - `&a + &b`, `&a - &b`: sum and difference
//! - `&a * &b`: composition `a @ b`
//! - `&a * &x`: application to an array
//!
//! Scalar multiplication (`s * &a`, `&a * s`), division by a scalar
//! (`&a / s`) and negation (`-&a`) cannot fail.
//!
//! Adding an array to an operator does not type-check:
//!
//! ```compile_fail
//! use proxadmm_core::array::{Array, Shape};
//! use proxadmm_core::linop;
//!
//! let a = linop::identity::<f64>(Shape::from(3));
//! let x = Array::<f64>::zeros(&Shape::from(3));
//! let _ = &a + &x;
//! ```
//!
//! Neither does dividing a scalar by an operator:
//!
//! ```compile_fail
//! use proxadmm_core::array::Shape;
//! use proxadmm_core::linop;
//!
//! let a = linop::identity::<f64>(Shape::from(3));
//! let _ = 2.0 / &a;
//! ```

use std::ops::{Add, Div, Mul, Neg, Sub};

use num_complex::Complex;

use super::LinearOperator;
use crate::array::Array;
use crate::dtype::Scalar;
use crate::error::Result;

impl<T: Scalar> Add<&LinearOperator<T>> for &LinearOperator<T> {
    type Output = Result<LinearOperator<T>>;

    fn add(self, rhs: &LinearOperator<T>) -> Self::Output {
        self.try_add(rhs)
    }
}

impl<T: Scalar> Add<LinearOperator<T>> for LinearOperator<T> {
    type Output = Result<LinearOperator<T>>;

    fn add(self, rhs: LinearOperator<T>) -> Self::Output {
        self.try_add(&rhs)
    }
}

impl<T: Scalar> Sub<&LinearOperator<T>> for &LinearOperator<T> {
    type Output = Result<LinearOperator<T>>;

    fn sub(self, rhs: &LinearOperator<T>) -> Self::Output {
        self.try_sub(rhs)
    }
}

impl<T: Scalar> Sub<LinearOperator<T>> for LinearOperator<T> {
    type Output = Result<LinearOperator<T>>;

    fn sub(self, rhs: LinearOperator<T>) -> Self::Output {
        self.try_sub(&rhs)
    }
}

impl<T: Scalar> Mul<&LinearOperator<T>> for &LinearOperator<T> {
    type Output = Result<LinearOperator<T>>;

    fn mul(self, rhs: &LinearOperator<T>) -> Self::Output {
        self.compose(rhs)
    }
}

impl<T: Scalar> Mul<&Array<T>> for &LinearOperator<T> {
    type Output = Result<Array<T>>;

    fn mul(self, rhs: &Array<T>) -> Self::Output {
        self.apply(rhs)
    }
}

impl<T: Scalar> Neg for &LinearOperator<T> {
    type Output = LinearOperator<T>;

    fn neg(self) -> Self::Output {
        self.negate()
    }
}

impl<T: Scalar> Neg for LinearOperator<T> {
    type Output = LinearOperator<T>;

    fn neg(self) -> Self::Output {
        self.negate()
    }
}

// Scalars on either side need concrete impls: `impl<T> Mul<&LinearOperator<T>> for T`
// is not allowed for a foreign type parameter.
macro_rules! impl_scalar_ops {
    ($($t:ty),*) => {
        $(
            impl Mul<$t> for &LinearOperator<$t> {
                type Output = LinearOperator<$t>;

                fn mul(self, rhs: $t) -> Self::Output {
                    self.scale(rhs)
                }
            }

            impl Mul<$t> for LinearOperator<$t> {
                type Output = LinearOperator<$t>;

                fn mul(self, rhs: $t) -> Self::Output {
                    self.scale(rhs)
                }
            }

            impl Mul<&LinearOperator<$t>> for $t {
                type Output = LinearOperator<$t>;

                fn mul(self, rhs: &LinearOperator<$t>) -> Self::Output {
                    rhs.scale(self)
                }
            }

            impl Mul<LinearOperator<$t>> for $t {
                type Output = LinearOperator<$t>;

                fn mul(self, rhs: LinearOperator<$t>) -> Self::Output {
                    rhs.scale(self)
                }
            }

            impl Div<$t> for &LinearOperator<$t> {
                type Output = LinearOperator<$t>;

                fn div(self, rhs: $t) -> Self::Output {
                    self.scale(<$t as num_traits::One>::one() / rhs)
                }
            }

            impl Div<$t> for LinearOperator<$t> {
                type Output = LinearOperator<$t>;

                fn div(self, rhs: $t) -> Self::Output {
                    self.scale(<$t as num_traits::One>::one() / rhs)
                }
            }
        )*
    };
}

impl_scalar_ops!(f32, f64, Complex<f32>, Complex<f64>);
