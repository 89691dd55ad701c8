//! Element types and dtype promotion.
//!
//! Every array and operator in the crate is generic over a [`Scalar`]: `f32`,
//! `f64`, `Complex<f32>` or `Complex<f64>`. The runtime [`DType`] tag mirrors
//! the Rust type so that composite operators can report the dtype they
//! produce.

use std::fmt;
use std::ops::Neg;

use ndarray::{LinalgScalar, ScalarOperand};
use num_complex::Complex;
use num_traits::{Float, NumAssign};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Supported element types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    Complex64,
    Complex128,
}

impl DType {
    /// Whether values of this dtype carry an imaginary part.
    pub fn is_complex(self) -> bool {
        matches!(self, DType::Complex64 | DType::Complex128)
    }

    /// The real dtype with the same precision.
    pub fn real_dtype(self) -> DType {
        match self {
            DType::F32 | DType::Complex64 => DType::F32,
            DType::F64 | DType::Complex128 => DType::F64,
        }
    }

    /// Promote two dtypes to the dtype of a binary result.
    ///
    /// Complex wins over real, and the wider precision wins. Mixing `F64`
    /// with `Complex64` yields `Complex128` so that no precision is lost.
    pub fn promote(lhs: DType, rhs: DType) -> DType {
        use DType::*;

        if lhs == rhs {
            return lhs;
        }
        let wide = lhs.real_dtype() == F64 || rhs.real_dtype() == F64;
        match (lhs.is_complex() || rhs.is_complex(), wide) {
            (true, true) => Complex128,
            (true, false) => Complex64,
            (false, true) => F64,
            (false, false) => F32,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        };
        write!(f, "{}", name)
    }
}

/// Element type of arrays and operators.
pub trait Scalar:
    LinalgScalar
    + ScalarOperand
    + NumAssign
    + Neg<Output = Self>
    + fmt::Debug
    + fmt::Display
    + Send
    + Sync
{
    /// The real type with the same precision.
    type Real: RealScalar;

    /// The runtime tag for this type.
    const DTYPE: DType;

    /// Complex conjugate (identity for real types).
    fn conj(self) -> Self;

    /// Real part.
    fn re(self) -> Self::Real;

    /// Absolute value.
    fn modulus(self) -> Self::Real;

    /// Squared absolute value.
    fn modulus_sqr(self) -> Self::Real;

    /// Embed a real value.
    fn from_real(re: Self::Real) -> Self;

    /// Convert from `f64`, rounding to the precision of `Self`.
    fn from_f64(v: f64) -> Self;

    /// Draw from the standard normal distribution. Complex types draw the
    /// real and imaginary parts independently.
    fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> Self;
}

/// Real element type (`f32` or `f64`).
pub trait RealScalar: Scalar<Real = Self> + Float {
    fn as_f64(self) -> f64;
}

macro_rules! impl_real_scalar {
    ($t:ty, $dtype:expr) => {
        impl Scalar for $t {
            type Real = $t;
            const DTYPE: DType = $dtype;

            #[inline]
            fn conj(self) -> Self {
                self
            }

            #[inline]
            fn re(self) -> Self::Real {
                self
            }

            #[inline]
            fn modulus(self) -> Self::Real {
                self.abs()
            }

            #[inline]
            fn modulus_sqr(self) -> Self::Real {
                self * self
            }

            #[inline]
            fn from_real(re: Self::Real) -> Self {
                re
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $t
            }

            fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> Self {
                rng.sample::<$t, _>(StandardNormal)
            }
        }

        impl RealScalar for $t {
            #[inline]
            fn as_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

macro_rules! impl_complex_scalar {
    ($t:ty, $dtype:expr) => {
        impl Scalar for Complex<$t> {
            type Real = $t;
            const DTYPE: DType = $dtype;

            #[inline]
            fn conj(self) -> Self {
                Complex::new(self.re, -self.im)
            }

            #[inline]
            fn re(self) -> Self::Real {
                self.re
            }

            #[inline]
            fn modulus(self) -> Self::Real {
                self.re.hypot(self.im)
            }

            #[inline]
            fn modulus_sqr(self) -> Self::Real {
                self.re * self.re + self.im * self.im
            }

            #[inline]
            fn from_real(re: Self::Real) -> Self {
                Complex::new(re, 0.0)
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                Complex::new(v as $t, 0.0)
            }

            fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> Self {
                let re = rng.sample::<$t, _>(StandardNormal);
                let im = rng.sample::<$t, _>(StandardNormal);
                Complex::new(re, im)
            }
        }
    };
}

impl_real_scalar!(f32, DType::F32);
impl_real_scalar!(f64, DType::F64);
impl_complex_scalar!(f32, DType::Complex64);
impl_complex_scalar!(f64, DType::Complex128);
