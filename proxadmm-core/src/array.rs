//! Array container shared by operators, functionals and the solver.
//!
//! An [`Array`] is either a flat n-dimensional array or a *blocked* array: an
//! ordered tuple of flat arrays with possibly different shapes that is treated
//! as a single vector for linear-algebra purposes (inner products, norms,
//! elementwise arithmetic between arrays of identical structure).
//!
//! Shapes follow NumPy conventions:
//! - `()` is a scalar
//! - `(n,)` is a vector of length n
//! - `((3,), (4, 5))` is a blocked shape with two blocks

use std::fmt;

use ndarray::{Array1, ArrayD, IxDyn};
use num_traits::{Float, Zero};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dtype::{DType, Scalar};
use crate::error::{ADMMError, Result};

/// Shape of an array or of an operator domain.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    /// A single n-dimensional array.
    Flat(Vec<usize>),
    /// An ordered sequence of flat shapes.
    Blocked(Vec<Vec<usize>>),
}

impl Shape {
    /// Create a scalar shape.
    pub fn scalar() -> Self {
        Shape::Flat(vec![])
    }

    /// Create a vector shape.
    pub fn vector(n: usize) -> Self {
        Shape::Flat(vec![n])
    }

    /// Create a matrix shape.
    pub fn matrix(m: usize, n: usize) -> Self {
        Shape::Flat(vec![m, n])
    }

    /// Create a blocked shape from the shapes of its blocks.
    pub fn blocked(blocks: Vec<Vec<usize>>) -> Self {
        Shape::Blocked(blocks)
    }

    /// Total number of elements (summed over blocks).
    pub fn size(&self) -> usize {
        match self {
            Shape::Flat(dims) => dims.iter().product(),
            Shape::Blocked(blocks) => blocks.iter().map(|b| b.iter().product::<usize>()).sum(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Shape::Blocked(_))
    }

    /// Dimensions of a flat shape.
    pub fn dims(&self) -> Option<&[usize]> {
        match self {
            Shape::Flat(dims) => Some(dims),
            Shape::Blocked(_) => None,
        }
    }

    /// Block shapes of a blocked shape.
    pub fn blocks(&self) -> Option<&[Vec<usize>]> {
        match self {
            Shape::Flat(_) => None,
            Shape::Blocked(blocks) => Some(blocks),
        }
    }

    /// Broadcast two shapes following NumPy rules, block by block.
    ///
    /// Returns `None` when the shapes are not broadcastable, including when
    /// one is flat and the other blocked, or when block counts differ.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        match (self, other) {
            (Shape::Flat(a), Shape::Flat(b)) => broadcast_dims(a, b).map(Shape::Flat),
            (Shape::Blocked(a), Shape::Blocked(b)) if a.len() == b.len() => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| broadcast_dims(x, y))
                .collect::<Option<Vec<_>>>()
                .map(Shape::Blocked),
            _ => None,
        }
    }
}

/// Broadcast two flat dimension lists.
pub(crate) fn broadcast_dims(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let pad = |d: &[usize]| -> Vec<usize> {
        std::iter::repeat(1)
            .take(ndim - d.len())
            .chain(d.iter().copied())
            .collect()
    };
    pad(a)
        .into_iter()
        .zip(pad(b))
        .map(|(x, y)| match (x, y) {
            (x, y) if x == y => Some(x),
            (1, y) => Some(y),
            (x, 1) => Some(x),
            _ => None,
        })
        .collect()
}

fn fmt_dims(dims: &[usize], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match dims {
        [] => write!(f, "()"),
        [n] => write!(f, "({},)", n),
        _ => {
            let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            write!(f, "({})", parts.join(", "))
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Flat(dims) => fmt_dims(dims, f),
            Shape::Blocked(blocks) => {
                write!(f, "(")?;
                for (i, block) in blocks.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    fmt_dims(block, f)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape{}", self)
    }
}

impl From<usize> for Shape {
    fn from(n: usize) -> Self {
        Shape::vector(n)
    }
}

impl From<(usize,)> for Shape {
    fn from((n,): (usize,)) -> Self {
        Shape::vector(n)
    }
}

impl From<(usize, usize)> for Shape {
    fn from((m, n): (usize, usize)) -> Self {
        Shape::matrix(m, n)
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((a, b, c): (usize, usize, usize)) -> Self {
        Shape::Flat(vec![a, b, c])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::Flat(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::Flat(dims.to_vec())
    }
}

/// A flat or blocked numeric array.
#[derive(Clone, Debug, PartialEq)]
pub enum Array<T> {
    Flat(ArrayD<T>),
    Blocked(Vec<ArrayD<T>>),
}

impl<T: Scalar> Array<T> {
    /// An array of zeros with the given shape.
    pub fn zeros(shape: &Shape) -> Self {
        match shape {
            Shape::Flat(dims) => Array::Flat(ArrayD::zeros(IxDyn(dims))),
            Shape::Blocked(blocks) => Array::Blocked(
                blocks
                    .iter()
                    .map(|dims| ArrayD::zeros(IxDyn(dims)))
                    .collect(),
            ),
        }
    }

    /// A one-dimensional array.
    pub fn from_vec(values: Vec<T>) -> Self {
        Array::Flat(Array1::from_vec(values).into_dyn())
    }

    /// A flat array with the given dimensions, filled in row-major order.
    pub fn from_shape_vec(dims: &[usize], values: Vec<T>) -> Result<Self> {
        let got = Shape::vector(values.len());
        ArrayD::from_shape_vec(IxDyn(dims), values)
            .map(Array::Flat)
            .map_err(|_| ADMMError::shape("from_shape_vec", &Shape::from(dims), &got))
    }

    /// A blocked array from its blocks.
    pub fn from_blocks(blocks: Vec<ArrayD<T>>) -> Self {
        Array::Blocked(blocks)
    }

    /// Fill an array of the given shape from row-major values (blocks in order).
    pub fn from_flat_vec(shape: &Shape, values: Vec<T>) -> Result<Self> {
        if values.len() != shape.size() {
            return Err(ADMMError::shape(
                "from_flat_vec",
                &Shape::vector(shape.size()),
                &Shape::vector(values.len()),
            ));
        }
        match shape {
            Shape::Flat(dims) => Array::from_shape_vec(dims, values),
            Shape::Blocked(blocks) => {
                let mut rest = values.into_iter();
                let arrays = blocks
                    .iter()
                    .map(|dims| {
                        let n = dims.iter().product();
                        let chunk: Vec<T> = rest.by_ref().take(n).collect();
                        ArrayD::from_shape_vec(IxDyn(dims), chunk).map_err(|_| {
                            ADMMError::shape("from_flat_vec", &Shape::from(dims.as_slice()), shape)
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Array::Blocked(arrays))
            }
        }
    }

    /// Standard normal random array.
    pub fn randn<R: Rng + ?Sized>(shape: &Shape, rng: &mut R) -> Self {
        let mut out = Array::zeros(shape);
        out.map_inplace(|_| T::sample_standard_normal(rng));
        out
    }

    pub fn shape(&self) -> Shape {
        match self {
            Array::Flat(a) => Shape::Flat(a.shape().to_vec()),
            Array::Blocked(blocks) => {
                Shape::Blocked(blocks.iter().map(|b| b.shape().to_vec()).collect())
            }
        }
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn size(&self) -> usize {
        match self {
            Array::Flat(a) => a.len(),
            Array::Blocked(blocks) => blocks.iter().map(|b| b.len()).sum(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Array::Blocked(_))
    }

    pub fn as_flat(&self) -> Option<&ArrayD<T>> {
        match self {
            Array::Flat(a) => Some(a),
            Array::Blocked(_) => None,
        }
    }

    /// The underlying flat array, or a type error for a blocked array.
    pub fn expect_flat(&self, context: &str) -> Result<&ArrayD<T>> {
        self.as_flat().ok_or_else(|| {
            ADMMError::Type(format!(
                "{} requires a flat array, got blocked array with shape {}",
                context,
                self.shape()
            ))
        })
    }

    pub fn into_flat(self, context: &str) -> Result<ArrayD<T>> {
        match self {
            Array::Flat(a) => Ok(a),
            blocked => Err(ADMMError::Type(format!(
                "{} requires a flat array, got blocked array with shape {}",
                context,
                blocked.shape()
            ))),
        }
    }

    pub fn blocks(&self) -> Option<&[ArrayD<T>]> {
        match self {
            Array::Flat(_) => None,
            Array::Blocked(blocks) => Some(blocks),
        }
    }

    /// Iterate over all elements in row-major order, block after block.
    pub fn elements(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            Array::Flat(a) => Box::new(a.iter()),
            Array::Blocked(blocks) => Box::new(blocks.iter().flat_map(|b| b.iter())),
        }
    }

    /// All elements in row-major order, block after block.
    pub fn to_vec(&self) -> Vec<T> {
        self.elements().copied().collect()
    }

    pub fn map(&self, f: impl Fn(T) -> T) -> Self {
        match self {
            Array::Flat(a) => Array::Flat(a.mapv(&f)),
            Array::Blocked(blocks) => Array::Blocked(blocks.iter().map(|b| b.mapv(&f)).collect()),
        }
    }

    pub fn map_inplace(&mut self, mut f: impl FnMut(T) -> T) {
        match self {
            Array::Flat(a) => a.mapv_inplace(&mut f),
            Array::Blocked(blocks) => {
                for b in blocks.iter_mut() {
                    b.mapv_inplace(&mut f);
                }
            }
        }
    }

    /// Combine two arrays of identical shape elementwise.
    pub fn zip_map(&self, other: &Array<T>, context: &str, f: impl Fn(T, T) -> T) -> Result<Self> {
        self.check_same_shape(other, context)?;
        let mut out = self.clone();
        match (&mut out, other) {
            (Array::Flat(a), Array::Flat(b)) => a.zip_mut_with(b, |x, &y| *x = f(*x, y)),
            (Array::Blocked(a), Array::Blocked(b)) => {
                for (x, y) in a.iter_mut().zip(b.iter()) {
                    x.zip_mut_with(y, |p, &q| *p = f(*p, q));
                }
            }
            _ => unreachable!("shapes checked above"),
        }
        Ok(out)
    }

    pub fn try_add(&self, other: &Array<T>) -> Result<Self> {
        self.zip_map(other, "array addition", |a, b| a + b)
    }

    pub fn try_sub(&self, other: &Array<T>) -> Result<Self> {
        self.zip_map(other, "array subtraction", |a, b| a - b)
    }

    pub fn scaled(&self, s: T) -> Self {
        self.map(|v| v * s)
    }

    pub fn conj(&self) -> Self {
        self.map(Scalar::conj)
    }

    /// In place `self += alpha * other`.
    pub fn add_scaled(&mut self, alpha: T, other: &Array<T>) -> Result<()> {
        self.check_same_shape(other, "scaled addition")?;
        match (self, other) {
            (Array::Flat(a), Array::Flat(b)) => a.scaled_add(alpha, b),
            (Array::Blocked(a), Array::Blocked(b)) => {
                for (x, y) in a.iter_mut().zip(b.iter()) {
                    x.scaled_add(alpha, y);
                }
            }
            _ => unreachable!("shapes checked above"),
        }
        Ok(())
    }

    /// Inner product `sum(conj(self) * other)`.
    pub fn vdot(&self, other: &Array<T>) -> Result<T> {
        self.check_same_shape(other, "inner product")?;
        Ok(self
            .elements()
            .zip(other.elements())
            .fold(T::zero(), |acc, (&a, &b)| acc + a.conj() * b))
    }

    /// Squared Euclidean norm over all elements.
    pub fn norm_sqr(&self) -> T::Real {
        self.elements()
            .fold(T::Real::zero(), |acc, &v| acc + v.modulus_sqr())
    }

    /// Euclidean norm over all elements.
    pub fn norm(&self) -> T::Real {
        self.norm_sqr().sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.elements().all(|v| v.modulus().is_finite())
    }

    /// Elementwise `|self - other| <= atol + rtol * |other|`, false on shape mismatch.
    pub fn allclose(&self, other: &Array<T>, rtol: f64, atol: f64) -> bool {
        use crate::dtype::RealScalar;

        if self.shape() != other.shape() {
            return false;
        }
        self.elements().zip(other.elements()).all(|(&a, &b)| {
            (a - b).modulus().as_f64() <= atol + rtol * b.modulus().as_f64()
        })
    }

    pub(crate) fn check_same_shape(&self, other: &Array<T>, context: &str) -> Result<()> {
        let (expected, got) = (self.shape(), other.shape());
        if expected != got {
            return Err(ADMMError::shape(context, &expected, &got));
        }
        Ok(())
    }
}

impl<T> From<ArrayD<T>> for Array<T> {
    fn from(a: ArrayD<T>) -> Self {
        Array::Flat(a)
    }
}

impl<T: Scalar> From<Vec<T>> for Array<T> {
    fn from(values: Vec<T>) -> Self {
        Array::from_vec(values)
    }
}
