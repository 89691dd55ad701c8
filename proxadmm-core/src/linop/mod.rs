//! Linear operators and their algebra.
//!
//! A [`LinearOperator`] is a cheap, clonable handle to an immutable expression
//! tree. Leaves are primitive maps implementing [`LinearMap`]; inner nodes are
//! the closed set of [`LinOpExpr`] combinators. Forward evaluation and the
//! adjoint are both defined by structural recursion over the tree, so every
//! composite is a linear operator with an exact adjoint whenever its leaves
//! have one.
//!
//! # Example
//!
//! ```rust
//! use proxadmm_core::array::{Array, Shape};
//! use proxadmm_core::linop;
//!
//! let d = linop::diagonal(Array::from_vec(vec![1.0, 2.0, 3.0]));
//! let i = linop::identity::<f64>(Shape::from(3));
//! let a = (&d + &i).unwrap();
//! let y = a.apply(&Array::from_vec(vec![1.0, 1.0, 1.0])).unwrap();
//! assert_eq!(y.to_vec(), vec![2.0, 3.0, 4.0]);
//! ```

use std::fmt;
use std::sync::Arc;

use num_traits::Float;
use rand::Rng;

use crate::array::{Array, Shape};
use crate::dtype::{DType, RealScalar, Scalar};
use crate::error::{ADMMError, Result};
use crate::operator::Operator;

mod conv;
mod diff;
mod ops;
mod primitives;

pub use conv::Convolve;
pub use diff::{Boundary, FiniteDifference};
pub use primitives::{Diagonal, FnOperator, Identity, MatrixOperator};

/// State of an operator's adjoint rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AdjointState {
    /// The adjoint was supplied when the operator was built.
    Explicit,
    /// The adjoint will be derived on first use.
    Unresolved,
    /// The adjoint was derived and cached.
    Resolved,
}

/// A primitive linear map: the leaves of an operator expression.
pub trait LinearMap<T: Scalar>: Send + Sync {
    /// Short name used in debug output.
    fn name(&self) -> &str;

    fn input_shape(&self) -> &Shape;

    fn output_shape(&self) -> &Shape;

    /// Apply the map to an input of shape [`LinearMap::input_shape`].
    fn forward(&self, x: &Array<T>) -> Result<Array<T>>;

    /// Apply the conjugate transpose to an input of shape [`LinearMap::output_shape`].
    fn adjoint(&self, y: &Array<T>) -> Result<Array<T>>;

    fn adjoint_state(&self) -> AdjointState {
        AdjointState::Explicit
    }

    /// Derive and cache the adjoint now, if it is derived lazily.
    fn resolve_adjoint(&self) -> Result<()> {
        Ok(())
    }

    /// The diagonal entries when the map is elementwise multiplication with
    /// equal input and output shapes.
    fn diagonal_entries(&self) -> Option<Array<T>> {
        None
    }
}

/// Expression tree of a linear operator.
pub enum LinOpExpr<T: Scalar> {
    Primitive(Arc<dyn LinearMap<T>>),
    Sum(LinearOperator<T>, LinearOperator<T>),
    Difference(LinearOperator<T>, LinearOperator<T>),
    ScalarProduct(T, LinearOperator<T>),
    /// `outer ∘ inner`
    Composition(LinearOperator<T>, LinearOperator<T>),
    Transpose(LinearOperator<T>),
    ConjugateTranspose(LinearOperator<T>),
    Conjugate(LinearOperator<T>),
    Negation(LinearOperator<T>),
}

struct Node<T: Scalar> {
    expr: LinOpExpr<T>,
    input_shape: Shape,
    output_shape: Shape,
    input_dtype: DType,
    output_dtype: DType,
}

/// Handle to a linear operator.
///
/// Cloning is cheap; operands of a composite are shared, never copied.
pub struct LinearOperator<T: Scalar> {
    node: Arc<Node<T>>,
}

impl<T: Scalar> Clone for LinearOperator<T> {
    fn clone(&self) -> Self {
        LinearOperator {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T: Scalar> LinearOperator<T> {
    fn from_expr(
        expr: LinOpExpr<T>,
        input_shape: Shape,
        output_shape: Shape,
        dtype: DType,
    ) -> Self {
        LinearOperator {
            node: Arc::new(Node {
                expr,
                input_shape,
                output_shape,
                input_dtype: dtype,
                output_dtype: dtype,
            }),
        }
    }

    /// Wrap a primitive map.
    pub fn from_map(map: Arc<dyn LinearMap<T>>) -> Self {
        let (input_shape, output_shape) = (map.input_shape().clone(), map.output_shape().clone());
        LinearOperator::from_expr(LinOpExpr::Primitive(map), input_shape, output_shape, T::DTYPE)
    }

    /// Operator defined by a closure, with its adjoint derived lazily on first use.
    pub fn from_fn<F>(input_shape: Shape, output_shape: Shape, f: F) -> Self
    where
        F: Fn(&Array<T>) -> Result<Array<T>> + Send + Sync + 'static,
    {
        LinearOperator::from_map(Arc::new(FnOperator::new(input_shape, output_shape, f)))
    }

    pub fn input_shape(&self) -> &Shape {
        &self.node.input_shape
    }

    pub fn output_shape(&self) -> &Shape {
        &self.node.output_shape
    }

    pub fn input_dtype(&self) -> DType {
        self.node.input_dtype
    }

    pub fn output_dtype(&self) -> DType {
        self.node.output_dtype
    }

    pub fn expr(&self) -> &LinOpExpr<T> {
        &self.node.expr
    }

    /// Whether two handles refer to the same operator instance.
    pub fn ptr_eq(&self, other: &LinearOperator<T>) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Apply the operator.
    ///
    /// # Returns
    ///
    /// * `Ok(Array<T>)` with shape [`LinearOperator::output_shape`]
    /// * `Err(ADMMError::ShapeMismatch)` if `x` does not have the input shape
    pub fn apply(&self, x: &Array<T>) -> Result<Array<T>> {
        let got = x.shape();
        if &got != self.input_shape() {
            return Err(ADMMError::shape("linear operator input", self.input_shape(), &got));
        }
        self.eval_forward(x)
    }

    /// Apply the adjoint (conjugate transpose) of the operator.
    ///
    /// # Returns
    ///
    /// * `Ok(Array<T>)` with shape [`LinearOperator::input_shape`]
    /// * `Err(ADMMError::ShapeMismatch)` if `y` does not have the output shape
    pub fn adjoint(&self, y: &Array<T>) -> Result<Array<T>> {
        let got = y.shape();
        if &got != self.output_shape() {
            return Err(ADMMError::shape("adjoint", self.output_shape(), &got));
        }
        self.eval_adjoint(y)
    }

    /// `A.H @ B`: the adjoint of `self` composed with another operator.
    pub fn adjoint_compose(&self, other: &LinearOperator<T>) -> Result<LinearOperator<T>> {
        if other.output_shape() != self.output_shape() {
            return Err(ADMMError::shape(
                "adjoint composition",
                self.output_shape(),
                other.output_shape(),
            ));
        }
        self.h().compose(other)
    }

    /// `A.H A x`.
    pub fn gram(&self, x: &Array<T>) -> Result<Array<T>> {
        self.adjoint(&self.apply(x)?)
    }

    /// The operator `A.H A`.
    pub fn gram_op(&self) -> LinearOperator<T> {
        let ah = self.h();
        LinearOperator::from_expr(
            LinOpExpr::Composition(ah, self.clone()),
            self.input_shape().clone(),
            self.input_shape().clone(),
            self.output_dtype(),
        )
    }

    /// Transpose (without conjugation).
    pub fn t(&self) -> LinearOperator<T> {
        LinearOperator::from_expr(
            LinOpExpr::Transpose(self.clone()),
            self.output_shape().clone(),
            self.input_shape().clone(),
            self.output_dtype(),
        )
    }

    /// Conjugate transpose.
    pub fn h(&self) -> LinearOperator<T> {
        LinearOperator::from_expr(
            LinOpExpr::ConjugateTranspose(self.clone()),
            self.output_shape().clone(),
            self.input_shape().clone(),
            self.output_dtype(),
        )
    }

    /// Elementwise conjugate of the map: `x -> conj(A conj(x))`.
    pub fn conj(&self) -> LinearOperator<T> {
        LinearOperator::from_expr(
            LinOpExpr::Conjugate(self.clone()),
            self.input_shape().clone(),
            self.output_shape().clone(),
            self.output_dtype(),
        )
    }

    pub fn scale(&self, s: T) -> LinearOperator<T> {
        LinearOperator::from_expr(
            LinOpExpr::ScalarProduct(s, self.clone()),
            self.input_shape().clone(),
            self.output_shape().clone(),
            DType::promote(T::DTYPE, self.output_dtype()),
        )
    }

    pub fn negate(&self) -> LinearOperator<T> {
        LinearOperator::from_expr(
            LinOpExpr::Negation(self.clone()),
            self.input_shape().clone(),
            self.output_shape().clone(),
            self.output_dtype(),
        )
    }

    fn check_same_shapes(&self, other: &LinearOperator<T>, context: &str) -> Result<()> {
        if self.input_shape() != other.input_shape() {
            return Err(ADMMError::shape(
                format!("{} input", context),
                self.input_shape(),
                other.input_shape(),
            ));
        }
        if self.output_shape() != other.output_shape() {
            return Err(ADMMError::shape(
                format!("{} output", context),
                self.output_shape(),
                other.output_shape(),
            ));
        }
        Ok(())
    }

    /// `A + B`; input and output shapes must be identical.
    pub fn try_add(&self, other: &LinearOperator<T>) -> Result<LinearOperator<T>> {
        self.check_same_shapes(other, "operator sum")?;
        Ok(LinearOperator::from_expr(
            LinOpExpr::Sum(self.clone(), other.clone()),
            self.input_shape().clone(),
            self.output_shape().clone(),
            DType::promote(self.output_dtype(), other.output_dtype()),
        ))
    }

    /// `A - B`; input and output shapes must be identical.
    pub fn try_sub(&self, other: &LinearOperator<T>) -> Result<LinearOperator<T>> {
        self.check_same_shapes(other, "operator difference")?;
        Ok(LinearOperator::from_expr(
            LinOpExpr::Difference(self.clone(), other.clone()),
            self.input_shape().clone(),
            self.output_shape().clone(),
            DType::promote(self.output_dtype(), other.output_dtype()),
        ))
    }

    /// `A @ B`; requires `A.input_shape == B.output_shape`.
    pub fn compose(&self, inner: &LinearOperator<T>) -> Result<LinearOperator<T>> {
        if self.input_shape() != inner.output_shape() {
            return Err(ADMMError::shape(
                "operator composition",
                self.input_shape(),
                inner.output_shape(),
            ));
        }
        Ok(LinearOperator::from_expr(
            LinOpExpr::Composition(self.clone(), inner.clone()),
            inner.input_shape().clone(),
            self.output_shape().clone(),
            DType::promote(self.output_dtype(), inner.output_dtype()),
        ))
    }

    /// `A @ x`, identical to [`LinearOperator::apply`].
    pub fn matvec(&self, x: &Array<T>) -> Result<Array<T>> {
        self.apply(x)
    }

    /// Resolve every lazily derived adjoint in the expression tree.
    pub fn compile(&self) -> Result<()> {
        match self.expr() {
            LinOpExpr::Primitive(map) => map.resolve_adjoint(),
            LinOpExpr::Sum(a, b) | LinOpExpr::Difference(a, b) | LinOpExpr::Composition(a, b) => {
                a.compile()?;
                b.compile()
            }
            LinOpExpr::ScalarProduct(_, a)
            | LinOpExpr::Transpose(a)
            | LinOpExpr::ConjugateTranspose(a)
            | LinOpExpr::Conjugate(a)
            | LinOpExpr::Negation(a) => a.compile(),
        }
    }

    /// Combined adjoint state of the leaves: `Unresolved` if any leaf is,
    /// otherwise `Resolved` if any leaf was derived, otherwise `Explicit`.
    pub fn adjoint_state(&self) -> AdjointState {
        let merge = |a: AdjointState, b: AdjointState| match (a, b) {
            (AdjointState::Unresolved, _) | (_, AdjointState::Unresolved) => {
                AdjointState::Unresolved
            }
            (AdjointState::Resolved, _) | (_, AdjointState::Resolved) => AdjointState::Resolved,
            _ => AdjointState::Explicit,
        };
        match self.expr() {
            LinOpExpr::Primitive(map) => map.adjoint_state(),
            LinOpExpr::Sum(a, b) | LinOpExpr::Difference(a, b) | LinOpExpr::Composition(a, b) => {
                merge(a.adjoint_state(), b.adjoint_state())
            }
            LinOpExpr::ScalarProduct(_, a)
            | LinOpExpr::Transpose(a)
            | LinOpExpr::ConjugateTranspose(a)
            | LinOpExpr::Conjugate(a)
            | LinOpExpr::Negation(a) => a.adjoint_state(),
        }
    }

    /// Diagonal entries when the whole expression acts elementwise.
    pub fn diagonal_entries(&self) -> Option<Array<T>> {
        match self.expr() {
            LinOpExpr::Primitive(map) => map.diagonal_entries(),
            LinOpExpr::Sum(a, b) => a.diagonal_entries()?.try_add(&b.diagonal_entries()?).ok(),
            LinOpExpr::Difference(a, b) => {
                a.diagonal_entries()?.try_sub(&b.diagonal_entries()?).ok()
            }
            LinOpExpr::Composition(a, b) => a
                .diagonal_entries()?
                .zip_map(&b.diagonal_entries()?, "diagonal composition", |p, q| p * q)
                .ok(),
            LinOpExpr::ScalarProduct(s, a) => Some(a.diagonal_entries()?.scaled(*s)),
            LinOpExpr::Transpose(a) => a.diagonal_entries(),
            LinOpExpr::ConjugateTranspose(a) | LinOpExpr::Conjugate(a) => {
                Some(a.diagonal_entries()?.conj())
            }
            LinOpExpr::Negation(a) => Some(a.diagonal_entries()?.map(|v| -v)),
        }
    }

    fn eval_forward(&self, x: &Array<T>) -> Result<Array<T>> {
        match self.expr() {
            LinOpExpr::Primitive(map) => map.forward(x),
            LinOpExpr::Sum(a, b) => a.eval_forward(x)?.try_add(&b.eval_forward(x)?),
            LinOpExpr::Difference(a, b) => a.eval_forward(x)?.try_sub(&b.eval_forward(x)?),
            LinOpExpr::ScalarProduct(s, a) => Ok(a.eval_forward(x)?.scaled(*s)),
            LinOpExpr::Composition(outer, inner) => outer.eval_forward(&inner.eval_forward(x)?),
            LinOpExpr::Transpose(a) => Ok(a.eval_adjoint(&x.conj())?.conj()),
            LinOpExpr::ConjugateTranspose(a) => a.eval_adjoint(x),
            LinOpExpr::Conjugate(a) => Ok(a.eval_forward(&x.conj())?.conj()),
            LinOpExpr::Negation(a) => Ok(a.eval_forward(x)?.map(|v| -v)),
        }
    }

    fn eval_adjoint(&self, y: &Array<T>) -> Result<Array<T>> {
        match self.expr() {
            LinOpExpr::Primitive(map) => map.adjoint(y),
            LinOpExpr::Sum(a, b) => a.eval_adjoint(y)?.try_add(&b.eval_adjoint(y)?),
            LinOpExpr::Difference(a, b) => a.eval_adjoint(y)?.try_sub(&b.eval_adjoint(y)?),
            LinOpExpr::ScalarProduct(s, a) => Ok(a.eval_adjoint(y)?.scaled(s.conj())),
            LinOpExpr::Composition(outer, inner) => inner.eval_adjoint(&outer.eval_adjoint(y)?),
            LinOpExpr::Transpose(a) => Ok(a.eval_forward(&y.conj())?.conj()),
            LinOpExpr::ConjugateTranspose(a) => a.eval_forward(y),
            LinOpExpr::Conjugate(a) => Ok(a.eval_adjoint(&y.conj())?.conj()),
            LinOpExpr::Negation(a) => Ok(a.eval_adjoint(y)?.map(|v| -v)),
        }
    }
}

impl<T: Scalar> Operator<T> for LinearOperator<T> {
    fn input_shape(&self) -> &Shape {
        LinearOperator::input_shape(self)
    }

    fn output_shape(&self) -> &Shape {
        LinearOperator::output_shape(self)
    }

    fn input_dtype(&self) -> DType {
        LinearOperator::input_dtype(self)
    }

    fn output_dtype(&self) -> DType {
        LinearOperator::output_dtype(self)
    }

    fn eval(&self, x: &Array<T>) -> Result<Array<T>> {
        self.eval_forward(x)
    }
}

impl<T: Scalar> fmt::Debug for LinearOperator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expr() {
            LinOpExpr::Primitive(map) => write!(
                f,
                "{}({} -> {})",
                map.name(),
                self.input_shape(),
                self.output_shape()
            ),
            LinOpExpr::Sum(a, b) => write!(f, "({:?} + {:?})", a, b),
            LinOpExpr::Difference(a, b) => write!(f, "({:?} - {:?})", a, b),
            LinOpExpr::ScalarProduct(s, a) => write!(f, "({} * {:?})", s, a),
            LinOpExpr::Composition(a, b) => write!(f, "({:?} @ {:?})", a, b),
            LinOpExpr::Transpose(a) => write!(f, "{:?}.T", a),
            LinOpExpr::ConjugateTranspose(a) => write!(f, "{:?}.H", a),
            LinOpExpr::Conjugate(a) => write!(f, "{:?}.conj()", a),
            LinOpExpr::Negation(a) => write!(f, "-{:?}", a),
        }
    }
}

/// Identity operator.
pub fn identity<T: Scalar>(shape: Shape) -> LinearOperator<T> {
    LinearOperator::from_map(Arc::new(Identity::new(shape)))
}

/// Elementwise multiplication by `diag`, with input shape equal to `diag.shape()`.
pub fn diagonal<T: Scalar>(diag: Array<T>) -> LinearOperator<T> {
    LinearOperator::from_map(Arc::new(Diagonal::new(diag)))
}

/// Elementwise multiplication by `diag`, broadcast against `input_shape`.
pub fn diagonal_with_input_shape<T: Scalar>(
    diag: Array<T>,
    input_shape: Shape,
) -> Result<LinearOperator<T>> {
    Ok(LinearOperator::from_map(Arc::new(Diagonal::with_input_shape(
        diag,
        input_shape,
    )?)))
}

/// Dense matrix acting on vectors.
pub fn matrix<T: Scalar>(m: ndarray::Array2<T>) -> LinearOperator<T> {
    LinearOperator::from_map(Arc::new(MatrixOperator::new(m)))
}

/// Finite differences along `axes` (all axes when `None`).
pub fn finite_difference<T: Scalar>(
    input_dims: &[usize],
    axes: Option<&[usize]>,
    boundary: Boundary,
) -> Result<LinearOperator<T>> {
    Ok(LinearOperator::from_map(Arc::new(FiniteDifference::new(
        input_dims, axes, boundary,
    )?)))
}

/// Full linear convolution with `kernel` on inputs of shape `input_dims`.
pub fn convolve<T: Scalar>(
    kernel: ndarray::ArrayD<T>,
    input_dims: &[usize],
) -> Result<LinearOperator<T>> {
    Ok(LinearOperator::from_map(Arc::new(Convolve::new(
        kernel, input_dims,
    )?)))
}

/// Relative discrepancy `|<A x, y> - <x, A_h y>| / max(|<A x, y>|, |<x, A_h y>|)`
/// for standard normal `x` and `y`.
pub fn adjoint_error<T: Scalar, R: Rng + ?Sized>(
    a: &LinearOperator<T>,
    a_h: &LinearOperator<T>,
    rng: &mut R,
) -> Result<f64> {
    if a_h.input_shape() != a.output_shape() {
        return Err(ADMMError::shape("adjoint check", a.output_shape(), a_h.input_shape()));
    }
    if a_h.output_shape() != a.input_shape() {
        return Err(ADMMError::shape("adjoint check", a.input_shape(), a_h.output_shape()));
    }
    let x = Array::randn(a.input_shape(), rng);
    let y = Array::randn(a.output_shape(), rng);
    let lhs = y.vdot(&a.apply(&x)?)?;
    let rhs = a_h.apply(&y)?.vdot(&x)?;
    let scale = lhs.modulus().max(rhs.modulus()).as_f64();
    if scale == 0.0 {
        return Ok(0.0);
    }
    Ok((lhs - rhs).modulus().as_f64() / scale)
}

/// Whether `a_h` is the adjoint of `a` to within relative tolerance `rtol`,
/// estimated from one random pair of vectors.
///
/// # Example
///
/// ```rust
/// use proxadmm_core::array::Shape;
/// use proxadmm_core::linop::{self, Boundary};
/// use rand::SeedableRng;
///
/// let d = linop::finite_difference::<f64>(&[6, 5], None, Boundary::AppendZero).unwrap();
/// let mut rng = rand::rngs::StdRng::seed_from_u64(0);
/// assert!(linop::valid_adjoint(&d, &d.h(), 1e-10, &mut rng).unwrap());
/// ```
pub fn valid_adjoint<T: Scalar, R: Rng + ?Sized>(
    a: &LinearOperator<T>,
    a_h: &LinearOperator<T>,
    rtol: f64,
    rng: &mut R,
) -> Result<bool> {
    Ok(adjoint_error(a, a_h, rng)? <= rtol)
}
