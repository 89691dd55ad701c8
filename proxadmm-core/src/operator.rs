//! Base operator abstraction.
//!
//! An [`Operator`] is a map between arrays of fixed, declared shapes. Linear
//! operators (see [`crate::linop`]) implement it as well, so code that only
//! needs forward evaluation can accept either.

use std::fmt;
use std::sync::Arc;

use crate::array::{Array, Shape};
use crate::dtype::{DType, Scalar};
use crate::error::{ADMMError, Result};

/// A map between arrays with declared input and output shapes.
pub trait Operator<T: Scalar>: Send + Sync {
    /// Shape of the arrays accepted by [`Operator::apply`].
    fn input_shape(&self) -> &Shape;

    /// Shape of the arrays produced by [`Operator::apply`].
    fn output_shape(&self) -> &Shape;

    fn input_dtype(&self) -> DType {
        T::DTYPE
    }

    fn output_dtype(&self) -> DType {
        T::DTYPE
    }

    /// Evaluate the map. Callers are expected to have validated the input shape.
    fn eval(&self, x: &Array<T>) -> Result<Array<T>>;

    /// Evaluate the map after checking that `x` has the declared input shape.
    ///
    /// # Arguments
    ///
    /// * `x` - The input array
    ///
    /// # Returns
    ///
    /// * `Ok(Array<T>)` with shape [`Operator::output_shape`]
    /// * `Err(ADMMError::ShapeMismatch)` if `x` has the wrong shape; nothing is evaluated
    fn apply(&self, x: &Array<T>) -> Result<Array<T>> {
        let got = x.shape();
        if &got != self.input_shape() {
            return Err(ADMMError::shape("operator input", self.input_shape(), &got));
        }
        self.eval(x)
    }
}

type MapFn<T> = Arc<dyn Fn(&Array<T>) -> Result<Array<T>> + Send + Sync>;

/// A general (possibly nonlinear) operator defined by a closure.
///
/// # Example
///
/// ```rust
/// use proxadmm_core::array::{Array, Shape};
/// use proxadmm_core::operator::{Map, Operator};
///
/// let square = Map::new(Shape::from(3), Shape::from(3), |x: &Array<f64>| Ok(x.map(|v| v * v)));
/// let y = square.apply(&Array::from_vec(vec![1.0, 2.0, 3.0])).unwrap();
/// assert_eq!(y.to_vec(), vec![1.0, 4.0, 9.0]);
/// ```
#[derive(Clone)]
pub struct Map<T> {
    input_shape: Shape,
    output_shape: Shape,
    f: MapFn<T>,
}

impl<T: Scalar> Map<T> {
    pub fn new<F>(input_shape: Shape, output_shape: Shape, f: F) -> Self
    where
        F: Fn(&Array<T>) -> Result<Array<T>> + Send + Sync + 'static,
    {
        Map {
            input_shape,
            output_shape,
            f: Arc::new(f),
        }
    }

    /// Create a map whose output shape is found by evaluating `f` on zeros.
    pub fn with_inferred_output<F>(input_shape: Shape, f: F) -> Result<Self>
    where
        F: Fn(&Array<T>) -> Result<Array<T>> + Send + Sync + 'static,
    {
        let output_shape = f(&Array::zeros(&input_shape))?.shape();
        Ok(Map::new(input_shape, output_shape, f))
    }
}

impl<T: Scalar> Operator<T> for Map<T> {
    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn eval(&self, x: &Array<T>) -> Result<Array<T>> {
        let y = (self.f)(x)?;
        let got = y.shape();
        if got != self.output_shape {
            return Err(ADMMError::shape("map output", &self.output_shape, &got));
        }
        Ok(y)
    }
}

impl<T> fmt::Debug for Map<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Map({} -> {})", self.input_shape, self.output_shape)
    }
}
