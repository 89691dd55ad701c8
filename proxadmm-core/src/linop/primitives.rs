use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayD, Axis, Ix1, Zip};

use super::{AdjointState, LinearMap};
use crate::array::{Array, Shape};
use crate::dtype::Scalar;
use crate::error::{ADMMError, Result};

/// The identity map on arrays of a given shape.
pub struct Identity {
    shape: Shape,
}

impl Identity {
    pub fn new(shape: Shape) -> Self {
        Identity { shape }
    }
}

impl<T: Scalar> LinearMap<T> for Identity {
    fn name(&self) -> &str {
        "Identity"
    }

    fn input_shape(&self) -> &Shape {
        &self.shape
    }

    fn output_shape(&self) -> &Shape {
        &self.shape
    }

    fn forward(&self, x: &Array<T>) -> Result<Array<T>> {
        Ok(x.clone())
    }

    fn adjoint(&self, y: &Array<T>) -> Result<Array<T>> {
        Ok(y.clone())
    }

    fn diagonal_entries(&self) -> Option<Array<T>> {
        Some(Array::zeros(&self.shape).map(|_| T::one()))
    }
}

/// A dense matrix acting on one-dimensional arrays.
pub struct MatrixOperator<T> {
    matrix: Array2<T>,
    /// Conjugate transpose, formed once at construction.
    matrix_h: Array2<T>,
    input_shape: Shape,
    output_shape: Shape,
}

impl<T: Scalar> MatrixOperator<T> {
    pub fn new(matrix: Array2<T>) -> Self {
        let (m, n) = matrix.dim();
        let matrix_h = matrix.t().mapv(|v| v.conj());
        MatrixOperator {
            matrix,
            matrix_h,
            input_shape: Shape::vector(n),
            output_shape: Shape::vector(m),
        }
    }

    /// Build from a `nalgebra` matrix.
    pub fn from_nalgebra(matrix: &DMatrix<T>) -> Self {
        let m = Array2::from_shape_fn((matrix.nrows(), matrix.ncols()), |(i, j)| matrix[(i, j)]);
        MatrixOperator::new(m)
    }

    pub fn matrix(&self) -> &Array2<T> {
        &self.matrix
    }

    fn as_vector<'a>(x: &'a Array<T>, context: &str) -> Result<ndarray::ArrayView1<'a, T>> {
        x.expect_flat(context)?
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|_| ADMMError::Type(format!("{} requires a one-dimensional array", context)))
    }
}

impl<T: Scalar> LinearMap<T> for MatrixOperator<T> {
    fn name(&self) -> &str {
        "MatrixOperator"
    }

    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn forward(&self, x: &Array<T>) -> Result<Array<T>> {
        let v = Self::as_vector(x, "matrix operator")?;
        Ok(Array::Flat(self.matrix.dot(&v).into_dyn()))
    }

    fn adjoint(&self, y: &Array<T>) -> Result<Array<T>> {
        let v = Self::as_vector(y, "matrix operator adjoint")?;
        Ok(Array::Flat(self.matrix_h.dot(&v).into_dyn()))
    }
}

/// Elementwise multiplication by a fixed array, broadcast NumPy style
/// against the input shape (block by block for blocked arrays).
pub struct Diagonal<T> {
    diag: Array<T>,
    input_shape: Shape,
    output_shape: Shape,
}

impl<T: Scalar> Diagonal<T> {
    pub fn new(diag: Array<T>) -> Self {
        let shape = diag.shape();
        Diagonal {
            diag,
            input_shape: shape.clone(),
            output_shape: shape,
        }
    }

    /// A diagonal operator whose output shape is the broadcast of
    /// `input_shape` with the shape of `diag`.
    ///
    /// # Returns
    ///
    /// * `Err(ADMMError::ShapeMismatch)` if the shapes do not broadcast,
    ///   including when one is blocked and the other flat
    pub fn with_input_shape(diag: Array<T>, input_shape: Shape) -> Result<Self> {
        let output_shape = input_shape
            .broadcast(&diag.shape())
            .ok_or_else(|| ADMMError::shape("diagonal broadcast", &input_shape, &diag.shape()))?;
        Ok(Diagonal {
            diag,
            input_shape,
            output_shape,
        })
    }

    pub fn diag(&self) -> &Array<T> {
        &self.diag
    }
}

fn broadcast_product<T: Scalar>(
    x: &ArrayD<T>,
    d: &ArrayD<T>,
    out_dims: &[usize],
    conj: bool,
) -> Result<ArrayD<T>> {
    let xb = x.broadcast(out_dims);
    let db = d.broadcast(out_dims);
    match (xb, db) {
        (Some(xb), Some(db)) => Ok(Zip::from(xb).and(db).map_collect(|&a, &b| {
            if conj { a * b.conj() } else { a * b }
        })),
        _ => Err(ADMMError::shape(
            "diagonal broadcast",
            &Shape::from(out_dims),
            &Shape::from(x.shape()),
        )),
    }
}

/// Sum `a` over broadcast axes so that it has shape `target`.
pub(crate) fn sum_to_shape<T: Scalar>(mut a: ArrayD<T>, target: &[usize]) -> ArrayD<T> {
    while a.ndim() > target.len() {
        a = a.sum_axis(Axis(0));
    }
    for (axis, &len) in target.iter().enumerate() {
        if len == 1 && a.shape()[axis] != 1 {
            a = a.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    a
}

impl<T: Scalar> LinearMap<T> for Diagonal<T> {
    fn name(&self) -> &str {
        "Diagonal"
    }

    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn forward(&self, x: &Array<T>) -> Result<Array<T>> {
        match (x, &self.diag, &self.output_shape) {
            (Array::Flat(x), Array::Flat(d), Shape::Flat(out)) => {
                Ok(Array::Flat(broadcast_product(x, d, out, false)?))
            }
            (Array::Blocked(xs), Array::Blocked(ds), Shape::Blocked(outs)) => xs
                .iter()
                .zip(ds)
                .zip(outs)
                .map(|((x, d), out)| broadcast_product(x, d, out, false))
                .collect::<Result<Vec<_>>>()
                .map(Array::Blocked),
            _ => Err(ADMMError::shape("diagonal", &self.input_shape, &x.shape())),
        }
    }

    fn adjoint(&self, y: &Array<T>) -> Result<Array<T>> {
        match (y, &self.diag, &self.input_shape) {
            (Array::Flat(y), Array::Flat(d), Shape::Flat(input)) => {
                let full = broadcast_product(y, d, y.shape(), true)?;
                Ok(Array::Flat(sum_to_shape(full, input)))
            }
            (Array::Blocked(ys), Array::Blocked(ds), Shape::Blocked(inputs)) => ys
                .iter()
                .zip(ds)
                .zip(inputs)
                .map(|((y, d), input)| {
                    broadcast_product(y, d, y.shape(), true).map(|full| sum_to_shape(full, input))
                })
                .collect::<Result<Vec<_>>>()
                .map(Array::Blocked),
            _ => Err(ADMMError::shape("diagonal adjoint", &self.output_shape, &y.shape())),
        }
    }

    fn diagonal_entries(&self) -> Option<Array<T>> {
        let d_shape = self.diag.shape();
        if self.input_shape == d_shape && self.output_shape == d_shape {
            Some(self.diag.clone())
        } else {
            None
        }
    }
}

type LinearFn<T> = Arc<dyn Fn(&Array<T>) -> Result<Array<T>> + Send + Sync>;

/// A linear operator defined by a closure.
///
/// The forward closure must be linear; this is not verified. When no adjoint
/// closure is supplied, the adjoint is derived on first use by applying the
/// forward map to every standard basis vector and storing the conjugate
/// transpose of the resulting dense matrix. The derivation runs at most once
/// per instance.
pub struct FnOperator<T> {
    input_shape: Shape,
    output_shape: Shape,
    forward: LinearFn<T>,
    adjoint: Option<LinearFn<T>>,
    derived: OnceLock<Array2<T>>,
    resolutions: AtomicUsize,
}

impl<T: Scalar> FnOperator<T> {
    pub fn new<F>(input_shape: Shape, output_shape: Shape, forward: F) -> Self
    where
        F: Fn(&Array<T>) -> Result<Array<T>> + Send + Sync + 'static,
    {
        FnOperator {
            input_shape,
            output_shape,
            forward: Arc::new(forward),
            adjoint: None,
            derived: OnceLock::new(),
            resolutions: AtomicUsize::new(0),
        }
    }

    pub fn with_adjoint<F, G>(
        input_shape: Shape,
        output_shape: Shape,
        forward: F,
        adjoint: G,
    ) -> Self
    where
        F: Fn(&Array<T>) -> Result<Array<T>> + Send + Sync + 'static,
        G: Fn(&Array<T>) -> Result<Array<T>> + Send + Sync + 'static,
    {
        FnOperator {
            adjoint: Some(Arc::new(adjoint)),
            ..FnOperator::new(input_shape, output_shape, forward)
        }
    }

    /// Number of times the adjoint has been derived (0 or 1).
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    fn checked_forward(&self, x: &Array<T>) -> Result<Array<T>> {
        let y = (self.forward)(x)?;
        let got = y.shape();
        if got != self.output_shape {
            return Err(ADMMError::shape("closure operator output", &self.output_shape, &got));
        }
        Ok(y)
    }

    /// Dense conjugate transpose of the forward map, of size `(n_in, n_out)`.
    fn probe(&self) -> Result<Array2<T>> {
        let n_in = self.input_shape.size();
        let n_out = self.output_shape.size();
        let mut adj = Array2::zeros((n_in, n_out));
        let mut basis = vec![T::zero(); n_in];
        for j in 0..n_in {
            basis[j] = T::one();
            let e_j = Array::from_flat_vec(&self.input_shape, basis.clone())?;
            let column = self.checked_forward(&e_j)?;
            for (i, v) in column.elements().enumerate() {
                adj[(j, i)] = v.conj();
            }
            basis[j] = T::zero();
        }
        Ok(adj)
    }

    fn derived_adjoint(&self) -> Result<&Array2<T>> {
        if let Some(adj) = self.derived.get() {
            return Ok(adj);
        }
        let adj = self.probe()?;
        if self.derived.set(adj).is_ok() {
            self.resolutions.fetch_add(1, Ordering::SeqCst);
            log::debug!(
                "Derived adjoint of closure operator {} -> {}",
                self.input_shape,
                self.output_shape
            );
        }
        self.derived
            .get()
            .ok_or_else(|| ADMMError::Numerical("adjoint derivation did not complete".to_string()))
    }
}

impl<T: Scalar> LinearMap<T> for FnOperator<T> {
    fn name(&self) -> &str {
        "FnOperator"
    }

    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn forward(&self, x: &Array<T>) -> Result<Array<T>> {
        self.checked_forward(x)
    }

    fn adjoint(&self, y: &Array<T>) -> Result<Array<T>> {
        if let Some(adjoint) = &self.adjoint {
            let x = adjoint(y)?;
            let got = x.shape();
            if got != self.input_shape {
                return Err(ADMMError::shape("closure operator adjoint", &self.input_shape, &got));
            }
            return Ok(x);
        }
        let adj = self.derived_adjoint()?;
        let v = Array1::from_vec(y.to_vec());
        Array::from_flat_vec(&self.input_shape, adj.dot(&v).to_vec())
    }

    fn adjoint_state(&self) -> AdjointState {
        match (&self.adjoint, self.derived.get()) {
            (Some(_), _) => AdjointState::Explicit,
            (None, Some(_)) => AdjointState::Resolved,
            (None, None) => AdjointState::Unresolved,
        }
    }

    fn resolve_adjoint(&self) -> Result<()> {
        if self.adjoint.is_none() {
            self.derived_adjoint()?;
        }
        Ok(())
    }
}
