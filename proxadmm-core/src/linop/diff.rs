use std::marker::PhantomData;

use ndarray::{ArrayD, ArrayView, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use super::LinearMap;
use crate::array::{Array, Shape};
use crate::dtype::Scalar;
use crate::error::{ADMMError, Result};

/// Boundary handling for forward differences along an axis of length `n`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Boundary {
    /// `n - 1` outputs: `x[i + 1] - x[i]`.
    Truncate,
    /// `n` outputs; a zero is appended before differencing, so the last output is `-x[n - 1]`.
    AppendZero,
    /// `n` outputs; the last output is `x[0] - x[n - 1]`.
    Circular,
}

/// Forward differences along one or more axes of a flat array.
///
/// With a single axis the output is the difference array itself. With several
/// axes the per-axis outputs are stacked along a new leading axis when they all
/// have the same shape (always the case for [`Boundary::AppendZero`] and
/// [`Boundary::Circular`]), and returned as a blocked array otherwise.
pub struct FiniteDifference<T> {
    input_shape: Shape,
    output_shape: Shape,
    dims: Vec<usize>,
    axes: Vec<usize>,
    boundary: Boundary,
    stacked: bool,
    _marker: PhantomData<T>,
}

impl<T: Scalar> FiniteDifference<T> {
    /// # Arguments
    ///
    /// * `input_dims` - Shape of the input array
    /// * `axes` - Axes to difference along; all axes when `None`
    /// * `boundary` - Boundary policy applied to every axis
    ///
    /// # Returns
    ///
    /// * `Err(ADMMError::Configuration)` if an axis is out of range or repeated,
    ///   or if an axis has fewer than two elements
    pub fn new(input_dims: &[usize], axes: Option<&[usize]>, boundary: Boundary) -> Result<Self> {
        let axes: Vec<usize> = match axes {
            Some(axes) => axes.to_vec(),
            None => (0..input_dims.len()).collect(),
        };
        if axes.is_empty() {
            return Err(ADMMError::Configuration(
                "finite difference needs at least one axis".to_string(),
            ));
        }
        for (k, &axis) in axes.iter().enumerate() {
            if axis >= input_dims.len() {
                return Err(ADMMError::Configuration(format!(
                    "finite difference axis {} out of range for input of dimension {}",
                    axis,
                    input_dims.len()
                )));
            }
            if axes[..k].contains(&axis) {
                return Err(ADMMError::Configuration(format!(
                    "finite difference axis {} repeated",
                    axis
                )));
            }
            if input_dims[axis] < 2 {
                return Err(ADMMError::Configuration(format!(
                    "finite difference along axis {} needs at least 2 elements, got {}",
                    axis, input_dims[axis]
                )));
            }
        }

        let per_axis: Vec<Vec<usize>> = axes
            .iter()
            .map(|&axis| {
                let mut dims = input_dims.to_vec();
                if boundary == Boundary::Truncate {
                    dims[axis] -= 1;
                }
                dims
            })
            .collect();
        let stacked = per_axis.iter().all(|d| d == &per_axis[0]);
        let output_shape = if per_axis.len() == 1 {
            Shape::Flat(per_axis[0].clone())
        } else if stacked {
            let mut dims = vec![per_axis.len()];
            dims.extend_from_slice(&per_axis[0]);
            Shape::Flat(dims)
        } else {
            Shape::Blocked(per_axis)
        };

        Ok(FiniteDifference {
            input_shape: Shape::from(input_dims),
            output_shape,
            dims: input_dims.to_vec(),
            axes,
            boundary,
            stacked,
            _marker: PhantomData,
        })
    }

    pub fn axes(&self) -> &[usize] {
        &self.axes
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    fn diff_axis(&self, x: &ArrayD<T>, axis: usize) -> Result<ArrayD<T>> {
        let n = self.dims[axis];
        let ax = Axis(axis);
        let head = x.slice_axis(ax, Slice::from(..n - 1));
        let tail = x.slice_axis(ax, Slice::from(1..));
        let inner = &tail - &head;
        match self.boundary {
            Boundary::Truncate => Ok(inner),
            Boundary::AppendZero => {
                let last = x.slice_axis(ax, Slice::from(n - 1..)).mapv(|v| -v);
                concat(ax, inner.view(), last.view())
            }
            Boundary::Circular => {
                let first = x.slice_axis(ax, Slice::from(..1));
                let last = x.slice_axis(ax, Slice::from(n - 1..));
                let wrap = &first - &last;
                concat(ax, inner.view(), wrap.view())
            }
        }
    }

    fn diff_axis_adjoint(&self, y: &ArrayD<T>, axis: usize) -> ArrayD<T> {
        let n = self.dims[axis];
        let ax = Axis(axis);
        let mut out = ArrayD::zeros(IxDyn(&self.dims));
        // interior rows contribute y[i] to out[i + 1] and -y[i] to out[i]
        let interior = y.slice_axis(ax, Slice::from(..n - 1));
        {
            let mut dst = out.slice_axis_mut(ax, Slice::from(1..));
            dst += &interior;
        }
        {
            let mut dst = out.slice_axis_mut(ax, Slice::from(..n - 1));
            dst -= &interior;
        }
        match self.boundary {
            Boundary::Truncate => {}
            Boundary::AppendZero => {
                let last = y.slice_axis(ax, Slice::from(n - 1..));
                let mut dst = out.slice_axis_mut(ax, Slice::from(n - 1..));
                dst -= &last;
            }
            Boundary::Circular => {
                let last = y.slice_axis(ax, Slice::from(n - 1..));
                {
                    let mut dst = out.slice_axis_mut(ax, Slice::from(n - 1..));
                    dst -= &last;
                }
                let mut dst = out.slice_axis_mut(ax, Slice::from(..1));
                dst += &last;
            }
        }
        out
    }
}

fn concat<'a, T: Scalar>(
    axis: Axis,
    a: ArrayView<'a, T, IxDyn>,
    b: ArrayView<'a, T, IxDyn>,
) -> Result<ArrayD<T>> {
    ndarray::concatenate(axis, &[a, b]).map_err(|e| {
        ADMMError::Numerical(format!("finite difference boundary concatenation failed: {}", e))
    })
}

impl<T: Scalar> LinearMap<T> for FiniteDifference<T> {
    fn name(&self) -> &str {
        "FiniteDifference"
    }

    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn forward(&self, x: &Array<T>) -> Result<Array<T>> {
        let x = x.expect_flat("finite difference")?;
        if let [axis] = self.axes[..] {
            return Ok(Array::Flat(self.diff_axis(x, axis)?));
        }
        let parts = self
            .axes
            .iter()
            .map(|&axis| self.diff_axis(x, axis))
            .collect::<Result<Vec<_>>>()?;
        if self.stacked {
            let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
            let stacked = ndarray::stack(Axis(0), &views).map_err(|e| {
                ADMMError::Numerical(format!("finite difference stacking failed: {}", e))
            })?;
            return Ok(Array::Flat(stacked));
        }
        Ok(Array::Blocked(parts))
    }

    fn adjoint(&self, y: &Array<T>) -> Result<Array<T>> {
        let mut out = ArrayD::zeros(IxDyn(&self.dims));
        match y {
            Array::Flat(y) if self.axes.len() == 1 => {
                out = self.diff_axis_adjoint(y, self.axes[0]);
            }
            Array::Flat(y) => {
                for (k, &axis) in self.axes.iter().enumerate() {
                    let part = y.index_axis(Axis(0), k).to_owned();
                    out = out + self.diff_axis_adjoint(&part, axis);
                }
            }
            Array::Blocked(parts) => {
                for (part, &axis) in parts.iter().zip(&self.axes) {
                    out = out + self.diff_axis_adjoint(part, axis);
                }
            }
        }
        Ok(Array::Flat(out))
    }
}
