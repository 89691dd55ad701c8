use ndarray::{ArrayD, IxDyn, Slice};

use super::LinearMap;
use crate::array::{Array, Shape};
use crate::dtype::Scalar;
use crate::error::{ADMMError, Result};

/// N-dimensional "full" linear convolution with a fixed kernel.
///
/// For an input of shape `n` and a kernel of shape `k` the output has shape
/// `n + k - 1` on every axis, so no boundary values are discarded. The
/// adjoint is the matching correlation, which restores shape `n`.
pub struct Convolve<T> {
    kernel: ArrayD<T>,
    input_shape: Shape,
    output_shape: Shape,
    input_dims: Vec<usize>,
}

impl<T: Scalar> Convolve<T> {
    /// # Returns
    ///
    /// * `Err(ADMMError::Configuration)` if the kernel and input differ in
    ///   dimensionality or either has an empty axis
    pub fn new(kernel: ArrayD<T>, input_dims: &[usize]) -> Result<Self> {
        if kernel.ndim() != input_dims.len() {
            return Err(ADMMError::Configuration(format!(
                "convolution kernel has {} dimensions, input has {}",
                kernel.ndim(),
                input_dims.len()
            )));
        }
        if kernel.is_empty() || input_dims.contains(&0) {
            return Err(ADMMError::Configuration(
                "convolution kernel and input must be non-empty".to_string(),
            ));
        }
        let output_dims: Vec<usize> = input_dims
            .iter()
            .zip(kernel.shape())
            .map(|(n, k)| n + k - 1)
            .collect();
        Ok(Convolve {
            kernel,
            input_shape: Shape::from(input_dims),
            output_shape: Shape::Flat(output_dims),
            input_dims: input_dims.to_vec(),
        })
    }

    pub fn kernel(&self) -> &ArrayD<T> {
        &self.kernel
    }
}

impl<T: Scalar> LinearMap<T> for Convolve<T> {
    fn name(&self) -> &str {
        "Convolve"
    }

    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn forward(&self, x: &Array<T>) -> Result<Array<T>> {
        let x = x.expect_flat("convolution")?;
        let out_dims = self.output_shape.dims().unwrap_or_default();
        let mut out = ArrayD::zeros(IxDyn(out_dims));
        for (offset, &h) in self.kernel.indexed_iter() {
            let mut window = out.slice_each_axis_mut(|ad| {
                let start = offset[ad.axis.index()];
                Slice::from(start..start + self.input_dims[ad.axis.index()])
            });
            window.scaled_add(h, x);
        }
        Ok(Array::Flat(out))
    }

    fn adjoint(&self, y: &Array<T>) -> Result<Array<T>> {
        let y = y.expect_flat("convolution adjoint")?;
        let mut out = ArrayD::zeros(IxDyn(&self.input_dims));
        for (offset, &h) in self.kernel.indexed_iter() {
            let window = y.slice_each_axis(|ad| {
                let start = offset[ad.axis.index()];
                Slice::from(start..start + self.input_dims[ad.axis.index()])
            });
            out.scaled_add(h.conj(), &window);
        }
        Ok(Array::Flat(out))
    }
}
