//! Boundary to opaque block-matching denoisers.
//!
//! The denoising algorithms themselves are not implemented here. A
//! [`DenoiserBackend`] is any synchronous routine with the contract
//! `denoise(image, sigma) -> image`. [`Bm3d`] and [`Bm4d`] check the
//! documented shape and dtype preconditions before delegating, so that a
//! violation surfaces as an [`ADMMError`] rather than a failure inside the
//! backend.

use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};

use crate::array::{Array, Shape};
use crate::dtype::{RealScalar, Scalar};
use crate::error::{ADMMError, Result};
use crate::functional::Functional;

/// Block size of the "np" profile of BM3D and BM4D.
pub const BLOCK_SIZE: usize = 8;

/// An opaque synchronous denoiser.
///
/// Implementations receive a real image of rank 2 or 3 and must return an
/// image of the same shape.
pub trait DenoiserBackend: Send + Sync {
    fn denoise(&self, image: &ArrayD<f64>, sigma: f64) -> Result<ArrayD<f64>>;
}

impl<F> DenoiserBackend for F
where
    F: Fn(&ArrayD<f64>, f64) -> Result<ArrayD<f64>> + Send + Sync,
{
    fn denoise(&self, image: &ArrayD<f64>, sigma: f64) -> Result<ArrayD<f64>> {
        self(image, sigma)
    }
}

/// Precondition profile shared by BM3D and BM4D.
struct Requirements {
    name: &'static str,
    min_ndim: usize,
    /// Number of leading axes that must be at least [`BLOCK_SIZE`] long.
    spatial_axes: usize,
}

fn denoise_checked<T: Scalar>(
    req: &Requirements,
    backend: Option<&Arc<dyn DenoiserBackend>>,
    rgb: bool,
    x: &Array<T>,
    sigma: f64,
) -> Result<Array<T>> {
    if T::DTYPE.is_complex() {
        return Err(ADMMError::Type(format!(
            "{} requires real-valued inputs, got {}",
            req.name,
            T::DTYPE
        )));
    }
    let image = x.expect_flat(req.name)?;
    let dims = image.shape().to_vec();

    if dims.len() < req.min_ndim {
        return Err(ADMMError::ShapeMismatch {
            context: format!("{} requires at least {} dimensions", req.name, req.min_ndim),
            expected: Shape::from(vec![BLOCK_SIZE; req.min_ndim]),
            got: Shape::from(dims),
        });
    }
    if dims[..req.spatial_axes].iter().any(|&n| n < BLOCK_SIZE) {
        return Err(ADMMError::ShapeMismatch {
            context: format!(
                "{} requires each of the leading {} axes to be at least the block size ({})",
                req.name, req.spatial_axes, BLOCK_SIZE
            ),
            expected: Shape::from(vec![BLOCK_SIZE; req.spatial_axes]),
            got: Shape::from(dims),
        });
    }
    if dims.len() > 3 && dims[3..].iter().any(|&n| n != 1) {
        return Err(ADMMError::ShapeMismatch {
            context: format!(
                "{} tolerates axes beyond the third only if they are singleton",
                req.name
            ),
            expected: Shape::from(dims[..3].to_vec()),
            got: Shape::from(dims),
        });
    }
    // Beyond three axes every singleton axis is dropped, leading ones included.
    let core_dims: Vec<usize> = if dims.len() > 3 {
        dims.iter().copied().filter(|&n| n != 1).collect()
    } else {
        dims.clone()
    };
    // The color transform works on exactly three channels in the last axis
    // handed to the backend.
    if rgb && (core_dims.len() != 3 || core_dims[2] != 3) {
        return Err(ADMMError::ShapeMismatch {
            context: format!(
                "{} with a color transform needs three channels on axis 2",
                req.name
            ),
            expected: Shape::from(vec![dims[0], dims[1], 3]),
            got: Shape::from(dims),
        });
    }
    if !(sigma >= 0.0 && sigma.is_finite()) {
        return Err(ADMMError::Configuration(format!(
            "{} noise level must be non-negative and finite, got {}",
            req.name, sigma
        )));
    }
    let backend = backend.ok_or_else(|| {
        ADMMError::ExternalCall(format!("no {} backend is available", req.name))
    })?;

    let values: Vec<f64> = image.iter().map(|v| v.re().as_f64()).collect();
    let input = ArrayD::from_shape_vec(IxDyn(&core_dims), values)
        .map_err(|e| ADMMError::ExternalCall(format!("{} input layout: {}", req.name, e)))?;

    log::debug!("Delegating {} on {:?} with sigma {}", req.name, core_dims, sigma);
    let output = backend.denoise(&input, sigma)?;
    if output.shape() != core_dims {
        return Err(ADMMError::ExternalCall(format!(
            "{} backend returned shape {:?} for input shape {:?}",
            req.name,
            output.shape(),
            core_dims
        )));
    }

    let restored: Vec<T> = output.iter().map(|&v| T::from_f64(v)).collect();
    Array::from_shape_vec(&dims, restored)
}

/// The BM3D denoiser for 2-D images, or 3-D images with a channel axis.
#[derive(Clone, Default)]
pub struct Bm3d {
    backend: Option<Arc<dyn DenoiserBackend>>,
    is_rgb: bool,
}

impl Bm3d {
    const REQUIREMENTS: Requirements = Requirements {
        name: "BM3D",
        min_ndim: 2,
        spatial_axes: 2,
    };

    pub fn new(backend: Arc<dyn DenoiserBackend>) -> Self {
        Bm3d {
            backend: Some(backend),
            is_rgb: false,
        }
    }

    /// A denoiser with no backend attached. Every call fails with
    /// [`ADMMError::ExternalCall`] once the preconditions have been checked.
    pub fn unavailable() -> Self {
        Bm3d::default()
    }

    /// Use the color transform. The input must be `(rows, cols, 3)` once
    /// trailing singleton axes are squeezed, checked before delegation.
    pub fn rgb(mut self, is_rgb: bool) -> Self {
        self.is_rgb = is_rgb;
        self
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Denoise `x` at noise level `sigma`.
    ///
    /// # Arguments
    ///
    /// * `x` - Real image with two or three axes, plus optional trailing singleton axes
    /// * `sigma` - Noise standard deviation
    ///
    /// # Returns
    ///
    /// * `Ok(Array<T>)` with the shape of `x`
    /// * `Err(ADMMError::Type)` for complex or blocked input
    /// * `Err(ADMMError::ShapeMismatch)` if the rank or the extent of the
    ///   leading two axes violates the block-size requirement, or if the
    ///   color transform is requested for an input without three channels
    /// * `Err(ADMMError::ExternalCall)` if no backend is attached or the
    ///   backend misbehaves
    pub fn denoise<T: Scalar>(&self, x: &Array<T>, sigma: f64) -> Result<Array<T>> {
        denoise_checked(&Self::REQUIREMENTS, self.backend.as_ref(), self.is_rgb, x, sigma)
    }
}

impl fmt::Debug for Bm3d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bm3d")
            .field("available", &self.is_available())
            .field("is_rgb", &self.is_rgb)
            .finish()
    }
}

/// The BM4D denoiser for volumes.
#[derive(Clone, Default)]
pub struct Bm4d {
    backend: Option<Arc<dyn DenoiserBackend>>,
}

impl Bm4d {
    const REQUIREMENTS: Requirements = Requirements {
        name: "BM4D",
        min_ndim: 3,
        spatial_axes: 3,
    };

    pub fn new(backend: Arc<dyn DenoiserBackend>) -> Self {
        Bm4d {
            backend: Some(backend),
        }
    }

    pub fn unavailable() -> Self {
        Bm4d::default()
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Denoise a volume with at least [`BLOCK_SIZE`] samples along each of
    /// its three leading axes.
    pub fn denoise<T: Scalar>(&self, x: &Array<T>, sigma: f64) -> Result<Array<T>> {
        denoise_checked(&Self::REQUIREMENTS, self.backend.as_ref(), false, x, sigma)
    }
}

impl fmt::Debug for Bm4d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bm4d").field("available", &self.is_available()).finish()
    }
}

/// Denoiser selection for [`DenoiserPrior`].
#[derive(Debug, Clone)]
pub enum Denoiser {
    Bm3d(Bm3d),
    Bm4d(Bm4d),
}

impl Denoiser {
    fn denoise<T: Scalar>(&self, x: &Array<T>, sigma: f64) -> Result<Array<T>> {
        match self {
            Denoiser::Bm3d(d) => d.denoise(x, sigma),
            Denoiser::Bm4d(d) => d.denoise(x, sigma),
        }
    }
}

/// Plug-and-play prior: a penalty whose proximal operator is a denoiser.
///
/// `prox(v, t)` denoises `v` at noise level `t`, so that in an ADMM
/// z-update the noise level is `1 / rho`. The penalty has no value.
#[derive(Debug, Clone)]
pub struct DenoiserPrior {
    denoiser: Denoiser,
}

impl DenoiserPrior {
    pub fn new(denoiser: Denoiser) -> Self {
        DenoiserPrior { denoiser }
    }
}

impl<T: Scalar> Functional<T> for DenoiserPrior {
    fn name(&self) -> &str {
        match self.denoiser {
            Denoiser::Bm3d(_) => "BM3D prior",
            Denoiser::Bm4d(_) => "BM4D prior",
        }
    }

    fn is_smooth(&self) -> bool {
        false
    }

    fn has_eval(&self) -> bool {
        false
    }

    fn has_prox(&self) -> bool {
        true
    }

    fn value(&self, _x: &Array<T>) -> Result<T::Real> {
        Err(ADMMError::Unsupported(format!(
            "{} cannot be evaluated",
            Functional::<T>::name(self)
        )))
    }

    fn prox(&self, v: &Array<T>, step: T::Real) -> Result<Array<T>> {
        self.denoiser.denoise(v, step.as_f64())
    }
}
