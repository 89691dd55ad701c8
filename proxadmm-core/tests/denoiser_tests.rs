use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::ArrayD;
use num_complex::Complex;

use proxadmm_core::array::{Array, Shape};
use proxadmm_core::denoiser::{Bm3d, Bm4d, DenoiserBackend};
use proxadmm_core::error::{ADMMError, Result};

/// Identity backend that counts its invocations and remembers the last input shape.
struct Recorder {
    calls: AtomicUsize,
    last_shape: std::sync::Mutex<Vec<usize>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Recorder {
            calls: AtomicUsize::new(0),
            last_shape: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DenoiserBackend for Recorder {
    fn denoise(&self, image: &ArrayD<f64>, _sigma: f64) -> Result<ArrayD<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_shape.lock().unwrap() = image.shape().to_vec();
        Ok(image.clone())
    }
}

fn image(dims: &[usize]) -> Array<f64> {
    let n: usize = dims.iter().product();
    Array::from_shape_vec(dims, (0..n).map(|i| i as f64).collect()).unwrap()
}

#[test]
fn test_small_image_rejected_before_backend() {
    let backend = Recorder::new();
    let bm3d = Bm3d::new(backend.clone());
    let err = bm3d.denoise(&image(&[6, 6]), 0.1).unwrap_err();
    match err {
        ADMMError::ShapeMismatch { expected, got, .. } => {
            assert_eq!(expected, Shape::from((8, 8)));
            assert_eq!(got, Shape::from((6, 6)));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(backend.calls(), 0);
}

#[test]
fn test_valid_image_is_delegated() {
    let backend = Recorder::new();
    let bm3d = Bm3d::new(backend.clone());
    let x = image(&[8, 10]);
    let y = bm3d.denoise(&x, 0.1).unwrap();
    assert_eq!(y, x);
    assert_eq!(backend.calls(), 1);
}

#[test]
fn test_complex_input_is_a_type_error() {
    let backend = Recorder::new();
    let x = Array::<Complex<f64>>::zeros(&Shape::from((8, 8)));
    let err = Bm3d::new(backend.clone()).denoise(&x, 0.1).unwrap_err();
    assert!(matches!(err, ADMMError::Type(_)));
    assert_eq!(backend.calls(), 0);
}

#[test]
fn test_rank_requirements() {
    let backend = Recorder::new();
    let bm3d = Bm3d::new(backend.clone());
    let bm4d = Bm4d::new(backend.clone());
    let rejected = |r: Result<Array<f64>>| matches!(r, Err(ADMMError::ShapeMismatch { .. }));
    assert!(rejected(bm3d.denoise(&image(&[64]), 0.1)));
    assert!(rejected(bm4d.denoise(&image(&[8, 8]), 0.1)));
    assert!(rejected(bm4d.denoise(&image(&[8, 8, 7]), 0.1)));
    assert!(rejected(bm3d.denoise(&image(&[8, 8, 2, 2]), 0.1)));
    assert_eq!(backend.calls(), 0);
}

#[test]
fn test_trailing_singletons_are_squeezed_and_restored() {
    let backend = Recorder::new();
    let x = image(&[8, 9, 2, 1, 1]);
    let y = Bm3d::new(backend.clone()).denoise(&x, 0.1).unwrap();
    assert_eq!(y.shape(), Shape::from(vec![8, 9, 2, 1, 1]));
    assert_eq!(*backend.last_shape.lock().unwrap(), vec![8, 9, 2]);

    let x = image(&[8, 8, 8, 1]);
    let y = Bm4d::new(backend.clone()).denoise(&x, 0.1).unwrap();
    assert_eq!(y, x);
    assert_eq!(*backend.last_shape.lock().unwrap(), vec![8, 8, 8]);
    assert_eq!(backend.calls(), 2);
}

#[test]
fn test_all_singleton_axes_squeezed_beyond_rank_three() {
    let backend = Recorder::new();
    let x = image(&[8, 8, 1, 1]);
    let y = Bm3d::new(backend.clone()).denoise(&x, 0.1).unwrap();
    assert_eq!(*backend.last_shape.lock().unwrap(), vec![8, 8]);
    assert_eq!(y, x);

    // rank three and below is passed through unchanged
    let x = image(&[8, 8, 1]);
    Bm3d::new(backend.clone()).denoise(&x, 0.1).unwrap();
    assert_eq!(*backend.last_shape.lock().unwrap(), vec![8, 8, 1]);

    let x = image(&[8, 8, 3, 1]);
    Bm3d::new(backend.clone()).rgb(true).denoise(&x, 0.1).unwrap();
    assert_eq!(*backend.last_shape.lock().unwrap(), vec![8, 8, 3]);
    assert_eq!(backend.calls(), 3);
}

#[test]
fn test_missing_backend() {
    let x = image(&[8, 8]);
    assert!(matches!(Bm3d::unavailable().denoise(&x, 0.1), Err(ADMMError::ExternalCall(_))));
    assert!(matches!(
        Bm4d::unavailable().denoise(&image(&[8, 8, 8]), 0.1),
        Err(ADMMError::ExternalCall(_))
    ));
    // Preconditions are still reported first.
    assert!(matches!(
        Bm3d::unavailable().denoise(&image(&[4, 8]), 0.1),
        Err(ADMMError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_blocked_input_is_a_type_error() {
    let backend = Recorder::new();
    let x = Array::<f64>::zeros(&Shape::blocked(vec![vec![8, 8], vec![8, 8]]));
    assert!(matches!(Bm3d::new(backend.clone()).denoise(&x, 0.1), Err(ADMMError::Type(_))));
    assert_eq!(backend.calls(), 0);
}

#[test]
fn test_single_precision_round_trip() {
    let backend = Recorder::new();
    let values = (0..64).map(|i| i as f32 * 0.5).collect();
    let x = Array::<f32>::from_shape_vec(&[8, 8], values).unwrap();
    let y = Bm3d::new(backend).denoise(&x, 0.1).unwrap();
    assert_eq!(y, x);
}
