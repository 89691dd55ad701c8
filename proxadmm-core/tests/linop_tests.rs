use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array2, ArrayD, IxDyn};
use num_complex::Complex;
use rand::SeedableRng;
use rand::rngs::StdRng;

use proxadmm_core::array::{Array, Shape};
use proxadmm_core::dtype::Scalar;
use proxadmm_core::error::ADMMError;
use proxadmm_core::linop::{self, AdjointState, Boundary, FnOperator, LinearOperator};

fn random_matrix<T: Scalar>(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<T> {
    Array2::from_shape_fn((rows, cols), |_| T::sample_standard_normal(rng))
}

fn random_diagonal<T: Scalar>(n: usize, rng: &mut StdRng) -> LinearOperator<T> {
    linop::diagonal(Array::randn(&Shape::from(n), rng))
}

/// Tolerances for (relative, absolute) comparisons at the precision of `T`.
fn tolerances<T: Scalar>() -> (f64, f64) {
    if T::DTYPE.real_dtype() == proxadmm_core::dtype::DType::F32 {
        (1e-4, 1e-5)
    } else {
        (1e-10, 1e-12)
    }
}

fn check_algebra<T: Scalar>(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (rtol, atol) = tolerances::<T>();
    let a = linop::matrix(random_matrix::<T>(3, 4, &mut rng));
    let b = linop::matrix(random_matrix::<T>(3, 4, &mut rng));
    let d = random_diagonal::<T>(4, &mut rng);
    let s = T::sample_standard_normal(&mut rng);
    let x = Array::randn(&Shape::from(4), &mut rng);
    let y = Array::randn(&Shape::from(3), &mut rng);

    let ax = a.apply(&x).unwrap();
    let bx = b.apply(&x).unwrap();

    let sum = a.try_add(&b).unwrap();
    assert!(sum.apply(&x).unwrap().allclose(&ax.try_add(&bx).unwrap(), rtol, atol));

    let diff = a.try_sub(&b).unwrap();
    assert!(diff.apply(&x).unwrap().allclose(&ax.try_sub(&bx).unwrap(), rtol, atol));

    let scaled = a.scale(s);
    assert!(scaled.apply(&x).unwrap().allclose(&ax.scaled(s), rtol, atol));

    let neg = a.negate();
    assert!(neg.apply(&x).unwrap().allclose(&ax.map(|v| -v), rtol, atol));

    let ad = a.compose(&d).unwrap();
    let expected = a.apply(&d.apply(&x).unwrap()).unwrap();
    assert!(ad.apply(&x).unwrap().allclose(&expected, rtol, atol));
    let expected = d.adjoint(&a.adjoint(&y).unwrap()).unwrap();
    assert!(ad.adjoint(&y).unwrap().allclose(&expected, rtol, atol));

    // A.H and A.conj().T are evaluated by the same arithmetic.
    assert_eq!(a.h().apply(&y).unwrap(), a.conj().t().apply(&y).unwrap());
    assert_eq!(ad.h().apply(&y).unwrap(), ad.conj().t().apply(&y).unwrap());

    let gram = a.gram(&x).unwrap();
    let expected = a.h().compose(&a).unwrap().apply(&x).unwrap();
    assert!(gram.allclose(&expected, rtol, atol));
    assert!(a.gram_op().apply(&x).unwrap().allclose(&gram, rtol, atol));
}

#[test]
fn test_algebra_f32() {
    check_algebra::<f32>(1);
}

#[test]
fn test_algebra_f64() {
    check_algebra::<f64>(2);
}

#[test]
fn test_algebra_complex64() {
    check_algebra::<Complex<f32>>(3);
}

#[test]
fn test_algebra_complex128() {
    check_algebra::<Complex<f64>>(4);
}

fn primitives<T: Scalar>(rng: &mut StdRng) -> Vec<LinearOperator<T>> {
    let kernel = Array::<T>::randn(&Shape::from((3, 2)), rng).into_flat("kernel").unwrap();
    let closure_matrix = random_matrix::<T>(4, 5, rng);
    let probed = LinearOperator::from_fn(Shape::from(5), Shape::from(4), move |x: &Array<T>| {
        let v = ndarray::Array1::from_vec(x.to_vec());
        Ok(Array::from_vec(closure_matrix.dot(&v).to_vec()))
    });
    vec![
        linop::identity(Shape::from((2, 3))),
        random_diagonal(6, rng),
        linop::diagonal_with_input_shape(
            Array::randn(&Shape::from((1, 4)), rng),
            Shape::from((3, 1)),
        )
        .unwrap(),
        linop::matrix(random_matrix(4, 6, rng)),
        linop::finite_difference(&[7], None, Boundary::Truncate).unwrap(),
        linop::finite_difference(&[5, 4], None, Boundary::AppendZero).unwrap(),
        linop::finite_difference(&[5, 4], None, Boundary::Truncate).unwrap(),
        linop::finite_difference(&[3, 4, 5], Some(&[2, 0]), Boundary::Circular).unwrap(),
        linop::convolve(kernel, &[6, 5]).unwrap(),
        probed,
    ]
}

fn check_adjoints<T: Scalar>(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (rtol, _) = tolerances::<T>();
    let ops = primitives::<T>(&mut rng);
    for a in &ops {
        assert!(
            linop::valid_adjoint(a, &a.h(), rtol, &mut rng).unwrap(),
            "adjoint check failed for {:?}",
            a
        );
        assert!(linop::valid_adjoint(&a.t(), &a.t().h(), rtol, &mut rng).unwrap());
        assert!(linop::valid_adjoint(&a.conj(), &a.conj().h(), rtol, &mut rng).unwrap());
    }

    let s = T::sample_standard_normal(&mut rng);
    let m = linop::matrix(random_matrix::<T>(6, 7, &mut rng));
    let d = random_diagonal::<T>(6, &mut rng);
    let fd = linop::finite_difference::<T>(&[7], None, Boundary::AppendZero).unwrap();
    let composites = vec![
        d.compose(&m).unwrap(),
        d.try_add(&d.scale(s)).unwrap(),
        m.try_sub(&linop::matrix(random_matrix(6, 7, &mut rng))).unwrap(),
        m.compose(&fd.gram_op()).unwrap().negate(),
        m.h().compose(&d).unwrap(),
        m.adjoint_compose(&d).unwrap(),
        fd.t().compose(&fd).unwrap().scale(s),
    ];
    for a in &composites {
        assert!(
            linop::valid_adjoint(a, &a.h(), rtol, &mut rng).unwrap(),
            "adjoint check failed for {:?}",
            a
        );
    }
}

#[test]
fn test_valid_adjoint_f32() {
    check_adjoints::<f32>(10);
}

#[test]
fn test_valid_adjoint_f64() {
    check_adjoints::<f64>(11);
}

#[test]
fn test_valid_adjoint_complex64() {
    check_adjoints::<Complex<f32>>(12);
}

#[test]
fn test_valid_adjoint_complex128() {
    check_adjoints::<Complex<f64>>(13);
}

#[test]
fn test_valid_adjoint_detects_wrong_adjoint() {
    let mut rng = StdRng::seed_from_u64(5);
    let m = linop::matrix(random_matrix::<f64>(4, 4, &mut rng));
    assert!(!linop::valid_adjoint(&m, &m, 1e-6, &mut rng).unwrap());
    let err = linop::valid_adjoint(&m, &linop::identity(Shape::from(3)), 1e-6, &mut rng);
    assert!(matches!(err, Err(ADMMError::ShapeMismatch { .. })));
}

#[test]
fn test_lazy_adjoint_is_derived_once() {
    let leaf = Arc::new(FnOperator::new(Shape::from(3), Shape::from(2), |x: &Array<f64>| {
        let v = x.to_vec();
        Ok(Array::from_vec(vec![v[0] - v[2], 2.0 * v[1]]))
    }));
    let a = LinearOperator::<f64>::from_map(leaf.clone());
    assert_eq!(a.adjoint_state(), AdjointState::Unresolved);
    assert_eq!(leaf.resolutions(), 0);

    a.apply(&Array::from_vec(vec![1.0, 2.0, 3.0])).unwrap();
    assert_eq!(leaf.resolutions(), 0);

    let y = Array::from_vec(vec![1.0, 1.0]);
    let first = a.adjoint(&y).unwrap();
    let second = a.adjoint(&y).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_vec(), vec![1.0, 2.0, -1.0]);
    assert_eq!(leaf.resolutions(), 1);
    assert_eq!(a.adjoint_state(), AdjointState::Resolved);
}

#[test]
fn test_compile_resolves_whole_tree() {
    let leaf = Arc::new(FnOperator::new(Shape::from(2), Shape::from(2), |x: &Array<f64>| {
        Ok(x.scaled(3.0))
    }));
    let a = LinearOperator::<f64>::from_map(leaf.clone());
    let tree = a.try_add(&linop::identity(Shape::from(2))).unwrap().h();
    assert_eq!(tree.adjoint_state(), AdjointState::Unresolved);

    tree.compile().unwrap();
    assert_eq!(leaf.resolutions(), 1);
    assert_eq!(tree.adjoint_state(), AdjointState::Resolved);

    tree.compile().unwrap();
    tree.apply(&Array::from_vec(vec![1.0, 1.0])).unwrap();
    assert_eq!(leaf.resolutions(), 1);

    let explicit = linop::identity::<f64>(Shape::from(2));
    assert_eq!(explicit.adjoint_state(), AdjointState::Explicit);
}

#[test]
fn test_shape_errors_raise_before_evaluation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let a = LinearOperator::from_fn(Shape::from(3), Shape::from(3), move |x: &Array<f64>| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(x.clone())
    });

    let err = a.apply(&Array::zeros(&Shape::from(4))).unwrap_err();
    assert!(matches!(err, ADMMError::ShapeMismatch { .. }));
    let err = (&a * &Array::zeros(&Shape::from(2))).unwrap_err();
    assert!(matches!(err, ADMMError::ShapeMismatch { .. }));
    let err = a.adjoint(&Array::zeros(&Shape::from(2))).unwrap_err();
    assert!(matches!(err, ADMMError::ShapeMismatch { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let b = linop::finite_difference::<f64>(&[3], None, Boundary::Truncate).unwrap();
    assert!(matches!(&a + &b, Err(ADMMError::ShapeMismatch { .. })));
    assert!(matches!(&a - &b, Err(ADMMError::ShapeMismatch { .. })));
    assert!(matches!(&a * &b, Err(ADMMError::ShapeMismatch { .. })));
    assert!(matches!(a.adjoint_compose(&b), Err(ADMMError::ShapeMismatch { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert!((&b * &a).is_ok());
}

#[test]
fn test_operator_overloads() {
    let d = linop::diagonal(Array::from_vec(vec![1.0f64, 2.0]));
    let i = linop::identity::<f64>(Shape::from(2));
    let x = Array::from_vec(vec![1.0, 1.0]);

    let a = (&d + &i).unwrap();
    assert_eq!((&a * &x).unwrap().to_vec(), vec![2.0, 3.0]);
    let a = (&d - &i).unwrap();
    assert_eq!(a.apply(&x).unwrap().to_vec(), vec![0.0, 1.0]);
    assert_eq!((2.0 * &d).apply(&x).unwrap().to_vec(), vec![2.0, 4.0]);
    assert_eq!((&d * 2.0).apply(&x).unwrap().to_vec(), vec![2.0, 4.0]);
    assert_eq!((&d / 2.0).apply(&x).unwrap().to_vec(), vec![0.5, 1.0]);
    assert_eq!((-&d).apply(&x).unwrap().to_vec(), vec![-1.0, -2.0]);
    let dd = (&d * &d).unwrap();
    assert_eq!(dd.apply(&x).unwrap().to_vec(), vec![1.0, 4.0]);

    let c = linop::identity::<Complex<f64>>(Shape::from(1));
    let s = Complex::new(1.0, 1.0);
    let y = Array::from_vec(vec![Complex::new(1.0, 0.0)]);
    assert_eq!((s * &c).adjoint(&y).unwrap().to_vec(), vec![Complex::new(1.0, -1.0)]);
}

#[test]
fn test_blocked_diagonal_broadcasting() {
    let mut rng = StdRng::seed_from_u64(21);
    let input_shape = Shape::blocked(vec![vec![3, 1, 4], vec![5, 5]]);
    let diag = Array::from_blocks(vec![
        ArrayD::from_shape_fn(IxDyn(&[1, 5, 1]), |ix| 1.0 + ix[1] as f64),
        ArrayD::from_shape_fn(IxDyn(&[5]), |ix| -(ix[0] as f64)),
    ]);
    let op = linop::diagonal_with_input_shape(diag, input_shape.clone()).unwrap();
    assert_eq!(op.input_shape(), &input_shape);
    assert_eq!(op.output_shape(), &Shape::blocked(vec![vec![3, 5, 4], vec![5, 5]]));
    assert!(linop::valid_adjoint(&op, &op.h(), 1e-10, &mut rng).unwrap());

    let x = Array::from_blocks(vec![
        ArrayD::from_elem(IxDyn(&[3, 1, 4]), 2.0),
        ArrayD::from_elem(IxDyn(&[5, 5]), 1.0),
    ]);
    let y = op.apply(&x).unwrap();
    let blocks = y.blocks().unwrap();
    assert_eq!(blocks[0][[2, 4, 3]], 10.0);
    assert_eq!(blocks[1][[0, 3]], -3.0);

    let flat = Array::from_vec(vec![1.0, 2.0, 3.0]);
    let err = linop::diagonal_with_input_shape(flat, input_shape).err().unwrap();
    assert!(matches!(err, ADMMError::ShapeMismatch { .. }));
}

#[test]
fn test_finite_difference_layouts() {
    let stacked = linop::finite_difference::<f64>(&[4, 3], None, Boundary::AppendZero).unwrap();
    assert_eq!(stacked.output_shape(), &Shape::from((2, 4, 3)));
    let blocked = linop::finite_difference::<f64>(&[4, 3], None, Boundary::Truncate).unwrap();
    assert_eq!(blocked.output_shape(), &Shape::blocked(vec![vec![3, 3], vec![4, 2]]));
    let single = linop::finite_difference::<f64>(&[4, 3], Some(&[1]), Boundary::Circular).unwrap();
    assert_eq!(single.output_shape(), &Shape::from((4, 3)));
    assert!(linop::finite_difference::<f64>(&[4, 3], Some(&[2]), Boundary::Truncate).is_err());
}
