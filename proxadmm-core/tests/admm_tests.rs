use std::sync::Arc;

use ndarray::ArrayD;
use num_complex::Complex;

use proxadmm_core::array::{Array, Shape};
use proxadmm_core::cg::CgOptions;
use proxadmm_core::denoiser::{Bm3d, Denoiser, DenoiserBackend, DenoiserPrior};
use proxadmm_core::error::{ADMMError, Result};
use proxadmm_core::functional::{
    Functional, FunctionalExt, L1Norm, L21Norm, SquaredL2Norm, ZeroFunctional,
};
use proxadmm_core::linop::{self, Boundary};
use proxadmm_core::loss::SquaredL2Loss;
use proxadmm_core::problem::{ADMMConfig, ADMMProblem, ADMMSolver, ItstatOptions, SolverState};
use proxadmm_core::subproblem::{GenericSubproblemSolver, LinearSubproblemSolver, SubproblemSolver};
use proxadmm_core::utils::{tv1d_objective, tv1d_reference};

const N: usize = 16;
const LAMBDA: f64 = 0.05;
const RHO: f64 = 0.1;

fn linear() -> Box<dyn SubproblemSolver<f64>> {
    Box::new(LinearSubproblemSolver::default())
}

fn generic() -> Box<dyn SubproblemSolver<f64>> {
    Box::new(GenericSubproblemSolver::default())
}

fn step_signal() -> Vec<f64> {
    (0..N)
        .map(|i| if i >= N / 2 { 1.0 } else { 0.0 } + 0.1 * (1.7 * i as f64).sin())
        .collect()
}

fn tv_problem() -> ADMMProblem<f64> {
    let y = Array::from_vec(step_signal());
    let f = SquaredL2Loss::new(y, linop::identity(Shape::from(N))).unwrap();
    let g = FunctionalExt::<f64>::scaled(L1Norm, LAMBDA).unwrap();
    ADMMProblem {
        f: Arc::new(f),
        g_list: vec![Arc::new(g)],
        c_list: vec![linop::finite_difference(&[N], None, Boundary::Truncate).unwrap()],
        rho_list: vec![RHO],
        x0: Array::zeros(&Shape::from(N)),
    }
}

fn run_tv_scenario(subproblem_solver: Box<dyn SubproblemSolver<f64>>) {
    let config = ADMMConfig {
        max_iter: 50,
        itstat: ItstatOptions {
            period: 1,
            display: false,
        },
        stop_tolerance: None,
    };
    let mut solver = ADMMSolver::new(tv_problem(), config, subproblem_solver).unwrap();
    let x = solver.solve().unwrap();
    assert_eq!(solver.state(), SolverState::MaxIterReached);

    let history = solver.history().transposed();
    assert_eq!(history.iteration, (1..=50).collect::<Vec<_>>());

    let y = step_signal();
    let reference = tv1d_reference(&y, LAMBDA, 100_000, 1e-13).unwrap();
    let objective = tv1d_objective(&y, &x.to_vec(), LAMBDA);
    let reported = history.objective[49].unwrap();
    assert!((reported - objective).abs() < 1e-12);
    let rel = (objective - reference.objective).abs() / reference.objective;
    assert!(rel < 0.01, "objective {} vs reference {}", objective, reference.objective);

    let residual: Vec<f64> = history
        .primal_residual
        .iter()
        .zip(&history.dual_residual)
        .map(|(p, d)| p + d)
        .collect();
    for k in 25..50 {
        assert!(
            residual[k] <= residual[k - 1] * 1.05,
            "residual increased at iteration {}: {} -> {}",
            k + 1,
            residual[k - 1],
            residual[k]
        );
    }
    assert!(residual[49] < residual[25]);
}

#[test]
fn test_tv_denoising_with_linear_subproblem_solver() {
    run_tv_scenario(linear());
}

#[test]
fn test_tv_denoising_with_generic_subproblem_solver() {
    run_tv_scenario(generic());
}

const IMG: usize = 16;

fn block_image() -> Array<f64> {
    let values = (0..IMG * IMG)
        .map(|i| {
            let (r, c) = (i / IMG, i % IMG);
            if (4..12).contains(&r) && (5..11).contains(&c) { 1.0 } else { 0.0 }
        })
        .collect();
    Array::from_shape_vec(&[IMG, IMG], values).unwrap()
}

/// Isotropic TV deconvolution of a blurred block, solved to `max_iter` iterations.
fn run_deconv_tv(subproblem_solver: Box<dyn SubproblemSolver<f64>>) -> (Array<f64>, f64, f64) {
    let kernel = ArrayD::from_elem(ndarray::IxDyn(&[3, 3]), 1.0 / 9.0);
    let a = linop::convolve::<f64>(kernel, &[IMG, IMG]).unwrap();
    let y = a.apply(&block_image()).unwrap();
    let x0 = a.adjoint(&y).unwrap();
    let f = SquaredL2Loss::new(y, a).unwrap();
    let g = FunctionalExt::<f64>::scaled(L21Norm::default(), 0.02).unwrap();
    let c = linop::finite_difference::<f64>(&[IMG, IMG], None, Boundary::AppendZero).unwrap();
    assert_eq!(c.output_shape(), &Shape::from((2, IMG, IMG)));
    let initial = f.value(&x0).unwrap() + g.value(&c.apply(&x0).unwrap()).unwrap();

    let problem = ADMMProblem {
        f: Arc::new(f),
        g_list: vec![Arc::new(g)],
        c_list: vec![c],
        rho_list: vec![0.2],
        x0,
    };
    let config = ADMMConfig {
        max_iter: 100,
        ..ADMMConfig::default()
    };
    let mut solver = ADMMSolver::new(problem, config, subproblem_solver).unwrap();
    let x = solver.solve().unwrap();
    let history = solver.history().transposed();
    let last = history.objective.last().copied().flatten().unwrap();
    let first_residual = history.primal_residual[0] + history.dual_residual[0];
    let k = history.iteration.len() - 1;
    let last_residual = history.primal_residual[k] + history.dual_residual[k];
    assert!(last < initial, "objective {} not below initial {}", last, initial);
    assert!(last_residual < first_residual);
    (x, last, initial)
}

#[test]
fn test_deconvolution_with_isotropic_tv() {
    let (x_linear, obj_linear, initial) =
        run_deconv_tv(Box::new(LinearSubproblemSolver::<f64>::new(CgOptions {
            tol: 1e-8,
            ..CgOptions::default()
        })));
    let (x_generic, obj_generic, _) = run_deconv_tv(generic());
    assert!(
        (obj_linear - obj_generic).abs() / obj_linear < 0.01,
        "linear {} vs generic {} (initial {})",
        obj_linear,
        obj_generic,
        initial
    );

    let truth = block_image();
    let err = |x: &Array<f64>| x.try_sub(&truth).unwrap().norm() / truth.norm();
    assert!(err(&x_linear) < 0.3, "relative error {}", err(&x_linear));
    assert!(err(&x_generic) < 0.3, "relative error {}", err(&x_generic));
}

#[test]
fn test_linear_solver_reports_inner_statistics() {
    let config = ADMMConfig {
        max_iter: 4,
        ..ADMMConfig::default()
    };
    let mut solver = ADMMSolver::new(tv_problem(), config, linear()).unwrap();
    solver.solve().unwrap();
    let cols = solver.history().transposed();
    assert!(cols.inner_iterations.iter().all(|it| it.is_some()));
    assert!(cols.inner_converged.iter().all(|c| *c == Some(true)));

    let mut solver = ADMMSolver::new(tv_problem(), config, generic()).unwrap();
    solver.solve().unwrap();
    assert!(solver.history().records().iter().all(|r| r.inner_iterations.is_none()));
}

#[test]
fn test_configuration_errors() {
    let mut p = tv_problem();
    p.g_list.push(Arc::new(ZeroFunctional));
    let err = ADMMSolver::new(p, ADMMConfig::default(), linear()).err().unwrap();
    assert!(matches!(err, ADMMError::Configuration(_)));

    let mut p = tv_problem();
    p.x0 = Array::zeros(&Shape::from(N + 1));
    let err = ADMMSolver::new(p, ADMMConfig::default(), linear()).err().unwrap();
    assert!(matches!(err, ADMMError::Configuration(_)));

    let mut p = tv_problem();
    p.f = Arc::new(SquaredL2Norm);
    let err = ADMMSolver::new(p, ADMMConfig::default(), linear()).err().unwrap();
    assert!(matches!(err, ADMMError::Configuration(_)));

    let config = ADMMConfig {
        itstat: ItstatOptions {
            period: 0,
            display: false,
        },
        ..ADMMConfig::default()
    };
    let err = ADMMSolver::new(tv_problem(), config, linear()).err().unwrap();
    assert!(matches!(err, ADMMError::Configuration(_)));
}

#[test]
fn test_json_configuration() {
    let json = r#"{"max_iter": 5, "itstat": {"period": 2, "display": true}}"#;
    let config = ADMMConfig::from_json_str(json).unwrap();
    let mut solver = ADMMSolver::new(tv_problem(), config, linear()).unwrap();
    solver.solve().unwrap();
    assert_eq!(solver.history().transposed().iteration, vec![2, 4, 5]);

    let path = std::env::temp_dir().join("proxadmm_admm_config_test.json");
    std::fs::write(&path, r#"{"max_iter": 3, "stop_tolerance": 0.5}"#).unwrap();
    let config = ADMMConfig::from_json_file(&path).unwrap();
    assert_eq!(config.max_iter, 3);
    assert_eq!(config.stop_tolerance, Some(0.5));
    assert_eq!(config.itstat, ItstatOptions::default());
    std::fs::remove_file(&path).unwrap();

    assert!(matches!(
        ADMMConfig::from_json_str("{\"max_iter\": \"many\"}"),
        Err(ADMMError::Serialization(_))
    ));
}

#[test]
fn test_complex_problem_converges_early() {
    let y = Array::from_vec(vec![
        Complex::new(1.0, -1.0),
        Complex::new(0.5, 2.0),
        Complex::new(-3.0, 0.25),
    ]);
    let shape = Shape::from(3);
    let f = SquaredL2Loss::new(y.clone(), linop::identity(shape.clone())).unwrap();
    let problem = ADMMProblem {
        f: Arc::new(f),
        g_list: vec![Arc::new(ZeroFunctional)],
        c_list: vec![linop::identity(shape.clone())],
        rho_list: vec![1.0],
        x0: Array::zeros(&shape),
    };
    let config = ADMMConfig {
        max_iter: 200,
        stop_tolerance: Some(1e-10),
        ..ADMMConfig::default()
    };
    let inner = LinearSubproblemSolver::<Complex<f64>>::new(CgOptions {
        tol: 1e-12,
        ..CgOptions::default()
    });
    let mut solver = ADMMSolver::new(problem, config, Box::new(inner)).unwrap();
    let x = solver.solve().unwrap();
    assert_eq!(solver.state(), SolverState::Converged);
    assert!(solver.iteration() < 200);
    assert!(x.allclose(&y, 1e-8, 1e-8));
}

#[test]
fn test_denoiser_prior_has_no_objective() {
    let backend: Arc<dyn DenoiserBackend> =
        Arc::new(|x: &ArrayD<f64>, _sigma: f64| -> Result<ArrayD<f64>> { Ok(x.mapv(|v| 0.9 * v)) });
    let prior = DenoiserPrior::new(Denoiser::Bm3d(Bm3d::new(backend)));
    let shape = Shape::from((8, 8));
    let values = (0..64).map(|i| (i % 8) as f64 / 8.0).collect();
    let y = Array::from_shape_vec(&[8, 8], values).unwrap();
    let f = SquaredL2Loss::new(y, linop::identity(shape.clone())).unwrap();
    let problem = ADMMProblem {
        f: Arc::new(f),
        g_list: vec![Arc::new(prior)],
        c_list: vec![linop::identity(shape.clone())],
        rho_list: vec![2.0],
        x0: Array::zeros(&shape),
    };
    let config = ADMMConfig {
        max_iter: 3,
        ..ADMMConfig::default()
    };
    let mut solver = ADMMSolver::new(problem, config, linear()).unwrap();
    let x = solver.solve().unwrap();
    assert!(x.is_finite());
    assert!(solver.history().records().iter().all(|r| r.objective.is_none()));
}

#[test]
fn test_denoiser_failure_stops_iteration() {
    let prior = DenoiserPrior::new(Denoiser::Bm3d(Bm3d::unavailable()));
    let shape = Shape::from((8, 8));
    let f = SquaredL2Loss::new(Array::zeros(&shape), linop::identity(shape.clone())).unwrap();
    let problem = ADMMProblem {
        f: Arc::new(f),
        g_list: vec![Arc::new(prior)],
        c_list: vec![linop::identity(shape.clone())],
        rho_list: vec![1.0],
        x0: Array::zeros(&shape),
    };
    let mut solver = ADMMSolver::new(problem, ADMMConfig::default(), linear()).unwrap();
    assert!(matches!(solver.step(), Err(ADMMError::ExternalCall(_))));
    assert_eq!(solver.iteration(), 0);
}

#[test]
fn test_exports() {
    let config = ADMMConfig {
        max_iter: 3,
        ..ADMMConfig::default()
    };
    let mut solver = ADMMSolver::new(tv_problem(), config, linear()).unwrap();
    solver.solve().unwrap();

    let dir = std::env::temp_dir();
    let timings = dir.join("proxadmm_admm_timings_test.csv");
    solver.export_step_timings(&timings).unwrap();
    let text = std::fs::read_to_string(&timings).unwrap();
    // header + setup + 4 phases per iteration
    assert_eq!(text.lines().count(), 1 + 1 + 4 * 3);
    std::fs::remove_file(&timings).unwrap();

    let json = solver.history().to_json().unwrap();
    assert!(json.contains("primal_residual"));
    let summary = solver.timing_summary();
    let update_x = summary.iter().find(|(name, _)| name == "update_x").unwrap();
    assert_eq!(update_x.1.count, 3);
}
