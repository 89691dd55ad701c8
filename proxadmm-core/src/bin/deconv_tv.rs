/*
This program deblurs a synthetic image with isotropic total-variation
regularization:

    argmin_x (1/2) ||y - A x||^2 + lambda ||C x||_{2,1}

where A is a uniform blur and C stacks the finite differences along both axes.
*/

use std::error::Error;
use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use ndarray::{Array2, ArrayD, IxDyn, s};
use rand::prelude::*;
use rand_distr::Normal;

use proxadmm_core::prelude::*;

/// Program to deconvolve a blurred, noisy phantom with TV regularization.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Image size (the image is size × size)
    #[arg(short = 'N', long, default_value_t = 64)]
    size: usize,

    /// Blur kernel size
    #[arg(short = 'k', long, default_value_t = 5)]
    kernel_size: usize,

    /// Noise standard deviation
    #[arg(long, default_value_t = 20.0 / 255.0)]
    noise: f64,

    /// TV regularization parameter
    #[arg(short, long, default_value_t = 2.7e-2)]
    lambda: f64,

    /// ADMM penalty parameter
    #[arg(short, long, default_value_t = 1.4e-1)]
    rho: f64,

    /// Number of ADMM iterations
    #[arg(short, long, default_value_t = 50)]
    maxiter: usize,

    /// Seed for the noise
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Iteration statistics display period
    #[arg(short, long, default_value_t = 10)]
    period: usize,

    /// JSON solver configuration; overrides --maxiter and --period
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the iteration history as JSON
    #[arg(long)]
    history_json: Option<PathBuf>,

    /// Write per-phase timings as CSV
    #[arg(long)]
    timing_csv: Option<PathBuf>,
}

/// Siemens star with `spokes` sectors inside a disc, padded by `pad` pixels.
fn siemens_star(size: usize, spokes: usize, pad: usize) -> Array2<f64> {
    let inner = size.saturating_sub(2 * pad);
    let center = (inner as f64 - 1.0) / 2.0;
    let radius = inner as f64 / 2.0;
    let mut image = Array2::<f64>::zeros((size, size));
    if inner == 0 {
        return image;
    }
    let star = Array2::from_shape_fn((inner, inner), |(i, j)| {
        let dy = i as f64 - center;
        let dx = j as f64 - center;
        if dx.hypot(dy) > radius {
            return 0.0;
        }
        let theta = dy.atan2(dx) + PI;
        let sector = (theta / (2.0 * PI) * spokes as f64).floor() as usize;
        if sector % 2 == 0 { 1.0 } else { 0.0 }
    });
    image
        .slice_mut(s![pad..pad + inner, pad..pad + inner])
        .assign(&star);
    image
}

fn psnr(reference: &ArrayD<f64>, estimate: &ArrayD<f64>) -> f64 {
    let mse = (reference - estimate).mapv(|v| v * v).mean().unwrap_or(0.0);
    let peak = reference.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        - reference.iter().cloned().fold(f64::INFINITY, f64::min);
    10.0 * (peak * peak / mse).log10()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let n = args.size;
    let k = args.kernel_size;
    let x_gt = siemens_star(n, 32, 8).into_dyn();

    let kernel = ArrayD::from_elem(IxDyn(&[k, k]), 1.0 / (k * k) as f64);
    let a = linop::convolve::<f64>(kernel, &[n, n])?;
    let ax = a.apply(&Array::from(x_gt.clone()))?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let normal = Normal::new(0.0, args.noise)?;
    let mut y = ax;
    y.map_inplace(|v| v + normal.sample(&mut rng));
    log::info!(
        "Blurred {}x{} image with a {}x{} kernel; observation shape {}",
        n,
        n,
        k,
        k,
        y.shape()
    );

    let config = match &args.config {
        Some(path) => ADMMConfig::from_json_file(path)?,
        None => ADMMConfig {
            max_iter: args.maxiter,
            itstat: ItstatOptions {
                period: args.period,
                display: true,
            },
            stop_tolerance: None,
        },
    };

    let x0 = a.adjoint(&y)?;
    let f = SquaredL2Loss::new(y, a)?;
    let g = ScaledFunctional::<f64>::new(args.lambda, Arc::new(L21Norm::default()))?;
    let c = linop::finite_difference::<f64>(&[n, n], None, Boundary::AppendZero)?;

    let problem = ADMMProblem {
        f: Arc::new(f),
        g_list: vec![Arc::new(g)],
        c_list: vec![c],
        rho_list: vec![args.rho],
        x0,
    };
    let mut solver = ADMMSolver::new(
        problem,
        config,
        Box::new(LinearSubproblemSolver::<f64>::new(CgOptions {
            tol: 1e-3,
            ..CgOptions::default()
        })),
    )?;

    let start = Instant::now();
    let x = solver.solve()?;
    log::info!(
        "Solved in {:?} after {} iterations ({:?})",
        start.elapsed(),
        solver.iteration(),
        solver.state()
    );
    solver.log_timing_summary();

    let x = x.into_flat("deconvolved image")?;
    log::info!("Deconvolved image PSNR: {:.2} dB", psnr(&x_gt, &x));

    if let Some(path) = &args.history_json {
        solver.history().write_json(path)?;
        log::info!("Wrote iteration history to {}", path.display());
    }
    if let Some(path) = &args.timing_csv {
        solver.export_step_timings(path)?;
        log::info!("Wrote step timings to {}", path.display());
    }

    Ok(())
}
