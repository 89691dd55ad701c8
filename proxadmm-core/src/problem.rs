use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use num_traits::{Float, Zero};
use serde::{Deserialize, Serialize};

use crate::array::Array;
use crate::dtype::{RealScalar, Scalar};
use crate::error::{ADMMError, Result};
use crate::functional::Functional;
use crate::history::{History, IterationStats};
use crate::linop::LinearOperator;
use crate::subproblem::{SubproblemSolver, XUpdate};
use crate::timing::{StepSummary, TimingTracker, time_fn};

/// Problem data for `min_x f(x) + sum_i g_i(C_i x)`.
///
/// `g_list`, `c_list` and `rho_list` are parallel sequences: penalty `g_i`
/// acts on `C_i x` with penalty parameter `rho_i`.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use proxadmm_core::array::{Array, Shape};
/// use proxadmm_core::functional::L1Norm;
/// use proxadmm_core::linop::{self, Boundary};
/// use proxadmm_core::loss::SquaredL2Loss;
/// use proxadmm_core::problem::{ADMMConfig, ADMMProblem, ADMMSolver};
/// use proxadmm_core::subproblem::LinearSubproblemSolver;
///
/// let y = Array::from_vec(vec![0.0, 0.1, 0.9, 1.0]);
/// let f = SquaredL2Loss::new(y, linop::identity(Shape::from(4))).unwrap();
/// let d = linop::finite_difference(&[4], None, Boundary::Truncate).unwrap();
/// let problem = ADMMProblem {
///     f: Arc::new(f),
///     g_list: vec![Arc::new(L1Norm)],
///     c_list: vec![d],
///     rho_list: vec![1.0],
///     x0: Array::zeros(&Shape::from(4)),
/// };
/// let config = ADMMConfig { max_iter: 20, ..ADMMConfig::default() };
/// let inner = Box::new(LinearSubproblemSolver::<f64>::default());
/// let mut solver = ADMMSolver::new(problem, config, inner).unwrap();
/// let x = solver.solve().unwrap();
/// assert_eq!(x.size(), 4);
/// assert_eq!(solver.iteration(), 20);
/// ```
pub struct ADMMProblem<T: Scalar> {
    /// Smooth data term
    pub f: Arc<dyn Functional<T>>,
    /// Penalties, each with a proximal operator
    pub g_list: Vec<Arc<dyn Functional<T>>>,
    /// Constraint operators, each with input shape `x0.shape()`
    pub c_list: Vec<LinearOperator<T>>,
    /// Positive penalty parameters
    pub rho_list: Vec<T::Real>,
    /// Initial iterate
    pub x0: Array<T>,
}

/// Display and retention of iteration statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItstatOptions {
    /// Statistics are retained (and displayed) every `period` iterations,
    /// and always for the final iteration.
    pub period: usize,
    /// Log a table row through `log::info!` for each retained iteration.
    pub display: bool,
}

impl Default for ItstatOptions {
    fn default() -> Self {
        ItstatOptions {
            period: 1,
            display: false,
        }
    }
}

/// Configuration settings for ADMM execution.
///
/// The solver runs `max_iter` iterations unless `stop_tolerance` is set, in
/// which case it also stops once `primal_residual + dual_residual` falls to
/// or below the tolerance.
///
/// # Example
///
/// ```rust
/// use proxadmm_core::problem::ADMMConfig;
///
/// let json = r#"{"max_iter": 50, "itstat": {"period": 10}}"#;
/// let config = ADMMConfig::from_json_str(json).unwrap();
/// assert_eq!(config.max_iter, 50);
/// assert_eq!(config.itstat.period, 10);
/// assert!(!config.itstat.display);
/// assert_eq!(config.stop_tolerance, None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ADMMConfig {
    /// Maximum number of iterations
    pub max_iter: usize,
    /// Iteration statistics options
    pub itstat: ItstatOptions,
    /// Optional residual-based early stop
    pub stop_tolerance: Option<f64>,
}

impl Default for ADMMConfig {
    fn default() -> Self {
        ADMMConfig {
            max_iter: 100,
            itstat: ItstatOptions::default(),
            stop_tolerance: None,
        }
    }
}

impl ADMMConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.itstat.period == 0 {
            return Err(ADMMError::Configuration("itstat period must be at least 1".to_string()));
        }
        if let Some(tol) = self.stop_tolerance {
            if !(tol >= 0.0 && tol.is_finite()) {
                return Err(ADMMError::Configuration(format!(
                    "stop tolerance must be non-negative and finite, got {}",
                    tol
                )));
            }
        }
        Ok(())
    }
}

/// Lifecycle of an [`ADMMSolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverState {
    Initialized,
    Running,
    /// Stopped by the residual tolerance.
    Converged,
    /// Stopped by the iteration cap.
    MaxIterReached,
}

impl SolverState {
    /// Whether no further iterations will run.
    pub fn is_terminal(self) -> bool {
        matches!(self, SolverState::Converged | SolverState::MaxIterReached)
    }
}

/// ADMM solver for `min_x f(x) + sum_i g_i(C_i x)`.
///
/// Uses the scaled dual form. Each iteration performs
///
/// 1. x-update: `argmin_x f(x) + sum_i (rho_i / 2) ||C_i x - z_i + u_i||^2`,
///    delegated to the [`SubproblemSolver`]
/// 2. z-update: `z_i = prox_{g_i, 1/rho_i}(C_i x + u_i)`
/// 3. u-update: `u_i = u_i + C_i x - z_i`
/// 4. diagnostics: objective, primal and dual residuals
///
/// Any error during an iteration is returned to the caller and the
/// iteration counter is not advanced.
pub struct ADMMSolver<T: Scalar> {
    f: Arc<dyn Functional<T>>,
    g_list: Vec<Arc<dyn Functional<T>>>,
    c_list: Vec<LinearOperator<T>>,
    rho_list: Vec<T::Real>,
    config: ADMMConfig,
    subproblem_solver: Box<dyn SubproblemSolver<T>>,
    x: Array<T>,
    z_list: Vec<Array<T>>,
    u_list: Vec<Array<T>>,
    itnum: usize,
    state: SolverState,
    history: History,
    timing_tracker: TimingTracker,
    started: Option<Instant>,
}

impl<T: Scalar> ADMMSolver<T> {
    /// Creates a new ADMM solver.
    ///
    /// # Arguments
    ///
    /// * `problem` - Loss, penalties, constraint operators, penalty parameters and initial iterate
    /// * `config` - Iteration cap, statistics options and optional early stop
    /// * `subproblem_solver` - Strategy for the x-update
    ///
    /// # Returns
    ///
    /// * `Ok(ADMMSolver)` with `z_i = C_i x0`, `u_i = 0`
    /// * `Err(ADMMError::Configuration)` if the lists differ in length, a
    ///   constraint operator does not accept `x0`, a penalty parameter is not
    ///   positive, `f` is not smooth, a penalty has no proximal operator, or
    ///   the subproblem solver rejects the problem
    pub fn new(
        problem: ADMMProblem<T>,
        config: ADMMConfig,
        mut subproblem_solver: Box<dyn SubproblemSolver<T>>,
    ) -> Result<Self> {
        let ADMMProblem {
            f,
            g_list,
            c_list,
            rho_list,
            x0,
        } = problem;

        config.validate()?;
        if g_list.len() != c_list.len() || g_list.len() != rho_list.len() {
            return Err(ADMMError::Configuration(format!(
                "g_list, C_list and rho_list must have equal lengths, got {}, {} and {}",
                g_list.len(),
                c_list.len(),
                rho_list.len()
            )));
        }
        let x_shape = x0.shape();
        for (i, c) in c_list.iter().enumerate() {
            if c.input_shape() != &x_shape {
                return Err(ADMMError::Configuration(format!(
                    "C_list[{}] has input shape {} but x0 has shape {}",
                    i,
                    c.input_shape(),
                    x_shape
                )));
            }
        }
        for (i, &rho) in rho_list.iter().enumerate() {
            if !(rho > T::Real::zero() && rho.is_finite()) {
                return Err(ADMMError::Configuration(format!(
                    "rho_list[{}] must be positive and finite, got {}",
                    i, rho
                )));
            }
        }
        if !f.is_smooth() {
            return Err(ADMMError::Configuration(format!("f must be smooth, got {}", f.name())));
        }
        if let Some(g) = g_list.iter().find(|g| !g.has_prox()) {
            return Err(ADMMError::Configuration(format!(
                "every penalty needs a proximal operator, {} has none",
                g.name()
            )));
        }

        let mut timing_tracker = TimingTracker::new();
        time_fn(&mut timing_tracker, "setup", || {
            subproblem_solver.setup(f.as_ref(), &c_list, &rho_list)
        })?;

        let z_list = c_list
            .iter()
            .map(|c| c.apply(&x0))
            .collect::<Result<Vec<_>>>()?;
        let u_list = c_list.iter().map(|c| Array::zeros(c.output_shape())).collect();

        Ok(ADMMSolver {
            f,
            g_list,
            c_list,
            rho_list,
            config,
            subproblem_solver,
            x: x0,
            z_list,
            u_list,
            itnum: 0,
            state: SolverState::Initialized,
            history: History::new(),
            timing_tracker,
            started: None,
        })
    }

    /// Runs iterations until the solver reaches a terminal state.
    ///
    /// # Returns
    ///
    /// * `Ok(Array<T>)` - the final iterate `x`
    /// * `Err(ADMMError)` - the first error raised by an iteration
    pub fn solve(&mut self) -> Result<Array<T>> {
        if self.itnum >= self.config.max_iter && !self.state.is_terminal() {
            self.state = SolverState::MaxIterReached;
        }
        while !self.state.is_terminal() {
            self.step()?;
        }
        Ok(self.x.clone())
    }

    /// Performs a single ADMM iteration.
    pub fn step(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(ADMMError::Configuration(format!(
                "solver already terminated ({:?}) after {} iterations",
                self.state, self.itnum
            )));
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        self.state = SolverState::Running;
        self.timing_tracker.start_iteration();

        let report = time_fn(&mut self.timing_tracker, "update_x", || {
            let update = XUpdate {
                f: self.f.as_ref(),
                c_list: &self.c_list,
                rho_list: &self.rho_list,
                z_list: &self.z_list,
                u_list: &self.u_list,
            };
            self.subproblem_solver.solve(&update, &self.x)
        })?;
        if !report.x.is_finite() {
            return Err(ADMMError::Numerical(format!(
                "x-update produced a non-finite iterate at iteration {}",
                self.itnum + 1
            )));
        }
        let x = report.x;

        let (cx_list, z_list) = time_fn(&mut self.timing_tracker, "update_z", || {
            let cx_list = self.c_list.iter().map(|c| c.apply(&x)).collect::<Result<Vec<_>>>()?;
            let z_list = cx_list
                .iter()
                .zip(&self.u_list)
                .zip(self.g_list.iter().zip(&self.rho_list))
                .map(|((cx, u), (g, &rho))| g.prox(&cx.try_add(u)?, rho.recip()))
                .collect::<Result<Vec<_>>>()?;
            Ok((cx_list, z_list))
        })?;

        let u_list = time_fn(&mut self.timing_tracker, "update_u", || {
            self.u_list
                .iter()
                .zip(cx_list.iter().zip(&z_list))
                .map(|(u, (cx, z))| u.try_add(&cx.try_sub(z)?))
                .collect::<Result<Vec<_>>>()
        })?;

        let diagnostics_start = Instant::now();
        let diagnostics = self.diagnostics(&x, &cx_list, &z_list);
        self.timing_tracker.record_step("diagnostics", diagnostics_start.elapsed());
        let (objective, primal_residual, dual_residual) = diagnostics?;

        self.x = x;
        self.z_list = z_list;
        self.u_list = u_list;
        self.itnum += 1;

        if let Some(tol) = self.config.stop_tolerance {
            if primal_residual + dual_residual <= tol {
                self.state = SolverState::Converged;
            }
        }
        if !self.state.is_terminal() && self.itnum >= self.config.max_iter {
            self.state = SolverState::MaxIterReached;
        }

        let period = self.config.itstat.period;
        if self.itnum % period == 0 || self.state.is_terminal() {
            let inner = report.linear_solve;
            let stats = IterationStats {
                iteration: self.itnum,
                time: started.elapsed().as_secs_f64(),
                objective,
                primal_residual,
                dual_residual,
                inner_iterations: inner.map(|i| i.iterations),
                inner_residual: inner.map(|i| i.residual),
                inner_converged: inner.map(|i| i.converged),
            };
            if self.config.itstat.display {
                if self.history.is_empty() {
                    log::info!("{}", IterationStats::table_header(inner.is_some()));
                }
                log::info!("{}", stats.table_row());
            }
            self.history.push(stats);
        }
        Ok(())
    }

    /// Objective (when every term can be evaluated), primal and dual residuals.
    fn diagnostics(
        &self,
        x: &Array<T>,
        cx_list: &[Array<T>],
        z_list: &[Array<T>],
    ) -> Result<(Option<f64>, f64, f64)> {
        let objective = if self.f.has_eval() && self.g_list.iter().all(|g| g.has_eval()) {
            let mut total = self.f.value(x)?.as_f64();
            for (g, cx) in self.g_list.iter().zip(cx_list) {
                total += g.value(cx)?.as_f64();
            }
            Some(total)
        } else {
            None
        };

        let mut primal = 0.0;
        let mut dual = 0.0;
        for (((c, &rho), (cx, z)), zp) in self
            .c_list
            .iter()
            .zip(&self.rho_list)
            .zip(cx_list.iter().zip(z_list))
            .zip(&self.z_list)
        {
            primal += cx.try_sub(z)?.norm_sqr().as_f64();
            let s = c.adjoint(&z.try_sub(zp)?)?.scaled(T::from_real(rho));
            dual += s.norm_sqr().as_f64();
        }
        Ok((objective, primal.sqrt(), dual.sqrt()))
    }

    /// Current primal iterate.
    pub fn x(&self) -> &Array<T> {
        &self.x
    }

    /// Current auxiliary variables, one per constraint.
    pub fn z_list(&self) -> &[Array<T>] {
        &self.z_list
    }

    /// Current scaled dual variables, one per constraint.
    pub fn u_list(&self) -> &[Array<T>] {
        &self.u_list
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> usize {
        self.itnum
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    pub fn config(&self) -> &ADMMConfig {
        &self.config
    }

    /// Retained iteration statistics.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Gets read-only access to the timing tracker for statistics.
    pub fn timing_tracker(&self) -> &TimingTracker {
        &self.timing_tracker
    }

    /// Average, maximum and count for each timed phase.
    pub fn timing_summary(&self) -> Vec<(String, StepSummary)> {
        let mut summary: Vec<_> = self.timing_tracker.get_step_statistics().into_iter().collect();
        summary.sort_by(|a, b| a.0.cmp(&b.0));
        summary
    }

    /// Logs the timing summary at info level.
    pub fn log_timing_summary(&self) {
        log::info!("=== ADMM Step Timing Summary ===");
        for (step, s) in self.timing_summary() {
            log::info!(
                "{}: avg={:.2}ms, max={:.2}ms, count={}",
                step,
                s.avg_ms,
                s.max_ms,
                s.count
            );
        }
    }

    /// Exports step timing data to a CSV file.
    pub fn export_step_timings<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.timing_tracker.write_step_timings_to_csv(path)
    }
}
