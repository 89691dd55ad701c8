//! Per-iteration diagnostics recorded by the ADMM solver.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Diagnostics for one ADMM iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationStats {
    /// Iteration number, starting at 1.
    pub iteration: usize,
    /// Seconds since the first iteration started.
    pub time: f64,
    /// `f(x) + sum_i g_i(C_i x)`, absent when a penalty cannot be evaluated.
    pub objective: Option<f64>,
    /// `sqrt(sum_i ||C_i x - z_i||^2)`.
    pub primal_residual: f64,
    /// `sqrt(sum_i ||rho_i C_i^H (z_i - z_i_prev)||^2)`.
    pub dual_residual: f64,
    /// Iterations of the inner linear solve, if one ran.
    pub inner_iterations: Option<usize>,
    /// Final residual of the inner linear solve, if one ran.
    pub inner_residual: Option<f64>,
    /// Whether the inner linear solve reached its tolerance, if one ran.
    pub inner_converged: Option<bool>,
}

impl IterationStats {
    /// Sum of primal and dual residuals.
    pub fn combined_residual(&self) -> f64 {
        self.primal_residual + self.dual_residual
    }

    /// Table header matching [`IterationStats::table_row`].
    pub fn table_header(with_inner: bool) -> String {
        let mut header = format!(
            "{:>5}  {:>9}  {:>12}  {:>10}  {:>10}",
            "Iter", "Time", "Objective", "Prml Rsdl", "Dual Rsdl"
        );
        if with_inner {
            header.push_str(&format!("  {:>5}  {:>10}", "CG It", "CG Res"));
        }
        header
    }

    /// One line of the iteration table.
    pub fn table_row(&self) -> String {
        let objective = match self.objective {
            Some(v) => format!("{:>12.4e}", v),
            None => format!("{:>12}", "-"),
        };
        let mut row = format!(
            "{:>5}  {:>9.2e}  {}  {:>10.3e}  {:>10.3e}",
            self.iteration, self.time, objective, self.primal_residual, self.dual_residual
        );
        if let (Some(it), Some(res)) = (self.inner_iterations, self.inner_residual) {
            row.push_str(&format!("  {:>5}  {:>10.3e}", it, res));
        }
        row
    }
}

/// Columnar view of a [`History`]: one vector per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryColumns {
    pub iteration: Vec<usize>,
    pub time: Vec<f64>,
    pub objective: Vec<Option<f64>>,
    pub primal_residual: Vec<f64>,
    pub dual_residual: Vec<f64>,
    pub inner_iterations: Vec<Option<usize>>,
    pub inner_residual: Vec<Option<f64>>,
    pub inner_converged: Vec<Option<bool>>,
}

/// Retained iteration statistics, in iteration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    records: Vec<IterationStats>,
}

fn opt_cell<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

impl History {
    pub fn new() -> Self {
        History::default()
    }

    pub fn push(&mut self, stats: IterationStats) {
        self.records.push(stats);
    }

    /// Row view: one record per retained iteration.
    pub fn records(&self) -> &[IterationStats] {
        &self.records
    }

    pub fn last(&self) -> Option<&IterationStats> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Columnar view: one sequence per field, indexed consistently.
    pub fn transposed(&self) -> HistoryColumns {
        let mut cols = HistoryColumns::default();
        for r in &self.records {
            cols.iteration.push(r.iteration);
            cols.time.push(r.time);
            cols.objective.push(r.objective);
            cols.primal_residual.push(r.primal_residual);
            cols.dual_residual.push(r.dual_residual);
            cols.inner_iterations.push(r.inner_iterations);
            cols.inner_residual.push(r.inner_residual);
            cols.inner_converged.push(r.inner_converged);
        }
        cols
    }

    /// Write the history as CSV. Absent values are left empty.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        writeln!(
            file,
            "iteration,time,objective,primal_residual,dual_residual,\
             inner_iterations,inner_residual,inner_converged"
        )?;
        for r in &self.records {
            writeln!(
                file,
                "{},{:.6},{},{},{},{},{},{}",
                r.iteration,
                r.time,
                opt_cell(r.objective),
                r.primal_residual,
                r.dual_residual,
                opt_cell(r.inner_iterations),
                opt_cell(r.inner_residual),
                opt_cell(r.inner_converged)
            )?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.records)?)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
