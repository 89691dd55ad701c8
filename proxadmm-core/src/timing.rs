use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::Write,
    path::Path,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crate::error::Result;

/// Wall-clock duration of one ADMM phase in one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingRecord {
    /// Name of the phase (e.g., "update_x", "update_z")
    pub step_name: String,
    /// The iteration the phase belongs to
    pub iteration: usize,
    /// Duration of the phase in milliseconds
    pub duration_ms: f64,
    /// Unix timestamp when the phase was recorded
    pub timestamp: u64,
}

/// Collects phase timings for the ADMM solver.
///
/// The solver records `update_x`, `update_z`, `update_u` and `diagnostics`
/// once per iteration, plus `setup` once before the first iteration.
#[derive(Debug, Default)]
pub struct TimingTracker {
    step_timings: Vec<TimingRecord>,
    current_iteration: usize,
}

/// Average, maximum (both in milliseconds) and count for one phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSummary {
    pub avg_ms: f64,
    pub max_ms: f64,
    pub count: usize,
}

impl TimingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_iteration(&mut self) {
        self.current_iteration += 1;
    }

    pub fn record_step(&mut self, step_name: &str, duration: Duration) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.step_timings.push(TimingRecord {
            step_name: step_name.to_string(),
            iteration: self.current_iteration,
            duration_ms: duration.as_secs_f64() * 1000.0,
            timestamp,
        });
    }

    pub fn records(&self) -> &[TimingRecord] {
        &self.step_timings
    }

    pub fn write_step_timings_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        writeln!(file, "step_name,iteration,duration_ms,timestamp")?;
        for record in &self.step_timings {
            writeln!(
                file,
                "{},{},{:.3},{}",
                record.step_name, record.iteration, record.duration_ms, record.timestamp
            )?;
        }

        Ok(())
    }

    pub fn get_step_statistics(&self) -> HashMap<String, StepSummary> {
        let mut stats: HashMap<String, StepSummary> = HashMap::new();

        for record in &self.step_timings {
            let entry = stats.entry(record.step_name.clone()).or_insert(StepSummary {
                avg_ms: 0.0,
                max_ms: 0.0,
                count: 0,
            });
            entry.avg_ms += record.duration_ms;
            entry.max_ms = entry.max_ms.max(record.duration_ms);
            entry.count += 1;
        }

        // totals to averages
        for summary in stats.values_mut() {
            summary.avg_ms /= summary.count as f64;
        }

        stats
    }
}

/// Run `f`, recording its wall-clock duration under `name`.
pub fn time_fn<F, R>(tracker: &mut TimingTracker, name: &str, f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    let start = Instant::now();
    let result = f();
    tracker.record_step(name, start.elapsed());
    result
}
