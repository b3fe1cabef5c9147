//! Timing table for the benchmark driver's `--stats` output.

use std::time::{Duration, Instant};

use crate::jacobi::precision::StoragePrecision;

/// Collects phase timings and per-run counters.
///
/// Created when `--stats` is passed and threaded as `Option<&mut Stats>`.
pub struct Stats {
    total_start: Instant,
    phases: Vec<(&'static str, Duration)>,
    pub matrix_rows: usize,
    pub matrix_nnz: usize,
    /// Blocks per storage format, indexed like `StoragePrecision::ALL`.
    pub jacobi_blocks: [usize; 3],
    pub jacobi_bytes: usize,
    pub singular_blocks: usize,
    pub factor_nnz: usize,
    pub failed_pivots: usize,
    pub residual: Option<f64>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            phases: Vec::new(),
            matrix_rows: 0,
            matrix_nnz: 0,
            jacobi_blocks: [0; 3],
            jacobi_bytes: 0,
            singular_blocks: 0,
            factor_nnz: 0,
            failed_pivots: 0,
            residual: None,
        }
    }

    /// Record a completed phase with its duration.
    pub fn add_phase(&mut self, name: &'static str, duration: Duration) {
        self.phases.push((name, duration));
    }

    /// Time `op` as phase `name`.
    pub fn time<R>(&mut self, name: &'static str, op: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let out = op();
        self.add_phase(name, start.elapsed());
        out
    }

    pub fn phases(&self) -> &[(&'static str, Duration)] {
        &self.phases
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== Preconditioner Kernel Stats ===");
        eprintln!(
            "  Matrix:                 {} rows, {} nonzeros",
            self.matrix_rows, self.matrix_nnz
        );

        for (name, dur) in &self.phases {
            eprintln!("  {:<24} {:>8.3}s", name, dur.as_secs_f64());
        }

        if self.jacobi_blocks.iter().any(|&b| b > 0) {
            let per_precision: Vec<String> = StoragePrecision::ALL
                .iter()
                .zip(&self.jacobi_blocks)
                .map(|(p, n)| format!("{p:?}={n}"))
                .collect();
            eprintln!("  Jacobi blocks:          {}", per_precision.join("  "));
            eprintln!("    Storage:              {} bytes", self.jacobi_bytes);
            eprintln!("    Singular:             {}", self.singular_blocks);
        }

        if self.factor_nnz > 0 {
            eprintln!("  Factor nonzeros:        {}", self.factor_nnz);
            eprintln!("    Failed pivots:        {}", self.failed_pivots);
        }
        if let Some(residual) = self.residual {
            eprintln!("  Solve residual:         {:.3e}", residual);
        }

        eprintln!("  ─────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}
