//! Sparse triangular factorizations driven by the sync-free scheduler.
//!
//! Generation is split into a structural phase (elimination forest and
//! symbolic fill, see `forest`) and a numeric phase in which every row of
//! the factor is one scheduler row. Pivots that break down are replaced by
//! one and reported through `Factorization::failed_rows`; they never abort
//! the generation.

pub mod cholesky;
pub mod forest;
pub mod lu;
pub mod triangular;

use crate::error::{KernelError, Result};
use crate::executor::Executor;
use crate::linop::LinOp;
use crate::scalar::Scalar;
use crate::sparse::CsrMatrix;

use forest::EliminationForest;
use triangular::{solve_triangular, Triangle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorAlgorithm {
    /// `A = L·Lᴴ` for Hermitian positive definite matrices.
    Cholesky,
    /// `A = L·U` with unit-lower `L`, no pivoting.
    Lu,
}

/// Tunables of the numeric factorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorizationParams {
    pub algorithm: FactorAlgorithm,
    /// Rows claimed at once by one worker, for both generation and apply.
    pub rows_per_unit: usize,
}

impl Default for FactorizationParams {
    fn default() -> Self {
        Self {
            algorithm: FactorAlgorithm::Lu,
            rows_per_unit: 1,
        }
    }
}

impl FactorizationParams {
    pub fn validate(&self) -> Result<()> {
        if self.rows_per_unit == 0 {
            return Err(KernelError::InvalidConfig("rows per unit must be positive".into()));
        }
        Ok(())
    }
}

pub(crate) fn check_square<T>(matrix: &CsrMatrix<T>) -> Result<()> {
    if matrix.nrows != matrix.ncols {
        return Err(KernelError::InvalidPattern(format!(
            "factorization needs a square matrix, got {}x{}",
            matrix.nrows, matrix.ncols
        )));
    }
    Ok(())
}

/// Generated triangular factors plus the structural data they were built on.
#[derive(Debug, Clone)]
pub struct Factorization<T: Scalar> {
    exec: Executor,
    algorithm: FactorAlgorithm,
    forest: EliminationForest,
    lower: CsrMatrix<T>,
    upper: CsrMatrix<T>,
    failed_rows: Vec<usize>,
    rows_per_unit: usize,
}

impl<T: Scalar> Factorization<T> {
    pub(crate) fn new(
        exec: Executor,
        algorithm: FactorAlgorithm,
        forest: EliminationForest,
        lower: CsrMatrix<T>,
        upper: CsrMatrix<T>,
        failed_rows: Vec<usize>,
        rows_per_unit: usize,
    ) -> Self {
        Self {
            exec,
            algorithm,
            forest,
            lower,
            upper,
            failed_rows,
            rows_per_unit,
        }
    }

    pub fn algorithm(&self) -> FactorAlgorithm {
        self.algorithm
    }

    pub fn forest(&self) -> &EliminationForest {
        &self.forest
    }

    pub fn lower(&self) -> &CsrMatrix<T> {
        &self.lower
    }

    /// `Lᴴ` for Cholesky, `U` for LU.
    pub fn upper(&self) -> &CsrMatrix<T> {
        &self.upper
    }

    /// Rows whose pivot broke down and was replaced by one.
    pub fn failed_rows(&self) -> &[usize] {
        &self.failed_rows
    }
}

impl<T: Scalar> LinOp<T> for Factorization<T> {
    fn size(&self) -> usize {
        self.lower.nrows
    }

    /// Forward then backward substitution.
    fn apply(&self, b: &[T]) -> Result<Vec<T>> {
        let unit_lower = self.algorithm == FactorAlgorithm::Lu;
        let rows = self.rows_per_unit;
        let y = solve_triangular(&self.exec, &self.lower, Triangle::Lower, unit_lower, b, rows)?;
        solve_triangular(&self.exec, &self.upper, Triangle::Upper, false, &y, rows)
    }
}

/// Builds Cholesky factorizations.
#[derive(Debug, Clone)]
pub struct CholeskyFactory {
    exec: Executor,
    params: FactorizationParams,
}

impl CholeskyFactory {
    pub fn new(exec: Executor) -> Self {
        Self {
            exec,
            params: FactorizationParams {
                algorithm: FactorAlgorithm::Cholesky,
                ..FactorizationParams::default()
            },
        }
    }

    pub fn with_rows_per_unit(mut self, rows_per_unit: usize) -> Self {
        self.params.rows_per_unit = rows_per_unit;
        self
    }

    pub fn generate<T: Scalar>(&self, matrix: &CsrMatrix<T>) -> Result<Factorization<T>> {
        self.params.validate()?;
        matrix.validate()?;
        cholesky::factorize(&self.exec, matrix, &self.params)
    }
}

/// Builds LU factorizations.
#[derive(Debug, Clone)]
pub struct LuFactory {
    exec: Executor,
    params: FactorizationParams,
}

impl LuFactory {
    pub fn new(exec: Executor) -> Self {
        Self {
            exec,
            params: FactorizationParams::default(),
        }
    }

    pub fn with_rows_per_unit(mut self, rows_per_unit: usize) -> Self {
        self.params.rows_per_unit = rows_per_unit;
        self
    }

    pub fn generate<T: Scalar>(&self, matrix: &CsrMatrix<T>) -> Result<Factorization<T>> {
        self.params.validate()?;
        matrix.validate()?;
        lu::factorize(&self.exec, matrix, &self.params)
    }
}

/// Generate the factorization selected by `params.algorithm`.
pub fn factorize<T: Scalar>(
    exec: &Executor,
    matrix: &CsrMatrix<T>,
    params: &FactorizationParams,
) -> Result<Factorization<T>> {
    params.validate()?;
    matrix.validate()?;
    match params.algorithm {
        FactorAlgorithm::Cholesky => cholesky::factorize(exec, matrix, params),
        FactorAlgorithm::Lu => lu::factorize(exec, matrix, params),
    }
}
