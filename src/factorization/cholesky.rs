//! Up-looking sparse Cholesky factorization `A = L·Lᴴ`.
//!
//! Row `i` of `L` is computed left to right: each off-diagonal entry
//! `L[i][j]` waits for row `j`, subtracts the sparse dot product of the two
//! rows over columns `< j` and divides by `L[j][j]`. The diagonal entry is
//! the square root of what remains. A non-positive or non-finite remainder
//! marks the row as failed and the diagonal falls back to one.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::executor::Executor;
use crate::scalar::{RealScalar, Scalar};
use crate::scheduler::{RowOrder, RowSchedule, SharedSlots};
use crate::sparse::CsrMatrix;

use super::forest::symbolic_cholesky;
use super::{check_square, FactorAlgorithm, Factorization, FactorizationParams};

/// `Σ_m a[m] · conj(b[m])` over the columns both sorted rows share.
pub(crate) fn sparse_dot<T: Scalar>(
    a_cols: &[usize],
    a_vals: &[T],
    b_cols: &[usize],
    b_vals: &[T],
) -> T {
    let (mut i, mut j) = (0, 0);
    let mut sum = T::zero();
    while i < a_cols.len() && j < b_cols.len() {
        match a_cols[i].cmp(&b_cols[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a_vals[i] * b_vals[j].conj();
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

pub(crate) fn factorize<T: Scalar>(
    exec: &Executor,
    matrix: &CsrMatrix<T>,
    params: &FactorizationParams,
) -> Result<Factorization<T>> {
    check_square(matrix)?;
    let (forest, pattern) = symbolic_cholesky(exec, &matrix.pattern())?;
    let n = matrix.nrows;
    let _span = tracing::info_span!(
        "cholesky_generate",
        size = n,
        nnz = matrix.nnz(),
        fill = pattern.nnz()
    )
    .entered();

    let values = SharedSlots::new(exec.alloc_scratch::<T>(pattern.nnz()));
    let failed: Vec<AtomicBool> = (0..n).map(|_| AtomicBool::new(false)).collect();
    let schedule = RowSchedule::new(n, params.rows_per_unit, RowOrder::Ascending);

    schedule.run(exec, |row, ctx| {
        let range = pattern.row_pointers[row]..pattern.row_pointers[row + 1];
        let cols = &pattern.col_indices[range.clone()];
        // SAFETY: this unit owns row `row`
        let vals = unsafe { values.slice_mut(range) };

        let (a_cols, a_vals) = matrix.row(row);
        for (&col, &value) in a_cols.iter().zip(a_vals).take_while(|&(&c, _)| c <= row) {
            if let Ok(pos) = cols.binary_search(&col) {
                vals[pos] = value;
            }
        }

        for k in 0..cols.len() {
            let col = cols[k];
            if col == row {
                let dot = sparse_dot(&cols[..k], &vals[..k], &cols[..k], &vals[..k]);
                let rest = (vals[k] - dot).real_part();
                if rest > T::Real::zero() && rest.is_finite() {
                    vals[k] = T::from_real(rest).sqrt();
                } else {
                    failed[row].store(true, Ordering::Relaxed);
                    vals[k] = T::one();
                }
                break;
            }

            ctx.wait_for_row(col);
            let dep = pattern.row_pointers[col]..pattern.row_pointers[col + 1];
            let dep_cols = &pattern.col_indices[dep.clone()];
            // SAFETY: row `col` is computed and no longer written
            let dep_vals = unsafe { values.slice(dep) };
            let last = dep_cols.len() - 1;
            let dot = sparse_dot(&cols[..k], &vals[..k], &dep_cols[..last], &dep_vals[..last]);
            vals[k] = (vals[k] - dot) / dep_vals[last];
        }
    });

    let failed_rows: Vec<usize> = failed
        .iter()
        .enumerate()
        .filter(|(_, f)| f.load(Ordering::Relaxed))
        .map(|(row, _)| row)
        .collect();
    if !failed_rows.is_empty() {
        tracing::warn!(failed = failed_rows.len(), "Cholesky pivots replaced by one");
    }

    let lower = CsrMatrix {
        nrows: n,
        ncols: n,
        values: values.into_inner(),
        col_indices: pattern.col_indices,
        row_pointers: pattern.row_pointers,
    };
    let upper = lower.conj_transpose();
    Ok(Factorization::new(
        exec.clone(),
        FactorAlgorithm::Cholesky,
        forest,
        lower,
        upper,
        failed_rows,
        params.rows_per_unit,
    ))
}
