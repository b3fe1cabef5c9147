//! Row-wise sparse LU factorization `A = L·U` without pivoting.
//!
//! `L` is unit lower triangular, `U` upper triangular, both on the symbolic
//! pattern of `A + Aᵀ`. Row `i` runs the IKJ update: for every `k < i` in
//! its lower pattern it waits for row `k`, scales `L[i][k]` by `U[k][k]` and
//! subtracts `L[i][k] · U[k][k+1..]` from the rest of the row. A zero or
//! non-finite `U[i][i]` marks the row as failed and is replaced by one.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::executor::Executor;
use crate::scalar::Scalar;
use crate::scheduler::{RowOrder, RowSchedule, SharedSlots};
use crate::sparse::CsrMatrix;

use super::forest::symbolic_lu;
use super::{check_square, FactorAlgorithm, Factorization, FactorizationParams};

pub(crate) fn factorize<T: Scalar>(
    exec: &Executor,
    matrix: &CsrMatrix<T>,
    params: &FactorizationParams,
) -> Result<Factorization<T>> {
    check_square(matrix)?;
    let (forest, l_pattern, u_pattern) = symbolic_lu(exec, &matrix.pattern())?;
    let n = matrix.nrows;
    let _span = tracing::info_span!(
        "lu_generate",
        size = n,
        nnz = matrix.nnz(),
        fill = l_pattern.nnz() + u_pattern.nnz() - n
    )
    .entered();

    let l_values = SharedSlots::new(exec.alloc_scratch::<T>(l_pattern.nnz()));
    let u_values = SharedSlots::new(exec.alloc_scratch::<T>(u_pattern.nnz()));
    let failed: Vec<AtomicBool> = (0..n).map(|_| AtomicBool::new(false)).collect();
    let schedule = RowSchedule::new(n, params.rows_per_unit, RowOrder::Ascending);

    schedule.run(exec, |row, ctx| {
        let l_range = l_pattern.row_pointers[row]..l_pattern.row_pointers[row + 1];
        let u_range = u_pattern.row_pointers[row]..u_pattern.row_pointers[row + 1];
        let l_cols = &l_pattern.col_indices[l_range.clone()];
        let u_cols = &u_pattern.col_indices[u_range.clone()];
        // SAFETY: this unit owns row `row` of both factors
        let l_vals = unsafe { l_values.slice_mut(l_range) };
        let u_vals = unsafe { u_values.slice_mut(u_range) };

        let (a_cols, a_vals) = matrix.row(row);
        for (&col, &value) in a_cols.iter().zip(a_vals) {
            let slot = if col < row {
                l_cols.binary_search(&col).ok().map(|pos| &mut l_vals[pos])
            } else {
                u_cols.binary_search(&col).ok().map(|pos| &mut u_vals[pos])
            };
            if let Some(slot) = slot {
                *slot = value;
            }
        }

        // the diagonal is the last lower entry
        let last = l_cols.len() - 1;
        for k in 0..last {
            let pivot_row = l_cols[k];
            ctx.wait_for_row(pivot_row);
            let dep = u_pattern.row_pointers[pivot_row]..u_pattern.row_pointers[pivot_row + 1];
            let dep_cols = &u_pattern.col_indices[dep.clone()];
            // SAFETY: row `pivot_row` is computed and no longer written
            let dep_vals = unsafe { u_values.slice(dep) };

            let factor = l_vals[k] / dep_vals[0];
            l_vals[k] = factor;
            for (&col, &u) in dep_cols.iter().zip(dep_vals).skip(1) {
                if col < row {
                    if let Ok(pos) = l_cols.binary_search(&col) {
                        l_vals[pos] -= factor * u;
                    }
                } else if let Ok(pos) = u_cols.binary_search(&col) {
                    u_vals[pos] -= factor * u;
                }
            }
        }
        l_vals[last] = T::one();

        let pivot = u_vals[0];
        if pivot == T::zero() || !pivot.is_finite() {
            failed[row].store(true, Ordering::Relaxed);
            u_vals[0] = T::one();
        }
    });

    let failed_rows: Vec<usize> = failed
        .iter()
        .enumerate()
        .filter(|(_, f)| f.load(Ordering::Relaxed))
        .map(|(row, _)| row)
        .collect();
    if !failed_rows.is_empty() {
        tracing::warn!(failed = failed_rows.len(), "LU pivots replaced by one");
    }

    let lower = CsrMatrix {
        nrows: n,
        ncols: n,
        values: l_values.into_inner(),
        col_indices: l_pattern.col_indices,
        row_pointers: l_pattern.row_pointers,
    };
    let upper = CsrMatrix {
        nrows: n,
        ncols: n,
        values: u_values.into_inner(),
        col_indices: u_pattern.col_indices,
        row_pointers: u_pattern.row_pointers,
    };
    Ok(Factorization::new(
        exec.clone(),
        FactorAlgorithm::Lu,
        forest,
        lower,
        upper,
        failed_rows,
        params.rows_per_unit,
    ))
}
