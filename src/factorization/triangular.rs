//! Synchronization-free sparse triangular solves.
//!
//! Row `i` of a lower solve waits for every row `j < i` it references, then
//! publishes its own entry of the solution. Upper solves run the same
//! protocol with the row order reversed. Entries of the opposite triangle
//! are ignored.

use crate::error::{KernelError, Result};
use crate::executor::Executor;
use crate::scalar::Scalar;
use crate::scheduler::{RowOrder, RowSchedule, SharedSlots};
use crate::sparse::CsrMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triangle {
    Lower,
    Upper,
}

/// Solve `T x = b` for the `triangle` part of `matrix`.
///
/// With `unit_diagonal` the stored diagonal is ignored and taken as one.
/// A missing or zero diagonal entry is treated as one as well; factor
/// generation never produces one.
pub fn solve_triangular<T: Scalar>(
    exec: &Executor,
    matrix: &CsrMatrix<T>,
    triangle: Triangle,
    unit_diagonal: bool,
    b: &[T],
    rows_per_unit: usize,
) -> Result<Vec<T>> {
    if matrix.nrows != matrix.ncols || b.len() != matrix.nrows {
        return Err(KernelError::DimensionMismatch(format!(
            "triangular solve with a {}x{} factor and a vector of length {}",
            matrix.nrows,
            matrix.ncols,
            b.len()
        )));
    }
    let n = matrix.nrows;
    let _span = tracing::debug_span!("triangular_solve", size = n, ?triangle).entered();
    let order = match triangle {
        Triangle::Lower => RowOrder::Ascending,
        Triangle::Upper => RowOrder::Descending,
    };
    let schedule = RowSchedule::new(n, rows_per_unit, order);
    let x = SharedSlots::new(exec.alloc_scratch::<T>(n));

    schedule.run(exec, |row, ctx| {
        let (cols, vals) = matrix.row(row);
        let mut sum = b[row];
        let mut diagonal = T::one();
        for (&col, &value) in cols.iter().zip(vals) {
            let referenced = match triangle {
                Triangle::Lower => col < row,
                Triangle::Upper => col > row,
            };
            if referenced {
                ctx.wait_for_row(col);
                // SAFETY: `col` has published its entry
                sum -= value * unsafe { x.slice(col..col + 1) }[0];
            } else if col == row && !unit_diagonal && value != T::zero() {
                diagonal = value;
            }
        }
        // SAFETY: each row writes only its own entry
        let out = unsafe { x.slice_mut(row..row + 1) };
        out[0] = sum / diagonal;
    });
    Ok(x.into_inner())
}
