//! Magnitude thresholds for threshold-based incomplete factorizations.
//!
//! An ILUT-style pass keeps the largest-magnitude entries of a factor and
//! drops the rest. `threshold_select` finds the exact cut-off magnitude with
//! the sample-select engine; `threshold_filter_approx` uses a single tree
//! level and accepts the lower bound of the bucket holding the rank instead.
//! Diagonal entries are always kept.

use rayon::prelude::*;

use crate::error::{KernelError, Result};
use crate::executor::Executor;
use crate::scalar::{RealScalar, Scalar};
use crate::select::bucket::{bucket_prefix_sum, count_buckets, find_bucket};
use crate::select::tree::SearchTree;
use crate::select::{select_kth_with, SelectParams};
use crate::sparse::{split_rows_mut, CsrMatrix};

/// Magnitude of rank `rank` among all stored entries of `matrix`.
pub fn threshold_select<T: Scalar>(
    exec: &Executor,
    matrix: &CsrMatrix<T>,
    rank: usize,
) -> Result<T::Real> {
    select_kth_with(exec, &matrix.values, rank, &SelectParams::default())
}

/// Drop every off-diagonal entry with magnitude below `threshold`.
pub fn threshold_filter<T: Scalar>(
    exec: &Executor,
    matrix: &CsrMatrix<T>,
    threshold: T::Real,
) -> CsrMatrix<T> {
    exec.install(|| filter_by(matrix, |row, idx| {
        matrix.col_indices[idx] == row || matrix.values[idx].abs_val() >= threshold
    }))
}

/// Approximate variant: one sample-select level over the stored values.
///
/// Returns the filtered matrix and the threshold used, the lower bound of
/// the bucket containing `rank`. At least `nnz - rank` entries are kept, so
/// the result is never sparser than the exact filter.
pub fn threshold_filter_approx<T: Scalar>(
    exec: &Executor,
    matrix: &CsrMatrix<T>,
    rank: usize,
) -> Result<(CsrMatrix<T>, T::Real)> {
    if rank >= matrix.nnz() {
        return Err(KernelError::InvalidRank {
            rank,
            size: matrix.nnz(),
        });
    }
    let params = SelectParams::default();
    let _span = tracing::debug_span!("threshold_filter_approx", nnz = matrix.nnz(), rank).entered();
    Ok(exec.install(|| {
        let tree = SearchTree::build(&matrix.values, &params);
        let mut classification = count_buckets(&matrix.values, &tree, params.block_size);
        let prefix = bucket_prefix_sum(&mut classification);
        let bucket = find_bucket(&prefix, rank);
        let threshold = tree.leaf(bucket.idx);
        let keep_from = bucket.idx as u8;
        let oracles = &classification.oracles;
        let filtered = filter_by(matrix, |row, idx| {
            matrix.col_indices[idx] == row || oracles[idx] >= keep_from
        });
        let threshold = if bucket.idx == 0 { T::Real::zero() } else { threshold };
        (filtered, threshold)
    }))
}

/// Two-pass row filter: count kept entries per row, then fill.
fn filter_by<T: Scalar>(
    matrix: &CsrMatrix<T>,
    keep: impl Fn(usize, usize) -> bool + Sync,
) -> CsrMatrix<T> {
    let counts: Vec<usize> = (0..matrix.nrows)
        .into_par_iter()
        .map(|row| {
            (matrix.row_pointers[row]..matrix.row_pointers[row + 1])
                .filter(|&idx| keep(row, idx))
                .count()
        })
        .collect();
    let mut row_pointers = Vec::with_capacity(matrix.nrows + 1);
    row_pointers.push(0);
    for count in &counts {
        row_pointers.push(row_pointers[row_pointers.len() - 1] + count);
    }
    let nnz = row_pointers[matrix.nrows];
    let mut col_indices = vec![0usize; nnz];
    let mut values = vec![T::zero(); nnz];
    split_rows_mut(&mut col_indices, &row_pointers)
        .into_par_iter()
        .zip(split_rows_mut(&mut values, &row_pointers).into_par_iter())
        .enumerate()
        .for_each(|(row, (cols_out, vals_out))| {
            let mut out = 0;
            for idx in matrix.row_pointers[row]..matrix.row_pointers[row + 1] {
                if keep(row, idx) {
                    cols_out[out] = matrix.col_indices[idx];
                    vals_out[out] = matrix.values[idx];
                    out += 1;
                }
            }
        });
    CsrMatrix {
        nrows: matrix.nrows,
        ncols: matrix.ncols,
        values,
        col_indices,
        row_pointers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec() -> Executor {
        Executor::parallel(2).unwrap()
    }

    fn sample() -> CsrMatrix<f64> {
        CsrMatrix::from_triplets(
            3,
            3,
            &[
                (0, 0, 0.1),
                (0, 1, -4.0),
                (0, 2, 0.5),
                (1, 0, 3.0),
                (1, 1, 2.0),
                (2, 0, -0.2),
                (2, 2, 0.05),
            ],
        )
    }

    #[test]
    fn select_over_stored_values() {
        // magnitudes sorted: 0.05 0.1 0.2 0.5 2 3 4
        assert_eq!(threshold_select(&exec(), &sample(), 3).unwrap(), 0.5);
    }

    #[test]
    fn filter_keeps_diagonal() {
        let filtered = threshold_filter(&exec(), &sample(), 0.5);
        assert_eq!(filtered.row_pointers, vec![0, 3, 5, 6]);
        assert_eq!(filtered.row(0).0, &[0, 1, 2]);
        assert_eq!(filtered.row(2).0, &[2]);
        assert_eq!(filtered.get(2, 2), 0.05);
        assert_eq!(filtered.get(2, 0), 0.0);
    }

    #[test]
    fn approx_filter_is_never_sparser_than_exact() {
        let n = 3000;
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 10.0));
            for d in 1..4 {
                if i + d < n {
                    triplets.push((i, i + d, ((i * 13 + d * 7) % 101) as f64 - 50.0));
                }
            }
        }
        let m = CsrMatrix::from_triplets(n, n, &triplets);
        let rank = m.nnz() / 2;
        let exact_threshold = threshold_select(&exec(), &m, rank).unwrap();
        let exact = threshold_filter(&exec(), &m, exact_threshold);
        let (approx, threshold) = threshold_filter_approx(&exec(), &m, rank).unwrap();
        assert!(threshold <= exact_threshold);
        assert!(approx.nnz() >= exact.nnz());
        for row in 0..n {
            assert_eq!(approx.get(row, row), 10.0);
        }
    }

    #[test]
    fn approx_rank_out_of_range() {
        assert!(threshold_filter_approx(&exec(), &sample(), 7).is_err());
    }
}
