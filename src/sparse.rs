//! Compressed Sparse Row (CSR) matrix and pattern.
//!
//! The kernels only read the three raw arrays; the containers here are the
//! minimal collaborator needed to feed them and to hold generated factors.

use rayon::prelude::*;
use std::ops::AddAssign;

use crate::error::{KernelError, Result};
use crate::scalar::Scalar;

/// Sparse matrix in Compressed Sparse Row format.
#[derive(Debug, Clone)]
pub struct CsrMatrix<T> {
    pub nrows: usize,
    pub ncols: usize,
    /// Non-zero values, stored row by row.
    pub values: Vec<T>,
    /// Column index for each non-zero value.
    pub col_indices: Vec<usize>,
    /// `row_pointers[i]` is the index into values/col_indices where row i starts.
    /// `row_pointers[nrows]` = total number of non-zeros.
    pub row_pointers: Vec<usize>,
}

/// Nonzero structure of a CSR matrix without values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrPattern {
    pub nrows: usize,
    pub ncols: usize,
    pub col_indices: Vec<usize>,
    pub row_pointers: Vec<usize>,
}

impl<T: Copy + Default + AddAssign> CsrMatrix<T> {
    /// Create an empty matrix with no non-zero entries.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_pointers: vec![0; nrows + 1],
        }
    }

    /// Number of non-zero entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Build CSR matrix from (row, col, value) triplets.
    /// Duplicate entries at the same (row, col) are summed.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, T)]) -> Self {
        if triplets.is_empty() {
            return Self::new(nrows, ncols);
        }

        // Sort indices by (row, col) without requiring T: Ord
        let mut indices: Vec<usize> = (0..triplets.len()).collect();
        indices.sort_by_key(|&i| (triplets[i].0, triplets[i].1));

        let mut values = Vec::with_capacity(triplets.len());
        let mut col_indices = Vec::with_capacity(triplets.len());
        let mut row_pointers = vec![0usize; nrows + 1];

        let first = indices[0];
        let mut cur_row = triplets[first].0;
        let mut cur_col = triplets[first].1;
        let mut cur_val = triplets[first].2;

        for &idx in &indices[1..] {
            let (row, col, val) = triplets[idx];
            if row == cur_row && col == cur_col {
                cur_val += val;
            } else {
                values.push(cur_val);
                col_indices.push(cur_col);
                row_pointers[cur_row + 1] += 1;
                cur_row = row;
                cur_col = col;
                cur_val = val;
            }
        }
        values.push(cur_val);
        col_indices.push(cur_col);
        row_pointers[cur_row + 1] += 1;

        for i in 1..=nrows {
            row_pointers[i] += row_pointers[i - 1];
        }

        Self {
            nrows,
            ncols,
            values,
            col_indices,
            row_pointers,
        }
    }

    /// Convert to dense matrix (row-major). For testing and small matrices only.
    pub fn to_dense(&self) -> Vec<Vec<T>> {
        let mut dense = vec![vec![T::default(); self.ncols]; self.nrows];
        for row in 0..self.nrows {
            for idx in self.row_pointers[row]..self.row_pointers[row + 1] {
                dense[row][self.col_indices[idx]] = self.values[idx];
            }
        }
        dense
    }

    /// Structure of this matrix.
    pub fn pattern(&self) -> CsrPattern {
        CsrPattern {
            nrows: self.nrows,
            ncols: self.ncols,
            col_indices: self.col_indices.clone(),
            row_pointers: self.row_pointers.clone(),
        }
    }

    /// Column indices and values of one row.
    pub fn row(&self, row: usize) -> (&[usize], &[T]) {
        let range = self.row_pointers[row]..self.row_pointers[row + 1];
        (&self.col_indices[range.clone()], &self.values[range])
    }

    /// Check the CSR invariants the kernels rely on: monotone row pointers,
    /// strictly increasing in-range column indices per row.
    pub fn validate(&self) -> Result<()> {
        validate_csr(self.nrows, self.ncols, &self.row_pointers, &self.col_indices)?;
        if self.values.len() != self.col_indices.len() {
            return Err(KernelError::InvalidPattern(format!(
                "{} values for {} column indices",
                self.values.len(),
                self.col_indices.len()
            )));
        }
        Ok(())
    }
}

impl<T: Scalar> CsrMatrix<T> {
    /// Sparse matrix-vector multiply: y = A * x
    pub fn spmv(&self, x: &[T]) -> Vec<T> {
        assert_eq!(x.len(), self.ncols, "spmv dimension mismatch");
        (0..self.nrows)
            .into_par_iter()
            .map(|row| {
                let mut sum = T::zero();
                for idx in self.row_pointers[row]..self.row_pointers[row + 1] {
                    sum += self.values[idx] * x[self.col_indices[idx]];
                }
                sum
            })
            .collect()
    }

    /// Conjugate transpose, columns kept sorted.
    pub fn conj_transpose(&self) -> CsrMatrix<T> {
        let mut row_pointers = vec![0usize; self.ncols + 1];
        for &col in &self.col_indices {
            row_pointers[col + 1] += 1;
        }
        for i in 1..=self.ncols {
            row_pointers[i] += row_pointers[i - 1];
        }
        let mut fill = row_pointers.clone();
        let mut col_indices = vec![0usize; self.nnz()];
        let mut values = vec![T::zero(); self.nnz()];
        for row in 0..self.nrows {
            for idx in self.row_pointers[row]..self.row_pointers[row + 1] {
                let col = self.col_indices[idx];
                let out = fill[col];
                col_indices[out] = row;
                values[out] = self.values[idx].conj();
                fill[col] += 1;
            }
        }
        CsrMatrix {
            nrows: self.ncols,
            ncols: self.nrows,
            values,
            col_indices,
            row_pointers,
        }
    }

    /// Value stored at (row, col), zero if absent. Binary search per row.
    pub fn get(&self, row: usize, col: usize) -> T {
        let (cols, vals) = self.row(row);
        match cols.binary_search(&col) {
            Ok(pos) => vals[pos],
            Err(_) => T::zero(),
        }
    }
}

impl CsrPattern {
    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    /// Columns of one row.
    pub fn row(&self, row: usize) -> &[usize] {
        &self.col_indices[self.row_pointers[row]..self.row_pointers[row + 1]]
    }

    /// Pattern transpose with sorted columns.
    pub fn transpose(&self) -> CsrPattern {
        let mut row_pointers = vec![0usize; self.ncols + 1];
        for &col in &self.col_indices {
            row_pointers[col + 1] += 1;
        }
        for i in 1..=self.ncols {
            row_pointers[i] += row_pointers[i - 1];
        }
        let mut fill = row_pointers.clone();
        let mut col_indices = vec![0usize; self.nnz()];
        for row in 0..self.nrows {
            for &col in self.row(row) {
                col_indices[fill[col]] = row;
                fill[col] += 1;
            }
        }
        CsrPattern {
            nrows: self.ncols,
            ncols: self.nrows,
            col_indices,
            row_pointers,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_csr(self.nrows, self.ncols, &self.row_pointers, &self.col_indices)
    }
}

fn validate_csr(
    nrows: usize,
    ncols: usize,
    row_pointers: &[usize],
    col_indices: &[usize],
) -> Result<()> {
    if row_pointers.len() != nrows + 1 {
        return Err(KernelError::InvalidPattern(format!(
            "expected {} row pointers, got {}",
            nrows + 1,
            row_pointers.len()
        )));
    }
    if row_pointers[0] != 0 || row_pointers[nrows] != col_indices.len() {
        return Err(KernelError::InvalidPattern(
            "row pointers do not span the column index array".into(),
        ));
    }
    for row in 0..nrows {
        let (start, end) = (row_pointers[row], row_pointers[row + 1]);
        if start > end {
            return Err(KernelError::InvalidPattern(format!(
                "row pointers decrease at row {row}"
            )));
        }
        let cols = &col_indices[start..end];
        if cols.iter().any(|&c| c >= ncols) {
            return Err(KernelError::InvalidPattern(format!(
                "column index out of range in row {row}"
            )));
        }
        if cols.windows(2).any(|w| w[0] >= w[1]) {
            return Err(KernelError::InvalidPattern(format!(
                "columns of row {row} are not strictly increasing"
            )));
        }
    }
    Ok(())
}

/// Split `data` into one mutable slice per row of `row_pointers`.
///
/// Lets parallel kernels write each row's output range without overlap.
pub(crate) fn split_rows_mut<'a, T>(
    mut data: &'a mut [T],
    row_pointers: &[usize],
) -> Vec<&'a mut [T]> {
    let mut rows = Vec::with_capacity(row_pointers.len().saturating_sub(1));
    for w in row_pointers.windows(2) {
        let (head, tail) = std::mem::take(&mut data).split_at_mut(w[1] - w[0]);
        rows.push(head);
        data = tail;
    }
    rows
}
