//! Diagonal block partitioning.
//!
//! Without caller-provided block pointers, blocks are found by supervariable
//! agglomeration: consecutive rows with identical column patterns form a
//! supervariable, then neighbouring supervariables are merged greedily while
//! the merged block stays within the size limit.

use crate::error::{KernelError, Result};
use crate::sparse::CsrMatrix;

/// Block pointers `[0, b1, ..., n]` of the natural diagonal blocks.
pub fn detect_blocks<T>(matrix: &CsrMatrix<T>, max_block_size: usize) -> Vec<usize> {
    let n = matrix.nrows;
    if n == 0 {
        return vec![0];
    }
    let mut supervariables = vec![0usize];
    for row in 1..n {
        let current = row - supervariables[supervariables.len() - 1];
        let same_pattern = pattern_of(matrix, row) == pattern_of(matrix, row - 1);
        if !same_pattern || current >= max_block_size {
            supervariables.push(row);
        }
    }
    supervariables.push(n);
    agglomerate(&supervariables, max_block_size)
}

fn pattern_of<T>(matrix: &CsrMatrix<T>, row: usize) -> &[usize] {
    &matrix.col_indices[matrix.row_pointers[row]..matrix.row_pointers[row + 1]]
}

fn agglomerate(supervariables: &[usize], max_block_size: usize) -> Vec<usize> {
    let mut blocks = vec![0usize];
    for &end in &supervariables[1..] {
        let last = blocks.len() - 1;
        let merged = end - blocks[last.saturating_sub(1)];
        if last > 0 && merged <= max_block_size {
            blocks[last] = end;
        } else {
            blocks.push(end);
        }
    }
    blocks
}

/// Check that `block_pointers` partition `0..n` into blocks of size
/// `1..=max_block_size`.
pub fn validate_blocks(block_pointers: &[usize], n: usize, max_block_size: usize) -> Result<()> {
    if block_pointers.first() != Some(&0) || block_pointers.last() != Some(&n) {
        return Err(KernelError::InvalidPattern(format!(
            "block pointers do not cover rows 0..{n}"
        )));
    }
    for (block, w) in block_pointers.windows(2).enumerate() {
        if w[1] <= w[0] {
            return Err(KernelError::InvalidPattern(format!("block {block} is empty")));
        }
        if w[1] - w[0] > max_block_size {
            return Err(KernelError::UnsupportedBlockSize {
                requested: w[1] - w[0],
                max: max_block_size,
            });
        }
    }
    Ok(())
}
