//! Elimination forest and symbolic factorization.
//!
//! The forest is built from the symmetrized pattern `A + Aᵀ`, so a
//! structurally unsymmetric input yields a (possibly larger) fill pattern that
//! still contains every update of an unpivoted factorization.
//!
//! Symbolic factorization runs in two passes: row counts first, then column
//! indices written into ranges sized by the prefix sum of those counts.

use rayon::prelude::*;

use crate::error::{KernelError, Result};
use crate::executor::Executor;
use crate::sparse::{split_rows_mut, CsrPattern};

/// Parent map of the elimination tree plus its children lists and postorder.
///
/// `parents[i] == n` marks a root (the pseudo-root sentinel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EliminationForest {
    pub parents: Vec<usize>,
    /// Children of node `p` are `children[child_ptrs[p]..child_ptrs[p + 1]]`,
    /// ascending. Node `n` is the pseudo-root whose children are the roots.
    pub child_ptrs: Vec<usize>,
    pub children: Vec<usize>,
    /// `postorder[k]` is the node visited k-th.
    pub postorder: Vec<usize>,
    /// `inv_postorder[node]` is the position of `node` in `postorder`.
    pub inv_postorder: Vec<usize>,
}

impl EliminationForest {
    /// Build the forest of a square pattern.
    pub fn build(pattern: &CsrPattern) -> Result<Self> {
        let sym = symmetrized(pattern)?;
        Ok(Self::from_symmetric(&sym))
    }

    fn from_symmetric(sym: &CsrPattern) -> Self {
        let n = sym.nrows;
        let mut parents = vec![n; n];
        let mut ancestors = vec![n; n];
        for row in 0..n {
            for &col in sym.row(row).iter().take_while(|&&c| c < row) {
                // climb from col towards the current root, compressing the path
                let mut node = col;
                while ancestors[node] != n && ancestors[node] != row {
                    let next = ancestors[node];
                    ancestors[node] = row;
                    node = next;
                }
                if ancestors[node] == n {
                    ancestors[node] = row;
                    parents[node] = row;
                }
            }
        }

        let (child_ptrs, children) = children_of(&parents);
        let postorder = postorder_of(n, &child_ptrs, &children);
        let mut inv_postorder = vec![0usize; n];
        for (k, &node) in postorder.iter().enumerate() {
            inv_postorder[node] = k;
        }
        Self {
            parents,
            child_ptrs,
            children,
            postorder,
            inv_postorder,
        }
    }

    pub fn size(&self) -> usize {
        self.parents.len()
    }

    pub fn children(&self, node: usize) -> &[usize] {
        &self.children[self.child_ptrs[node]..self.child_ptrs[node + 1]]
    }

    pub fn roots(&self) -> &[usize] {
        self.children(self.size())
    }

    /// Parent map expressed in postorder numbering.
    pub fn postorder_parents(&self) -> Vec<usize> {
        let n = self.size();
        let mut out = vec![n; n];
        for (node, &parent) in self.parents.iter().enumerate() {
            if parent < n {
                out[self.inv_postorder[node]] = self.inv_postorder[parent];
            }
        }
        out
    }
}

/// Children lists by counting sort on the parent, stable in child order.
fn children_of(parents: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let n = parents.len();
    let mut child_ptrs = vec![0usize; n + 2];
    for &p in parents {
        child_ptrs[p + 1] += 1;
    }
    for i in 1..child_ptrs.len() {
        child_ptrs[i] += child_ptrs[i - 1];
    }
    let mut fill = child_ptrs.clone();
    let mut children = vec![0usize; n];
    for (node, &p) in parents.iter().enumerate() {
        children[fill[p]] = node;
        fill[p] += 1;
    }
    (child_ptrs, children)
}

fn postorder_of(n: usize, child_ptrs: &[usize], children: &[usize]) -> Vec<usize> {
    let mut postorder = Vec::with_capacity(n);
    // (node, next child to visit)
    let mut stack = vec![(n, child_ptrs[n])];
    while let Some(top) = stack.last_mut() {
        let (node, next) = *top;
        if next < child_ptrs[node + 1] {
            top.1 += 1;
            let child = children[next];
            stack.push((child, child_ptrs[child]));
        } else {
            stack.pop();
            if node < n {
                postorder.push(node);
            }
        }
    }
    postorder
}

/// Sorted union of the pattern and its transpose, diagonal included.
fn symmetrized(pattern: &CsrPattern) -> Result<CsrPattern> {
    if pattern.nrows != pattern.ncols {
        return Err(KernelError::InvalidPattern(format!(
            "symbolic factorization needs a square pattern, got {}x{}",
            pattern.nrows, pattern.ncols
        )));
    }
    pattern.validate()?;
    let transposed = pattern.transpose();
    let n = pattern.nrows;
    let mut row_pointers = Vec::with_capacity(n + 1);
    row_pointers.push(0);
    let mut col_indices = Vec::with_capacity(2 * pattern.nnz() + n);
    for row in 0..n {
        let (a, b) = (pattern.row(row), transposed.row(row));
        let (mut i, mut j) = (0, 0);
        let mut diagonal_seen = false;
        loop {
            let next = match (a.get(i), b.get(j)) {
                (Some(&x), Some(&y)) if x == y => {
                    i += 1;
                    j += 1;
                    x
                }
                (Some(&x), Some(&y)) if x < y => {
                    i += 1;
                    x
                }
                (_, Some(&y)) => {
                    j += 1;
                    y
                }
                (Some(&x), None) => {
                    i += 1;
                    x
                }
                (None, None) => break,
            };
            if !diagonal_seen && next > row {
                col_indices.push(row);
                diagonal_seen = true;
            }
            diagonal_seen |= next == row;
            col_indices.push(next);
        }
        if !diagonal_seen {
            col_indices.push(row);
        }
        row_pointers.push(col_indices.len());
    }
    Ok(CsrPattern {
        nrows: n,
        ncols: n,
        col_indices,
        row_pointers,
    })
}

/// Columns of row `row` of `L`: every node on the paths from the row's
/// lower entries up the forest, stopping at `row` or at an already marked
/// node. The row itself is the last entry.
fn row_subtree<'a>(
    sym: &CsrPattern,
    forest: &EliminationForest,
    row: usize,
    marker: &mut [usize],
    out: &'a mut Vec<usize>,
) -> &'a [usize] {
    out.clear();
    marker[row] = row;
    for &col in sym.row(row).iter().take_while(|&&c| c < row) {
        let mut node = col;
        while marker[node] != row {
            marker[node] = row;
            out.push(node);
            node = forest.parents[node];
        }
    }
    out.sort_unstable();
    out.push(row);
    out
}

/// Lower factor pattern (diagonal included) of the Cholesky factorization.
pub fn symbolic_cholesky(
    exec: &Executor,
    pattern: &CsrPattern,
) -> Result<(EliminationForest, CsrPattern)> {
    let sym = symmetrized(pattern)?;
    let n = sym.nrows;
    let _span = tracing::debug_span!("symbolic_cholesky", size = n, nnz = pattern.nnz()).entered();
    let forest = EliminationForest::from_symmetric(&sym);

    let lower = exec.install(|| {
        let counts: Vec<usize> = (0..n)
            .into_par_iter()
            .map_init(
                || (vec![usize::MAX; n], Vec::new()),
                |(marker, scratch), row| row_subtree(&sym, &forest, row, marker, scratch).len(),
            )
            .collect();
        let mut row_pointers = Vec::with_capacity(n + 1);
        row_pointers.push(0);
        for count in &counts {
            row_pointers.push(row_pointers[row_pointers.len() - 1] + count);
        }

        let mut col_indices = exec.alloc_scratch::<usize>(row_pointers[n]);
        split_rows_mut(&mut col_indices, &row_pointers)
            .into_par_iter()
            .enumerate()
            .for_each_init(
                || (vec![usize::MAX; n], Vec::new()),
                |(marker, scratch), (row, out)| {
                    let cols = row_subtree(&sym, &forest, row, marker, scratch);
                    debug_assert_eq!(cols.len(), out.len());
                    out.copy_from_slice(cols);
                },
            );
        CsrPattern {
            nrows: n,
            ncols: n,
            col_indices,
            row_pointers,
        }
    });
    tracing::debug!(fill = lower.nnz(), "symbolic Cholesky done");
    Ok((forest, lower))
}

/// `L` and `U` patterns of an unpivoted LU factorization: `L` is the
/// symbolic Cholesky pattern of `A + Aᵀ` and `U` its transpose.
pub fn symbolic_lu(
    exec: &Executor,
    pattern: &CsrPattern,
) -> Result<(EliminationForest, CsrPattern, CsrPattern)> {
    let (forest, lower) = symbolic_cholesky(exec, pattern)?;
    let upper = lower.transpose();
    Ok((forest, lower, upper))
}
