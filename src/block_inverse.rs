//! In-register inversion of small dense blocks.
//!
//! Lane `l` of a `Group<N>` owns row `l` of the block, stored in
//! `rows[l]`. Inversion is Gauss-Jordan elimination with implicit pivoting:
//! no rows are swapped, so the result is a permuted inverse `X` with
//!
//! ```text
//! A⁻¹[perm[l]][trans_perm[i]] = X[l][i]
//! ```
//!
//! `copy_unpermuted` applies the permutations while writing the result out.

use crate::group::Group;
use crate::scalar::{RealScalar, Scalar};

/// Largest block the inverter is compiled for.
pub const MAX_BLOCK_SIZE: usize = 32;

/// Permutations produced by one inversion, plus the singularity flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InversionOutcome<const N: usize> {
    /// False if an exact zero pivot was met; the block contents are then
    /// meaningless and must not be used.
    pub invertible: bool,
    /// `perm[l]`: the elimination step at which lane `l` became the pivot.
    pub perm: [usize; N],
    /// `trans_perm[i]`: the lane chosen as pivot in step `i`.
    pub trans_perm: [usize; N],
}

impl<const N: usize> InversionOutcome<N> {
    fn identity() -> Self {
        Self {
            invertible: true,
            perm: std::array::from_fn(|lane| lane),
            trans_perm: std::array::from_fn(|lane| lane),
        }
    }
}

fn column<T: Copy, const N: usize>(rows: &[[T; N]; N], col: usize) -> [T; N] {
    std::array::from_fn(|lane| rows[lane][col])
}

/// One Gauss-Jordan step using row `key_row` and column `key_col`.
/// Returns false without touching `rows` if the pivot is exactly zero.
fn apply_gauss_jordan_transform<T: Scalar, const N: usize>(
    group: &Group<N>,
    key_row: usize,
    key_col: usize,
    rows: &mut [[T; N]; N],
    rhs: Option<&mut [T; N]>,
) -> bool {
    let key_col_elem = group.shuffle(&column(rows, key_col), key_row);
    if key_col_elem == T::zero() {
        return false;
    }
    let factors: [T; N] = std::array::from_fn(|lane| {
        if lane == key_row {
            T::one() / key_col_elem
        } else {
            -rows[lane][key_col] / key_col_elem
        }
    });
    if let Some(rhs) = rhs {
        let key_rhs_elem = group.shuffle(rhs, key_row);
        for lane in 0..N {
            if lane == key_row {
                rhs[lane] = key_rhs_elem * factors[lane];
            } else {
                rhs[lane] += key_rhs_elem * factors[lane];
            }
        }
    }
    let key_row_elems = group.shuffle_array(rows, key_row);
    for (lane, row) in rows.iter_mut().enumerate() {
        for (i, value) in row.iter_mut().enumerate() {
            if lane == key_row {
                *value = T::zero();
            }
            *value += factors[lane] * key_row_elems[i];
        }
        row[key_col] = factors[lane];
    }
    true
}

fn eliminate<T: Scalar, const N: usize>(
    group: &Group<N>,
    n: usize,
    rows: &mut [[T; N]; N],
    mut rhs: Option<&mut [T; N]>,
) -> InversionOutcome<N> {
    debug_assert!(n <= N, "block of size {n} in a group of {N} lanes");
    let mut outcome = InversionOutcome::identity();
    // lanes past the block size never become pivots
    let mut pivoted: [bool; N] = std::array::from_fn(|lane| lane >= n);
    for i in 0..n.min(N) {
        let magnitudes: [T::Real; N] = std::array::from_fn(|lane| rows[lane][i].abs_val());
        let piv = group.choose_pivot(&magnitudes, &pivoted);
        outcome.perm[piv] = i;
        outcome.trans_perm[i] = piv;
        pivoted[piv] = true;
        if !apply_gauss_jordan_transform(group, piv, i, rows, rhs.as_deref_mut()) {
            outcome.invertible = false;
        }
        // the next pivot search reads the rows rewritten by this step
        group.sync();
    }
    outcome
}

/// Invert the leading `n`×`n` block held in `rows` in place.
///
/// Rows and columns at or beyond `n` must be zero. On return `rows` holds
/// the permuted inverse described in the module docs.
pub fn invert_block<T: Scalar, const N: usize>(
    group: &Group<N>,
    n: usize,
    rows: &mut [[T; N]; N],
) -> InversionOutcome<N> {
    eliminate(group, n, rows, None)
}

/// Solve `A x = b` by carrying `rhs` through the same elimination.
///
/// `rhs[l]` holds `b[l]` on entry. The returned array holds `x` in natural
/// order; `rows` is left holding the permuted inverse.
pub fn solve_block<T: Scalar, const N: usize>(
    group: &Group<N>,
    n: usize,
    rows: &mut [[T; N]; N],
    rhs: &mut [T; N],
) -> (InversionOutcome<N>, [T; N]) {
    let outcome = eliminate(group, n, rows, Some(rhs));
    let mut x = [T::zero(); N];
    for lane in 0..n.min(N) {
        x[outcome.perm[lane]] = rhs[lane];
    }
    (outcome, x)
}

/// Infinity norm of the `num_rows`×`num_cols` leading block: every lane sums
/// its row, then the group takes the maximum.
pub fn compute_infinity_norm<T: Scalar, const N: usize>(
    group: &Group<N>,
    num_rows: usize,
    num_cols: usize,
    rows: &[[T; N]; N],
) -> T::Real {
    let sums: [T::Real; N] = std::array::from_fn(|lane| {
        let mut sum = T::Real::zero();
        if lane < num_rows {
            for value in &rows[lane][..num_cols.min(N)] {
                sum += value.abs_val();
            }
        }
        sum
    });
    group.reduce(&sums, RealScalar::max_val)
}

/// Write the true inverse of a permuted-inverse block into `dest`
/// (row-major with row stride `stride`).
///
/// With `transpose` set, the element is written at the mirrored position,
/// which turns the inverse of a transposed block into the inverse of the
/// original block.
pub fn copy_unpermuted<T: Scalar, const N: usize>(
    group: &Group<N>,
    n: usize,
    rows: &[[T; N]; N],
    outcome: &InversionOutcome<N>,
    transpose: bool,
    dest: &mut [T],
    stride: usize,
) {
    for i in 0..n.min(N) {
        let col = group.shuffle(&outcome.trans_perm, i);
        for lane in 0..n.min(N) {
            let row = outcome.perm[lane];
            let idx = if transpose {
                col * stride + row
            } else {
                row * stride + col
            };
            dest[idx] = rows[lane][i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn load<const N: usize>(dense: &[&[f64]]) -> [[f64; N]; N] {
        let mut rows = [[0.0; N]; N];
        for (i, row) in dense.iter().enumerate() {
            rows[i][..row.len()].copy_from_slice(row);
        }
        rows
    }

    fn unpermuted<const N: usize>(
        n: usize,
        rows: &[[f64; N]; N],
        outcome: &InversionOutcome<N>,
    ) -> Vec<f64> {
        let mut dest = vec![0.0; n * n];
        copy_unpermuted(&Group::<N>::new(), n, rows, outcome, false, &mut dest, n);
        dest
    }

    #[test]
    fn inverts_diagonal_block() {
        let g = Group::<4>::new();
        let mut rows = load::<4>(&[&[2.0, 0.0, 0.0], &[0.0, 3.0, 0.0], &[0.0, 0.0, 4.0]]);
        let outcome = invert_block(&g, 3, &mut rows);
        assert!(outcome.invertible);
        let inv = unpermuted(3, &rows, &outcome);
        let expected = [0.5, 0.0, 0.0, 0.0, 1.0 / 3.0, 0.0, 0.0, 0.0, 0.25];
        for (a, b) in inv.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-15);
        }
    }

    #[test]
    fn antidiagonal_block_pivots_on_second_row() {
        let g = Group::<2>::new();
        let mut rows = load::<2>(&[&[0.0, 1.0], &[1.0, 0.0]]);
        let outcome = invert_block(&g, 2, &mut rows);
        assert!(outcome.invertible);
        assert_eq!(outcome.trans_perm[0], 1, "row 1 must be the first pivot");
        assert_eq!(outcome.perm, [1, 0]);
        assert_eq!(unpermuted(2, &rows, &outcome), vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn zero_row_is_singular() {
        let g = Group::<4>::new();
        let mut rows = load::<4>(&[&[1.0, 2.0, 0.0], &[0.0, 0.0, 0.0], &[3.0, 1.0, 1.0]]);
        assert!(!invert_block(&g, 3, &mut rows).invertible);
    }

    #[test]
    fn dependent_rows_are_singular() {
        let g = Group::<2>::new();
        let mut rows = load::<2>(&[&[1.0, 2.0], &[2.0, 4.0]]);
        assert!(!invert_block(&g, 2, &mut rows).invertible);
    }

    #[test]
    fn random_blocks_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        let g = Group::<32>::new();
        for &n in &[1usize, 5, 13, 32] {
            let mut original = [[0.0f64; 32]; 32];
            for (i, row) in original.iter_mut().enumerate().take(n) {
                for value in row.iter_mut().take(n) {
                    *value = rng.random_range(-1.0..1.0);
                }
                row[i] += n as f64;
            }
            let mut rows = original;
            let outcome = invert_block(&g, n, &mut rows);
            assert!(outcome.invertible);
            let inv = unpermuted(n, &rows, &outcome);
            for i in 0..n {
                for j in 0..n {
                    let mut sum = 0.0;
                    for k in 0..n {
                        sum += inv[i * n + k] * original[k][j];
                    }
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_abs_diff_eq!(sum, expected, epsilon = 1e-12 * n as f64);
                }
            }
        }
    }

    #[test]
    fn transposed_copy_inverts_transposed_input() {
        // lanes hold columns of A = [[4, 1], [2, 3]], det = 10
        let g = Group::<2>::new();
        let mut rows = load::<2>(&[&[4.0, 2.0], &[1.0, 3.0]]);
        let outcome = invert_block(&g, 2, &mut rows);
        let mut dest = vec![0.0; 4];
        copy_unpermuted(&g, 2, &rows, &outcome, true, &mut dest, 2);
        let expected = [0.3, -0.1, -0.2, 0.4];
        for (a, b) in dest.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-15);
        }
    }

    #[test]
    fn fused_rhs_solves_system() {
        // [[0, 2, 1], [1, 1, 1], [2, 1, 0]] x = [5, 4, 4] => x = [1, 2, 1]
        let g = Group::<4>::new();
        let mut rows = load::<4>(&[&[0.0, 2.0, 1.0], &[1.0, 1.0, 1.0], &[2.0, 1.0, 0.0]]);
        let mut rhs = [5.0, 4.0, 4.0, 0.0];
        let (outcome, x) = solve_block(&g, 3, &mut rows, &mut rhs);
        assert!(outcome.invertible);
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-14);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-14);
        assert_abs_diff_eq!(x[2], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn complex_block() {
        // [[i, 0], [0, 2]]^-1 = [[-i, 0], [0, 0.5]]
        let g = Group::<2>::new();
        let zero = Complex64::new(0.0, 0.0);
        let mut rows = [[Complex64::new(0.0, 1.0), zero], [zero, Complex64::new(2.0, 0.0)]];
        let outcome = invert_block(&g, 2, &mut rows);
        assert!(outcome.invertible);
        let mut dest = vec![zero; 4];
        copy_unpermuted(&g, 2, &rows, &outcome, false, &mut dest, 2);
        assert_abs_diff_eq!(dest[0].im, -1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(dest[3].re, 0.5, epsilon = 1e-15);
    }

    #[test]
    fn infinity_norm_is_max_row_sum() {
        let g = Group::<4>::new();
        let rows = load::<4>(&[&[1.0, -2.0, 0.0], &[0.5, 0.5, 4.0], &[-1.0, 0.0, 1.0]]);
        assert_eq!(compute_infinity_norm(&g, 3, 3, &rows), 5.0);
        assert_eq!(compute_infinity_norm(&g, 1, 3, &rows), 3.0);
    }
}
