//! Cholesky and LU generation on random sparse matrices, checked through the
//! solve residual and the elimination forest.

use approx::assert_abs_diff_eq;
use num_complex::Complex64;
use precond_kernels::factorization::forest::{symbolic_cholesky, EliminationForest};
use precond_kernels::factorization::{factorize, FactorAlgorithm};
use precond_kernels::{CholeskyFactory, CsrMatrix, Executor, FactorizationParams, LinOp, LuFactory};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Symmetric, strictly diagonally dominant: `per_row` random off-diagonal
/// couplings per row, mirrored.
fn random_spd(n: usize, per_row: usize, seed: u64) -> CsrMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut triplets = Vec::new();
    let mut row_sums = vec![0.0f64; n];
    for row in 0..n {
        for _ in 0..per_row {
            let col = rng.random_range(0..n);
            if col == row {
                continue;
            }
            let v = rng.random_range(-1.0..1.0);
            triplets.push((row, col, v));
            triplets.push((col, row, v));
            row_sums[row] += f64::abs(v);
            row_sums[col] += f64::abs(v);
        }
    }
    for (row, sum) in row_sums.iter().enumerate() {
        triplets.push((row, row, sum + 1.0));
    }
    CsrMatrix::from_triplets(n, n, &triplets)
}

/// Structurally unsymmetric and diagonally dominant.
fn random_unsymmetric(n: usize, per_row: usize, seed: u64) -> CsrMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut triplets = Vec::new();
    for row in 0..n {
        let mut sum = 0.0;
        for _ in 0..per_row {
            let col = rng.random_range(0..n);
            if col != row {
                let v = rng.random_range(-1.0..1.0);
                sum += f64::abs(v);
                triplets.push((row, col, v));
            }
        }
        triplets.push((row, row, sum + 0.5));
    }
    CsrMatrix::from_triplets(n, n, &triplets)
}

fn residual(a: &CsrMatrix<f64>, x: &[f64], b: &[f64]) -> f64 {
    a.spmv(x)
        .iter()
        .zip(b)
        .fold(0.0, |m, (r, e)| f64::max(m, (r - e).abs()))
}

fn rhs(n: usize) -> Vec<f64> {
    (0..n).map(|i| ((i * 7) % 11) as f64 - 5.0).collect()
}

// ── Cholesky ──────────────────────────────────────────────────────

#[test]
fn test_cholesky_solves_random_spd() {
    let a = random_spd(300, 3, 1);
    let b = rhs(a.nrows);
    for rows_per_unit in [1, 3, 16] {
        let exec = Executor::parallel(4).unwrap();
        let factor = CholeskyFactory::new(exec)
            .with_rows_per_unit(rows_per_unit)
            .generate(&a)
            .unwrap();
        assert!(factor.failed_rows().is_empty());
        let x = factor.apply(&b).unwrap();
        assert!(residual(&a, &x, &b) < 1e-9, "rows per unit {rows_per_unit}");
    }
}

#[test]
fn test_cholesky_parallel_matches_reference() {
    let a = random_spd(200, 4, 9);
    let par = CholeskyFactory::new(Executor::parallel(4).unwrap()).generate(&a).unwrap();
    let seq = CholeskyFactory::new(Executor::reference().unwrap()).generate(&a).unwrap();
    assert_eq!(par.lower().col_indices, seq.lower().col_indices);
    assert_eq!(par.lower().row_pointers, seq.lower().row_pointers);
    for (p, s) in par.lower().values.iter().zip(&seq.lower().values) {
        assert_abs_diff_eq!(*p, *s, epsilon = 1e-12);
    }
}

#[test]
fn test_forest_parent_is_first_subdiagonal_of_factor_column() {
    let a = random_spd(150, 2, 4);
    let exec = Executor::parallel(2).unwrap();
    let (forest, lower) = symbolic_cholesky(&exec, &a.pattern()).unwrap();
    assert_eq!(forest, EliminationForest::build(&a.pattern()).unwrap());

    let n = a.nrows;
    let mut first_below = vec![n; n];
    for row in 0..n {
        for &col in lower.row(row) {
            if col < row && first_below[col] == n {
                first_below[col] = row;
            }
        }
    }
    assert_eq!(forest.parents, first_below);

    let factor = factorize(
        &exec,
        &a,
        &FactorizationParams {
            algorithm: FactorAlgorithm::Cholesky,
            ..FactorizationParams::default()
        },
    )
    .unwrap();
    assert_eq!(factor.lower().pattern(), lower);
    assert_eq!(factor.forest(), &forest);
}

#[test]
fn test_cholesky_hermitian_complex() {
    let n = 60;
    let mut triplets = Vec::new();
    for i in 0..n {
        triplets.push((i, i, Complex64::new(4.0, 0.0)));
        if i + 1 < n {
            let v = Complex64::new(0.5, 0.75);
            triplets.push((i, i + 1, v));
            triplets.push((i + 1, i, v.conj()));
        }
        if i + 7 < n {
            let v = Complex64::new(-0.25, 0.5);
            triplets.push((i, i + 7, v));
            triplets.push((i + 7, i, v.conj()));
        }
    }
    let a = CsrMatrix::from_triplets(n, n, &triplets);
    let b: Vec<Complex64> = (0..n).map(|i| Complex64::new(i as f64, 1.0)).collect();
    let factor = CholeskyFactory::new(Executor::parallel(3).unwrap()).generate(&a).unwrap();
    assert!(factor.failed_rows().is_empty());
    let x = factor.apply(&b).unwrap();
    for (r, e) in a.spmv(&x).iter().zip(&b) {
        assert!((r - e).norm() < 1e-10);
    }
}

// ── LU ────────────────────────────────────────────────────────────

#[test]
fn test_lu_solves_random_unsymmetric() {
    let a = random_unsymmetric(400, 3, 12);
    let b = rhs(a.nrows);
    for rows_per_unit in [1, 5] {
        let factor = LuFactory::new(Executor::parallel(4).unwrap())
            .with_rows_per_unit(rows_per_unit)
            .generate(&a)
            .unwrap();
        assert!(factor.failed_rows().is_empty());
        let x = factor.apply(&b).unwrap();
        assert!(residual(&a, &x, &b) < 1e-9, "rows per unit {rows_per_unit}");
    }
}

#[test]
fn test_lu_factors_are_triangular() {
    let a = random_unsymmetric(120, 4, 33);
    let factor = LuFactory::new(Executor::reference().unwrap()).generate(&a).unwrap();
    let (lower, upper) = (factor.lower(), factor.upper());
    for row in 0..a.nrows {
        let (cols, vals) = lower.row(row);
        assert!(cols.iter().all(|&c| c <= row));
        assert_eq!(cols.last(), Some(&row));
        assert_eq!(vals.last(), Some(&1.0));
        let (cols, _) = upper.row(row);
        assert!(cols.iter().all(|&c| c >= row));
        assert_eq!(cols.first(), Some(&row));
    }
}

#[test]
fn test_zero_pivot_is_reported_not_fatal() {
    // the leading entry is missing, so row 0 has a structural zero pivot
    let a = CsrMatrix::from_triplets(3, 3, &[(0, 1, 1.0), (1, 0, 1.0), (1, 1, 2.0), (2, 2, 3.0)]);
    let factor = LuFactory::new(Executor::parallel(2).unwrap()).generate(&a).unwrap();
    assert_eq!(factor.failed_rows(), &[0]);
    let x = factor.apply(&[1.0, 1.0, 3.0]).unwrap();
    assert!(x.iter().all(|v: &f64| v.is_finite()));
    assert_abs_diff_eq!(x[2], 1.0, epsilon = 1e-14);
}
