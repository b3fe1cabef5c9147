//! Adaptive block-Jacobi: precision safety and agreement with full precision.

use approx::assert_relative_eq;
use precond_kernels::{
    CsrMatrix, Executor, JacobiFactory, JacobiParams, LinOp, PrecisionPolicy, StoragePrecision,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BLOCK: usize = 4;

/// Block-diagonal matrix. Every fifth block has two nearly dependent rows,
/// every seventh block is badly scaled; the rest are diagonally dominant.
fn mixed_blocks(num_blocks: usize, seed: u64) -> CsrMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut triplets = Vec::new();
    for block in 0..num_blocks {
        let mut b = [[0.0f64; BLOCK]; BLOCK];
        for (i, row) in b.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = if i == j {
                    BLOCK as f64 + rng.random_range(0.0..1.0)
                } else {
                    rng.random_range(-1.0..1.0)
                };
            }
        }
        if block % 5 == 0 {
            for j in 0..BLOCK {
                b[1][j] = b[0][j] + 1e-7 * rng.random_range(-1.0..1.0);
            }
        } else if block % 7 == 0 {
            for j in 0..BLOCK {
                b[3][j] *= 1e-3;
            }
        }
        let base = block * BLOCK;
        for (i, row) in b.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                triplets.push((base + i, base + j, v));
            }
        }
    }
    let n = num_blocks * BLOCK;
    CsrMatrix::from_triplets(n, n, &triplets)
}

fn block_pointers(num_blocks: usize) -> Vec<usize> {
    (0..=num_blocks).map(|b| b * BLOCK).collect()
}

fn params(num_blocks: usize, precision: PrecisionPolicy, group: usize) -> JacobiParams {
    JacobiParams {
        max_block_size: BLOCK,
        block_pointers: Some(block_pointers(num_blocks)),
        precision,
        storage_group_size: group,
        ..JacobiParams::default()
    }
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

// ── Precision safety ──────────────────────────────────────────────

#[test]
fn test_reduced_blocks_pass_safety_checks() {
    let num_blocks = 60;
    let a = mixed_blocks(num_blocks, 17);
    let exec = Executor::parallel(4).unwrap();
    let jacobi = JacobiFactory::new(exec, params(num_blocks, PrecisionPolicy::Autodetect, 1))
        .generate(&a)
        .unwrap();

    let precisions = jacobi.precisions();
    let reduced = precisions.iter().filter(|&&p| p != StoragePrecision::Double).count();
    assert!(reduced > 0, "no block was stored in reduced precision");
    assert!(precisions[0] == StoragePrecision::Double, "nearly singular block was reduced");

    for (block, (&p, &cond)) in precisions.iter().zip(jacobi.conditioning()).enumerate() {
        if p == StoragePrecision::Double {
            continue;
        }
        assert!(cond >= 1.0, "block {block}: cond {cond} below one");
        assert!(cond * p.unit_roundoff() < 1e-3, "block {block}: cond {cond} too large for {p:?}");
        assert!(cond * p.unit_roundoff() <= 1e-1);
    }
}

#[test]
fn test_autodetect_output_close_to_double() {
    let num_blocks = 60;
    let a = mixed_blocks(num_blocks, 29);
    let exec = Executor::parallel(3).unwrap();
    let double = PrecisionPolicy::Fixed(StoragePrecision::Double);
    let auto = PrecisionPolicy::Autodetect;
    let adaptive = JacobiFactory::new(exec.clone(), params(num_blocks, auto, 1))
        .generate(&a)
        .unwrap();
    let full = JacobiFactory::new(exec, params(num_blocks, double, 1))
        .generate(&a)
        .unwrap();
    assert!(full.precisions().iter().all(|&p| p == StoragePrecision::Double));
    assert!(adaptive.storage_bytes() < full.storage_bytes());

    let mut rng = StdRng::seed_from_u64(2);
    let b: Vec<f64> = (0..a.nrows).map(|_| rng.random_range(-1.0..1.0)).collect();
    let x_adaptive = adaptive.apply(&b).unwrap();
    let x_full = full.apply(&b).unwrap();

    // per block, the rounding error is bounded by the block's cond * u
    for block in 0..num_blocks {
        let range = block * BLOCK..(block + 1) * BLOCK;
        let diff: Vec<f64> = x_adaptive[range.clone()]
            .iter()
            .zip(&x_full[range.clone()])
            .map(|(a, f)| a - f)
            .collect();
        assert!(
            inf_norm(&diff) <= 5e-2 * inf_norm(&x_full[range]),
            "block {block} deviates from the double-precision result"
        );
    }
}

#[test]
fn test_storage_group_shares_one_format() {
    let num_blocks = 64;
    let a = mixed_blocks(num_blocks, 41);
    let exec = Executor::reference().unwrap();
    let jacobi = JacobiFactory::new(exec, params(num_blocks, PrecisionPolicy::Autodetect, 32))
        .generate(&a)
        .unwrap();
    // 32 lanes / 4-lane subgroups = 8 blocks per storage group, and every
    // run of 8 blocks holds a nearly singular one
    for group in jacobi.precisions().chunks(8) {
        assert!(
            group.iter().all(|&p| p == StoragePrecision::Double),
            "reduced format in {group:?}"
        );
    }

    let exec = Executor::reference().unwrap();
    let independent = JacobiFactory::new(exec, params(num_blocks, PrecisionPolicy::Autodetect, 1))
        .generate(&a)
        .unwrap();
    assert!(independent.precisions().iter().any(|&p| p != StoragePrecision::Double));
}

// ── Application ───────────────────────────────────────────────────

#[test]
fn test_double_blocks_invert_exactly() {
    let num_blocks = 12;
    let a = mixed_blocks(num_blocks, 5);
    let exec = Executor::parallel(2).unwrap();
    let double = PrecisionPolicy::Fixed(StoragePrecision::Double);
    let jacobi = JacobiFactory::new(exec, params(num_blocks, double, 32))
        .generate(&a)
        .unwrap();
    assert!(jacobi.is_invertible().iter().all(|&ok| ok));

    // M⁻¹ (A x) recovers x on well-conditioned blocks
    let x: Vec<f64> = (0..a.nrows).map(|i| (i % 9) as f64 - 4.0).collect();
    let ax = a.spmv(&x);
    let y = jacobi.apply(&ax).unwrap();
    for block in (0..num_blocks).filter(|b| b % 5 != 0) {
        for i in block * BLOCK..(block + 1) * BLOCK {
            assert_relative_eq!(y[i], x[i], epsilon = 1e-10, max_relative = 1e-10);
        }
    }
}

#[test]
fn test_detected_blocks_on_parallel_and_reference_agree() {
    let num_blocks = 40;
    let a = mixed_blocks(num_blocks, 8);
    let detect = JacobiParams {
        max_block_size: BLOCK,
        ..JacobiParams::default()
    };
    let par = JacobiFactory::new(Executor::parallel(4).unwrap(), detect.clone())
        .generate(&a)
        .unwrap();
    let seq = JacobiFactory::new(Executor::reference().unwrap(), detect)
        .generate(&a)
        .unwrap();
    assert_eq!(par.block_pointers(), block_pointers(num_blocks).as_slice());
    assert_eq!(par.block_pointers(), seq.block_pointers());
    assert_eq!(par.precisions(), seq.precisions());
    assert_eq!(par.to_dense(), seq.to_dense());
}
