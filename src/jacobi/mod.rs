//! Adaptive block-Jacobi preconditioner.
//!
//! Every diagonal block is gathered transposed into a lane group (lane `l`
//! holds column `l`), inverted in registers and written out unpermuted. The
//! condition surrogate `cond = ‖Bᵀ‖∞ · ‖B⁻ᵀ‖∞` decides whether the inverse
//! may be stored in a narrower format. A reduced format is accepted for a
//! block only if
//!
//! - `cond * u(p) <= accuracy`,
//! - every value stays finite after rounding to `p`,
//! - the inverse, rounded to `p` and inverted again, still gives a
//!   surrogate with `cond ≥ 1` and `cond * u(p) < reduction_margin`.
//!
//! The feasibility masks of all blocks sharing one storage group are
//! AND-reduced, so those blocks commit to the same format.

pub mod blocks;
pub mod precision;

use rayon::prelude::*;

use crate::block_inverse::{compute_infinity_norm, copy_unpermuted, invert_block, MAX_BLOCK_SIZE};
use crate::error::{KernelError, Result};
use crate::executor::Executor;
use crate::group::{Group, WARP_SIZE};
use crate::linop::LinOp;
use crate::scalar::{RealScalar, Scalar};
use crate::sparse::{split_rows_mut, CsrMatrix};

use blocks::{detect_blocks, validate_blocks};
use precision::{EncodedPools, EncodedSlot, StoragePrecision};

/// How block storage formats are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecisionPolicy {
    /// Narrowest format that passes the safety checks.
    Autodetect,
    /// Every block in the given format, unchecked.
    Fixed(StoragePrecision),
}

/// Tunables of block-Jacobi generation.
#[derive(Debug, Clone)]
pub struct JacobiParams {
    /// Upper bound on detected blocks; never above 32.
    pub max_block_size: usize,
    /// Caller-provided block boundaries. Detected when `None`.
    pub block_pointers: Option<Vec<usize>>,
    pub precision: PrecisionPolicy,
    /// Accuracy the preconditioner has to deliver.
    pub accuracy: f64,
    /// Upper bound on `cond * u(p)` after the probe round trip.
    pub reduction_margin: f64,
    /// Lanes whose blocks agree on one storage format.
    pub storage_group_size: usize,
}

impl Default for JacobiParams {
    fn default() -> Self {
        Self {
            max_block_size: MAX_BLOCK_SIZE,
            block_pointers: None,
            precision: PrecisionPolicy::Autodetect,
            accuracy: 1e-1,
            reduction_margin: 1e-3,
            storage_group_size: WARP_SIZE,
        }
    }
}

impl JacobiParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_block_size == 0 || self.max_block_size > MAX_BLOCK_SIZE {
            return Err(KernelError::UnsupportedBlockSize {
                requested: self.max_block_size,
                max: MAX_BLOCK_SIZE,
            });
        }
        if !(self.accuracy > 0.0) || !(self.reduction_margin > 0.0) {
            return Err(KernelError::InvalidConfig(format!(
                "accuracy {} and reduction margin {} must be positive",
                self.accuracy, self.reduction_margin
            )));
        }
        if !self.storage_group_size.is_power_of_two() || self.storage_group_size > WARP_SIZE {
            return Err(KernelError::InvalidConfig(format!(
                "storage group of {} lanes is not a power of two up to {WARP_SIZE}",
                self.storage_group_size
            )));
        }
        Ok(())
    }
}

/// Per-call settings shared by every block.
#[derive(Debug, Clone)]
struct Policy {
    fixed: Option<StoragePrecision>,
    candidates: Vec<StoragePrecision>,
    accuracy: f64,
    margin: f64,
}

/// One inverted block before encoding.
#[derive(Debug, Clone)]
struct InvertedBlock<T: Scalar> {
    /// Row-major `n`×`n` inverse.
    inverse: Vec<T>,
    cond: T::Real,
    invertible: bool,
    mask: u8,
}

/// Builds block-Jacobi preconditioners on one executor.
#[derive(Debug, Clone)]
pub struct JacobiFactory {
    exec: Executor,
    params: JacobiParams,
}

impl JacobiFactory {
    pub fn new(exec: Executor, params: JacobiParams) -> Self {
        Self { exec, params }
    }

    pub fn params(&self) -> &JacobiParams {
        &self.params
    }

    /// Generate the preconditioner for `matrix`. Every configuration error is
    /// reported before any block is touched; singular blocks become identity
    /// blocks flagged as not invertible.
    pub fn generate<T: Scalar>(&self, matrix: &CsrMatrix<T>) -> Result<BlockJacobi<T>> {
        self.params.validate()?;
        if matrix.nrows != matrix.ncols {
            return Err(KernelError::InvalidPattern(format!(
                "block-Jacobi needs a square matrix, got {}x{}",
                matrix.nrows, matrix.ncols
            )));
        }
        matrix.validate()?;
        let policy = self.policy::<T>()?;

        let block_pointers = match &self.params.block_pointers {
            Some(ptrs) => ptrs.clone(),
            None => detect_blocks(matrix, self.params.max_block_size),
        };
        validate_blocks(&block_pointers, matrix.nrows, self.params.max_block_size)?;

        let num_blocks = block_pointers.len() - 1;
        let largest = block_pointers.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(1);
        let subwarp = largest.next_power_of_two();
        let _span = tracing::info_span!(
            "jacobi_generate",
            size = matrix.nrows,
            blocks = num_blocks,
            subwarp
        )
        .entered();

        let group_blocks = (self.params.storage_group_size / subwarp).max(1);
        let inverted = self.exec.install(|| match subwarp {
            1 => invert_all::<T, 1>(matrix, &block_pointers, group_blocks, &policy),
            2 => invert_all::<T, 2>(matrix, &block_pointers, group_blocks, &policy),
            4 => invert_all::<T, 4>(matrix, &block_pointers, group_blocks, &policy),
            8 => invert_all::<T, 8>(matrix, &block_pointers, group_blocks, &policy),
            16 => invert_all::<T, 16>(matrix, &block_pointers, group_blocks, &policy),
            _ => invert_all::<T, 32>(matrix, &block_pointers, group_blocks, &policy),
        });
        self.exec.synchronize();

        let mut pools = EncodedPools::default();
        let mut slots = Vec::with_capacity(num_blocks);
        let mut conditioning = Vec::with_capacity(num_blocks);
        let mut invertible = Vec::with_capacity(num_blocks);
        for (block, precision) in inverted {
            slots.push(pools.push(precision, &block.inverse));
            conditioning.push(block.cond);
            invertible.push(block.invertible);
        }

        let jacobi = BlockJacobi {
            exec: self.exec.clone(),
            size: matrix.nrows,
            block_pointers,
            slots,
            pools,
            conditioning,
            invertible,
        };
        let singular = jacobi.invertible.iter().filter(|&&ok| !ok).count();
        let [double, single, half] = jacobi.precision_histogram();
        tracing::debug!(
            double,
            single,
            half,
            singular,
            bytes = jacobi.pools.bytes(),
            "block-Jacobi generated"
        );
        Ok(jacobi)
    }

    fn policy<T: Scalar>(&self) -> Result<Policy> {
        match self.params.precision {
            PrecisionPolicy::Fixed(p) => {
                if !p.is_narrowing_for::<T>() || !self.exec.supports(p) {
                    return Err(KernelError::UnsupportedPrecision(p));
                }
                Ok(Policy {
                    fixed: Some(p),
                    candidates: vec![p],
                    accuracy: self.params.accuracy,
                    margin: self.params.reduction_margin,
                })
            }
            PrecisionPolicy::Autodetect => Ok(Policy {
                fixed: None,
                candidates: StoragePrecision::candidates::<T>()
                    .filter(|&p| p == T::WORKING_PRECISION || self.exec.supports(p))
                    .collect(),
                accuracy: self.params.accuracy,
                margin: self.params.reduction_margin,
            }),
        }
    }
}

/// Invert all blocks with a lane group of `N` lanes and commit one storage
/// format per storage group.
fn invert_all<T: Scalar, const N: usize>(
    matrix: &CsrMatrix<T>,
    block_pointers: &[usize],
    group_blocks: usize,
    policy: &Policy,
) -> Vec<(InvertedBlock<T>, StoragePrecision)> {
    let starts = &block_pointers[..block_pointers.len() - 1];
    starts
        .par_chunks(group_blocks)
        .enumerate()
        .flat_map_iter(|(chunk, begins)| {
            let group = Group::<N>::new();
            let first = chunk * group_blocks;
            let blocks: Vec<InvertedBlock<T>> = begins
                .iter()
                .enumerate()
                .map(|(i, &begin)| {
                    let n = block_pointers[first + i + 1] - begin;
                    invert_diagonal_block(&group, matrix, begin, n, policy)
                })
                .collect();

            let storage = Group::<WARP_SIZE>::new();
            let masks: [u8; WARP_SIZE] =
                std::array::from_fn(|i| blocks.get(i).map_or(u8::MAX, |b| b.mask));
            let agreed = storage.reduce(&masks, |a, b| a & b);
            let precision = narrowest(agreed, policy);
            blocks.into_iter().map(move |block| (block, precision))
        })
        .collect()
}

fn narrowest(mask: u8, policy: &Policy) -> StoragePrecision {
    policy
        .candidates
        .iter()
        .rev()
        .copied()
        .find(|p| mask & p.mask_bit() != 0)
        .unwrap_or_else(|| policy.fixed.unwrap_or(policy.candidates[0]))
}

fn invert_diagonal_block<T: Scalar, const N: usize>(
    group: &Group<N>,
    matrix: &CsrMatrix<T>,
    begin: usize,
    n: usize,
    policy: &Policy,
) -> InvertedBlock<T> {
    let mut rows = [[T::zero(); N]; N];
    for i in 0..n {
        let (cols, vals) = matrix.row(begin + i);
        let start = cols.partition_point(|&c| c < begin);
        for (&col, &value) in cols[start..].iter().zip(&vals[start..]) {
            if col >= begin + n {
                break;
            }
            rows[col - begin][i] = value;
        }
    }

    let norm = compute_infinity_norm(group, n, n, &rows);
    let outcome = invert_block(group, n, &mut rows);
    let working = policy.fixed.unwrap_or(T::WORKING_PRECISION);
    if !outcome.invertible {
        let mut inverse = vec![T::zero(); n * n];
        for i in 0..n {
            inverse[i * n + i] = T::one();
        }
        return InvertedBlock {
            inverse,
            cond: T::Real::INFINITY,
            invertible: false,
            mask: working.mask_bit(),
        };
    }

    let cond = norm * compute_infinity_norm(group, n, n, &rows);
    let mut inverse = vec![T::zero(); n * n];
    copy_unpermuted(group, n, &rows, &outcome, true, &mut inverse, n);

    let mask = match policy.fixed {
        Some(p) => p.mask_bit(),
        None => feasibility_mask(group, n, &rows, cond.to_f64(), policy),
    };
    InvertedBlock {
        inverse,
        cond,
        invertible: true,
        mask,
    }
}

/// Formats this block may be stored in. Lanes vote on finiteness of their
/// own row; the condition checks are uniform across the block.
fn feasibility_mask<T: Scalar, const N: usize>(
    group: &Group<N>,
    n: usize,
    rows: &[[T; N]; N],
    cond: f64,
    policy: &Policy,
) -> u8 {
    let lane_masks: [u8; N] = std::array::from_fn(|lane| {
        if lane >= n {
            return u8::MAX;
        }
        policy
            .candidates
            .iter()
            .filter(|p| rows[lane][..n].iter().all(|&v| p.round_trip(v).is_finite()))
            .fold(0u8, |mask, p| mask | p.mask_bit())
    });
    let finite = group.reduce(&lane_masks, |a, b| a & b);

    let mut mask = T::WORKING_PRECISION.mask_bit();
    for &p in &policy.candidates {
        if p == T::WORKING_PRECISION || finite & p.mask_bit() == 0 {
            continue;
        }
        let u = p.unit_roundoff();
        if cond * u > policy.accuracy || !(cond >= 1.0 && cond * u < policy.margin) {
            continue;
        }
        if probe(group, n, rows, p, policy.margin) {
            mask |= p.mask_bit();
        }
    }
    mask
}

/// Round the permuted inverse through `p`, invert it back and check the
/// surrogate again.
fn probe<T: Scalar, const N: usize>(
    group: &Group<N>,
    n: usize,
    rows: &[[T; N]; N],
    p: StoragePrecision,
    margin: f64,
) -> bool {
    let mut probe = *rows;
    for row in probe.iter_mut().take(n) {
        for value in row.iter_mut().take(n) {
            *value = p.round_trip(*value);
        }
    }
    let norm = compute_infinity_norm(group, n, n, &probe);
    if !invert_block(group, n, &mut probe).invertible {
        return false;
    }
    let cond = (norm * compute_infinity_norm(group, n, n, &probe)).to_f64();
    cond.is_finite() && cond >= 1.0 && cond * p.unit_roundoff() < margin
}

/// Generated block-Jacobi preconditioner.
#[derive(Debug, Clone)]
pub struct BlockJacobi<T: Scalar> {
    exec: Executor,
    size: usize,
    block_pointers: Vec<usize>,
    slots: Vec<EncodedSlot>,
    pools: EncodedPools,
    conditioning: Vec<T::Real>,
    invertible: Vec<bool>,
}

impl<T: Scalar> BlockJacobi<T> {
    pub fn num_blocks(&self) -> usize {
        self.slots.len()
    }

    pub fn block_pointers(&self) -> &[usize] {
        &self.block_pointers
    }

    /// Storage format committed for each block.
    pub fn precisions(&self) -> Vec<StoragePrecision> {
        self.slots.iter().map(|s| s.precision).collect()
    }

    /// Condition surrogate of each block (`inf` for singular blocks).
    pub fn conditioning(&self) -> &[T::Real] {
        &self.conditioning
    }

    /// False for blocks replaced by the identity.
    pub fn is_invertible(&self) -> &[bool] {
        &self.invertible
    }

    /// Bytes used by the encoded blocks.
    pub fn storage_bytes(&self) -> usize {
        self.pools.bytes()
    }

    /// Blocks per storage format, in `StoragePrecision::ALL` order.
    pub fn precision_histogram(&self) -> [usize; 3] {
        let mut counts = [0usize; 3];
        for slot in &self.slots {
            counts[slot.precision as usize] += 1;
        }
        counts
    }

    /// `x = alpha * M⁻¹ b + beta * x`.
    pub fn apply_scaled(&self, alpha: T, b: &[T], beta: T, x: &mut [T]) -> Result<()> {
        if b.len() != self.size || x.len() != self.size {
            return Err(KernelError::DimensionMismatch(format!(
                "block-Jacobi of size {} applied to vectors of length {} and {}",
                self.size,
                b.len(),
                x.len()
            )));
        }
        let _span = tracing::debug_span!("jacobi_apply", size = self.size).entered();
        self.exec.install(|| {
            split_rows_mut(x, &self.block_pointers)
                .into_par_iter()
                .enumerate()
                .for_each(|(block, out)| {
                    let begin = self.block_pointers[block];
                    let n = out.len();
                    for v in out.iter_mut() {
                        *v = if beta == T::zero() { T::zero() } else { beta * *v };
                    }
                    self.pools
                        .multiply_add(self.slots[block], n, alpha, &b[begin..begin + n], out);
                })
        });
        Ok(())
    }

    /// Dense copy of `M⁻¹` as decoded from storage.
    pub fn to_dense(&self) -> Vec<Vec<T>> {
        let mut dense = vec![vec![T::zero(); self.size]; self.size];
        for (block, slot) in self.slots.iter().enumerate() {
            let begin = self.block_pointers[block];
            let n = self.block_pointers[block + 1] - begin;
            for i in 0..n {
                for j in 0..n {
                    dense[begin + i][begin + j] = self.pools.get(*slot, i * n + j);
                }
            }
        }
        dense
    }
}

impl<T: Scalar> LinOp<T> for BlockJacobi<T> {
    fn size(&self) -> usize {
        self.size
    }

    fn apply(&self, b: &[T]) -> Result<Vec<T>> {
        let mut x = vec![T::zero(); self.size];
        self.apply_scaled(T::one(), b, T::zero(), &mut x)?;
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64;

    fn exec() -> Executor {
        Executor::parallel(2).unwrap()
    }

    fn fixed(p: StoragePrecision, ptrs: &[usize]) -> JacobiParams {
        JacobiParams {
            block_pointers: Some(ptrs.to_vec()),
            precision: PrecisionPolicy::Fixed(p),
            ..JacobiParams::default()
        }
    }

    fn two_blocks() -> CsrMatrix<f64> {
        CsrMatrix::from_triplets(
            5,
            5,
            &[
                (0, 0, 2.0),
                (1, 1, 3.0),
                (2, 2, 4.0),
                (0, 3, 9.0),
                (3, 3, 0.0),
                (3, 4, 1.0),
                (4, 3, 1.0),
                (4, 4, 0.0),
            ],
        )
    }

    #[test]
    fn inverts_each_block_and_ignores_coupling() {
        let factory = JacobiFactory::new(exec(), fixed(StoragePrecision::Double, &[0, 3, 5]));
        let jacobi = factory.generate(&two_blocks()).unwrap();
        let dense = jacobi.to_dense();
        assert_abs_diff_eq!(dense[0][0], 0.5);
        assert_abs_diff_eq!(dense[1][1], 1.0 / 3.0);
        assert_abs_diff_eq!(dense[2][2], 0.25);
        assert_eq!(dense[0][3], 0.0);
        assert_eq!(dense[3][4], 1.0);
        assert_eq!(dense[4][3], 1.0);
        assert_eq!(dense[3][3], 0.0);
        assert_eq!(jacobi.is_invertible(), &[true, true]);
    }

    #[test]
    fn unsymmetric_block_is_not_transposed() {
        let m = CsrMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 1, 1.0)]);
        let factory = JacobiFactory::new(exec(), fixed(StoragePrecision::Double, &[0, 2]));
        let dense = factory.generate(&m).unwrap().to_dense();
        // inverse of [[1, 2], [0, 1]]
        assert_abs_diff_eq!(dense[0][1], -2.0);
        assert_abs_diff_eq!(dense[1][0], 0.0);
    }

    #[test]
    fn singular_block_becomes_identity() {
        let m = CsrMatrix::from_triplets(
            3,
            3,
            &[(0, 0, 1.0f64), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0), (2, 2, 5.0)],
        );
        let factory = JacobiFactory::new(exec(), fixed(StoragePrecision::Double, &[0, 2, 3]));
        let jacobi = factory.generate(&m).unwrap();
        assert_eq!(jacobi.is_invertible(), &[false, true]);
        assert!(jacobi.conditioning()[0].is_infinite());
        let x = jacobi.apply(&[3.0, 4.0, 10.0]).unwrap();
        assert_eq!(x, vec![3.0, 4.0, 2.0]);
    }

    #[test]
    fn oversized_blocks_rejected_before_work() {
        let m = CsrMatrix::from_triplets(3, 3, &[(0, 0, 1.0), (1, 1, 1.0), (2, 2, 1.0)]);
        let params = JacobiParams {
            max_block_size: 2,
            block_pointers: Some(vec![0, 3]),
            ..JacobiParams::default()
        };
        let err = JacobiFactory::new(exec(), params).generate(&m).unwrap_err();
        assert!(matches!(err, KernelError::UnsupportedBlockSize { requested: 3, max: 2 }));

        let params = JacobiParams {
            max_block_size: 64,
            ..JacobiParams::default()
        };
        assert!(JacobiFactory::new(exec(), params).generate(&m).is_err());
    }

    #[test]
    fn unsupported_precisions_rejected() {
        let m = CsrMatrix::from_triplets(1, 1, &[(0, 0, 1.0f32)]);
        let factory = JacobiFactory::new(exec(), fixed(StoragePrecision::Double, &[0, 1]));
        assert!(matches!(
            factory.generate(&m),
            Err(KernelError::UnsupportedPrecision(StoragePrecision::Double))
        ));

        let restricted = exec().with_supported_precisions(&[StoragePrecision::Double]);
        let factory = JacobiFactory::new(restricted, fixed(StoragePrecision::Half, &[0, 1]));
        let m = CsrMatrix::from_triplets(1, 1, &[(0, 0, 1.0f64)]);
        assert!(factory.generate(&m).is_err());
    }

    #[test]
    fn well_conditioned_blocks_are_reduced() {
        let mut triplets = Vec::new();
        for b in 0..8 {
            for i in 0..4 {
                for j in 0..4 {
                    let v = if i == j { 10.0 } else { 1.0 / (1 + i + j) as f64 };
                    triplets.push((4 * b + i, 4 * b + j, v));
                }
            }
        }
        let m = CsrMatrix::from_triplets(32, 32, &triplets);
        let jacobi = JacobiFactory::new(exec(), JacobiParams::default()).generate(&m).unwrap();
        // eight 4-row supervariables merge into one 32-row block; cond ≈ 1.25 < 1e-3 / 2^-11
        assert!(jacobi.precisions().iter().all(|&p| p == StoragePrecision::Half));
        assert_eq!(jacobi.block_pointers().len(), 2);
    }

    #[test]
    fn ill_conditioned_block_stays_wide_and_drags_its_group() {
        let mut triplets = vec![(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0 + 1e-9)];
        for i in 2..8 {
            triplets.push((i, i, 2.0));
        }
        let m = CsrMatrix::from_triplets(8, 8, &triplets);
        let params = JacobiParams {
            block_pointers: Some(vec![0, 2, 4, 6, 8]),
            storage_group_size: 4,
            ..JacobiParams::default()
        };
        let jacobi = JacobiFactory::new(exec(), params).generate(&m).unwrap();
        // subwarp 2, two blocks per storage group
        assert_eq!(
            jacobi.precisions(),
            vec![
                StoragePrecision::Double,
                StoragePrecision::Double,
                StoragePrecision::Half,
                StoragePrecision::Half
            ]
        );
        assert!(jacobi.conditioning()[0] > 1e9);
    }

    #[test]
    fn apply_scaled_accumulates() {
        let factory = JacobiFactory::new(exec(), fixed(StoragePrecision::Double, &[0, 3, 5]));
        let jacobi = factory.generate(&two_blocks()).unwrap();
        let mut x = vec![1.0; 5];
        jacobi.apply_scaled(2.0, &[2.0, 3.0, 4.0, 1.0, 2.0], -1.0, &mut x).unwrap();
        assert_eq!(x, vec![1.0, 1.0, 1.0, 3.0, 1.0]);
        assert!(jacobi.apply(&[1.0]).is_err());
    }

    #[test]
    fn complex_blocks() {
        let i = Complex64::new(0.0, 1.0);
        let m = CsrMatrix::from_triplets(
            2,
            2,
            &[
                (0, 0, Complex64::new(2.0, 0.0)),
                (0, 1, i),
                (1, 0, -i),
                (1, 1, Complex64::new(2.0, 0.0)),
            ],
        );
        let factory = JacobiFactory::new(exec(), fixed(StoragePrecision::Double, &[0, 2]));
        let jacobi = factory.generate(&m).unwrap();
        let b = vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 1.0)];
        let x = jacobi.apply(&b).unwrap();
        let back = m.spmv(&x);
        for (r, e) in back.iter().zip(&b) {
            assert_abs_diff_eq!(r.re, e.re, epsilon = 1e-14);
            assert_abs_diff_eq!(r.im, e.im, epsilon = 1e-14);
        }
    }
}
