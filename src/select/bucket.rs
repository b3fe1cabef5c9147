//! Per-pass bucket bookkeeping: classification with oracles, the two-level
//! prefix sum, target-bucket search and compaction.

use rayon::prelude::*;

use crate::group::{Group, WARP_SIZE};
use crate::scalar::Scalar;
use crate::sparse::split_rows_mut;

use super::tree::SearchTree;

/// Output of the classification pass.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Bucket id of every input element.
    pub oracles: Vec<u8>,
    /// `partial_counts[block * width + bucket]`, per-block bucket counts.
    pub partial_counts: Vec<usize>,
    pub num_blocks: usize,
    pub block_size: usize,
    pub width: usize,
}

/// Bucket containing the target rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedBucket {
    pub idx: usize,
    /// Number of elements in all lower buckets.
    pub begin: usize,
    pub size: usize,
}

/// Walk the tree for every element, record its bucket in the oracle array
/// and count it in its block's counters. Each block is owned by one worker.
pub fn count_buckets<T: Scalar>(
    data: &[T],
    tree: &SearchTree<T::Real>,
    block_size: usize,
) -> Classification {
    let width = tree.width();
    debug_assert!(width <= 256, "oracles are one byte per element");
    let num_blocks = data.len().div_ceil(block_size).max(1);
    let mut oracles = vec![0u8; data.len()];
    let mut partial_counts = vec![0usize; num_blocks * width];

    data.par_chunks(block_size)
        .zip(oracles.par_chunks_mut(block_size))
        .zip(partial_counts.par_chunks_mut(width))
        .for_each(|((values, oracle), counts)| {
            for (value, slot) in values.iter().zip(oracle.iter_mut()) {
                let bucket = tree.classify(value.abs_val());
                counts[bucket] += 1;
                *slot = bucket as u8;
            }
        });

    Classification {
        oracles,
        partial_counts,
        num_blocks,
        block_size,
        width,
    }
}

/// Turn the per-block counts into per-block offsets within each bucket
/// (exclusive scan over blocks, in place) and return the bucket prefix sum
/// of length `width + 1`: `prefix[b]` elements lie in buckets below `b`,
/// `prefix[width]` is the total.
pub fn bucket_prefix_sum(classification: &mut Classification) -> Vec<usize> {
    let width = classification.width;
    let mut totals = vec![0usize; width];
    for block in 0..classification.num_blocks {
        let counts = &mut classification.partial_counts[block * width..(block + 1) * width];
        for (total, count) in totals.iter_mut().zip(counts.iter_mut()) {
            let c = *count;
            *count = *total;
            *total += c;
        }
    }

    let group = Group::<WARP_SIZE>::new();
    let mut prefix = Vec::with_capacity(width + 1);
    prefix.push(0);
    let mut carry = 0usize;
    for chunk in totals.chunks(WARP_SIZE) {
        let lanes: [usize; WARP_SIZE] =
            std::array::from_fn(|lane| chunk.get(lane).copied().unwrap_or(0));
        let scan = group.prefix_sum(&lanes);
        prefix.extend(scan[..chunk.len()].iter().map(|&s| s + carry));
        carry += scan[WARP_SIZE - 1];
    }
    prefix
}

/// Find `b` with `prefix[b] <= rank < prefix[b + 1]` by voting over the
/// prefix sum one warp-sized chunk at a time.
pub fn find_bucket(prefix: &[usize], rank: usize) -> SelectedBucket {
    let width = prefix.len() - 1;
    let group = Group::<WARP_SIZE>::new();
    let mut idx = 0usize;
    let mut start = 1;
    while start <= width {
        let predicate: [bool; WARP_SIZE] = std::array::from_fn(|lane| {
            let b = start + lane;
            b <= width && prefix[b] <= rank
        });
        idx += group.ballot(&predicate).count_ones() as usize;
        start += WARP_SIZE;
    }
    let idx = idx.min(width - 1);
    SelectedBucket {
        idx,
        begin: prefix[idx],
        size: prefix[idx + 1] - prefix[idx],
    }
}

/// Copy every element whose oracle equals `bucket.idx` into a contiguous
/// array, preserving input order. Needs the offsets written by
/// `bucket_prefix_sum`.
pub fn filter_bucket<T: Scalar>(
    data: &[T],
    classification: &Classification,
    bucket: SelectedBucket,
) -> Vec<T> {
    let width = classification.width;
    let mut block_bounds: Vec<usize> = (0..classification.num_blocks)
        .map(|block| classification.partial_counts[block * width + bucket.idx])
        .collect();
    block_bounds.push(bucket.size);

    let mut output = vec![T::zero(); bucket.size];
    let segments = split_rows_mut(&mut output, &block_bounds);
    let target = bucket.idx as u8;
    segments
        .into_par_iter()
        .zip(data.par_chunks(classification.block_size))
        .zip(classification.oracles.par_chunks(classification.block_size))
        .for_each(|((segment, values), oracles)| {
            let mut out = 0;
            for (value, &oracle) in values.iter().zip(oracles.iter()) {
                if oracle == target {
                    segment[out] = *value;
                    out += 1;
                }
            }
            debug_assert_eq!(out, segment.len());
        });
    output
}
