//! Sample-select: exact k-th order statistic over magnitudes.
//!
//! Each level samples the input, builds a search tree of `W` buckets,
//! classifies every element, locates the bucket holding the target rank and
//! compacts that bucket into a new array. Levels repeat until the bucket fits
//! the base case, which is sorted with a padded bitonic network.
//!
//! Selection is not stable: equal magnitudes are interchangeable and no
//! statement is made about which of several equal elements is returned. Only
//! the value is meaningful.

pub mod bucket;
pub mod sort;
pub mod tree;

use std::borrow::Cow;

use crate::error::{KernelError, Result};
use crate::executor::Executor;
use crate::scalar::Scalar;

use bucket::{bucket_prefix_sum, count_buckets, filter_bucket, find_bucket};
use sort::padded_sort;
use tree::SearchTree;

/// Tunables of the selection engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectParams {
    /// Search tree height; the bucket count is `2^tree_height` (at most 256).
    pub tree_height: u32,
    /// Samples drawn per bucket.
    pub oversampling: usize,
    /// Inputs at or below this size are sorted directly.
    pub basecase_size: usize,
    /// Elements per classification block.
    pub block_size: usize,
    /// Recursion levels before falling back to a full sort.
    pub max_levels: usize,
}

impl Default for SelectParams {
    fn default() -> Self {
        Self {
            tree_height: 8,
            oversampling: 4,
            basecase_size: 1024,
            block_size: 4096,
            max_levels: 16,
        }
    }
}

impl SelectParams {
    pub fn width(&self) -> usize {
        1 << self.tree_height
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.tree_height) {
            return Err(KernelError::InvalidConfig(format!(
                "tree height {} outside 1..=8",
                self.tree_height
            )));
        }
        if !self.oversampling.is_power_of_two() {
            return Err(KernelError::InvalidConfig(format!(
                "oversampling factor {} is not a power of two",
                self.oversampling
            )));
        }
        if !self.basecase_size.is_power_of_two() {
            return Err(KernelError::InvalidConfig(format!(
                "base case size {} is not a power of two",
                self.basecase_size
            )));
        }
        if self.block_size == 0 {
            return Err(KernelError::InvalidConfig("block size must be positive".into()));
        }
        Ok(())
    }
}

/// Magnitude of rank `rank` (0-based, ascending) among `values`.
pub fn select_kth<T: Scalar>(exec: &Executor, values: &[T], rank: usize) -> Result<T::Real> {
    select_kth_with(exec, values, rank, &SelectParams::default())
}

/// `select_kth` with explicit tunables.
pub fn select_kth_with<T: Scalar>(
    exec: &Executor,
    values: &[T],
    rank: usize,
    params: &SelectParams,
) -> Result<T::Real> {
    params.validate()?;
    if rank >= values.len() {
        return Err(KernelError::InvalidRank {
            rank,
            size: values.len(),
        });
    }
    let _span = tracing::debug_span!("select_kth", size = values.len(), rank).entered();
    Ok(exec.install(|| select_levels(values, rank, params)))
}

fn select_levels<T: Scalar>(values: &[T], mut rank: usize, params: &SelectParams) -> T::Real {
    let mut data: Cow<'_, [T]> = Cow::Borrowed(values);
    let mut level = 0;
    loop {
        if data.len() <= params.basecase_size {
            return basecase(&data, rank);
        }
        if level == params.max_levels {
            tracing::debug!(level, size = data.len(), "level limit reached, sorting");
            return sort_select(&data, rank);
        }

        let tree = SearchTree::build(&data, params);
        let mut classification = count_buckets(&data, &tree, params.block_size);
        let prefix = bucket_prefix_sum(&mut classification);
        let bucket = find_bucket(&prefix, rank);
        tracing::debug!(
            level,
            size = data.len(),
            bucket = bucket.idx,
            bucket_size = bucket.size,
            "sample-select level"
        );

        if bucket.size == data.len() {
            // every element landed in one bucket: the magnitudes are (nearly) all equal
            tracing::debug!(level, "no progress, sorting");
            return sort_select(&data, rank);
        }

        let next = filter_bucket(&data, &classification, bucket);
        rank -= bucket.begin;
        data = Cow::Owned(next);
        level += 1;
    }
}

fn basecase<T: Scalar>(data: &[T], rank: usize) -> T::Real {
    let sorted = padded_sort(data.iter().map(|v| v.abs_val()));
    sorted[rank]
}

fn sort_select<T: Scalar>(data: &[T], rank: usize) -> T::Real {
    let mut magnitudes: Vec<T::Real> = data.iter().map(|v| v.abs_val()).collect();
    magnitudes.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    magnitudes[rank]
}
