//! Sampled binary search tree over magnitudes.
//!
//! Layout: `W - 1` inner splitters in heap order (root at 0, children of
//! node `i` at `2i + 1` and `2i + 2`) followed by `W` leaf lower bounds.
//! Leaf 0 is `-inf`; the implicit leaf `W` is `+inf`.

use crate::scalar::{RealScalar, Scalar};

use super::sort::bitonic_sort;
use super::SelectParams;

#[derive(Debug, Clone)]
pub struct SearchTree<R> {
    height: u32,
    keys: Vec<R>,
}

impl<R: RealScalar> SearchTree<R> {
    /// Build the tree from `width * oversampling` uniformly strided samples.
    pub fn build<T: Scalar<Real = R>>(data: &[T], params: &SelectParams) -> Self {
        let width = params.width();
        let sample_size = width * params.oversampling;
        let len = data.len();
        let mut samples: Vec<R> = (0..sample_size)
            .map(|i| data[((i as u128 * len as u128) / sample_size as u128) as usize].abs_val())
            .collect();
        bitonic_sort(&mut samples);

        // every oversampling-th sample is a splitter; the first is left out
        let mut leaves = Vec::with_capacity(width);
        leaves.push(R::NEG_INFINITY);
        leaves.extend((1..width).map(|b| samples[b * params.oversampling]));

        Self::from_leaves(params.tree_height, leaves)
    }

    /// Build a tree from sorted leaf lower bounds (`leaves[0]` must be `-inf`).
    pub fn from_leaves(height: u32, leaves: Vec<R>) -> Self {
        let width = 1usize << height;
        debug_assert_eq!(leaves.len(), width);
        let mut keys = Vec::with_capacity(2 * width - 1);
        for node in 0..width - 1 {
            let depth = usize::BITS - 1 - (node + 1).leading_zeros();
            let pos = node + 1 - (1 << depth);
            let splitter = (2 * pos + 1) << (height - 1 - depth);
            keys.push(leaves[splitter]);
        }
        keys.extend(leaves);
        Self { height, keys }
    }

    pub fn width(&self) -> usize {
        1 << self.height
    }

    /// Inner splitters in heap order.
    pub fn inner(&self) -> &[R] {
        &self.keys[..self.width() - 1]
    }

    /// Lower bound of bucket `b`; `leaf(width)` is `+inf`.
    pub fn leaf(&self, bucket: usize) -> R {
        if bucket >= self.width() {
            R::INFINITY
        } else {
            self.keys[self.width() - 1 + bucket]
        }
    }

    /// Bucket of a magnitude: `leaf(b) <= magnitude < leaf(b + 1)`.
    pub fn classify(&self, magnitude: R) -> usize {
        let inner = self.inner();
        let mut idx = 0;
        for _ in 0..self.height {
            idx = 2 * idx + 1 + usize::from(magnitude >= inner[idx]);
        }
        idx - (self.width() - 1)
    }
}
