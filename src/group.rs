//! Lock-step execution groups.
//!
//! A `Group<N>` models `N` lanes (a warp or subgroup) that execute the same
//! instruction stream. Per-lane state is an `[T; N]` array indexed by lane
//! rank; every primitive consumes and produces whole lane arrays, so control
//! flow around a primitive is uniform across the group by construction.
//! Callers must not invoke primitives for a subset of lanes.

use crate::scalar::RealScalar;

/// Lanes in the widest group a kernel may use.
pub const WARP_SIZE: usize = 32;

/// A cooperative group of `N` lanes, `N` a power of two no larger than 64.
#[derive(Debug, Clone, Copy, Default)]
pub struct Group<const N: usize>;

impl<const N: usize> Group<N> {
    const VALID_SIZE: () = assert!(
        N.is_power_of_two() && N <= 64,
        "group size must be a power of two <= 64"
    );

    pub const SIZE: usize = N;

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_SIZE;
        Self
    }

    pub fn size(&self) -> usize {
        N
    }

    /// Broadcast `values[src_lane]` to every lane.
    pub fn shuffle<T: Copy>(&self, values: &[T; N], src_lane: usize) -> T {
        values[src_lane % N]
    }

    /// Broadcast a whole register array (one shuffle per element) from `src_lane`.
    pub fn shuffle_array<T: Copy, const M: usize>(
        &self,
        values: &[[T; M]; N],
        src_lane: usize,
    ) -> [T; M] {
        values[src_lane % N]
    }

    /// Lane `i` receives lane `i - delta`; the lowest `delta` lanes keep their value.
    pub fn shuffle_up<T: Copy>(&self, values: &[T; N], delta: usize) -> [T; N] {
        std::array::from_fn(|lane| {
            if lane >= delta {
                values[lane - delta]
            } else {
                values[lane]
            }
        })
    }

    /// Lane `i` receives lane `i + delta`; the highest `delta` lanes keep their value.
    pub fn shuffle_down<T: Copy>(&self, values: &[T; N], delta: usize) -> [T; N] {
        std::array::from_fn(|lane| {
            if lane + delta < N {
                values[lane + delta]
            } else {
                values[lane]
            }
        })
    }

    /// Hypercube exchange: lane `i` receives lane `i ^ mask`.
    pub fn shuffle_xor<T: Copy>(&self, values: &[T; N], mask: usize) -> [T; N] {
        std::array::from_fn(|lane| values[(lane ^ mask) % N])
    }

    /// Bit `i` of the result is set iff lane `i`'s predicate holds.
    pub fn ballot(&self, predicate: &[bool; N]) -> u64 {
        predicate
            .iter()
            .enumerate()
            .fold(0u64, |mask, (lane, &p)| if p { mask | (1u64 << lane) } else { mask })
    }

    pub fn all(&self, predicate: &[bool; N]) -> bool {
        self.ballot(predicate).count_ones() as usize == N
    }

    pub fn any(&self, predicate: &[bool; N]) -> bool {
        self.ballot(predicate) != 0
    }

    /// Group barrier. Lanes already run in lock-step; this orders memory
    /// effects issued before it against those issued after it.
    pub fn sync(&self) {
        std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    }

    /// Butterfly reduction; every lane ends up with the same result.
    pub fn reduce<T: Copy>(&self, values: &[T; N], op: impl Fn(T, T) -> T) -> T {
        let mut acc = *values;
        let mut offset = N / 2;
        while offset > 0 {
            let other = self.shuffle_xor(&acc, offset);
            acc = std::array::from_fn(|lane| op(acc[lane], other[lane]));
            offset /= 2;
        }
        acc[0]
    }

    /// Inclusive scan (Hillis-Steele over `shuffle_up`).
    pub fn prefix_sum<T: Copy + std::ops::Add<Output = T>>(&self, values: &[T; N]) -> [T; N] {
        let mut acc = *values;
        let mut delta = 1;
        while delta < N {
            let shifted = self.shuffle_up(&acc, delta);
            acc = std::array::from_fn(|lane| {
                if lane >= delta {
                    acc[lane] + shifted[lane]
                } else {
                    acc[lane]
                }
            });
            delta *= 2;
        }
        acc
    }

    /// Lane holding the largest magnitude among lanes not yet `excluded`.
    /// Ties go to the lowest lane. If every lane is excluded, returns lane 0.
    pub fn choose_pivot<R: RealScalar>(&self, magnitudes: &[R; N], excluded: &[bool; N]) -> usize {
        let candidates: [(R, usize); N] = std::array::from_fn(|lane| {
            if excluded[lane] {
                (R::NEG_INFINITY, lane)
            } else {
                (magnitudes[lane], lane)
            }
        });
        let (_, lane) = self.reduce(&candidates, |a, b| {
            if b.0 > a.0 || (b.0 == a.0 && b.1 < a.1) {
                b
            } else {
                a
            }
        });
        lane
    }
}
