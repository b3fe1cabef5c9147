//! Storage precisions for preconditioner blocks and the pools that hold
//! encoded blocks.
//!
//! Blocks are always computed in the working precision of the value type
//! and may then be narrowed for storage. Complex values are stored as
//! interleaved (re, im) components.

use half::f16;

use crate::scalar::Scalar;

/// Storage format of one block, widest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoragePrecision {
    Double,
    Single,
    Half,
}

impl StoragePrecision {
    pub const ALL: [StoragePrecision; 3] = [
        StoragePrecision::Double,
        StoragePrecision::Single,
        StoragePrecision::Half,
    ];

    /// Unit roundoff `u = 2^-p` of the format's significand.
    pub fn unit_roundoff(self) -> f64 {
        match self {
            StoragePrecision::Double => f64::EPSILON / 2.0,
            StoragePrecision::Single => f32::EPSILON as f64 / 2.0,
            StoragePrecision::Half => f16::EPSILON.to_f64() / 2.0,
        }
    }

    pub fn bytes_per_component(self) -> usize {
        match self {
            StoragePrecision::Double => 8,
            StoragePrecision::Single => 4,
            StoragePrecision::Half => 2,
        }
    }

    /// Bit of this format in a lane feasibility mask.
    pub fn mask_bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Can values of type `T` be stored in this format without widening?
    pub fn is_narrowing_for<T: Scalar>(self) -> bool {
        self >= T::WORKING_PRECISION
    }

    /// Formats a block of type `T` may use, widest first.
    pub fn candidates<T: Scalar>() -> impl Iterator<Item = StoragePrecision> {
        Self::ALL.into_iter().filter(|p| p.is_narrowing_for::<T>())
    }

    /// Value after storing it in this format and reading it back.
    pub fn round_trip<T: Scalar>(self, value: T) -> T {
        let (re, im) = value.to_parts();
        T::from_parts(self.narrow(re), self.narrow(im))
    }

    fn narrow(self, v: f64) -> f64 {
        match self {
            StoragePrecision::Double => v,
            StoragePrecision::Single => v as f32 as f64,
            StoragePrecision::Half => f16::from_f64(v).to_f64(),
        }
    }
}

/// One stored component type.
trait Component: Copy + Send + Sync {
    fn encode(v: f64) -> Self;
    fn decode(self) -> f64;
}

impl Component for f64 {
    fn encode(v: f64) -> Self {
        v
    }
    fn decode(self) -> f64 {
        self
    }
}

impl Component for f32 {
    fn encode(v: f64) -> Self {
        v as f32
    }
    fn decode(self) -> f64 {
        self as f64
    }
}

impl Component for f16 {
    fn encode(v: f64) -> Self {
        f16::from_f64(v)
    }
    fn decode(self) -> f64 {
        self.to_f64()
    }
}

/// Location of one encoded block inside `EncodedPools`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedSlot {
    pub precision: StoragePrecision,
    /// Offset in values (not components) into the pool of `precision`.
    pub offset: usize,
}

/// Three component pools, one per storage format.
#[derive(Debug, Clone, Default)]
pub struct EncodedPools {
    double: Vec<f64>,
    single: Vec<f32>,
    half: Vec<f16>,
}

fn push_values<T: Scalar, C: Component>(pool: &mut Vec<C>, values: &[T]) -> usize {
    let offset = pool.len() / T::components();
    for v in values {
        let (re, im) = v.to_parts();
        pool.push(C::encode(re));
        if T::components() == 2 {
            pool.push(C::encode(im));
        }
    }
    offset
}

fn read_value<T: Scalar, C: Component>(pool: &[C], idx: usize) -> T {
    if T::components() == 2 {
        T::from_parts(pool[2 * idx].decode(), pool[2 * idx + 1].decode())
    } else {
        T::from_parts(pool[idx].decode(), 0.0)
    }
}

/// `x[row] += alpha * sum_col block[row][col] * b[col]` for a row-major
/// `n`×`n` block starting at value `offset`.
fn multiply_add<T: Scalar, C: Component>(
    pool: &[C],
    offset: usize,
    n: usize,
    alpha: T,
    b: &[T],
    x: &mut [T],
) {
    for (row, out) in x.iter_mut().enumerate().take(n) {
        let mut sum = T::zero();
        for (col, bv) in b.iter().enumerate().take(n) {
            sum += read_value::<T, C>(pool, offset + row * n + col) * *bv;
        }
        *out += alpha * sum;
    }
}

impl EncodedPools {
    /// Append a block's values in `precision`.
    pub fn push<T: Scalar>(&mut self, precision: StoragePrecision, values: &[T]) -> EncodedSlot {
        let offset = match precision {
            StoragePrecision::Double => push_values(&mut self.double, values),
            StoragePrecision::Single => push_values(&mut self.single, values),
            StoragePrecision::Half => push_values(&mut self.half, values),
        };
        EncodedSlot { precision, offset }
    }

    pub fn get<T: Scalar>(&self, slot: EncodedSlot, idx: usize) -> T {
        match slot.precision {
            StoragePrecision::Double => read_value(&self.double, slot.offset + idx),
            StoragePrecision::Single => read_value(&self.single, slot.offset + idx),
            StoragePrecision::Half => read_value(&self.half, slot.offset + idx),
        }
    }

    /// Multiply-accumulate with the block in `slot`, dispatching on its
    /// precision.
    pub fn multiply_add<T: Scalar>(
        &self,
        slot: EncodedSlot,
        n: usize,
        alpha: T,
        b: &[T],
        x: &mut [T],
    ) {
        match slot.precision {
            StoragePrecision::Double => multiply_add(&self.double, slot.offset, n, alpha, b, x),
            StoragePrecision::Single => multiply_add(&self.single, slot.offset, n, alpha, b, x),
            StoragePrecision::Half => multiply_add(&self.half, slot.offset, n, alpha, b, x),
        }
    }

    /// Total storage in bytes.
    pub fn bytes(&self) -> usize {
        self.double.len() * StoragePrecision::Double.bytes_per_component()
            + self.single.len() * StoragePrecision::Single.bytes_per_component()
            + self.half.len() * StoragePrecision::Half.bytes_per_component()
    }
}
