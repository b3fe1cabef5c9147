use thiserror::Error;

use crate::jacobi::precision::StoragePrecision;

/// Caller-time contract violations.
///
/// Singular pivots and rejected precision reductions never surface here;
/// they are recorded in the generated handle instead.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("rank {rank} out of range for {size} elements")]
    InvalidRank { rank: usize, size: usize },

    #[error("block size {requested} exceeds the compiled maximum of {max}")]
    UnsupportedBlockSize { requested: usize, max: usize },

    #[error("storage precision {0:?} is not supported here")]
    UnsupportedPrecision(StoragePrecision),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid sparsity pattern: {0}")]
    InvalidPattern(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;
