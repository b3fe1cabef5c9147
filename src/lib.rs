//! Preconditioner kernel core: lock-step group primitives, in-register block
//! inversion, sample-select, a synchronization-free row scheduler, symbolic
//! and numeric triangular factorizations and an adaptive-precision
//! block-Jacobi preconditioner.

pub mod block_inverse;
pub mod error;
pub mod executor;
pub mod factorization;
pub mod group;
pub mod jacobi;
pub mod linop;
pub mod scalar;
pub mod scheduler;
pub mod select;
pub mod sparse;
pub mod stats;
pub mod threshold;

pub use error::{KernelError, Result};
pub use executor::Executor;
pub use factorization::{CholeskyFactory, Factorization, FactorizationParams, LuFactory};
pub use jacobi::precision::StoragePrecision;
pub use jacobi::{BlockJacobi, JacobiFactory, JacobiParams, PrecisionPolicy};
pub use linop::LinOp;
pub use scalar::{RealScalar, Scalar};
pub use select::{select_kth, select_kth_with, SelectParams};
pub use sparse::CsrMatrix;
