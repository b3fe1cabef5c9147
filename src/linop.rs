//! Interface the iterative-solver driver calls on generated preconditioners.

use crate::error::Result;
use crate::scalar::Scalar;

/// A generated operator that approximates `A⁻¹`.
pub trait LinOp<T: Scalar> {
    /// Number of rows (and columns) of the operator.
    fn size(&self) -> usize;

    /// `x = M⁻¹ b`.
    fn apply(&self, b: &[T]) -> Result<Vec<T>>;
}
