//! Numeric value traits.
//!
//! `Scalar` is the working value type of matrices and vectors (real or
//! complex), `RealScalar` the type of magnitudes, norms, condition numbers
//! and search-tree keys.

use num_complex::{Complex32, Complex64};
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::jacobi::precision::StoragePrecision;

/// Real floating-point type used for magnitudes.
pub trait RealScalar:
    Copy
    + Default
    + Send
    + Sync
    + PartialOrd
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + AddAssign
    + 'static
{
    const INFINITY: Self;
    const NEG_INFINITY: Self;

    fn zero() -> Self;
    fn one() -> Self;
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
    fn is_finite(self) -> bool;

    fn max_val(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

impl RealScalar for f64 {
    const INFINITY: Self = f64::INFINITY;
    const NEG_INFINITY: Self = f64::NEG_INFINITY;

    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn to_f64(self) -> f64 {
        self
    }
    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }
}

impl RealScalar for f32 {
    const INFINITY: Self = f32::INFINITY;
    const NEG_INFINITY: Self = f32::NEG_INFINITY;

    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }
}

/// Trait bounds needed by every kernel in the crate.
pub trait Scalar:
    Copy
    + Default
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + PartialEq
    + Debug
    + 'static
{
    type Real: RealScalar;

    /// Highest storage precision; blocks of this type are never stored wider.
    const WORKING_PRECISION: StoragePrecision;

    fn zero() -> Self;
    fn one() -> Self;
    /// Absolute value, or modulus for complex values.
    fn abs_val(self) -> Self::Real;
    fn conj(self) -> Self;
    fn sqrt(self) -> Self;
    fn from_real(r: Self::Real) -> Self;
    fn real_part(self) -> Self::Real;
    fn is_finite(self) -> bool;
    /// Split into (re, im) widened to f64; im is 0 for real types.
    fn to_parts(self) -> (f64, f64);
    fn from_parts(re: f64, im: f64) -> Self;

    /// Number of real components stored per value.
    fn components() -> usize {
        1
    }
}

impl Scalar for f64 {
    type Real = f64;
    const WORKING_PRECISION: StoragePrecision = StoragePrecision::Double;

    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn abs_val(self) -> f64 {
        self.abs()
    }
    fn conj(self) -> Self {
        self
    }
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    fn from_real(r: f64) -> Self {
        r
    }
    fn real_part(self) -> f64 {
        self
    }
    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }
    fn to_parts(self) -> (f64, f64) {
        (self, 0.0)
    }
    fn from_parts(re: f64, _im: f64) -> Self {
        re
    }
}

impl Scalar for f32 {
    type Real = f32;
    const WORKING_PRECISION: StoragePrecision = StoragePrecision::Single;

    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn abs_val(self) -> f32 {
        self.abs()
    }
    fn conj(self) -> Self {
        self
    }
    fn sqrt(self) -> Self {
        f32::sqrt(self)
    }
    fn from_real(r: f32) -> Self {
        r
    }
    fn real_part(self) -> f32 {
        self
    }
    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }
    fn to_parts(self) -> (f64, f64) {
        (self as f64, 0.0)
    }
    fn from_parts(re: f64, _im: f64) -> Self {
        re as f32
    }
}

impl Scalar for Complex64 {
    type Real = f64;
    const WORKING_PRECISION: StoragePrecision = StoragePrecision::Double;

    fn zero() -> Self {
        Complex64::new(0.0, 0.0)
    }
    fn one() -> Self {
        Complex64::new(1.0, 0.0)
    }
    fn abs_val(self) -> f64 {
        self.norm()
    }
    fn conj(self) -> Self {
        Complex64::conj(&self)
    }
    fn sqrt(self) -> Self {
        Complex64::sqrt(self)
    }
    fn from_real(r: f64) -> Self {
        Complex64::new(r, 0.0)
    }
    fn real_part(self) -> f64 {
        self.re
    }
    fn is_finite(self) -> bool {
        Complex64::is_finite(self)
    }
    fn to_parts(self) -> (f64, f64) {
        (self.re, self.im)
    }
    fn from_parts(re: f64, im: f64) -> Self {
        Complex64::new(re, im)
    }
    fn components() -> usize {
        2
    }
}

impl Scalar for Complex32 {
    type Real = f32;
    const WORKING_PRECISION: StoragePrecision = StoragePrecision::Single;

    fn zero() -> Self {
        Complex32::new(0.0, 0.0)
    }
    fn one() -> Self {
        Complex32::new(1.0, 0.0)
    }
    fn abs_val(self) -> f32 {
        self.norm()
    }
    fn conj(self) -> Self {
        Complex32::conj(&self)
    }
    fn sqrt(self) -> Self {
        Complex32::sqrt(self)
    }
    fn from_real(r: f32) -> Self {
        Complex32::new(r, 0.0)
    }
    fn real_part(self) -> f32 {
        self.re
    }
    fn is_finite(self) -> bool {
        Complex32::is_finite(self)
    }
    fn to_parts(self) -> (f64, f64) {
        (self.re as f64, self.im as f64)
    }
    fn from_parts(re: f64, im: f64) -> Self {
        Complex32::new(re as f32, im as f32)
    }
    fn components() -> usize {
        2
    }
}
