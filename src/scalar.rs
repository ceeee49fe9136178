//! The scalar capability trait the optimizer is generic over.
//!
//! Everything numeric the optimizer needs is funnelled through [`Scalar`],
//! which is `num_traits::Float` plus the handful of predicates and constants
//! the rewrite rules rely on: near-equality with a tolerance, integrality and
//! parity tests, a raw-bits hash, and precision estimation for the
//! pow-folding guards.

use std::fmt::{Debug, Display};

use num_traits::{Float, FloatConst, FromPrimitive, ToPrimitive};

/// Scalar numeric type the optimizer can work over.
///
/// Implemented for `f32` and `f64`. The rewrite conditions only assume what
/// this trait provides; extended-precision types can implement it as well.
pub trait Scalar:
    Float + FloatConst + FromPrimitive + ToPrimitive + Debug + Display + Default + 'static
{
    /// Comparison tolerance for [`Scalar::fp_equal`].
    fn tolerance() -> Self;

    /// Largest binary exponent representable (used by the pow overflow guard).
    fn max_binary_exponent() -> i32;

    /// Near-equality within [`Scalar::tolerance`].
    #[inline]
    fn fp_equal(self, other: Self) -> bool {
        (self - other).abs() <= Self::tolerance()
    }

    /// Negation of [`Scalar::fp_equal`].
    #[inline]
    fn fp_nequal(self, other: Self) -> bool {
        !self.fp_equal(other)
    }

    /// "Just below zero" sentinel used by range analysis for strict-negative
    /// upper bounds.
    #[inline]
    fn negative_zero() -> Self {
        -Self::tolerance()
    }

    /// True if the value is a mathematical integer.
    #[inline]
    fn is_integer_value(self) -> bool {
        self.is_finite() && self == self.trunc()
    }

    /// True if the value is an integer that also fits in `i64`.
    #[inline]
    fn is_long_integer(self) -> bool {
        self.is_integer_value() && self.to_i64().is_some_and(|l| Self::from_long(l) == self)
    }

    /// Truncate to `i64`. Only meaningful when [`Scalar::is_long_integer`].
    #[inline]
    fn as_long(self) -> i64 {
        self.to_i64().unwrap_or(0)
    }

    /// Convert from `i64`.
    #[inline]
    fn from_long(v: i64) -> Self {
        Self::from_i64(v).unwrap_or_else(Self::zero)
    }

    /// True for even integers (0, ±2, ±4, ...).
    #[inline]
    fn is_even_integer(self) -> bool {
        self.is_long_integer() && self.as_long() % 2 == 0
    }

    /// True for odd integers (±1, ±3, ...).
    #[inline]
    fn is_odd_integer(self) -> bool {
        self.is_long_integer() && self.as_long() % 2 != 0
    }

    /// Equality against one after narrowing to `f32`.
    ///
    /// Pow folding uses this instead of [`Scalar::fp_equal`] to mop up
    /// `abs(x)^1` residues such as the one left by `exp(log(x^6)/6)` without
    /// giving up as much precision as the tolerance comparison would.
    #[inline]
    fn narrowed_equals_one(self) -> bool {
        self.to_f32().is_some_and(|f| f == 1.0)
    }

    /// Raw-bits value for structural hashing. Must distinguish values that
    /// are not `fp_equal`; collisions are allowed (the hash is a filter).
    fn hash_bits(self) -> u64 {
        let (mantissa, exponent, sign) = self.integer_decode();
        #[allow(clippy::cast_sign_loss)]
        {
            mantissa ^ ((exponent as u64) << 52) ^ ((sign as u64) << 63)
        }
    }

    /// Estimated significand bit count of the value, 0 for zero.
    ///
    /// Used to detect catastrophic precision loss when pushing constant
    /// factors through `Pow` (e.g. `pow(1e-30, x)` must not become `1^x`).
    fn precision_bits(self) -> i32 {
        if self == Self::zero() || !self.is_finite() {
            return 0;
        }
        let (mantissa, _, _) = self.integer_decode();
        if mantissa == 0 {
            return 0;
        }
        let trimmed = mantissa >> mantissa.trailing_zeros();
        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        {
            (64 - trimmed.leading_zeros()) as i32
        }
    }

    /// `2π`.
    #[inline]
    fn two_pi() -> Self {
        Self::PI() + Self::PI()
    }

    /// `π/2`.
    #[inline]
    fn pi_half() -> Self {
        Self::FRAC_PI_2()
    }

    /// `1 / ln 10`, the factor that turns `Log` into `Log10`.
    #[inline]
    fn log10_factor() -> Self {
        Self::LOG10_E()
    }

    /// `1 / ln 2`, the factor that turns `Log` into `Log2`.
    #[inline]
    fn log2_factor() -> Self {
        Self::LOG2_E()
    }

    /// Radians → degrees multiplier (`deg(x)`).
    #[inline]
    fn rad_to_deg() -> Self {
        Self::from_long(180) / Self::PI()
    }

    /// Degrees → radians multiplier (`rad(x)`).
    #[inline]
    fn deg_to_rad() -> Self {
        Self::PI() / Self::from_long(180)
    }
}

impl Scalar for f64 {
    #[inline]
    fn tolerance() -> Self {
        1e-12
    }

    #[inline]
    fn max_binary_exponent() -> i32 {
        f64::MAX_EXP
    }

    #[inline]
    fn hash_bits(self) -> u64 {
        self.to_bits()
    }
}

impl Scalar for f32 {
    #[inline]
    fn tolerance() -> Self {
        1e-5
    }

    #[inline]
    fn max_binary_exponent() -> i32 {
        f32::MAX_EXP
    }

    #[inline]
    fn hash_bits(self) -> u64 {
        u64::from(self.to_bits())
    }
}

/// True when `base^exponent` would overflow the scalar's exponent range.
///
/// Conservative: negative bases report "too large" so the caller skips the
/// rewrite rather than reason about complex results.
pub(crate) fn exponent_too_large<S: Scalar>(base: S, exponent: S) -> bool {
    if base < S::zero() {
        return true;
    }
    if base.fp_equal(S::zero()) || base.fp_equal(S::one()) {
        return false;
    }
    let limit = S::from_i32(S::max_binary_exponent()).unwrap_or_else(S::one);
    exponent >= limit / base.log2()
}
