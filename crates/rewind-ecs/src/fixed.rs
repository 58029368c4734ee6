//! Deterministic fixed-point arithmetic.
//!
//! [`Fx`] is a signed Q32.32 number stored in an `i64`. Every operation is
//! plain integer math (products and quotients go through `i128` and truncate
//! toward zero), so results are bit-identical on every platform. Floating
//! point conversions exist for authoring and diagnostics only and must never
//! be called from inside a tick.
//!
//! [`FxVec3`] and [`FxQuat`] are `#[repr(C)]` aggregates of [`Fx`] with no
//! padding, which is what lets components built from them derive
//! [`bytemuck::Pod`] and be snapshotted as raw bytes.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

const FRAC_BITS: u32 = 32;
const ONE_RAW: i64 = 1 << FRAC_BITS;

// ---------------------------------------------------------------------------
// Fx
// ---------------------------------------------------------------------------

/// Q32.32 fixed-point scalar.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Fx(i64);

impl Fx {
    pub const ZERO: Fx = Fx(0);
    pub const ONE: Fx = Fx(ONE_RAW);
    pub const NEG_ONE: Fx = Fx(-ONE_RAW);
    pub const HALF: Fx = Fx(ONE_RAW / 2);
    /// Smallest representable positive value (2^-32).
    pub const EPSILON: Fx = Fx(1);
    pub const MAX: Fx = Fx(i64::MAX);
    pub const MIN: Fx = Fx(i64::MIN);

    /// Wrap a raw Q32.32 bit pattern.
    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw Q32.32 bit pattern.
    #[inline]
    pub const fn to_raw(self) -> i64 {
        self.0
    }

    /// Exact conversion from an integer.
    #[inline]
    pub const fn from_int(value: i32) -> Self {
        Self((value as i64) << FRAC_BITS)
    }

    /// `num / den` computed in fixed point. A zero denominator yields zero.
    ///
    /// Usable in `const` context, which is how tuning constants such as
    /// `0.7` are spelled without going through floating point.
    pub const fn from_ratio(num: i64, den: i64) -> Self {
        if den == 0 {
            return Self::ZERO;
        }
        Self((((num as i128) << FRAC_BITS) / den as i128) as i64)
    }

    /// Round-to-nearest conversion from `f64`, saturating at the range ends.
    ///
    /// Authoring helper only.
    pub fn from_f64(value: f64) -> Self {
        Self((value * ONE_RAW as f64).round() as i64)
    }

    /// Lossy conversion to `f64` for diagnostics.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / ONE_RAW as f64
    }

    #[inline]
    pub const fn abs(self) -> Self {
        Self(self.0.wrapping_abs())
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        Ord::min(self, other)
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        Ord::max(self, other)
    }

    #[inline]
    pub fn clamp(self, lo: Self, hi: Self) -> Self {
        Ord::clamp(self, lo, hi)
    }

    /// Floor square root. Negative inputs return zero.
    pub fn sqrt(self) -> Self {
        if self.0 <= 0 {
            return Self::ZERO;
        }
        Self(isqrt_u128((self.0 as u128) << FRAC_BITS) as i64)
    }

    /// Division that truncates toward zero and saturates on a zero divisor
    /// instead of panicking.
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.0 == 0 {
            return None;
        }
        let quotient = ((self.0 as i128) << FRAC_BITS) / rhs.0 as i128;
        Some(Self(saturate_i128(quotient)))
    }

    /// Exact product with an integer, saturating on overflow.
    pub fn mul_int(self, n: i64) -> Self {
        Self(saturate_i128(self.0 as i128 * n as i128))
    }
}

impl fmt::Debug for Fx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fx({})", self.to_f64())
    }
}

impl fmt::Display for Fx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

impl Add for Fx {
    type Output = Fx;
    #[inline]
    fn add(self, rhs: Fx) -> Fx {
        Fx(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for Fx {
    type Output = Fx;
    #[inline]
    fn sub(self, rhs: Fx) -> Fx {
        Fx(self.0.wrapping_sub(rhs.0))
    }
}

impl Neg for Fx {
    type Output = Fx;
    #[inline]
    fn neg(self) -> Fx {
        Fx(self.0.wrapping_neg())
    }
}

impl Mul for Fx {
    type Output = Fx;
    #[inline]
    fn mul(self, rhs: Fx) -> Fx {
        let product = (self.0 as i128 * rhs.0 as i128) / ONE_RAW as i128;
        Fx(saturate_i128(product))
    }
}

impl Div for Fx {
    type Output = Fx;
    /// Division by zero saturates toward the sign of the dividend.
    fn div(self, rhs: Fx) -> Fx {
        self.checked_div(rhs).unwrap_or(match self.0.signum() {
            1 => Fx::MAX,
            -1 => Fx::MIN,
            _ => Fx::ZERO,
        })
    }
}

impl AddAssign for Fx {
    #[inline]
    fn add_assign(&mut self, rhs: Fx) {
        *self = *self + rhs;
    }
}

impl SubAssign for Fx {
    #[inline]
    fn sub_assign(&mut self, rhs: Fx) {
        *self = *self - rhs;
    }
}

impl MulAssign for Fx {
    #[inline]
    fn mul_assign(&mut self, rhs: Fx) {
        *self = *self * rhs;
    }
}

fn saturate_i128(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Floor integer square root (Newton iteration from an over-estimate).
fn isqrt_u128(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let bits = 128 - n.leading_zeros();
    let mut x = 1u128 << bits.div_ceil(2);
    loop {
        let y = (x + n / x) / 2;
        if y >= x {
            return x;
        }
        x = y;
    }
}

// ---------------------------------------------------------------------------
// FxVec3
// ---------------------------------------------------------------------------

/// Three-component fixed-point vector.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
#[repr(C)]
pub struct FxVec3 {
    pub x: Fx,
    pub y: Fx,
    pub z: Fx,
}

impl FxVec3 {
    pub const ZERO: FxVec3 = FxVec3::new(Fx::ZERO, Fx::ZERO, Fx::ZERO);
    pub const ONE: FxVec3 = FxVec3::new(Fx::ONE, Fx::ONE, Fx::ONE);
    pub const X: FxVec3 = FxVec3::new(Fx::ONE, Fx::ZERO, Fx::ZERO);
    pub const Y: FxVec3 = FxVec3::new(Fx::ZERO, Fx::ONE, Fx::ZERO);
    pub const Z: FxVec3 = FxVec3::new(Fx::ZERO, Fx::ZERO, Fx::ONE);
    /// Canonical "flat ground" normal.
    pub const UP: FxVec3 = FxVec3::Y;

    #[inline]
    pub const fn new(x: Fx, y: Fx, z: Fx) -> Self {
        Self { x, y, z }
    }

    /// All three components set to `v`.
    #[inline]
    pub const fn splat(v: Fx) -> Self {
        Self::new(v, v, v)
    }

    /// Authoring helper; see [`Fx::from_f64`].
    pub fn from_f64(x: f64, y: f64, z: f64) -> Self {
        Self::new(Fx::from_f64(x), Fx::from_f64(y), Fx::from_f64(z))
    }

    pub fn to_f64(self) -> [f64; 3] {
        [self.x.to_f64(), self.y.to_f64(), self.z.to_f64()]
    }

    /// Unit vector along `axis` (0 = x, 1 = y, 2 = z) with the given sign.
    pub fn axis(axis: usize, negative: bool) -> Self {
        let unit = if negative { Fx::NEG_ONE } else { Fx::ONE };
        let mut v = Self::ZERO;
        v.set(axis, unit);
        v
    }

    /// Component by axis index. Indices past 2 read as `z`.
    #[inline]
    pub fn get(self, axis: usize) -> Fx {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    /// Overwrite a component by axis index. Indices past 2 write `z`.
    #[inline]
    pub fn set(&mut self, axis: usize, value: Fx) {
        match axis {
            0 => self.x = value,
            1 => self.y = value,
            _ => self.z = value,
        }
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    pub fn dot(self, other: Self) -> Fx {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Squared length, saturating.
    pub fn length_squared(self) -> Fx {
        let sum = self.raw_square_sum() >> FRAC_BITS;
        Fx(sum.min(i64::MAX as u128) as i64)
    }

    /// Floor of the Euclidean length.
    pub fn length(self) -> Fx {
        Fx(isqrt_u128(self.raw_square_sum()).min(i64::MAX as u128) as i64)
    }

    /// Unit vector in the same direction, or zero for the zero vector.
    pub fn normalize_or_zero(self) -> Self {
        let len = self.length();
        if len.is_zero() {
            return Self::ZERO;
        }
        Self::new(self.x / len, self.y / len, self.z / len)
    }

    /// Scale the vector down so its [`length`](Self::length) does not exceed
    /// `max`. Vectors already within the limit are returned unchanged.
    pub fn clamp_length(self, max: Fx) -> Self {
        let len = self.length();
        if len <= max {
            return self;
        }
        if !max.is_positive() {
            return Self::ZERO;
        }
        let mut factor = max / len;
        loop {
            let scaled = self * factor;
            if scaled.length() <= max || factor.is_zero() {
                return scaled;
            }
            factor -= Fx::EPSILON;
        }
    }

    fn raw_square_sum(self) -> u128 {
        let sq = |v: Fx| {
            let r = v.0.unsigned_abs() as u128;
            r * r
        };
        sq(self.x)
            .saturating_add(sq(self.y))
            .saturating_add(sq(self.z))
    }
}

impl fmt::Debug for FxVec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FxVec3({}, {}, {})",
            self.x.to_f64(),
            self.y.to_f64(),
            self.z.to_f64()
        )
    }
}

impl Add for FxVec3 {
    type Output = FxVec3;
    #[inline]
    fn add(self, rhs: FxVec3) -> FxVec3 {
        FxVec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for FxVec3 {
    type Output = FxVec3;
    #[inline]
    fn sub(self, rhs: FxVec3) -> FxVec3 {
        FxVec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for FxVec3 {
    type Output = FxVec3;
    #[inline]
    fn neg(self) -> FxVec3 {
        FxVec3::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<Fx> for FxVec3 {
    type Output = FxVec3;
    #[inline]
    fn mul(self, rhs: Fx) -> FxVec3 {
        FxVec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl AddAssign for FxVec3 {
    #[inline]
    fn add_assign(&mut self, rhs: FxVec3) {
        *self = *self + rhs;
    }
}

impl SubAssign for FxVec3 {
    #[inline]
    fn sub_assign(&mut self, rhs: FxVec3) {
        *self = *self - rhs;
    }
}

// ---------------------------------------------------------------------------
// FxQuat
// ---------------------------------------------------------------------------

/// Fixed-point quaternion. The core only stores and copies rotations; it
/// never composes them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct FxQuat {
    pub x: Fx,
    pub y: Fx,
    pub z: Fx,
    pub w: Fx,
}

impl FxQuat {
    pub const IDENTITY: FxQuat = FxQuat {
        x: Fx::ZERO,
        y: Fx::ZERO,
        z: Fx::ZERO,
        w: Fx::ONE,
    };

    pub const fn new(x: Fx, y: Fx, z: Fx, w: Fx) -> Self {
        Self { x, y, z, w }
    }

    pub fn length_squared(self) -> Fx {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }
}

impl Default for FxQuat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Debug for FxQuat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FxQuat({}, {}, {}, {})",
            self.x.to_f64(),
            self.y.to_f64(),
            self.z.to_f64(),
            self.w.to_f64()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
