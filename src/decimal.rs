//! Exact-decimal arithmetic for prices, volumes, and balances.
//!
//! Everything monetary in the simulator flows through [`Decimal`]: arithmetic
//! is exact within the representable domain and ordering is total, so two
//! runs over the same inputs settle to bit-identical accounts. Checkpoints
//! store decimals in a packed 64-bit form ([`pack_decimal`] /
//! [`unpack_decimal`] are mutual inverses on the packable subset); public
//! JSON uses the floating-point approximation via [`decimal_to_f64`].

pub use rust_decimal::Decimal;

use rust_decimal::{MathematicalOps, RoundingStrategy, prelude::FromPrimitive, prelude::ToPrimitive};

use crate::error::DecimalError;

/// Fractional digits used when no explicit rounding is requested.
pub const DEFAULT_DECIMAL_PLACES: u32 = 8;

/// Maximum scale [`Decimal`] supports; packed values beyond it are malformed.
const MAX_SCALE: u32 = 28;

/// Bits available for the coefficient in the packed form.
const COEFF_BITS: u32 = 58;
const COEFF_MASK: u64 = (1 << COEFF_BITS) - 1;

/// Truncates toward zero to [`DEFAULT_DECIMAL_PLACES`] fractional digits.
pub fn round(val: Decimal) -> Decimal {
    round_to(val, DEFAULT_DECIMAL_PLACES)
}

/// Truncates toward zero to `decimal_places` fractional digits.
pub fn round_to(val: Decimal, decimal_places: u32) -> Decimal {
    val.trunc_with_scale(decimal_places)
}

/// Rounds toward positive infinity to `decimal_places` fractional digits.
///
/// The result is the smallest representable value with at most
/// `decimal_places` fractional digits that is `>= val`.
pub fn round_up(val: Decimal, decimal_places: u32) -> Decimal {
    val.round_dp_with_strategy(decimal_places, RoundingStrategy::ToPositiveInfinity)
}

/// Packs a decimal into 64 bits: 1 sign bit, 5 scale bits, 58 coefficient bits.
///
/// The value is normalized first, so the encoding is canonical: equal decimals
/// pack to equal words. Values whose normalized coefficient needs more than
/// 58 bits do not fit and fail with [`DecimalError::Unpackable`].
pub fn pack_decimal(val: Decimal) -> Result<u64, DecimalError> {
    if val.is_zero() {
        return Ok(0);
    }
    let canonical = val.normalize();
    let coeff = canonical.mantissa().unsigned_abs();
    if coeff > u128::from(COEFF_MASK) {
        return Err(DecimalError::Unpackable(val));
    }
    let sign = u64::from(canonical.is_sign_negative());
    let scale = u64::from(canonical.scale());
    Ok(sign << 63 | scale << COEFF_BITS | coeff as u64)
}

/// Inverse of [`pack_decimal`].
///
/// Rejects words that no call to [`pack_decimal`] can produce: scale beyond
/// [`Decimal`]'s limit, or a zero coefficient with sign or scale bits set.
pub fn unpack_decimal(packed: u64) -> Result<Decimal, DecimalError> {
    let negative = packed >> 63 != 0;
    let scale = (packed >> COEFF_BITS & 0x1F) as u32;
    let coeff = packed & COEFF_MASK;

    if scale > MAX_SCALE {
        return Err(DecimalError::MalformedPacked {
            packed,
            reason: "scale exceeds the representable maximum",
        });
    }
    if coeff == 0 && packed != 0 {
        return Err(DecimalError::MalformedPacked {
            packed,
            reason: "non-canonical zero",
        });
    }

    let mantissa = if negative {
        -(coeff as i128)
    } else {
        coeff as i128
    };
    Ok(Decimal::from_i128_with_scale(mantissa, scale))
}

/// Fused multiply-add: `a * b + c`, exact.
pub fn fma(a: Decimal, b: Decimal, c: Decimal) -> Decimal {
    a * b + c
}

/// `a` raised to the decimal power `b`.
pub fn pow(a: Decimal, b: Decimal) -> Decimal {
    a.powd(b)
}

/// `1 + val`.
pub fn dec_1p(val: Decimal) -> Decimal {
    Decimal::ONE + val
}

/// `1 - val`.
pub fn dec_1m(val: Decimal) -> Decimal {
    Decimal::ONE - val
}

/// `1 / (1 + val)`.
pub fn dec_inv_1p(val: Decimal) -> Decimal {
    Decimal::ONE / dec_1p(val)
}

pub fn abs(val: Decimal) -> Decimal {
    val.abs()
}

/// Floating-point approximation for public JSON output.
pub fn decimal_to_f64(val: Decimal) -> f64 {
    val.to_f64().unwrap_or(f64::NAN)
}

/// Converts a float into the exact-decimal domain, truncated to
/// `decimal_places` fractional digits.
pub fn f64_to_decimal(val: f64, decimal_places: u32) -> Result<Decimal, DecimalError> {
    Decimal::from_f64(val)
        .map(|d| round_to(d, decimal_places))
        .ok_or(DecimalError::Unrepresentable(val))
}
