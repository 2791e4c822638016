//! Q1.31 fixed-point kernel.
//!
//! A signed 32-bit integer representing a rational in `[-1, 1 - 2^-31]`.
//! All arithmetic here saturates at the `i32` bounds instead of wrapping or
//! panicking, so the kernel has no failure mode: every input produces a
//! defined output. Conversions use at least 64-bit intermediates to avoid
//! overflow during the scale/round step.

#![forbid(unsafe_code)]

/// Number of fractional bits in the Q1.31 representation.
pub const Q_BITS: u32 = 31;

/// Largest representable Q1.31 value (as a raw `i32`).
pub const MAX_INT: i32 = i32::MAX;
/// Smallest representable Q1.31 value (as a raw `i32`).
pub const MIN_INT: i32 = i32::MIN;

/// Convert a float in `[-1, 1)` (approximately) to Q1.31, saturating at the
/// representable bounds. Rounds to nearest, ties away from zero.
pub fn to_fixed(v: f64) -> i32 {
    let scaled = v * (1i64 << Q_BITS) as f64;
    let rounded = scaled.round();
    if rounded >= MAX_INT as f64 {
        MAX_INT
    } else if rounded <= MIN_INT as f64 {
        MIN_INT
    } else {
        rounded as i32
    }
}

/// Convert a Q1.31 value back to its float representation.
pub fn from_fixed(q: i32) -> f64 {
    q as f64 / (1i64 << Q_BITS) as f64
}

/// Saturating fixed-point multiply: `(a * b) >> 31`, clamped to `[MIN_INT, MAX_INT]`.
///
/// Uses an `i64` intermediate so the product of two `i32` values never
/// overflows before the shift.
pub fn mul_sat(a: i32, b: i32) -> i32 {
    let prod = (a as i64) * (b as i64);
    let shifted = prod >> Q_BITS;
    clamp_i64(shifted)
}

/// Saturating fixed-point add: clamps the true sum to `[MIN_INT, MAX_INT]`.
pub fn add_sat(a: i32, b: i32) -> i32 {
    clamp_i64(a as i64 + b as i64)
}

/// Saturate an arbitrary `i64` (e.g. a decoded real-valued result rounded to
/// the nearest integer) into the Q1.31 raw-integer range.
pub fn saturate_i64(v: i64) -> i32 {
    clamp_i64(v)
}

#[inline]
fn clamp_i64(v: i64) -> i32 {
    if v > MAX_INT as i64 {
        MAX_INT
    } else if v < MIN_INT as i64 {
        MIN_INT
    } else {
        v as i32
    }
}

/// Dense fixed-point matrix-vector product: `M_fixed * v_fixed`.
///
/// Reduction order is row-major, column-ascending — normative, because
/// saturation is not associative and a different accumulation order can
/// produce a different clamped result on pathological inputs.
///
/// # Panics
/// Panics if any row of `m` has a different length than `v`. This is a
/// programmer error (shape mismatch), not a runtime data condition.
pub fn matvec(m: &[Vec<i32>], v: &[i32]) -> Vec<i32> {
    m.iter()
        .map(|row| {
            assert_eq!(row.len(), v.len(), "matvec: row/vector length mismatch");
            row.iter()
                .zip(v.iter())
                .fold(0i32, |acc, (&a, &b)| add_sat(acc, mul_sat(a, b)))
        })
        .collect()
}
