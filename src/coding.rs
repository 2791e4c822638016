//! Rateless coder: row-chunking of `A`, coded task generation, and
//! linear decode of `A·x` from any `R` linearly independent responses.
//!
//! Chunking and decode mirror `original_source/aggregator/coding.py`
//! exactly: chunks retain `f64` precision internally (only the coded task
//! payload handed to workers is quantized to Q1.31), coefficients are drawn
//! uniformly from `[1, 254]`, and decode solves the dense `R x R` linear
//! system `C * D = Y` with partial-pivot Gaussian elimination — the same
//! algebra `numpy.linalg.solve` performs under the hood.

#![forbid(unsafe_code)]

use rand::Rng;
use thiserror::Error;

use crate::fixed_point::to_fixed;

/// A chunked, coded view over the system matrix `A`.
///
/// `R` equal row-chunks of shape `ceil(n/R) x n`; the last chunk is
/// zero-padded if `n` is not a multiple of `R`.
#[derive(Debug, Clone)]
pub struct RatelessCoder {
    r: usize,
    rows: usize,
    cols: usize,
    chunk_rows: usize,
    /// `chunks[i]` is the `chunk_rows x cols` block `A_i`.
    chunks: Vec<Vec<Vec<f64>>>,
}

/// One generated coded task: the coefficient vector and the quantized coded
/// row block `M = sum_i c_i * A_i`.
#[derive(Debug, Clone)]
pub struct CodedTask {
    pub coeffs: Vec<u32>,
    pub coded_block: Vec<Vec<i32>>,
}

/// A single worker's response to a coded task: the echoed coefficient
/// vector and the computed row-block result (fixed-point).
#[derive(Debug, Clone)]
pub struct CodedResult {
    pub coeffs: Vec<u32>,
    pub values: Vec<i32>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("fewer than R responses available ({have} < {need})")]
    InsufficientResponses { have: usize, need: usize },
    #[error("coefficient matrix is singular (rank-deficient response set)")]
    Singular,
}

impl RatelessCoder {
    /// Build the coder's row-chunk view over `a` (an `n x n` dense matrix in
    /// row-major order) for a decoding threshold of `r`.
    ///
    /// # Panics
    /// Panics if `r == 0`, `a` is empty, or `a` is not rectangular — these
    /// are configuration errors caught at startup, not runtime conditions.
    pub fn new(a: &[Vec<f64>], r: usize) -> Self {
        assert!(r >= 1, "RatelessCoder: R must be >= 1");
        let rows = a.len();
        assert!(rows > 0, "RatelessCoder: A must have at least one row");
        let cols = a[0].len();
        assert!(a.iter().all(|row| row.len() == cols), "RatelessCoder: A must be rectangular");

        let chunk_rows = rows.div_ceil(r);
        let mut chunks = Vec::with_capacity(r);
        for i in 0..r {
            let start = i * chunk_rows;
            let end = (start + chunk_rows).min(rows);
            let mut chunk = vec![vec![0.0f64; cols]; chunk_rows];
            if start < rows {
                for (dst, src) in chunk.iter_mut().zip(a[start..end].iter()) {
                    dst.copy_from_slice(src);
                }
            }
            chunks.push(chunk);
        }

        Self { r, rows, cols, chunk_rows, chunks }
    }

    /// Number of (zero-padded) rows in `A`, i.e. `R * chunk_rows`.
    pub fn padded_rows(&self) -> usize {
        self.r * self.chunk_rows
    }

    /// Original row count of `A` before zero-padding.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Draw a fresh coded task: `R` coefficients uniform in `[1, 254]` and
    /// the resulting coded row block, quantized to Q1.31.
    ///
    /// Distinct calls SHOULD draw independent coefficient vectors; this
    /// method always does, using the caller-supplied RNG so tests can make
    /// the schedule reproducible.
    pub fn generate_task(&self, rng: &mut impl Rng) -> CodedTask {
        let coeffs: Vec<u32> = (0..self.r).map(|_| rng.gen_range(1..=254u32)).collect();

        let mut block = vec![vec![0.0f64; self.cols]; self.chunk_rows];
        for (c, chunk) in coeffs.iter().zip(self.chunks.iter()) {
            let c = *c as f64;
            for (dst_row, src_row) in block.iter_mut().zip(chunk.iter()) {
                for (dst, src) in dst_row.iter_mut().zip(src_row.iter()) {
                    *dst += c * src;
                }
            }
        }

        let coded_block: Vec<Vec<i32>> =
            block.iter().map(|row| row.iter().map(|&v| to_fixed(v)).collect()).collect();

        CodedTask { coeffs, coded_block }
    }

    /// Decode `A·x` (truncated to the original `n` rows) from at least `R`
    /// `(coeffs, values)` pairs, taking the first `R` in arrival order.
    ///
    /// Solves `C * D = Y` for `D` via partial-pivot Gaussian elimination,
    /// rounds each element half-away-from-zero, and returns the first
    /// `self.rows()` elements (dropping the zero-padding tail).
    pub fn decode(&self, responses: &[CodedResult]) -> Result<Vec<i64>, DecodeError> {
        if responses.len() < self.r {
            return Err(DecodeError::InsufficientResponses { have: responses.len(), need: self.r });
        }
        let subset = &responses[..self.r];

        // C: R x R coefficient matrix; Y: R x chunk_cols result matrix.
        let mut c: Vec<Vec<f64>> =
            subset.iter().map(|res| res.coeffs.iter().map(|&v| v as f64).collect()).collect();
        let mut y: Vec<Vec<f64>> =
            subset.iter().map(|res| res.values.iter().map(|&v| v as f64).collect()).collect();

        let d = gaussian_solve(&mut c, &mut y)?;

        let mut flat = Vec::with_capacity(self.padded_rows());
        for row in &d {
            for &v in row {
                flat.push(round_half_away_from_zero(v));
            }
        }
        flat.truncate(self.rows);
        Ok(flat)
    }
}

/// Round to the nearest integer, ties away from zero. `f64::round` already
/// implements half-away-from-zero in Rust; this wrapper exists purely to
/// name the invariant at call sites.
fn round_half_away_from_zero(v: f64) -> i64 {
    v.round() as i64
}

/// Solve `c * d = y` for `d` via Gaussian elimination with partial pivoting.
///
/// `c` is `R x R`, `y` is `R x k`; both are consumed (elimination is done
/// in place on copies the caller owns). Returns `DecodeError::Singular` if
/// no usable pivot is found in some column (rank-deficient `c`).
fn gaussian_solve(c: &mut [Vec<f64>], y: &mut [Vec<f64>]) -> Result<Vec<Vec<f64>>, DecodeError> {
    let n = c.len();
    const EPS: f64 = 1e-9;

    for col in 0..n {
        // Partial pivot: find the row with the largest magnitude in this column.
        let mut pivot_row = col;
        let mut pivot_val = c[col][col].abs();
        for row in (col + 1)..n {
            let v = c[row][col].abs();
            if v > pivot_val {
                pivot_val = v;
                pivot_row = row;
            }
        }
        if pivot_val < EPS {
            return Err(DecodeError::Singular);
        }
        if pivot_row != col {
            c.swap(col, pivot_row);
            y.swap(col, pivot_row);
        }

        let pivot = c[col][col];
        for k in col..n {
            c[col][k] /= pivot;
        }
        for k in 0..y[col].len() {
            y[col][k] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = c[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                c[row][k] -= factor * c[col][k];
            }
            for k in 0..y[row].len() {
                y[row][k] -= factor * y[col][k];
            }
        }
    }

    Ok(y.to_vec())
}
