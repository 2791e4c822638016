//! Matrix data loader: the `{A, B, x0, u, scale_bits}` document read once at
//! startup, grounded in `original_source/aggregator/main_runner.py`'s JSON
//! load path.

#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::fixed_point::to_fixed;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("reading matrix data file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("parsing matrix data file {path}: {source}")]
    Parse { path: String, #[source] source: serde_json::Error },
    #[error("unsupported scale_bits {got} (only 31 is supported)")]
    ScaleBits { got: u32 },
    #[error("A is not square: {rows} rows, {cols} expected")]
    NotSquare { rows: usize, cols: usize },
    #[error("B has {rows} rows, expected n={n}")]
    BadBRows { rows: usize, n: usize },
    #[error("B row {row} has {cols} columns, expected m={m}")]
    BadBCols { row: usize, cols: usize, m: usize },
    #[error("x0 has length {got}, expected n={n}")]
    BadX0Len { got: usize, n: usize },
    #[error("u has length {got}, expected m={m}")]
    BadULen { got: usize, m: usize },
    #[error("A is empty")]
    EmptyA,
}

#[derive(Debug, Deserialize)]
struct RawMatrixData {
    #[serde(rename = "A")]
    a: Vec<Vec<f64>>,
    #[serde(rename = "B")]
    b: Vec<Vec<f64>>,
    x0: Vec<f64>,
    u: Vec<f64>,
    scale_bits: u32,
}

/// Owned, validated system data: `A` stays `f64` for the coder's internal
/// algebra, `B`/`x0`/`u` are converted to Q1.31 once at load time.
#[derive(Debug, Clone)]
pub struct MatrixData {
    pub a: Vec<Vec<f64>>,
    pub b_fixed: Vec<Vec<i32>>,
    pub x0_fixed: Vec<i32>,
    pub u_fixed: Vec<i32>,
    pub n: usize,
    pub m: usize,
}

impl MatrixData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MatrixError> {
        let path_ref = path.as_ref();
        let text = fs::read_to_string(path_ref)
            .map_err(|e| MatrixError::Io { path: path_ref.display().to_string(), source: e })?;
        let raw: RawMatrixData = serde_json::from_str(&text)
            .map_err(|e| MatrixError::Parse { path: path_ref.display().to_string(), source: e })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawMatrixData) -> Result<Self, MatrixError> {
        if raw.scale_bits != 31 {
            return Err(MatrixError::ScaleBits { got: raw.scale_bits });
        }
        if raw.a.is_empty() {
            return Err(MatrixError::EmptyA);
        }
        let n = raw.a.len();
        for row in &raw.a {
            if row.len() != n {
                return Err(MatrixError::NotSquare { rows: n, cols: row.len() });
            }
        }
        if raw.b.len() != n {
            return Err(MatrixError::BadBRows { rows: raw.b.len(), n });
        }
        let m = raw.b.first().map(|row| row.len()).unwrap_or(0);
        for (i, row) in raw.b.iter().enumerate() {
            if row.len() != m {
                return Err(MatrixError::BadBCols { row: i, cols: row.len(), m });
            }
        }
        if raw.x0.len() != n {
            return Err(MatrixError::BadX0Len { got: raw.x0.len(), n });
        }
        if raw.u.len() != m {
            return Err(MatrixError::BadULen { got: raw.u.len(), m });
        }

        let b_fixed = raw.b.iter().map(|row| row.iter().map(|&v| to_fixed(v)).collect()).collect();
        let x0_fixed = raw.x0.iter().map(|&v| to_fixed(v)).collect();
        let u_fixed = raw.u.iter().map(|&v| to_fixed(v)).collect();

        Ok(Self { a: raw.a, b_fixed, x0_fixed, u_fixed, n, m })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_doc(json: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("matrix-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("matrix-{}.json", rand_suffix()));
        std::fs::write(&path, json).unwrap();
        path
    }

    fn rand_suffix() -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut h = DefaultHasher::new();
        std::thread::current().id().hash(&mut h);
        h.finish()
    }

    #[test]
    fn loads_valid_document() {
        let path = write_doc(
            r#"{"A":[[1,0],[0,1]],"B":[[1],[0]],"x0":[0.5,-0.5],"u":[0.1],"scale_bits":31}"#,
        );
        let data = MatrixData::load(&path).unwrap();
        assert_eq!(data.n, 2);
        assert_eq!(data.m, 1);
        assert_eq!(data.x0_fixed.len(), 2);
    }

    #[test]
    fn rejects_wrong_scale_bits() {
        let path = write_doc(
            r#"{"A":[[1]],"B":[[1]],"x0":[0.1],"u":[0.1],"scale_bits":16}"#,
        );
        let err = MatrixData::load(&path).unwrap_err();
        assert!(matches!(err, MatrixError::ScaleBits { got: 16 }));
    }

    #[test]
    fn rejects_non_square_a() {
        let path = write_doc(
            r#"{"A":[[1,2,3],[4,5,6]],"B":[[1],[0]],"x0":[0.1,0.2],"u":[0.1],"scale_bits":31}"#,
        );
        let err = MatrixData::load(&path).unwrap_err();
        assert!(matches!(err, MatrixError::NotSquare { .. }));
    }

    #[test]
    fn rejects_mismatched_x0_length() {
        let path = write_doc(
            r#"{"A":[[1,0],[0,1]],"B":[[1],[0]],"x0":[0.1],"u":[0.1],"scale_bits":31}"#,
        );
        let err = MatrixData::load(&path).unwrap_err();
        assert!(matches!(err, MatrixError::BadX0Len { .. }));
    }
}
