//! Wire frames: a tagged sum type decoded once at the transport boundary,
//! replacing dynamically duck-typed dicts with a closed, checked type.
//! The reference aggregator built these as ad hoc dicts keyed by a `"t"`
//! string; here the tag lives in the Rust type system and `serde`'s
//! internally-tagged representation reproduces the same on-wire shape
//! (`{"t": "TASK", ...}`).

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `agg -> worker`: one coded task for worker `tid` in cycle `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFrame {
    pub seq: u64,
    pub tid: u32,
    /// Coefficient vector `c` (length `R`), small positive integers.
    pub c: Vec<u32>,
    /// Current state `x`, Q1.31 fixed-point.
    pub x: Vec<i32>,
    /// Sender timestamp, nanoseconds since the Unix epoch.
    pub ts: u64,
    /// Coded row block `M = sum_i c_i * A_i`, Q1.31 fixed-point,
    /// `ceil(n/R) x n`. Always present on tasks the aggregator sends;
    /// modeled as optional so a decode never rejects a frame missing it.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub m: Option<Vec<Vec<i32>>>,
}

/// `worker -> agg`: the worker's computed row-block result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFrame {
    pub seq: u64,
    pub tid: u32,
    /// Identifies the responding worker (usually its bound port).
    pub w: u32,
    /// Computed row-block result, Q1.31 fixed-point.
    pub y: Vec<i32>,
    /// Echoes the coefficient vector that produced the coded matrix.
    pub c: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ts: Option<u64>,
}

/// `operator -> agg`: a signed approval for cycle `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitFrame {
    pub seq: u64,
    /// Raw 64-byte Ed25519 signature.
    #[serde(with = "serde_bytes")]
    pub sig: Vec<u8>,
    /// Hex-encoded (64 hex chars) Ed25519 public key.
    pub pk: String,
}

/// The self-describing union of recognized wire frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Frame {
    #[serde(rename = "TASK")]
    Task(TaskFrame),
    #[serde(rename = "RES")]
    Result(ResultFrame),
    #[serde(rename = "COMMIT")]
    Commit(CommitFrame),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("cbor encode error: {0}")]
    Encode(String),
    #[error("cbor decode error: {0}")]
    Decode(String),
    #[error("malformed field {field}: {reason}")]
    Field { field: &'static str, reason: &'static str },
}

impl CommitFrame {
    /// Field-validate a decoded COMMIT frame (64-byte sig, 64-hex-char pk),
    /// producing a typed error instead of failing later inside the PoA gate.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.sig.len() != 64 {
            return Err(FrameError::Field { field: "sig", reason: "must be exactly 64 bytes" });
        }
        if self.pk.len() != 64 || !self.pk.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(FrameError::Field { field: "pk", reason: "must be 64 hex characters" });
        }
        Ok(())
    }
}

/// Encode a frame to its CBOR wire representation (one frame per datagram).
pub fn encode(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    cbor4ii::serde::to_vec(Vec::new(), frame).map_err(|e| FrameError::Encode(e.to_string()))
}

/// Decode a single CBOR frame from a received datagram.
///
/// Unknown tags and structurally invalid maps both surface as
/// `FrameError::Decode` — the caller (transport layer) logs and drops the
/// datagram rather than propagating the error further.
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    cbor4ii::serde::from_slice(bytes).map_err(|e| FrameError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_frame_round_trips_through_cbor() {
        let frame = Frame::Task(TaskFrame {
            seq: 3,
            tid: 1,
            c: vec![5, 7],
            x: vec![10, -10, 0],
            ts: 123456789,
            m: Some(vec![vec![1, 2, 3], vec![4, 5, 6]]),
        });
        let bytes = encode(&frame).unwrap();
        let decoded = decode(&bytes).unwrap();
        match decoded {
            Frame::Task(t) => {
                assert_eq!(t.seq, 3);
                assert_eq!(t.tid, 1);
                assert_eq!(t.c, vec![5, 7]);
            }
            _ => panic!("expected Task frame"),
        }
    }

    #[test]
    fn result_frame_round_trips_without_optional_ts() {
        let frame = Frame::Result(ResultFrame {
            seq: 1,
            tid: 0,
            w: 6000,
            y: vec![1, 2, 3],
            c: vec![9],
            ts: None,
        });
        let bytes = encode(&frame).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert!(matches!(decoded, Frame::Result(_)));
    }

    #[test]
    fn commit_frame_validate_rejects_short_signature() {
        let c = CommitFrame { seq: 1, sig: vec![0u8; 10], pk: "a".repeat(64) };
        assert!(c.validate().is_err());
    }

    #[test]
    fn commit_frame_validate_rejects_non_hex_pk() {
        let c = CommitFrame { seq: 1, sig: vec![0u8; 64], pk: "zz".repeat(32) };
        assert!(c.validate().is_err());
    }

    #[test]
    fn commit_frame_validate_accepts_well_formed_fields() {
        let c = CommitFrame { seq: 1, sig: vec![0u8; 64], pk: "ab".repeat(32) };
        assert!(c.validate().is_ok());
    }

    #[test]
    fn decode_rejects_garbage_bytes() {
        assert!(decode(&[0xff, 0x00, 0x01]).is_err());
    }
}
