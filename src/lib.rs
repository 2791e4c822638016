//! Crate root: the library surface behind the `aggregator` binary and its
//! collaborator tools.
//!
//! Centralizes the Q1.31 fixed-point kernel, the rateless coder, the PoA
//! gate, the wire codec, and the cycle engine that orchestrates them. The
//! binaries under `src/bin/` are thin wrappers over this surface; none of
//! them reach past it into private engine state.

#![forbid(unsafe_code)]

/// Q1.31 fixed-point conversions and saturating arithmetic.
pub mod fixed_point;
/// Rateless coder: row-chunking, coded task generation, linear decode.
pub mod coding;
/// Proof-of-Authority gate: Ed25519 verification against an authorized-key set.
pub mod poa;
/// Tagged wire frames and their CBOR codec.
pub mod frames;
/// UDP transport binding and the worker address table.
pub mod transport;
/// Cycle engine: the propose/commit state machine.
pub mod engine;
/// YAML configuration loader.
pub mod config;
/// System matrix/vector data loader.
pub mod matrix;
/// Append-only CSV metrics writer.
pub mod metrics;
/// Process-fatal startup error taxonomy.
pub mod error;
