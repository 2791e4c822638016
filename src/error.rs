//! Crate-wide error taxonomy: a small closed set of process-fatal startup
//! conditions.
//!
//! Transient and security failures never surface as `Err` past the engine
//! boundary — they are logged and the cycle continues. Only cycle-fatal
//! outcomes (`CycleOutcome::Aborted`, see `engine.rs`) and process-fatal
//! startup errors are typed `Result`s.

use thiserror::Error;

/// Process-fatal startup conditions: socket bind failure, unreadable
/// matrix/config data, or a zero-key authorized-key set.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("matrix data error: {0}")]
    Matrix(#[from] crate::matrix::MatrixError),
    #[error("authorized-key set error: {0}")]
    Poa(#[from] crate::poa::PoaLoadError),
    #[error("metrics writer error: {0}")]
    Metrics(#[from] crate::metrics::MetricsError),
    #[error("binding UDP socket on {addr}: {source}")]
    Bind { addr: String, #[source] source: std::io::Error },
}
