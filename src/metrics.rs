//! Metrics writer: one append-only CSV row per completed or aborted
//! cycle, grounded in `original_source/aggregator/metrics.py`'s
//! `csv.writer` pattern and widened with an `outcome` column since the
//! Python reference only logged successful cycles.

#![forbid(unsafe_code)]

use std::fs::OpenOptions;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("opening metrics file {path}: {source}")]
    Open { path: String, #[source] source: std::io::Error },
    #[error("writing metrics row: {0}")]
    Write(#[from] csv::Error),
}

/// The recorded outcome of one cycle, serialized as the CSV `outcome` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcomeTag {
    Committed,
    AbortedDeadline,
    AbortedDecode,
}

impl CycleOutcomeTag {
    fn as_str(self) -> &'static str {
        match self {
            CycleOutcomeTag::Committed => "committed",
            CycleOutcomeTag::AbortedDeadline => "aborted_deadline",
            CycleOutcomeTag::AbortedDecode => "aborted_decode",
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct Row {
    seq: u64,
    outcome: &'static str,
    t_cycle_ms: u64,
    result_count: usize,
}

/// Append-only CSV metrics sink, one row written per cycle.
pub struct MetricsWriter {
    path: String,
}

impl MetricsWriter {
    /// Create a writer targeting `path`; the header is written once if the
    /// file does not already exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, MetricsError> {
        let path_ref = path.as_ref();
        let needs_header = !path_ref.exists();
        if needs_header {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path_ref)
                .map_err(|e| MetricsError::Open { path: path_ref.display().to_string(), source: e })?;
            let mut wtr = csv::Writer::from_writer(file);
            wtr.write_record(["seq", "outcome", "t_cycle_ms", "result_count"])?;
            wtr.flush().map_err(|e| MetricsError::Open { path: path_ref.display().to_string(), source: e })?;
        }
        Ok(Self { path: path_ref.display().to_string() })
    }

    /// Append one row for `seq`.
    pub fn record(
        &self,
        seq: u64,
        outcome: CycleOutcomeTag,
        t_cycle_ms: u64,
        result_count: usize,
    ) -> Result<(), MetricsError> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| MetricsError::Open { path: self.path.clone(), source: e })?;
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        wtr.serialize(Row { seq, outcome: outcome.as_str(), t_cycle_ms, result_count })?;
        wtr.flush().map_err(|e| MetricsError::Open { path: self.path.clone(), source: e })?;
        Ok(())
    }
}
