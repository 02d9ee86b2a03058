//! Error types for the flow and community pipeline.

use thiserror::Error;

use crate::flow::StationId;

/// Errors raised by the library stages.
#[derive(Error, Debug)]
pub enum Error {
    /// A station field could not be read as a non-negative integer.
    #[error("line {line}: column {column} is not a station id: {value:?}")]
    Parse {
        line: u64,
        column: usize,
        value: String,
    },

    /// A flow pair references a station that was never registered as a vertex.
    #[error("pair ({first}, {second}) references a station missing from the vertex set")]
    Lookup { first: StationId, second: StationId },

    /// Membership labels do not line up with the vertex set.
    #[error("{labels} community labels for {vertices} stations")]
    Mismatch { vertices: usize, labels: usize },

    /// A checkout date could not be parsed.
    #[error("line {line}: unrecognised date {value:?}")]
    Date { line: u64, value: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
