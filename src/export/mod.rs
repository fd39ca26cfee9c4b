//! Tabular export of device streams.
//!
//! Automatic exports are handed to a background writer thread so that disk
//! latency never stalls ingestion. Manual exports are written directly by
//! the caller that asked for them.

pub mod csv;
pub mod writer;

use serde::{Deserialize, Serialize};

pub use self::csv::{auto_export_filename, write_file, ExportRow, HEADERS};
pub use writer::{ExportDispatcher, ExportOutcome, ExportQueue};

/// Default file name for manual exports.
pub const DEFAULT_MANUAL_EXPORT_NAME: &str = "sensor_data.csv";

/// Which samples a manual export writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportScope {
    /// Every sample received for the device
    #[default]
    FullSequence,
    /// Only the current recent window
    RecentWindow,
}

/// Export errors.
#[derive(Debug)]
pub enum ExportError {
    /// File could not be created or written
    Io(String),
    /// CSV encoding failed
    Csv(String),
    /// The background writer is no longer running
    Unavailable,
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Io(e) => write!(f, "Export IO error: {e}"),
            ExportError::Csv(e) => write!(f, "Export CSV error: {e}"),
            ExportError::Unavailable => write!(f, "Export writer is not running"),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        ExportError::Io(e.to_string())
    }
}

impl From<::csv::Error> for ExportError {
    fn from(e: ::csv::Error) -> Self {
        ExportError::Csv(e.to_string())
    }
}
