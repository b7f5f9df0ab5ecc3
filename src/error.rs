//! Error types shared across the crate.
//!
//! Device interaction in the field is best-effort: most callers log an
//! `InstrumentError` and carry on. The variants still say *what* went wrong
//! so a caller can decide between warning, retrying and giving up.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures while talking to the analyzer.
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// The link could not be opened at all.
    #[error("no response from {resource}: {reason}")]
    Unreachable { resource: String, reason: String },

    /// A query was sent but no answer arrived in time.
    #[error("timed out after {timeout:?} waiting for a response to `{command}`")]
    Timeout { command: String, timeout: Duration },

    /// The analyzer answered, but not with something we could use.
    #[error("unexpected response to `{command}`: {response:?}")]
    UnexpectedResponse { command: String, response: String },

    /// The analyzer is not in a mode that supports the request, e.g. GPS
    /// queries outside the TV/Radio analyzer.
    #[error("{0}")]
    Unsupported(String),

    /// The operator chose to continue without a connection.
    #[error("not connected to the analyzer")]
    NotConnected,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serial(#[from] serialport::Error),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl InstrumentError {
    /// True when the failure is a missing answer rather than a broken link.
    pub fn is_timeout(&self) -> bool {
        matches!(self, InstrumentError::Timeout { .. })
    }
}

/// Instrument address strings that could not be understood.
#[derive(Debug, Error, PartialEq)]
pub enum ResourceError {
    #[error("empty instrument address")]
    Empty,
    #[error("unsupported instrument address `{0}`")]
    Unsupported(String),
    #[error("invalid port `{0}` in instrument address")]
    InvalidPort(String),
}

/// INI store failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Checklist workbook failures.
#[derive(Debug, Error)]
pub enum ChecklistError {
    #[error("could not open workbook {path}: {reason}")]
    Template { path: PathBuf, reason: String },

    #[error("workbook has no worksheet")]
    NoWorksheet,

    #[error("could not save workbook {path}: {reason}")]
    Save { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Host clock check failures.
#[derive(Debug, Error)]
pub enum TimeSyncError {
    #[error("no answer from time server {server} after {attempts} attempts: {reason}")]
    NoAnswer {
        server: String,
        attempts: u32,
        reason: String,
    },
}
