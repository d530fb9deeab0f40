//! Error conditions for the capture pipeline.
//!
//! All fallible behavior lives in I/O (sources, the capture store) and in
//! configuration loading. Classification and windowing are pure over valid
//! inputs and have no error surface of their own.
//!
//! Two conditions are deliberately absorbed rather than surfaced, to keep the
//! stream alive: undecodable chunks (skipped, counted in source stats) and
//! transport loss (retried by the reconnect loop). Everything else is
//! reported to the caller as a named variant below.

use std::path::PathBuf;

use thiserror::Error;

use crate::frame::Geometry;

/// Errors produced by frame sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport or device failure. Sources retry this internally; it only
    /// surfaces from a `ConnectMode::FailFast` connect.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A complete chunk that could not be decoded into a frame. Never
    /// surfaces from `next_frame`; the chunk is skipped and counted.
    #[error("frame chunk could not be decoded: {0}")]
    Decode(#[source] image::ImageError),

    /// More than one capture device was found and none was pinned.
    #[error("multiple capture devices found (indices {candidates:?}); pin one explicitly")]
    AmbiguousDevice { candidates: Vec<usize> },

    /// The stream changed geometry after the first frame. Fatal; never
    /// reconciled.
    #[error("frame geometry changed mid-stream: expected {expected}, got {actual}")]
    GeometryMismatch { expected: Geometry, actual: Geometry },

    /// `next_frame` was called before `connect`.
    #[error("source is not connected; call connect() first")]
    NotConnected,

    /// Shutdown was observed inside a connect or read loop. A clean stop,
    /// not a failure.
    #[error("shutdown requested")]
    Cancelled,
}

/// Errors produced by the capture store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create capture store root {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create capture record {path}: {source}")]
    CreateRecord {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode frame for {path}: {source}")]
    EncodeFrame {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write frame {path}: {source}")]
    WriteFrame {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to evict capture record {path}: {source}")]
    Evict {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to list capture store {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read capture record {path}: {source}")]
    ReadRecord {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode stored frame {path}: {source}")]
    DecodeFrame {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to probe free space at {path}: {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration rejection. Out-of-range values are errors, never clamped.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("{0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Range check shared by the detector constructor and config validation.
pub(crate) fn validate_fraction(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfRange { name, value });
    }
    Ok(())
}
