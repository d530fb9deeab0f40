//! motiond - lightweight motion detection.
//!
//! Ingests a continuous stream of camera frames, classifies motion per
//! frame by pixel difference, groups motion into discrete padded events,
//! and persists events to a space-bounded capture store.
//!
//! # Architecture
//!
//! The core is a strictly sequential pipeline:
//!
//! ```text
//! FrameSource -> MotionDetector -> EventWindower -> sinks
//! ```
//!
//! - `ingest`: frame sources (HTTP multipart cameras, local devices) that
//!   hide reconnect and skip undecodable chunks
//! - `detect`: pure pixel-difference classification of consecutive frames
//! - `window`: the three-state machine turning motion flags into events
//!   with before/after padding
//! - `store`: directory-per-event capture storage with oldest-first
//!   eviction against a free-space reservation
//! - `sink`: isolated consumers (persistence, live MJPEG stream) behind
//!   bounded queues
//! - `pipeline`: the loop tying it together, with cooperative shutdown
//!
//! Frames are immutable once produced; every consumer works on its own
//! logical copy. All fallible behavior lives in I/O and is reported through
//! the named errors in `error`.

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod sink;
pub mod store;
pub mod window;

pub use config::{CameraSettings, MotiondConfig, StorageSettings, StreamSettings};
pub use detect::MotionDetector;
pub use error::{ConfigError, SourceError, StorageError};
pub use frame::{Frame, Geometry};
pub use ingest::{
    ConnectMode, DeviceConfig, DeviceFrameSource, FrameSource, HttpConfig, HttpFrameSource,
    SourceStats,
};
pub use pipeline::{CancelToken, Pipeline};
pub use sink::{
    spawn_record_sink, spawn_stream_sink, OverflowPolicy, SinkHandle, SinkSender, StreamSinkConfig,
};
pub use store::{CaptureRecord, CaptureStore, FixedProbe, SpaceProbe, StatvfsProbe};
pub use window::{Event, EventWindower};
