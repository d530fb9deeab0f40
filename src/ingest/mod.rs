//! Frame ingestion sources.
//!
//! Two sources produce decoded frames for the pipeline:
//! - HTTP multipart streams (network cameras)
//! - local capture devices (feature: ingest-v4l2, with a synthetic
//!   `stub://` backend always available for tests and demos)
//!
//! The ingestion layer is responsible for:
//! - Hiding reconnect: transport loss is retried indefinitely by default,
//!   with the cancel token checked between attempts
//! - Skipping undecodable chunks without ending the stream
//! - Pinning frame geometry to the first decoded frame; a mid-stream
//!   geometry change is fatal and never reconciled
//! - Assigning strictly increasing sequence numbers
//!
//! `next_frame` never hands out an invalid frame: it returns a decoded
//! frame, blocks while reconnecting, or fails with a named error.

pub mod device;
pub mod http;

pub use device::{DeviceConfig, DeviceFrameSource};
pub use http::{HttpConfig, HttpFrameSource};

use crate::error::SourceError;
use crate::frame::Frame;
use crate::pipeline::CancelToken;

/// How `connect` treats a failed attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectMode {
    /// Retry indefinitely, checking the cancel token between attempts.
    #[default]
    Retry,
    /// Surface the first failure. Used for an eager initial connection.
    FailFast,
}

/// Running counters per source.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceStats {
    pub frames_produced: u64,
    /// Complete chunks discarded because they would not decode.
    pub frames_skipped: u64,
    pub reconnects: u64,
}

/// A camera frame source. Dispatch is by variant, not inheritance: the two
/// sources share a capability surface, nothing else.
pub enum FrameSource {
    Http(HttpFrameSource),
    Device(DeviceFrameSource),
}

impl FrameSource {
    pub fn connect(&mut self, mode: ConnectMode, cancel: &CancelToken) -> Result<(), SourceError> {
        match self {
            FrameSource::Http(source) => source.connect(mode, cancel),
            FrameSource::Device(source) => source.connect(mode, cancel),
        }
    }

    pub fn next_frame(&mut self, cancel: &CancelToken) -> Result<Frame, SourceError> {
        match self {
            FrameSource::Http(source) => source.next_frame(cancel),
            FrameSource::Device(source) => source.next_frame(cancel),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match self {
            FrameSource::Http(source) => source.stats(),
            FrameSource::Device(source) => source.stats(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FrameSource::Http(source) => source.describe(),
            FrameSource::Device(source) => source.describe(),
        }
    }
}

/// Delay between reconnect attempts.
pub(crate) const RECONNECT_DELAY_MS: u64 = 500;
