//! Local capture device frame source.
//!
//! Real devices are driven through v4l (feature `ingest-v4l2`). A
//! deterministic synthetic backend handles `stub://` specs and is always
//! compiled; tests and the demo run on it without hardware.
//!
//! Device selection: an explicitly pinned index is always honored. With no
//! pin, exactly one connected device is auto-selected; more than one is an
//! `AmbiguousDevice` error listing the candidates — the source never
//! guesses. A read failure is treated as connection loss: the capture
//! handle is reopened, re-resolving the index when none was pinned.

use std::time::Duration;

use crate::error::{ConfigError, SourceError};
use crate::frame::{Frame, Geometry, CHANNELS};
use crate::ingest::{ConnectMode, SourceStats, RECONNECT_DELAY_MS};
use crate::pipeline::CancelToken;

/// Highest device index probed during auto-selection.
#[cfg(feature = "ingest-v4l2")]
const MAX_DEVICE_INDEX: usize = 10;

/// Configuration for a local capture device.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Device spec: an index ("0"), "auto" for auto-selection, or
    /// "stub://<name>[:<period>]" for the synthetic backend.
    pub device: String,
    /// Preferred frame width (synthetic frames use this directly).
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: "auto".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Local device frame source.
pub struct DeviceFrameSource {
    backend: DeviceBackend,
    geometry: Option<Geometry>,
    next_seq: u64,
    stats: SourceStats,
}

enum DeviceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(V4l2Device),
}

impl DeviceFrameSource {
    pub fn new(config: DeviceConfig) -> Result<Self, ConfigError> {
        let backend = if let Some(spec) = config.device.strip_prefix("stub://") {
            DeviceBackend::Synthetic(SyntheticSource::new(spec, config.width, config.height))
        } else {
            let pinned = parse_device_spec(&config.device)?;
            #[cfg(feature = "ingest-v4l2")]
            {
                DeviceBackend::V4l2(V4l2Device::new(pinned, config.width, config.height))
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                let _ = pinned;
                return Err(ConfigError::Invalid(
                    "device capture requires the ingest-v4l2 feature".to_string(),
                ));
            }
        };
        Ok(Self {
            backend,
            geometry: None,
            next_seq: 0,
            stats: SourceStats::default(),
        })
    }

    pub fn describe(&self) -> String {
        match &self.backend {
            DeviceBackend::Synthetic(source) => format!("synthetic camera {}", source.name),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(device) => device.describe(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    /// Open the capture handle. Only connection loss is retried; an
    /// ambiguous device selection fails fast in either mode.
    pub fn connect(&mut self, mode: ConnectMode, cancel: &CancelToken) -> Result<(), SourceError> {
        loop {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            match self.try_connect() {
                Ok(()) => return Ok(()),
                Err(err @ SourceError::AmbiguousDevice { .. }) => return Err(err),
                Err(err) if mode == ConnectMode::FailFast => return Err(err),
                Err(err) => {
                    log::warn!("device open failed: {}; retrying", err);
                    if !cancel.sleep(Duration::from_millis(RECONNECT_DELAY_MS)) {
                        return Err(SourceError::Cancelled);
                    }
                }
            }
        }
    }

    fn try_connect(&mut self) -> Result<(), SourceError> {
        match &mut self.backend {
            DeviceBackend::Synthetic(source) => {
                log::info!("synthetic camera {} opened", source.name);
                Ok(())
            }
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(device) => device.open(),
        }
    }

    /// Next captured frame. A failing read reopens the handle and retries;
    /// a geometry change against the first frame is fatal.
    pub fn next_frame(&mut self, cancel: &CancelToken) -> Result<Frame, SourceError> {
        loop {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            let captured: Result<(Vec<u8>, u32, u32), SourceError> = match &mut self.backend {
                DeviceBackend::Synthetic(source) => Ok(source.capture()),
                #[cfg(feature = "ingest-v4l2")]
                DeviceBackend::V4l2(device) => device.capture(),
            };
            let (data, width, height) = match captured {
                Ok(raster) => raster,
                Err(err) => {
                    log::warn!("device read failed: {}; reopening", err);
                    self.stats.reconnects += 1;
                    self.connect(ConnectMode::Retry, cancel)?;
                    continue;
                }
            };

            if data.len() != width as usize * height as usize * CHANNELS {
                self.stats.frames_skipped += 1;
                log::debug!("skipping frame with unexpected buffer size {}", data.len());
                continue;
            }

            let actual = Geometry { width, height };
            match self.geometry {
                None => {
                    self.geometry = Some(actual);
                    log::info!("camera geometry fixed at {}", actual);
                }
                Some(expected) if expected != actual => {
                    return Err(SourceError::GeometryMismatch { expected, actual });
                }
                Some(_) => {}
            }

            let seq = self.next_seq;
            self.next_seq += 1;
            self.stats.frames_produced += 1;
            return Ok(Frame::new(data, width, height, seq));
        }
    }
}

fn parse_device_spec(spec: &str) -> Result<Option<usize>, ConfigError> {
    match spec {
        "" | "auto" => Ok(None),
        other => other
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("invalid device spec '{}'", other))),
    }
}

/// Pick a device index from the connected candidates. Pinned indices are
/// honored unconditionally; auto-selection requires exactly one candidate.
pub fn select_device(
    candidates: &[usize],
    pinned: Option<usize>,
) -> Result<usize, SourceError> {
    if let Some(index) = pinned {
        return Ok(index);
    }
    match candidates {
        [] => Err(SourceError::ConnectionLost(
            "no capture devices found".to_string(),
        )),
        [only] => Ok(*only),
        many => Err(SourceError::AmbiguousDevice {
            candidates: many.to_vec(),
        }),
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demos
// ----------------------------------------------------------------------------

/// Deterministic scene: a static gradient background with a bright block in
/// the top-left corner that toggles every `period` frames, producing a
/// single-frame motion spike at each toggle.
struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    period: u64,
    frame_count: u64,
}

impl SyntheticSource {
    fn new(spec: &str, width: u32, height: u32) -> Self {
        let (name, period) = match spec.rsplit_once(':') {
            Some((name, period_str)) => match period_str.parse::<u64>() {
                Ok(period) if period > 0 => (name.to_string(), period),
                _ => (spec.to_string(), 25),
            },
            None => (spec.to_string(), 25),
        };
        Self {
            name,
            width,
            height,
            period,
            frame_count: 0,
        }
    }

    fn capture(&mut self) -> (Vec<u8>, u32, u32) {
        let block_on = (self.frame_count / self.period) % 2 == 1;
        self.frame_count += 1;

        let side = (self.width.min(self.height) / 4) as usize;
        let width = self.width as usize;
        let mut data = vec![0u8; width * self.height as usize * CHANNELS];
        for y in 0..self.height as usize {
            for x in 0..width {
                let offset = (y * width + x) * CHANNELS;
                let in_block = block_on && x < side && y < side;
                if in_block {
                    data[offset] = 230;
                    data[offset + 1] = 40;
                    data[offset + 2] = 40;
                } else {
                    let shade = ((x ^ y) & 0x3F) as u8;
                    data[offset] = shade;
                    data[offset + 1] = shade;
                    data[offset + 2] = shade;
                }
            }
        }
        (data, self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// v4l-backed device
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct V4l2Device {
    pinned: Option<usize>,
    width: u32,
    height: u32,
    active_index: Option<usize>,
    active_width: u32,
    active_height: u32,
    state: Option<V4l2State>,
}

#[cfg(feature = "ingest-v4l2")]
#[ouroboros::self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl V4l2Device {
    fn new(pinned: Option<usize>, width: u32, height: u32) -> Self {
        Self {
            pinned,
            width,
            height,
            active_index: None,
            active_width: width,
            active_height: height,
            state: None,
        }
    }

    fn describe(&self) -> String {
        match self.active_index.or(self.pinned) {
            Some(index) => format!("v4l2 device {}", index),
            None => "v4l2 device (auto)".to_string(),
        }
    }

    fn enumerate() -> Vec<usize> {
        (0..MAX_DEVICE_INDEX)
            .filter(|&index| v4l::Device::new(index).is_ok())
            .collect()
    }

    fn open(&mut self) -> Result<(), SourceError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.state = None;
        let index = select_device(&Self::enumerate(), self.pinned)?;

        let device = v4l::Device::new(index)
            .map_err(|err| SourceError::ConnectionLost(format!("open device {}: {}", index, err)))?;
        let mut format = device
            .format()
            .map_err(|err| SourceError::ConnectionLost(format!("read format: {}", err)))?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("failed to set format on device {}: {}", index, err);
                device
                    .format()
                    .map_err(|err| SourceError::ConnectionLost(format!("read format: {}", err)))?
            }
        };
        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4).map_err(
                    |err| SourceError::ConnectionLost(format!("create buffer stream: {}", err)),
                )
            },
        }
        .try_build()?;

        self.state = Some(state);
        self.active_index = Some(index);
        log::info!("v4l2 device {} opened", index);
        Ok(())
    }

    fn capture(&mut self) -> Result<(Vec<u8>, u32, u32), SourceError> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or(SourceError::NotConnected)?;
        let data = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| SourceError::ConnectionLost(format!("capture frame: {}", err)))?;
        Ok((data, self.active_width, self.active_height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_index_is_always_honored() {
        assert_eq!(select_device(&[], Some(3)).expect("pinned"), 3);
        assert_eq!(select_device(&[0, 1, 2], Some(1)).expect("pinned"), 1);
    }

    #[test]
    fn single_candidate_is_auto_selected() {
        assert_eq!(select_device(&[2], None).expect("auto"), 2);
    }

    #[test]
    fn multiple_candidates_without_pin_are_ambiguous() {
        match select_device(&[0, 2], None) {
            Err(SourceError::AmbiguousDevice { candidates }) => {
                assert_eq!(candidates, vec![0, 2]);
            }
            other => panic!("expected ambiguous device, got {:?}", other),
        }
    }

    #[test]
    fn no_candidates_is_connection_loss() {
        assert!(matches!(
            select_device(&[], None),
            Err(SourceError::ConnectionLost(_))
        ));
    }

    #[test]
    fn synthetic_source_is_deterministic_and_pulses() {
        let mut source = SyntheticSource::new("pulse:10", 64, 48);
        assert_eq!(source.period, 10);

        let frames: Vec<_> = (0..21).map(|_| source.capture().0).collect();
        // Frames within a half-period are identical.
        assert_eq!(frames[0], frames[9]);
        assert_eq!(frames[10], frames[19]);
        // The toggle frame differs from its predecessor.
        assert_ne!(frames[9], frames[10]);
        assert_ne!(frames[19], frames[20]);
    }

    #[test]
    fn stub_source_produces_frames_through_the_facade() {
        let mut source = DeviceFrameSource::new(DeviceConfig {
            device: "stub://test".to_string(),
            width: 64,
            height: 48,
        })
        .expect("stub config");
        let cancel = CancelToken::new();
        source
            .connect(ConnectMode::FailFast, &cancel)
            .expect("stub connect");

        let frame = source.next_frame(&cancel).expect("frame");
        assert_eq!(
            frame.geometry(),
            Geometry {
                width: 64,
                height: 48
            }
        );
        assert_eq!(frame.seq, 0);
        assert_eq!(source.next_frame(&cancel).expect("frame").seq, 1);
    }

    #[test]
    fn invalid_device_spec_is_rejected() {
        assert!(parse_device_spec("not-a-number").is_err());
        assert_eq!(parse_device_spec("auto").expect("auto"), None);
        assert_eq!(parse_device_spec("2").expect("index"), Some(2));
    }
}
