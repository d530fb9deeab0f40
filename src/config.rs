//! Daemon configuration.
//!
//! Layering, lowest precedence first: built-in defaults, JSON config file,
//! `MOTIOND_*` environment overrides. Binaries apply CLI flags on top and
//! re-validate. Validation rejects out-of-range values; nothing is clamped.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::error::{validate_fraction, ConfigError};

const DEFAULT_THRESHOLD: f64 = 0.1;
const DEFAULT_SENSITIVITY: f64 = 0.1;
const DEFAULT_BEFORE: usize = 10;
const DEFAULT_AFTER: u32 = 10;
const DEFAULT_BOUNDARY: &str = "--ipcamera";
const DEFAULT_RESERVATION_BYTES: u64 = 40 * 1024 * 1024;

#[derive(Debug, Deserialize, Default)]
struct MotiondConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    events: Option<EventsConfigFile>,
    storage: Option<StorageConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    /// Device index, "auto", or "stub://<name>".
    device: Option<String>,
    /// Network camera URL; takes precedence over `device` when set.
    url: Option<String>,
    boundary: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    threshold: Option<f64>,
    sensitivity: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct EventsConfigFile {
    before: Option<usize>,
    after: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    directory: Option<PathBuf>,
    reservation_bytes: Option<u64>,
    guaranteed: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    addr: Option<String>,
}

/// Camera identity: a local device or a network stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraSettings {
    Device {
        spec: String,
        width: u32,
        height: u32,
    },
    Http {
        url: String,
        boundary: String,
    },
}

#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub directory: PathBuf,
    pub reservation_bytes: u64,
    /// Block the pipeline rather than drop events when the store lags.
    pub guaranteed: bool,
}

#[derive(Clone, Debug)]
pub struct StreamSettings {
    pub addr: String,
}

/// Validated daemon configuration.
#[derive(Clone, Debug)]
pub struct MotiondConfig {
    pub camera: CameraSettings,
    pub threshold: f64,
    pub sensitivity: f64,
    pub before: usize,
    pub after: u32,
    /// Event persistence; None disables the record sink.
    pub storage: Option<StorageSettings>,
    /// Live MJPEG stream; None disables the stream sink.
    pub stream: Option<StreamSettings>,
}

impl Default for MotiondConfig {
    fn default() -> Self {
        Self {
            camera: CameraSettings::Device {
                spec: "auto".to_string(),
                width: 640,
                height: 480,
            },
            threshold: DEFAULT_THRESHOLD,
            sensitivity: DEFAULT_SENSITIVITY,
            before: DEFAULT_BEFORE,
            after: DEFAULT_AFTER,
            storage: None,
            stream: None,
        }
    }
}

impl MotiondConfig {
    /// Load from an optional JSON file, apply environment overrides, and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => read_config_file(path)?,
            None => MotiondConfigFile::default(),
        };
        let mut config = Self::from_file(file);
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: MotiondConfigFile) -> Self {
        let defaults = Self::default();
        let camera_file = file.camera.unwrap_or_default();
        let camera = match camera_file.url {
            Some(url) => CameraSettings::Http {
                url,
                boundary: camera_file
                    .boundary
                    .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string()),
            },
            None => CameraSettings::Device {
                spec: camera_file.device.unwrap_or_else(|| "auto".to_string()),
                width: camera_file.width.unwrap_or(640),
                height: camera_file.height.unwrap_or(480),
            },
        };
        let detection = file.detection.unwrap_or_default();
        let events = file.events.unwrap_or_default();
        let storage = file.storage.and_then(|storage| {
            let StorageConfigFile {
                directory,
                reservation_bytes,
                guaranteed,
            } = storage;
            directory.map(|directory| StorageSettings {
                directory,
                reservation_bytes: reservation_bytes.unwrap_or(DEFAULT_RESERVATION_BYTES),
                guaranteed: guaranteed.unwrap_or(false),
            })
        });
        let stream = file
            .stream
            .and_then(|stream| stream.addr)
            .map(|addr| StreamSettings { addr });

        Self {
            camera,
            threshold: detection.threshold.unwrap_or(defaults.threshold),
            sensitivity: detection.sensitivity.unwrap_or(defaults.sensitivity),
            before: events.before.unwrap_or(defaults.before),
            after: events.after.unwrap_or(defaults.after),
            storage,
            stream,
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(camera) = std::env::var("MOTIOND_CAMERA") {
            if !camera.trim().is_empty() {
                self.set_camera_spec(camera.trim());
            }
        }
        if let Some(threshold) = parse_env_f64("MOTIOND_THRESHOLD")? {
            self.threshold = threshold;
        }
        if let Some(sensitivity) = parse_env_f64("MOTIOND_SENSITIVITY")? {
            self.sensitivity = sensitivity;
        }
        if let Some(before) = parse_env_u64("MOTIOND_BEFORE")? {
            self.before = before as usize;
        }
        if let Some(after) = parse_env_u64("MOTIOND_AFTER")? {
            self.after = after as u32;
        }
        if let Ok(directory) = std::env::var("MOTIOND_STORAGE_DIR") {
            if !directory.trim().is_empty() {
                let reservation = self
                    .storage
                    .as_ref()
                    .map(|storage| storage.reservation_bytes)
                    .unwrap_or(DEFAULT_RESERVATION_BYTES);
                let guaranteed = self
                    .storage
                    .as_ref()
                    .map(|storage| storage.guaranteed)
                    .unwrap_or(false);
                self.storage = Some(StorageSettings {
                    directory: PathBuf::from(directory),
                    reservation_bytes: reservation,
                    guaranteed,
                });
            }
        }
        if let Some(reservation) = parse_env_u64("MOTIOND_RESERVATION_BYTES")? {
            if let Some(storage) = self.storage.as_mut() {
                storage.reservation_bytes = reservation;
            }
        }
        if let Ok(addr) = std::env::var("MOTIOND_STREAM_ADDR") {
            if !addr.trim().is_empty() {
                self.stream = Some(StreamSettings { addr });
            }
        }
        Ok(())
    }

    /// Interpret a camera spec the way the CLI does: an integer or "auto"
    /// is a device, anything else is a URL.
    pub fn set_camera_spec(&mut self, spec: &str) {
        let is_device = spec == "auto"
            || spec.starts_with("stub://")
            || spec.parse::<usize>().is_ok();
        if is_device {
            let (width, height) = match &self.camera {
                CameraSettings::Device { width, height, .. } => (*width, *height),
                CameraSettings::Http { .. } => (640, 480),
            };
            self.camera = CameraSettings::Device {
                spec: spec.to_string(),
                width,
                height,
            };
        } else {
            let boundary = match &self.camera {
                CameraSettings::Http { boundary, .. } => boundary.clone(),
                CameraSettings::Device { .. } => DEFAULT_BOUNDARY.to_string(),
            };
            self.camera = CameraSettings::Http {
                url: spec.to_string(),
                boundary,
            };
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_fraction("threshold", self.threshold)?;
        validate_fraction("sensitivity", self.sensitivity)?;
        if let CameraSettings::Http { url, boundary } = &self.camera {
            Url::parse(url)
                .map_err(|err| ConfigError::Invalid(format!("invalid camera url: {}", err)))?;
            if boundary.is_empty() {
                return Err(ConfigError::Invalid(
                    "multipart boundary must not be empty".to_string(),
                ));
            }
        }
        if let Some(storage) = &self.storage {
            if storage.reservation_bytes == 0 {
                return Err(ConfigError::Invalid(
                    "storage reservation must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MotiondConfigFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_env_f64(key: &'static str) -> Result<Option<f64>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{} must be a number", key))),
        _ => Ok(None),
    }
}

fn parse_env_u64(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{} must be a non-negative integer", key))),
        _ => Ok(None),
    }
}
