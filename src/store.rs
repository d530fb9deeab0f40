//! Space-bounded capture storage.
//!
//! Each sealed event becomes one capture record: a subdirectory under the
//! store root holding one JPEG per frame. Record and frame names embed a
//! fixed-width timestamp so lexical order equals creation order, which is
//! what the eviction policy sorts on — no auxiliary metadata.
//!
//! Before every frame write the store checks available space against the
//! configured reservation and evicts the oldest records until the
//! reservation is satisfied, there is nothing left to evict, or it would
//! have to evict the record currently being written. If eviction cannot
//! satisfy the reservation the write is still attempted; a failing write
//! surfaces as `StorageError` rather than being dropped silently.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;

use crate::error::StorageError;
use crate::frame::Frame;
use crate::window::Event;

const DEFAULT_PREFIX: &str = "capture";
const FRAME_EXT: &str = "jpg";

/// Free-space oracle for the store root. Re-read before every reservation
/// decision; never cached across checks.
pub trait SpaceProbe: Send {
    fn available(&self, path: &Path) -> io::Result<u64>;
}

/// statvfs-backed probe (unix). On other platforms it reports unlimited
/// space, disabling eviction.
pub struct StatvfsProbe;

#[cfg(unix)]
impl SpaceProbe for StatvfsProbe {
    fn available(&self, path: &Path) -> io::Result<u64> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(stats.f_bavail as u64 * stats.f_frsize as u64)
    }
}

#[cfg(not(unix))]
impl SpaceProbe for StatvfsProbe {
    fn available(&self, _path: &Path) -> io::Result<u64> {
        Ok(u64::MAX)
    }
}

/// Probe returning a settable fixed value. Used by tests and dry runs.
#[derive(Clone, Default)]
pub struct FixedProbe {
    bytes: Arc<AtomicU64>,
}

impl FixedProbe {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Arc::new(AtomicU64::new(bytes)),
        }
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl SpaceProbe for FixedProbe {
    fn available(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.bytes.load(Ordering::SeqCst))
    }
}

/// Handle to a persisted event.
#[derive(Clone, Debug)]
pub struct CaptureRecord {
    pub name: String,
    pub path: PathBuf,
    pub frames_written: usize,
}

/// Directory-per-event capture store with oldest-first eviction.
pub struct CaptureStore {
    root: PathBuf,
    reservation: u64,
    prefix: String,
    probe: Box<dyn SpaceProbe>,
}

impl CaptureStore {
    /// Open a store rooted at `root`, creating the directory if absent.
    /// `reservation` is the free-space requirement checked before each
    /// frame write, in bytes.
    pub fn open(
        root: impl Into<PathBuf>,
        reservation: u64,
        probe: Box<dyn SpaceProbe>,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        if !root.is_dir() {
            log::warn!("capture directory {} does not exist", root.display());
            fs::create_dir_all(&root).map_err(|source| StorageError::CreateRoot {
                path: root.clone(),
                source,
            })?;
            log::info!("capture directory {} created", root.display());
        }
        Ok(Self {
            root,
            reservation,
            prefix: DEFAULT_PREFIX.to_string(),
            probe,
        })
    }

    pub fn with_statvfs(root: impl Into<PathBuf>, reservation: u64) -> Result<Self, StorageError> {
        Self::open(root, reservation, Box::new(StatvfsProbe))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a sealed event as one capture record.
    ///
    /// Frames already written stay on disk when a later write fails; the
    /// partial record participates in eviction like any other and the error
    /// is surfaced to the caller.
    pub fn save_event(&mut self, event: &Event) -> Result<CaptureRecord, StorageError> {
        let name = self.unique_name(&self.root, None);
        let dir = self.root.join(&name);
        fs::create_dir(&dir).map_err(|source| StorageError::CreateRecord {
            path: dir.clone(),
            source,
        })?;
        log::info!("saving motion event to {}", dir.display());

        let mut frames_written = 0;
        for frame in event.frames() {
            self.make_space(&name)?;
            let stem = self.unique_name(&dir, Some(FRAME_EXT));
            let path = dir.join(format!("{}.{}", stem, FRAME_EXT));
            let bytes = encode_jpeg(frame, &path)?;
            fs::write(&path, &bytes).map_err(|source| StorageError::WriteFrame {
                path: path.clone(),
                source,
            })?;
            frames_written += 1;
            log::debug!("saved frame {}", path.display());
        }

        Ok(CaptureRecord {
            name,
            path: dir,
            frames_written,
        })
    }

    /// Record names in lexical order, which is creation order.
    pub fn records(&self) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.root).map_err(|source| StorageError::List {
            path: self.root.clone(),
            source,
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::List {
                path: self.root.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&self.prefix) && entry.path().is_dir() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Re-read a record's frames in lexical (capture) order. Sequence
    /// numbers restart from zero; ordering and count match the saved event.
    pub fn load_record(&self, name: &str) -> Result<Vec<Frame>, StorageError> {
        let dir = self.root.join(name);
        let entries = fs::read_dir(&dir).map_err(|source| StorageError::ReadRecord {
            path: dir.clone(),
            source,
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::ReadRecord {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == FRAME_EXT) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for (seq, path) in paths.iter().enumerate() {
            let bytes = fs::read(path).map_err(|source| StorageError::ReadRecord {
                path: path.clone(),
                source,
            })?;
            let image =
                image::load_from_memory(&bytes).map_err(|source| StorageError::DecodeFrame {
                    path: path.clone(),
                    source,
                })?;
            let rgb = image.into_rgb8();
            let (width, height) = rgb.dimensions();
            frames.push(Frame::new(rgb.into_raw(), width, height, seq as u64));
        }
        Ok(frames)
    }

    /// Evict oldest records until the reservation is satisfied or nothing
    /// evictable remains. `current` is the record being written and is never
    /// evicted. Space is re-probed after every deletion, so no more records
    /// are removed than this one check needs.
    fn make_space(&mut self, current: &str) -> Result<(), StorageError> {
        loop {
            let available = self.probe.available(&self.root).map_err(|source| {
                StorageError::Probe {
                    path: self.root.clone(),
                    source,
                }
            })?;
            if available >= self.reservation {
                return Ok(());
            }
            let Some(oldest) = self.oldest_record(current)? else {
                log::warn!(
                    "free space below reservation ({} < {}) with nothing left to evict; writing anyway",
                    available,
                    self.reservation
                );
                return Ok(());
            };
            let path = self.root.join(&oldest);
            fs::remove_dir_all(&path).map_err(|source| StorageError::Evict {
                path: path.clone(),
                source,
            })?;
            log::info!("evicted capture record {} to free space", oldest);
        }
    }

    fn oldest_record(&self, skip: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .records()?
            .into_iter()
            .find(|name| name != skip))
    }

    /// Timestamp-derived name, unique within `parent`. Collisions inside one
    /// microsecond are nudged forward so the fixed-width scheme holds.
    fn unique_name(&self, parent: &Path, ext: Option<&str>) -> String {
        let mut ts = Local::now();
        loop {
            let name = capture_name(&self.prefix, &ts);
            let candidate = match ext {
                Some(ext) => parent.join(format!("{}.{}", name, ext)),
                None => parent.join(&name),
            };
            if !candidate.exists() {
                return name;
            }
            ts = ts + chrono::Duration::microseconds(1);
        }
    }
}

fn capture_name(prefix: &str, ts: &DateTime<Local>) -> String {
    format!(
        "{}-{}-{:06}",
        prefix,
        ts.format("%Y-%m-%d-%H-%M-%S"),
        ts.timestamp_subsec_micros()
    )
}

fn encode_jpeg(frame: &Frame, path: &Path) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    JpegEncoder::new(&mut bytes)
        .encode(
            frame.pixels(),
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|source| StorageError::EncodeFrame {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_names_sort_chronologically() {
        let early = Local::now();
        let late = early + chrono::Duration::microseconds(1);
        let a = capture_name("capture", &early);
        let b = capture_name("capture", &late);
        assert!(a < b);

        let much_later = early + chrono::Duration::seconds(3600);
        let c = capture_name("capture", &much_later);
        assert!(b < c);
    }
}
