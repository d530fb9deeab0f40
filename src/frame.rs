//! Decoded frames.
//!
//! Every source normalizes to RGB8, so the rest of the pipeline never deals
//! with pixel formats. A `Frame` is immutable once produced: consumers that
//! need to draw on it (the live stream sink) work on their own clone.

use std::fmt;

/// Fixed channel count. All decode paths normalize to RGB8.
pub const CHANNELS: usize = 3;

/// Frame dimensions, fixed per source after the first decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One decoded RGB8 raster captured from a camera.
///
/// `seq` is assigned by the source and increases strictly within a source's
/// lifetime; the windower relies on it for event ordering.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub seq: u64,
}

impl Frame {
    /// Build a frame from raw RGB8 bytes. `data` must hold exactly
    /// width * height * 3 bytes.
    pub fn new(data: Vec<u8>, width: u32, height: u32, seq: u64) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize * CHANNELS,
            "frame buffer size does not match geometry"
        );
        Self {
            data,
            width,
            height,
            seq,
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            width: self.width,
            height: self.height,
        }
    }

    /// Raw RGB8 bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Pixel count (not byte count).
    pub fn resolution(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Annotated copy with a filled red disc in the top-right corner, used
    /// by live-view sinks to flag motion. The receiver never mutates the
    /// shared instance.
    pub fn with_motion_marker(&self) -> Frame {
        let mut copy = self.clone();
        let radius = (self.width.min(self.height) / 20).max(1) as i64;
        let cx = self.width as i64 - radius;
        let cy = radius;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy > radius * radius {
                    continue;
                }
                let x = cx + dx;
                let y = cy + dy;
                if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
                    continue;
                }
                let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
                copy.data[offset] = 255;
                copy.data[offset + 1] = 0;
                copy.data[offset + 2] = 0;
            }
        }
        copy
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("seq", &self.seq)
            .field("geometry", &format_args!("{}", self.geometry()))
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_is_drawn_on_a_copy() {
        let frame = Frame::new(vec![0u8; 40 * 40 * CHANNELS], 40, 40, 0);
        let marked = frame.with_motion_marker();

        // Original untouched.
        assert!(frame.pixels().iter().all(|&b| b == 0));
        // Marker center is red.
        let radius = 2usize; // 40 / 20
        let cx = 40 - radius;
        let cy = radius;
        let offset = (cy * 40 + cx) * CHANNELS;
        assert_eq!(&marked.pixels()[offset..offset + 3], &[255, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "frame buffer size")]
    fn rejects_mismatched_buffer() {
        let _ = Frame::new(vec![0u8; 10], 4, 4, 0);
    }
}
