//! Captured frames and the shared latest-frame cell.
//!
//! - `Frame`: immutable RGB24 bitmap. Pixels are never mutated after construction, so a
//!   clone handed to the classifier can never tear while the camera keeps capturing.
//! - `LatestFrame`: single-slot cell the acquisition thread publishes into and the trigger
//!   loop snapshots from. Publication swaps a whole `Arc<Frame>`, so readers observe either
//!   the previous frame or the new one, never a mix.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

/// Bytes per pixel for the canonical frame layout (RGB24, row-major).
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame: immutable RGB bitmap
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Capture order assigned by the frame source (1-based).
    pub sequence: u64,
    /// Wall-clock capture time, used in cycle records.
    pub captured_at: SystemTime,
    capture_instant: Instant,
}

impl Frame {
    /// Build a frame from RGB24 pixels. The buffer length must match the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            sequence,
            captured_at: SystemTime::now(),
            capture_instant: Instant::now(),
        })
    }

    /// Uniform frame, used for warm-up inference and synthetic sources.
    pub fn blank(width: u32, height: u32, value: u8) -> Result<Self> {
        let len = rgb_len(width, height)?;
        Self::new(vec![value; len], width, height, 0)
    }

    /// Read-only pixel access.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn age(&self) -> std::time::Duration {
        self.capture_instant.elapsed()
    }

    /// Owned RGB image copy (for annotation and model pre-processing).
    pub fn to_rgb_image(&self) -> Result<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.pixels.to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not fit {}x{}", self.width, self.height))
    }

    pub fn from_rgb_image(img: image::RgbImage, sequence: u64) -> Result<Self> {
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), width, height, sequence)
    }
}

impl std::fmt::Debug for Frame {
    // Pixel content stays out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// LatestFrame: atomic publish/read cell
// ----------------------------------------------------------------------------

/// Holder of the most recently captured frame.
///
/// Cloning the holder shares the same slot.
#[derive(Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Arc<Frame>>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published frame.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(frame);
    }

    /// Snapshot of the latest frame, or `None` before the first successful capture.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sequence number of the published frame (0 when empty).
    pub fn sequence(&self) -> u64 {
        self.latest().map(|f| f.sequence).unwrap_or(0)
    }

    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_frame(value: u8, sequence: u64) -> Frame {
        Frame::new(vec![value; 4 * 2 * 3], 4, 2, sequence).unwrap()
    }

    #[test]
    fn frame_rejects_mismatched_length() {
        assert!(Frame::new(vec![0; 10], 4, 2, 1).is_err());
        assert!(Frame::new(vec![0; 24], 4, 2, 1).is_ok());
    }

    #[test]
    fn latest_is_empty_before_first_publish() {
        let cell = LatestFrame::new();
        assert!(cell.latest().is_none());
        assert_eq!(cell.sequence(), 0);
    }

    #[test]
    fn snapshot_survives_later_publication() {
        let cell = LatestFrame::new();
        cell.publish(make_test_frame(10, 1));
        let snapshot = cell.latest().unwrap();

        cell.publish(make_test_frame(200, 2));

        assert_eq!(snapshot.sequence, 1);
        assert!(snapshot.pixels().iter().all(|p| *p == 10));
        assert_eq!(cell.sequence(), 2);
    }

    #[test]
    fn readers_never_observe_mixed_frames() {
        let cell = LatestFrame::new();
        cell.publish(make_test_frame(0, 0));
        let writer = {
            let cell = cell.clone();
            std::thread::spawn(move || {
                for i in 1..=500u64 {
                    cell.publish(make_test_frame((i % 256) as u8, i));
                }
            })
        };
        for _ in 0..500 {
            let frame = cell.latest().unwrap();
            let first = frame.pixels()[0];
            assert!(frame.pixels().iter().all(|p| *p == first));
        }
        writer.join().unwrap();
    }

    #[test]
    fn rgb_image_round_trip_keeps_dimensions() {
        let frame = make_test_frame(7, 3);
        let img = frame.to_rgb_image().unwrap();
        assert_eq!(img.dimensions(), (4, 2));
        let back = Frame::from_rgb_image(img, 4).unwrap();
        assert_eq!(back.pixels(), frame.pixels());
    }
}
