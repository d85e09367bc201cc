//! Frame acquisition.
//!
//! This module provides the capture devices and the background loop that keeps the
//! latest-frame cell fresh:
//! - USB/V4L2 cameras (feature: ingest-v4l2), with a synthetic `stub://` fallback
//! - Still images (a single JPEG/PNG repeated, for bench runs)
//!
//! `FrameSource` owns the device exclusively. Readers only ever see frames through
//! `LatestFrame`. A failed read is logged and skipped; the previously published frame stays
//! in place.

mod normalize;
pub mod still;
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::CameraSettings;
use crate::frame::{Frame, LatestFrame};

pub use normalize::PixelFormat;
pub use still::StillImageSource;
pub use v4l2::{V4l2Config, V4l2Source};

/// A camera-like producer of frames.
pub trait CaptureDevice: Send {
    /// Human-readable device name for logs.
    fn describe(&self) -> String;

    /// Open the device. Failure here is a startup error.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the device handle. Must be safe to call more than once.
    fn release(&mut self) {}
}

/// Pick a capture device for the configured path.
///
/// - `stub://...` → synthetic frames
/// - `*.jpg|*.jpeg|*.png` → still image
/// - anything else → V4L2 device node
pub fn open_capture(settings: &CameraSettings) -> Result<Box<dyn CaptureDevice>> {
    if settings.device.trim().is_empty() {
        return Err(anyhow!("camera device must not be empty"));
    }
    if still::is_still_image_path(&settings.device) {
        return Ok(Box::new(StillImageSource::new(&settings.device)));
    }
    let fourcc = PixelFormat::from_fourcc(&settings.fourcc)?;
    Ok(Box::new(V4l2Source::new(V4l2Config {
        device: settings.device.clone(),
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
        format: fourcc,
    })?))
}

// ----------------------------------------------------------------------------
// FrameSource: background acquisition loop
// ----------------------------------------------------------------------------

/// Counters shared between the acquisition thread and observers.
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    frames: AtomicU64,
    failures: AtomicU64,
}

impl AcquisitionStats {
    pub fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn read_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

pub struct FrameSource {
    device: Option<Box<dyn CaptureDevice>>,
    period: Duration,
    latest: LatestFrame,
    stats: Arc<AcquisitionStats>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// `target_fps` of 30 gives the nominal 33 ms period.
    pub fn new(device: Box<dyn CaptureDevice>, target_fps: u32) -> Self {
        let fps = target_fps.max(1);
        Self {
            device: Some(device),
            period: Duration::from_millis(1000 / fps as u64),
            latest: LatestFrame::new(),
            stats: Arc::new(AcquisitionStats::default()),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Shared handle to the published frame.
    pub fn frames(&self) -> LatestFrame {
        self.latest.clone()
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest.latest()
    }

    pub fn stats(&self) -> Arc<AcquisitionStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Connect the device and spawn the acquisition thread.
    pub fn start(&mut self) -> Result<()> {
        let mut device = self
            .device
            .take()
            .ok_or_else(|| anyhow!("frame source already started"))?;
        if let Err(err) = device.connect() {
            device.release();
            return Err(err.context(format!("failed to open camera {}", device.describe())));
        }
        log::info!(
            "frame source started on {} ({} ms period)",
            device.describe(),
            self.period.as_millis()
        );

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let latest = self.latest.clone();
        let stats = self.stats.clone();
        let period = self.period;
        let worker = std::thread::Builder::new()
            .name("frame-source".into())
            .spawn(move || acquisition_loop(DeviceGuard(device), running, latest, stats, period))
            .map_err(|e| anyhow!("failed to spawn acquisition thread: {}", e))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop acquisition and wait until the device has been released.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("acquisition thread panicked; camera released during unwind");
            }
            log::info!(
                "frame source stopped ({} frames, {} read failures)",
                self.stats.frames_captured(),
                self.stats.read_failures()
            );
        }
        if let Some(mut device) = self.device.take() {
            device.release();
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Releases the device when the acquisition thread exits, including on panic.
struct DeviceGuard(Box<dyn CaptureDevice>);

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.0.release();
        log::debug!("camera {} released", self.0.describe());
    }
}

fn acquisition_loop(
    mut device: DeviceGuard,
    running: Arc<AtomicBool>,
    latest: LatestFrame,
    stats: Arc<AcquisitionStats>,
    period: Duration,
) {
    let mut consecutive_failures = 0u64;
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        match device.0.next_frame() {
            Ok(frame) => {
                if consecutive_failures > 0 {
                    log::info!(
                        "camera recovered after {} failed read(s)",
                        consecutive_failures
                    );
                }
                consecutive_failures = 0;
                latest.publish(frame);
                stats.frames.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                consecutive_failures += 1;
                stats.failures.fetch_add(1, Ordering::Relaxed);
                // One line per second of failures is enough at 30 fps.
                if consecutive_failures == 1 || consecutive_failures % 30 == 0 {
                    log::warn!(
                        "camera read failed ({} in a row): {:#}",
                        consecutive_failures,
                        err
                    );
                }
            }
        }
        if let Some(rest) = period.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
