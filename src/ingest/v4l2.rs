//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing frames from a local USB camera
//! (e.g. /dev/video0).
//!
//! The V4L2 source is responsible for:
//! - Negotiating the capture format (MJPG at 1920x1080 by default)
//! - Capturing frames in-memory through an mmap stream
//! - Normalising every buffer to RGB24 before it leaves the source
//!
//! `stub://` device paths produce synthetic frames so the controller can run on a bench
//! without a camera.

use anyhow::Result;
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;
#[cfg(feature = "ingest-v4l2")]
use std::time::Instant;

use super::normalize::PixelFormat;
#[cfg(feature = "ingest-v4l2")]
use super::normalize::normalize_to_rgb;
use super::CaptureDevice;
use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate (frames per second).
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Requested pixel format.
    pub format: PixelFormat,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 1920,
            height: 1080,
            format: PixelFormat::Mjpeg,
        }
    }
}

/// V4L2 frame source.
///
/// Uses libv4l for real devices, with a synthetic fallback for `stub://` paths.
pub struct V4l2Source {
    backend: V4l2Backend,
}

enum V4l2Backend {
    Synthetic(SyntheticV4l2Source),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceV4l2Source),
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Result<Self> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: V4l2Backend::Synthetic(SyntheticV4l2Source::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: V4l2Backend::Device(DeviceV4l2Source::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow::anyhow!(
                "camera {} requires the ingest-v4l2 feature (use stub:// or a still image path)",
                config.device
            ))
        }
    }

    /// Statistics for the source.
    pub fn stats(&self) -> V4l2Stats {
        match &self.backend {
            V4l2Backend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.stats(),
        }
    }
}

impl CaptureDevice for V4l2Source {
    fn describe(&self) -> String {
        self.stats().device
    }

    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.next_frame(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            V4l2Backend::Synthetic(_) => {}
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.release(),
        }
    }
}

/// Statistics for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Stats {
    pub frames_captured: u64,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for bench runs and tests
// ----------------------------------------------------------------------------

struct SyntheticV4l2Source {
    config: V4l2Config,
    frame_count: u64,
}

impl SyntheticV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "V4l2Source: connected to {} (synthetic)",
            self.config.device
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )
    }

    /// Slowly drifting gradient; every frame differs from the previous one.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / 3 + self.frame_count) % 256) as u8;
        }
        pixels
    }

    fn stats(&self) -> V4l2Stats {
        V4l2Stats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceV4l2Source {
    config: V4l2Config,
    state: Option<DeviceV4l2State>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            active_format: config.format,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(&self.config.format.fourcc());

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.active_format = PixelFormat::from_fourcc(&String::from_utf8_lossy(&format.fourcc.repr))
            .with_context(|| format!("camera {} negotiated an unusable format", self.config.device))?;

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (buf, meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };

        let (pixels, width, height) = normalize_to_rgb(
            &buf[..used],
            self.active_width,
            self.active_height,
            self.active_format,
        )?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(pixels, width, height, self.frame_count)
    }

    fn release(&mut self) {
        // Dropping the stream unmaps buffers and closes the file descriptor.
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.config.device);
        }
    }

    fn stats(&self) -> V4l2Stats {
        V4l2Stats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> V4l2Config {
        V4l2Config {
            device: "stub://test".to_string(),
            target_fps: 30,
            width: 64,
            height: 48,
            format: PixelFormat::Mjpeg,
        }
    }

    #[test]
    fn v4l2_source_produces_frames() -> Result<()> {
        let mut source = V4l2Source::new(stub_config())?;
        source.connect()?;

        let frame = source.next_frame()?;
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.pixels().len(), 64 * 48 * 3);

        Ok(())
    }

    #[test]
    fn v4l2_source_frames_are_sequenced() -> Result<()> {
        let mut source = V4l2Source::new(stub_config())?;
        source.connect()?;

        let frame1 = source.next_frame()?;
        let frame2 = source.next_frame()?;

        assert_eq!(frame1.sequence + 1, frame2.sequence);
        assert_ne!(frame1.pixels(), frame2.pixels());
        assert_eq!(source.stats().frames_captured, 2);

        Ok(())
    }
}
