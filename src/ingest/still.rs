//! Still image frame source.
//!
//! This module provides `StillImageSource`, which decodes one local JPEG/PNG file at
//! connect time and then hands out the same picture on every read. It stands in for the
//! camera on a bench, where a known photo of a bottle is placed in front of the classifier.
//!
//! The source only accepts local paths (no URL schemes).

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::CaptureDevice;
use crate::frame::Frame;

const STILL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Frame source backed by a single image file.
pub struct StillImageSource {
    path: PathBuf,
    image: Option<Frame>,
    frame_count: u64,
}

impl StillImageSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            image: None,
            frame_count: 0,
        }
    }
}

impl CaptureDevice for StillImageSource {
    fn describe(&self) -> String {
        format!("still:{}", self.path.display())
    }

    fn connect(&mut self) -> Result<()> {
        if !is_local_file_path(&self.path.to_string_lossy()) {
            return Err(anyhow!(
                "still image source only supports local paths (no URL schemes)"
            ));
        }
        let frame = load_still_frame(&self.path)?;
        log::info!(
            "StillImageSource: loaded {} ({}x{})",
            self.path.display(),
            frame.width,
            frame.height
        );
        self.image = Some(frame);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("still image source not connected"))?;
        self.frame_count += 1;
        Frame::new(
            image.pixels().to_vec(),
            image.width,
            image.height,
            self.frame_count,
        )
    }

    fn release(&mut self) {
        self.image = None;
    }
}

/// Decode an image file into a frame.
pub fn load_still_frame(path: &Path) -> Result<Frame> {
    let img = image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?
        .into_rgb8();
    Frame::from_rgb_image(img, 0)
}

pub(crate) fn is_still_image_path(path: &str) -> bool {
    if !is_local_file_path(path) || path.starts_with("stub://") {
        return false;
    }
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            STILL_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
