use anyhow::{anyhow, Context, Result};

use crate::frame::rgb_len;

/// Pixel layouts a camera may deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: &str) -> Result<Self> {
        match fourcc.trim().to_ascii_uppercase().as_str() {
            "RGB3" | "RGB24" => Ok(PixelFormat::Rgb24),
            "YUYV" | "YUY2" => Ok(PixelFormat::Yuyv),
            "MJPG" | "MJPEG" => Ok(PixelFormat::Mjpeg),
            other => Err(anyhow!(
                "unsupported camera fourcc '{}' (expected MJPG, YUYV or RGB3)",
                other
            )),
        }
    }

    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Yuyv => *b"YUYV",
            PixelFormat::Mjpeg => *b"MJPG",
        }
    }
}

/// Convert a device buffer into RGB24. Returns the pixels and the decoded dimensions
/// (MJPEG carries its own size, which may differ from the negotiated one).
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<(Vec<u8>, u32, u32)> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = rgb_len(width, height)?;
            if pixels.len() < expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Ok((pixels[..expected].to_vec(), width, height))
        }
        PixelFormat::Yuyv => Ok((yuyv_to_rgb(pixels, width, height)?, width, height)),
        PixelFormat::Mjpeg => {
            let img = image::load_from_memory_with_format(pixels, image::ImageFormat::Jpeg)
                .context("decode MJPEG frame")?
                .into_rgb8();
            let (w, h) = img.dimensions();
            Ok((img.into_raw(), w, h))
        }
    }
}

#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    if width % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", width));
    }
    let expected = pixel_count * 2;
    if pixels.len() < expected {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for chunk in pixels[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_u8(y + 1.402_f32 * v));
            rgb.push(clamp_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_u8(y + 1.772_f32 * u));
        }
    }
    Ok(rgb)
}

#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
