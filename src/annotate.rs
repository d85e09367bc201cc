//! Annotated snapshot of the classified frame.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::path::Path;

use crate::detect::Detection;
use crate::frame::Frame;

const BOX_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 3;

/// Copy of `frame` with every detection box outlined in red.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Result<RgbImage> {
    let mut img = frame.to_rgb_image()?;
    for detection in detections {
        draw_box(&mut img, detection);
    }
    Ok(img)
}

/// Annotate and write the snapshot; the format follows the file extension.
pub fn save_snapshot(frame: &Frame, detections: &[Detection], path: &Path) -> Result<()> {
    let img = annotate(frame, detections)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create snapshot directory {}", parent.display()))?;
    }
    img.save(path)
        .with_context(|| format!("write snapshot {}", path.display()))
}

fn draw_box(img: &mut RgbImage, detection: &Detection) {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let bbox = &detection.bbox;
    if !(bbox.width() > 0.0 && bbox.height() > 0.0) {
        return;
    }
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max - 1);
    let (x1, y1) = (clamp(bbox.x1, width), clamp(bbox.y1, height));
    let (x2, y2) = (clamp(bbox.x2, width), clamp(bbox.y2, height));

    for t in 0..BOX_THICKNESS {
        for x in x1..=x2 {
            put(img, x, y1 + t);
            put(img, x, y2.saturating_sub(t));
        }
        for y in y1..=y2 {
            put(img, x1 + t, y);
            put(img, x2.saturating_sub(t), y);
        }
    }
}

fn put(img: &mut RgbImage, x: u32, y: u32) {
    if x < img.width() && y < img.height() {
        img.put_pixel(x, y, BOX_COLOUR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn outlines_box_and_leaves_original_untouched() -> Result<()> {
        let frame = Frame::blank(40, 30, 0)?;
        let detections = vec![Detection::new(
            "Mansome",
            0.9,
            BoundingBox::new(5.0, 5.0, 20.0, 25.0),
        )];
        let img = annotate(&frame, &detections)?;

        assert_eq!(*img.get_pixel(5, 5), BOX_COLOUR);
        assert_eq!(*img.get_pixel(20, 15), BOX_COLOUR);
        assert_eq!(*img.get_pixel(12, 15), Rgb([0, 0, 0]));
        assert!(frame.pixels().iter().all(|p| *p == 0));
        Ok(())
    }

    #[test]
    fn boxes_outside_the_frame_are_clipped() -> Result<()> {
        let frame = Frame::blank(10, 10, 0)?;
        let detections = vec![
            Detection::new("Coke", 0.9, BoundingBox::new(-5.0, -5.0, 50.0, 50.0)),
            Detection::labelled("Cap", 0.9),
        ];
        let img = annotate(&frame, &detections)?;
        assert_eq!(*img.get_pixel(9, 9), BOX_COLOUR);
        Ok(())
    }

    #[test]
    fn writes_snapshot_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out").join("snapshot.png");
        save_snapshot(&Frame::blank(8, 8, 10)?, &[], &path)?;
        let written = image::open(&path)?.into_rgb8();
        assert_eq!(written.dimensions(), (8, 8));
        Ok(())
    }
}
