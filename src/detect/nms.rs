use std::cmp::Ordering;

use crate::detect::result::Detection;

/// Greedy non-maximum suppression.
///
/// Keeps the highest-confidence detection of every same-class cluster whose pairwise IoU
/// exceeds `iou_threshold`. Boxes of different classes never suppress each other: a bottle
/// is expected to carry both a product label and a cap label. Output is sorted by
/// descending confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept.iter().any(|k| {
            k.class_name == candidate.class_name && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}
