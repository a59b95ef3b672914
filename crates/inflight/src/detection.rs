//! Object detection post-processing.
//!
//! Detector heads in the SSD family emit a flat run of 7-value rows:
//!
//! ```text
//! [batch_index, class_id, confidence, xmin, ymin, xmax, ymax]
//! ```
//!
//! with box corners normalized to `[0, 1]`. [`DetectionPostProcessor`]
//! filters the rows by confidence, maps the corners back onto the frame and
//! removes duplicate boxes with greedy non-maximum suppression.

use tracing::warn;

use crate::backend::Backend;
use crate::config::{DEFAULT_NMS_THRESHOLD, PipelineConfig};
use crate::frame::FrameSize;
use crate::pipeline::PostProcess;

/// Values per detection row.
pub const DETECTION_ROW_LEN: usize = 7;

/// An axis aligned box in frame pixels. Corners are inclusive of `min` and
/// exclusive of `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl BoundingBox {
    pub fn width(&self) -> i32 {
        (self.xmax - self.xmin).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.ymax - self.ymin).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Intersection over union. Degenerate boxes overlap nothing.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let overlap = BoundingBox {
            xmin: self.xmin.max(other.xmin),
            ymin: self.ymin.max(other.ymin),
            xmax: self.xmax.min(other.xmax),
            ymax: self.ymax.min(other.ymax),
        };
        let intersection = overlap.area();
        let union = self.area() + other.area() - intersection;
        if union <= 0 {
            return 0.0;
        }
        intersection as f32 / union as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Greedy non-maximum suppression.
///
/// Candidates are visited by descending confidence, ties keeping their input
/// order. A candidate is dropped when its IoU with an already accepted box
/// exceeds `threshold`, regardless of class.
pub fn non_max_suppression(mut candidates: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| k.bbox.iou(&candidate.bbox) <= threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// # DetectionPostProcessor
///
/// Turns raw SSD-style detector output into the final, suppressed list of
/// detections for one frame. Works on any [`Backend`] tensor; the frame size
/// comes from the metadata submitted with the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionPostProcessor {
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl DetectionPostProcessor {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }

    pub fn with_nms_threshold(mut self, nms_threshold: f32) -> Self {
        self.nms_threshold = nms_threshold;
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.confidence_threshold).with_nms_threshold(config.nms_threshold)
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn nms_threshold(&self) -> f32 {
        self.nms_threshold
    }

    /// Decodes, filters and suppresses a flat buffer of detection rows for a
    /// `width` x `height` frame.
    ///
    /// A buffer whose length is not a multiple of the row length is malformed
    /// and yields no detections.
    pub fn process_values(&self, values: &[f32], width: u32, height: u32) -> Vec<Detection> {
        if values.len() % DETECTION_ROW_LEN != 0 {
            warn!(
                len = values.len(),
                "detection output is not a whole number of rows, dropping frame"
            );
            return Vec::new();
        }

        let (w, h) = (width as f32, height as f32);
        let candidates = values
            .chunks_exact(DETECTION_ROW_LEN)
            // a negative batch index marks the end of the valid rows
            .take_while(|row| row[0] >= 0.0)
            .filter(|row| row[2] >= self.confidence_threshold)
            .map(|row| Detection {
                class_id: row[1] as u32,
                confidence: row[2],
                bbox: BoundingBox {
                    xmin: (row[3] * w) as i32,
                    ymin: (row[4] * h) as i32,
                    xmax: (row[5] * w) as i32,
                    ymax: (row[6] * h) as i32,
                },
            })
            .collect();

        non_max_suppression(candidates, self.nms_threshold)
    }
}

impl Default for DetectionPostProcessor {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl<T, M> PostProcess<T, M> for DetectionPostProcessor
where
    T: Backend,
    M: FrameSize,
{
    type Output = Vec<Detection>;

    fn process(&self, raw: T, meta: &M) -> Vec<Detection> {
        let (width, height) = meta.frame_size();
        match raw.to_f32_vec() {
            Ok(values) => self.process_values(&values, width, height),
            Err(e) => {
                warn!(error = %e, shape = ?raw.shape(), "unreadable detection output, dropping frame");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_tensor::MockTensor;
    use crate::frame::FrameInfo;

    fn row(class_id: f32, confidence: f32, bbox: [f32; 4]) -> Vec<f32> {
        vec![0.0, class_id, confidence, bbox[0], bbox[1], bbox[2], bbox[3]]
    }

    fn rows(rows: &[Vec<f32>]) -> Vec<f32> {
        rows.concat()
    }

    #[test]
    fn test_iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox { xmin: 0, ymin: 0, xmax: 10, ymax: 10 };
        let b = BoundingBox { xmin: 20, ymin: 20, xmax: 30, ymax: 30 };
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), 0.0);

        let half = BoundingBox { xmin: 5, ymin: 0, xmax: 15, ymax: 10 };
        assert!((a.iou(&half) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_box_overlaps_nothing() {
        let point = BoundingBox { xmin: 3, ymin: 3, xmax: 3, ymax: 3 };
        assert_eq!(point.iou(&point), 0.0);
    }

    #[test]
    fn test_overlapping_box_is_suppressed() {
        let post = DetectionPostProcessor::new(0.5);
        let values = rows(&[
            row(1.0, 0.8, [0.0, 0.0, 0.5, 0.5]),
            row(1.0, 0.9, [0.0, 0.0, 0.5, 0.625]),
        ]);

        let detections = post.process_values(&values, 100, 100);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[0].bbox, BoundingBox { xmin: 0, ymin: 0, xmax: 50, ymax: 62 });
    }

    #[test]
    fn test_moderate_overlap_keeps_both_sorted() {
        let post = DetectionPostProcessor::new(0.5);
        // iou = 32 / 96
        let values = rows(&[
            row(2.0, 0.7, [0.0, 0.0, 0.125, 0.125]),
            row(3.0, 0.95, [0.0625, 0.0, 0.1875, 0.125]),
        ]);

        let detections = post.process_values(&values, 64, 64);
        let confidences: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.95, 0.7]);
        assert_eq!(detections[0].class_id, 3);
    }

    #[test]
    fn test_iou_equal_to_threshold_keeps_both() {
        let full = Detection {
            class_id: 1,
            confidence: 0.9,
            bbox: BoundingBox { xmin: 0, ymin: 0, xmax: 10, ymax: 10 },
        };
        let lower = Detection {
            class_id: 1,
            confidence: 0.8,
            bbox: BoundingBox { xmin: 0, ymin: 0, xmax: 10, ymax: 6 },
        };
        assert_eq!(full.bbox.iou(&lower.bbox), 0.6);

        let kept = non_max_suppression(vec![lower, full], 0.6);
        assert_eq!(kept, vec![full, lower]);

        let kept = non_max_suppression(vec![lower, full], 0.59);
        assert_eq!(kept, vec![full]);
    }

    #[test]
    fn test_suppression_ignores_class() {
        let post = DetectionPostProcessor::new(0.1);
        let values = rows(&[
            row(1.0, 0.6, [0.1, 0.1, 0.4, 0.4]),
            row(7.0, 0.5, [0.1, 0.1, 0.4, 0.4]),
        ]);
        let detections = post.process_values(&values, 200, 200);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let post = DetectionPostProcessor::new(0.5);
        let values = rows(&[
            row(1.0, 0.5, [0.0, 0.0, 0.1, 0.1]),
            row(1.0, 0.49, [0.5, 0.5, 0.6, 0.6]),
        ]);
        let detections = post.process_values(&values, 10, 10);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, 0.5);
    }

    #[test]
    fn test_everything_below_threshold_is_empty() {
        let post = DetectionPostProcessor::new(0.9);
        let values = rows(&[row(1.0, 0.2, [0.0, 0.0, 0.1, 0.1])]);
        assert!(post.process_values(&values, 10, 10).is_empty());
        assert!(post.process_values(&[], 10, 10).is_empty());
    }

    #[test]
    fn test_negative_batch_index_ends_rows() {
        let post = DetectionPostProcessor::new(0.1);
        let mut values = rows(&[row(1.0, 0.9, [0.0, 0.0, 0.1, 0.1])]);
        values.extend([-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        values.extend(row(2.0, 0.9, [0.5, 0.5, 0.9, 0.9]));

        let detections = post.process_values(&values, 100, 100);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
    }

    #[test]
    fn test_coordinates_are_truncated() {
        let post = DetectionPostProcessor::new(0.1);
        let values = rows(&[row(1.0, 0.9, [0.129, 0.5, 0.999, 0.75])]);
        let detections = post.process_values(&values, 300, 101);
        assert_eq!(
            detections[0].bbox,
            BoundingBox { xmin: 38, ymin: 50, xmax: 299, ymax: 75 }
        );
    }

    #[test]
    fn test_partial_row_is_malformed() {
        let post = DetectionPostProcessor::new(0.1);
        let mut values = rows(&[row(1.0, 0.9, [0.0, 0.0, 0.1, 0.1])]);
        values.push(0.0);
        assert!(post.process_values(&values, 10, 10).is_empty());
    }

    #[test]
    fn test_post_process_reads_backend_tensor() {
        let post = DetectionPostProcessor::default();
        let raw = MockTensor::new(vec![1, 1, 1, 7], row(4.0, 0.8, [0.25, 0.25, 0.75, 0.75]));

        let detections = post.process(raw, &FrameInfo::new(40, 20));
        assert_eq!(
            detections,
            vec![Detection {
                class_id: 4,
                confidence: 0.8,
                bbox: BoundingBox { xmin: 10, ymin: 5, xmax: 30, ymax: 15 },
            }]
        );
    }

    #[test]
    fn test_unreadable_tensor_yields_nothing() {
        let post = DetectionPostProcessor::default();
        let detections = post.process(MockTensor::unreadable(vec![1, 1, 100, 7]), &(640u32, 480u32));
        assert!(detections.is_empty());
    }
}
