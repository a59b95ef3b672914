//! Binary segmentation post-processing.
//!
//! Segmentation heads emit a single-channel map whose last two dimensions are
//! height and width, e.g. `[1, 1, H, W]`. Values are probabilities, or logits
//! when the head has no final activation.

use tracing::warn;

use crate::backend::Backend;
use crate::config::PipelineConfig;
use crate::pipeline::PostProcess;

/// A binary mask in model resolution. `data` is row-major with one byte per
/// pixel, `1` where the class is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Mask {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the pixel at `(x, y)` is set. Out of range reads as unset.
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[(y * self.width + x) as usize] != 0
    }

    /// Number of set pixels.
    pub fn coverage(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationPostProcessor {
    threshold: f32,
    apply_sigmoid: bool,
}

impl SegmentationPostProcessor {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            apply_sigmoid: false,
        }
    }

    /// Treat the raw map as logits.
    pub fn with_sigmoid(mut self, apply_sigmoid: bool) -> Self {
        self.apply_sigmoid = apply_sigmoid;
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.mask_threshold).with_sigmoid(config.mask_apply_sigmoid)
    }

    /// Thresholds a row-major `height` x `width` map. A pixel is set when its
    /// probability is strictly greater than the threshold.
    pub fn process_values(&self, values: &[f32], width: u32, height: u32) -> Mask {
        if values.is_empty() || values.len() != width as usize * height as usize {
            warn!(
                len = values.len(),
                width, height, "segmentation output does not match its shape, dropping frame"
            );
            return Mask::default();
        }

        let data = values
            .iter()
            .map(|&v| if self.apply_sigmoid { sigmoid(v) } else { v })
            .map(|p| u8::from(p > self.threshold))
            .collect();
        Mask { width, height, data }
    }
}

impl Default for SegmentationPostProcessor {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl<T, M> PostProcess<T, M> for SegmentationPostProcessor
where
    T: Backend,
{
    type Output = Mask;

    fn process(&self, raw: T, _meta: &M) -> Mask {
        let shape = raw.shape();
        let &[.., height, width] = shape.as_slice() else {
            warn!(?shape, "segmentation output needs at least two dimensions");
            return Mask::default();
        };
        match raw.to_f32_vec() {
            Ok(values) => self.process_values(&values, width as u32, height as u32),
            Err(e) => {
                warn!(error = %e, ?shape, "unreadable segmentation output, dropping frame");
                Mask::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_tensor::MockTensor;

    #[test]
    fn test_threshold_is_exclusive() {
        let post = SegmentationPostProcessor::new(0.5);
        let mask = post.process_values(&[0.2, 0.5, 0.51, 0.9, 0.0, 1.0], 3, 2);

        assert_eq!(mask.data, vec![0, 0, 1, 1, 0, 1]);
        assert!(mask.get(2, 0));
        assert!(!mask.get(0, 1));
        assert!(!mask.get(3, 0));
        assert_eq!(mask.coverage(), 3);
    }

    #[test]
    fn test_sigmoid_maps_logits() {
        let post = SegmentationPostProcessor::new(0.5).with_sigmoid(true);
        let mask = post.process_values(&[-3.0, 0.0, 0.1, 4.0], 2, 2);
        assert_eq!(mask.data, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_reads_last_two_dims_as_height_and_width() {
        let post = SegmentationPostProcessor::default();
        let raw = MockTensor::new(vec![1, 1, 2, 3], vec![0.9, 0.1, 0.1, 0.1, 0.1, 0.9]);

        let mask = post.process(raw, &());
        assert_eq!((mask.width, mask.height), (3, 2));
        assert!(mask.get(0, 0));
        assert!(mask.get(2, 1));
    }

    #[test]
    fn test_shape_mismatch_yields_empty_mask() {
        let post = SegmentationPostProcessor::default();
        let raw = MockTensor::new(vec![1, 2, 2], vec![0.9; 3]);
        assert!(post.process(raw, &()).is_empty());

        let flat = MockTensor::new(vec![4], vec![0.9; 4]);
        assert!(post.process(flat, &()).is_empty());
        assert!(post.process_values(&[], 0, 0).is_empty());
    }

    #[test]
    fn test_unreadable_tensor_yields_empty_mask() {
        let post = SegmentationPostProcessor::default();
        assert!(post.process(MockTensor::unreadable(vec![1, 4, 4]), &()).is_empty());
    }
}
