use std::time::Duration;

use async_trait::async_trait;
use candle_core::{Device as CandleDevice, Tensor};
use image::RgbImage;
use image::imageops::{self, FilterType};
use inflight::{Device, EngineError, InferenceEngine};
use rand::{Rng, thread_rng};

pub const INPUT_SIZE: u32 = 300;

/// Rows the detector head always emits; unused rows are terminated with a
/// negative batch index.
const MAX_DETECTIONS: usize = 16;

/// Stands in for a compiled SSD detector: sleeps for a random latency and
/// emits a handful of random boxes in the `[1, 1, N, 7]` layout.
pub struct SimulatedDetector {
    min_latency: Duration,
    max_latency: Duration,
}

impl SimulatedDetector {
    pub fn new(min_latency: Duration, max_latency: Duration) -> Self {
        Self {
            min_latency,
            max_latency: max_latency.max(min_latency),
        }
    }
}

/// Resizes a frame to the detector resolution and lays it out as CHW floats.
pub fn preprocess(frame: &RgbImage) -> candle_core::Result<Tensor> {
    let resized = imageops::resize(frame, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let size = INPUT_SIZE as usize;
    Tensor::from_vec(resized.into_raw(), (size, size, 3), &CandleDevice::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(candle_core::DType::F32)
}

fn random_rows() -> Vec<f32> {
    let mut rng = thread_rng();
    let count = rng.gen_range(0..MAX_DETECTIONS);
    let mut rows = Vec::with_capacity(MAX_DETECTIONS * 7);
    for _ in 0..count {
        let (x, y) = (rng.gen_range(0.0..0.8f32), rng.gen_range(0.0..0.8f32));
        let (w, h) = (rng.gen_range(0.05..0.2f32), rng.gen_range(0.05..0.2f32));
        rows.extend([
            0.0,
            rng.gen_range(0..8) as f32,
            rng.gen_range(0.0..1.0f32),
            x,
            y,
            x + w,
            y + h,
        ]);
    }
    rows.resize(MAX_DETECTIONS * 7, -1.0);
    rows
}

#[async_trait]
impl InferenceEngine for SimulatedDetector {
    type Input = Tensor;
    type Output = Tensor;

    fn name(&self) -> &str {
        "simulated-ssd"
    }

    fn available_devices(&self) -> Vec<Device> {
        vec![Device::Cpu, Device::Gpu(Some(0))]
    }

    fn optimal_request_count(&self) -> usize {
        4
    }

    async fn infer(&self, _device: &Device, input: Tensor) -> Result<Tensor, EngineError> {
        if input.dims() != [3, INPUT_SIZE as usize, INPUT_SIZE as usize] {
            return Err(EngineError::inference(format!(
                "expected a 3x{INPUT_SIZE}x{INPUT_SIZE} input, got {:?}",
                input.dims()
            )));
        }

        let latency = thread_rng().gen_range(self.min_latency..=self.max_latency);
        tokio::time::sleep(latency).await;

        Tensor::from_vec(random_rows(), (1, 1, MAX_DETECTIONS, 7), &CandleDevice::Cpu)
            .map_err(|e| EngineError::inference(e.to_string()))
    }
}
