//! Session configuration.
//!
//! Every knob is a plain value with a default, so callers can build a
//! [`PipelineConfig`] in code or read one from a TOML file:
//!
//! ```toml
//! device = "GPU"
//! max_num_requests = 0
//! confidence_threshold = 0.5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::device::Device;
use crate::error::ConfigError;

/// IoU above which the lower-scoring of two detections is suppressed.
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.6;

/// How long [`await_any`](crate::pipeline::AsyncPipeline::await_any) waits
/// before re-checking the slot table.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Device name such as `CPU`, `GPU.0` or `MULTI:GPU,CPU`. Unset means
    /// "pick one from what the engine offers".
    pub device: Option<String>,
    /// Number of request slots. `0` lets the engine choose.
    pub max_num_requests: usize,
    pub poll_interval_ms: u64,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Cut-off applied to segmentation probabilities.
    pub mask_threshold: f32,
    /// Whether segmentation outputs are logits that need a sigmoid first.
    pub mask_apply_sigmoid: bool,
    /// How often throughput is logged, in milliseconds.
    pub metrics_window_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device: None,
            max_num_requests: 0,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            confidence_threshold: 0.5,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            mask_threshold: 0.5,
            mask_apply_sigmoid: false,
            metrics_window_ms: 1000,
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("nms_threshold", self.nms_threshold),
            ("mask_threshold", self.mask_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    message: format!("{name} must be within [0, 1], got {value}"),
                });
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "poll_interval_ms must be greater than 0".to_string(),
            });
        }
        if self.metrics_window_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "metrics_window_ms must be greater than 0".to_string(),
            });
        }
        self.requested_device()?;
        Ok(())
    }

    /// The parsed device request, if any.
    pub fn requested_device(&self) -> Result<Option<Device>, ConfigError> {
        self.device.as_deref().map(str::parse).transpose()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_millis(self.metrics_window_ms)
    }
}
