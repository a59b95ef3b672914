//! Error types for inference sessions.
//!
//! Failures are split by who produces them: the engine ([`EngineError`]),
//! the configuration layer ([`ConfigError`]) and the session as seen by the
//! consumer ([`PipelineError`]). Calling [`AsyncPipeline::submit`] while no
//! slot is free is a caller bug and panics instead of producing an error.
//!
//! [`AsyncPipeline::submit`]: crate::pipeline::AsyncPipeline::submit

use thiserror::Error;

/// Errors reported by an [`InferenceEngine`](crate::engine::InferenceEngine).
#[derive(Error, Debug)]
pub enum EngineError {
    /// The device the model was compiled for went away.
    #[error("device {device} is not available")]
    DeviceUnavailable {
        /// Name of the device, as the engine spells it.
        device: String,
    },

    /// The engine rejected or failed a request.
    #[error("inference failed: {message}")]
    Inference {
        /// Engine supplied description.
        message: String,
    },

    /// The task serving a slot ended without reporting a result, most likely
    /// because the engine or the post-processing transform panicked.
    #[error("inference task for slot {slot} terminated without a result")]
    TaskTerminated {
        /// Index of the slot whose task died.
        slot: usize,
    },
}

impl EngineError {
    /// Shorthand for [`EngineError::Inference`].
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
        }
    }
}

/// Errors raised while loading or validating a
/// [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML or does not match the schema.
    #[error("failed to parse configuration")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its allowed range.
    #[error("invalid configuration: {message}")]
    Invalid {
        /// Which value and why.
        message: String,
    },

    /// A device name could not be parsed.
    #[error("unrecognized device name `{0}`")]
    UnknownDevice(String),
}

/// Errors surfaced to the consumer of an inference session.
///
/// Every variant is fatal for the session: the reference behaviour is to log
/// and stop rather than retry, since recovering usually means reloading the
/// model on another device.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The engine failed while serving the request with this correlation id.
    #[error("inference request {correlation_id} failed")]
    Inference {
        /// Correlation id of the failed submission.
        correlation_id: u64,
        /// What the engine reported.
        #[source]
        source: EngineError,
    },

    /// The requested compute device is not offered by the engine.
    #[error("device `{requested}` is not available (available: {available})")]
    DeviceUnavailable {
        /// The device asked for.
        requested: String,
        /// Comma separated list of devices the engine reported.
        available: String,
    },

    /// The engine reported no devices at all.
    #[error("engine reports no available devices")]
    NoDevices,

    /// The display sink refused a frame.
    #[error("sink failed to present frame {correlation_id}: {message}")]
    Sink {
        /// Correlation id of the frame being presented.
        correlation_id: u64,
        /// Sink supplied description.
        message: String,
    },

    /// A submitted request left the pool without a result.
    #[error("result for request {correlation_id} was lost")]
    ResultLost {
        /// Correlation id the consumer was waiting for.
        correlation_id: u64,
    },

    /// Configuration problem detected at session start.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_inference_error_keeps_engine_source() {
        let err = PipelineError::Inference {
            correlation_id: 7,
            source: EngineError::inference("out of memory"),
        };

        assert_eq!(err.to_string(), "inference request 7 failed");
        let source = err.source().expect("engine error is the source");
        assert_eq!(source.to_string(), "inference failed: out of memory");
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err: PipelineError = ConfigError::UnknownDevice("TPU".into()).into();
        assert_eq!(err.to_string(), "unrecognized device name `TPU`");
    }
}
