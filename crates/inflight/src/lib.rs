//! # Inflight
//!
//! Asynchronous, **in**-order in**f**erence pipe**l**ining: keep several
//! inference requests in **flight** on one engine while handing results back
//! in exactly the order their frames were submitted.
//!
//! ## Overview
//!
//! Frame-by-frame inference leaves an accelerator idle while the host
//! decodes, pre-processes and displays. This library multiplexes up to N
//! concurrent requests over a single engine through a fixed pool of request
//! slots. Requests finish in whatever order their latency dictates; results
//! are buffered and released strictly by correlation id.
//!
//! Key components include:
//!
//! - [`AsyncPipeline`], the slot pool and ordered result buffer
//! - [`run_ordered`] and [`ordered_results`], the consumer loop that keeps
//!   every slot busy and shows results in order
//! - Post-processors for SSD-style detection and binary segmentation outputs
//! - Overlay rendering of detections and masks onto RGB frames
//!
//! ## Architecture
//!
//! ### Engine
//!
//! The [`InferenceEngine`] trait is the only thing a model integration has
//! to provide: an async `infer` call plus the devices it can run on.
//!
//! ### Post-processing
//!
//! The [`PostProcess`] trait runs on each raw output as soon as it is ready,
//! before the result is buffered. Raw outputs are read through the
//! [`Backend`] tensor trait, so the same post-processor works for plain
//! `Vec<f32>` buffers and for tensor libraries.
//!
//! ### Ordering
//!
//! Correlation ids are chosen by the consumer and must strictly increase.
//! The consumer only ever asks for the next id it wants to show, so
//! out-of-order completions wait in the buffer.
//!
//! ## Features
//!
//! - **candle** - Reads candle tensors as raw engine outputs
//! - **burn** - Reads burn float tensors as raw engine outputs
//!

pub mod backend;
pub mod config;
pub mod consumer;
pub mod detection;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod overlay;
pub mod pipeline;
pub mod segmentation;

pub use backend::Backend;
pub use config::PipelineConfig;
pub use consumer::{FrameSink, RunSummary, StopHandle, ordered_results, run_ordered};
pub use detection::{BoundingBox, Detection, DetectionPostProcessor};
pub use device::Device;
pub use engine::InferenceEngine;
pub use error::{ConfigError, EngineError, PipelineError};
pub use frame::{FrameInfo, FrameSize};
pub use metrics::PipelineMetrics;
pub use pipeline::{AsyncPipeline, Completed, Passthrough, PostProcess, SlotState, post_process_fn};
pub use segmentation::{Mask, SegmentationPostProcessor};

/// Convenient imports for driving a session.
pub mod prelude {
    pub use crate::{
        AsyncPipeline, Backend, Completed, Device, EngineError, FrameSink, InferenceEngine,
        PipelineConfig, PipelineError, PostProcess, StopHandle,
    };
}
