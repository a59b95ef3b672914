use async_trait::async_trait;

use crate::device::Device;
use crate::error::EngineError;

/// # InferenceEngine
///
/// The opaque runtime a session drives. An engine owns a compiled model and
/// turns one input into one raw output; it decides nothing about ordering or
/// concurrency. The session may call [`infer`](InferenceEngine::infer) up to
/// its slot count times concurrently, so implementations must tolerate
/// overlapping calls.
///
/// ```ignore
/// use inflight::{Device, EngineError, InferenceEngine};
/// use async_trait::async_trait;
///
/// struct Doubler;
///
/// #[async_trait]
/// impl InferenceEngine for Doubler {
///     type Input = Vec<f32>;
///     type Output = Vec<f32>;
///
///     fn name(&self) -> &str { "doubler" }
///
///     fn available_devices(&self) -> Vec<Device> { vec![Device::Cpu] }
///
///     async fn infer(&self, _device: &Device, input: Vec<f32>) -> Result<Vec<f32>, EngineError> {
///         Ok(input.into_iter().map(|v| v * 2.0).collect())
///     }
/// }
/// ```
#[async_trait]
pub trait InferenceEngine: Send + Sync + 'static {
    /// What a frame looks like once it is ready for the model.
    type Input: Send + 'static;

    /// The raw output tensor, before post-processing.
    type Output: Send + 'static;

    /// Human readable engine name, used in logs.
    fn name(&self) -> &str;

    /// Devices the engine can run on. Queried once per session.
    fn available_devices(&self) -> Vec<Device>;

    /// The number of in-flight requests the engine would pick on its own.
    ///
    /// Consulted only when a session is configured with
    /// `max_num_requests = 0`.
    fn optimal_request_count(&self) -> usize {
        1
    }

    /// Runs one inference on `device`.
    ///
    /// # Errors
    ///
    /// Any failure is fatal for the session that issued the request.
    async fn infer(&self, device: &Device, input: Self::Input) -> Result<Self::Output, EngineError>;
}
