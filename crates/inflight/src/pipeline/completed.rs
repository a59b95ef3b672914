use tokio::time::Instant;

/// A processed result waiting to be collected, or handed out by
/// [`AsyncPipeline::get_result`](super::AsyncPipeline::get_result).
#[derive(Debug)]
pub struct Completed<O, M> {
    /// The id the consumer submitted the frame under.
    pub correlation_id: u64,

    /// The slot that served the request.
    pub slot: usize,

    /// The post-processed engine output.
    pub output: O,

    /// The metadata submitted alongside the frame.
    pub meta: M,

    /// When the frame was submitted.
    pub submitted_at: Instant,

    /// When the engine finished and the output was post-processed.
    pub completed_at: Instant,
}

impl<O, M> Completed<O, M> {
    /// Time spent between submission and completion.
    pub fn inference_latency(&self) -> std::time::Duration {
        self.completed_at.saturating_duration_since(self.submitted_at)
    }
}
