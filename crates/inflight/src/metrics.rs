use std::time::Duration;

use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::pipeline::Completed;

/// Throughput and latency of one session, as seen by the consumer.
///
/// Latency is measured from submission until the result is shown, so it
/// includes the time a finished result spends waiting for earlier ids.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    session: Uuid,
    window: Duration,
    started_at: Instant,
    frames: u64,
    total_latency: Duration,
    max_latency: Duration,

    window_started_at: Instant,
    window_frames: u64,
}

impl PipelineMetrics {
    pub fn new(session: Uuid, window: Duration) -> Self {
        let now = Instant::now();
        Self {
            session,
            window,
            started_at: now,
            frames: 0,
            total_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            window_started_at: now,
            window_frames: 0,
        }
    }

    /// Records a result being shown now.
    pub fn record<O, M>(&mut self, completed: &Completed<O, M>) {
        let now = Instant::now();
        let latency = now.saturating_duration_since(completed.submitted_at);
        self.frames += 1;
        self.total_latency += latency;
        self.max_latency = self.max_latency.max(latency);
        self.window_frames += 1;

        let elapsed = now.saturating_duration_since(self.window_started_at);
        if elapsed >= self.window {
            info!(
                session = %self.session,
                fps = self.window_frames as f64 / elapsed.as_secs_f64(),
                mean_latency_ms = self.mean_latency().as_secs_f64() * 1000.0,
                frames = self.frames,
                "throughput"
            );
            self.window_started_at = now;
            self.window_frames = 0;
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames shown per second since the session started.
    pub fn fps(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.frames as f64 / elapsed
    }

    pub fn mean_latency(&self) -> Duration {
        match self.frames {
            0 => Duration::ZERO,
            n => self.total_latency.div_f64(n as f64),
        }
    }

    pub fn max_latency(&self) -> Duration {
        self.max_latency
    }
}
