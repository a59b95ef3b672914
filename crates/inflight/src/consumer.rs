//! The consumer side of a session: submit frames while slots are free, show
//! results strictly in correlation id order.
//!
//! [`run_ordered`] drives a session to completion against a [`FrameSink`];
//! [`ordered_results`] exposes the same loop as a [`Stream`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::Stream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::InferenceEngine;
use crate::error::PipelineError;
use crate::metrics::PipelineMetrics;
use crate::pipeline::{AsyncPipeline, Completed, PostProcess};

/// Where released results go, one at a time and in order.
pub trait FrameSink<O, M> {
    /// Presents one result.
    ///
    /// # Errors
    ///
    /// A sink error ends the run.
    fn show(&mut self, completed: Completed<O, M>) -> Result<(), PipelineError>;
}

impl<O, M, F> FrameSink<O, M> for F
where
    F: FnMut(Completed<O, M>) -> Result<(), PipelineError>,
{
    fn show(&mut self, completed: Completed<O, M>) -> Result<(), PipelineError> {
        self(completed)
    }
}

/// Requests an early end of a run, e.g. from a ctrl-c handler.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub session: Uuid,
    pub submitted: u64,
    pub shown: u64,
    /// Whether the run was stopped before every frame was shown
    pub interrupted: bool,
    pub metrics: PipelineMetrics,
}

/// The submit/collect state machine shared by [`run_ordered`] and
/// [`ordered_results`].
struct Driver<E, P, M, I>
where
    E: InferenceEngine,
    P: PostProcess<E::Output, M>,
    M: Send + 'static,
{
    pipeline: AsyncPipeline<E, P, M>,
    frames: I,
    stop: StopHandle,
    next_to_submit: u64,
    next_to_show: u64,
    exhausted: bool,
    finished: bool,
    interrupted: bool,
}

impl<E, P, M, I> Driver<E, P, M, I>
where
    E: InferenceEngine,
    P: PostProcess<E::Output, M>,
    M: Send + 'static,
    I: Iterator<Item = (E::Input, M)>,
{
    fn new(pipeline: AsyncPipeline<E, P, M>, frames: I, stop: StopHandle) -> Self {
        Self {
            pipeline,
            frames,
            stop,
            next_to_submit: 0,
            next_to_show: 0,
            exhausted: false,
            finished: false,
            interrupted: false,
        }
    }

    /// The next result in id order, or `None` once every frame has been
    /// shown, the run was stopped, or an error was returned.
    async fn next(&mut self) -> Option<Result<Completed<P::Output, M>, PipelineError>> {
        while !self.finished {
            if self.stop.is_stopped() {
                self.interrupted = true;
                self.finished = true;
                break;
            }
            if self.exhausted && self.next_to_show == self.next_to_submit {
                self.finished = true;
                break;
            }

            // checked before the lookup: with nothing in flight, every
            // submitted id is already buffered
            let idle = self.pipeline.in_flight() == 0;
            match self.pipeline.get_result(self.next_to_show) {
                Ok(Some(completed)) => {
                    self.next_to_show += 1;
                    return Some(Ok(completed));
                }
                Ok(None) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }

            if !self.exhausted && self.pipeline.is_ready() {
                match self.frames.next() {
                    Some((input, meta)) => {
                        self.pipeline.submit(input, self.next_to_submit, meta);
                        self.next_to_submit += 1;
                    }
                    None => self.exhausted = true,
                }
                continue;
            }

            if idle {
                warn!(
                    session = %self.pipeline.session_id(),
                    correlation_id = self.next_to_show,
                    "result missing with nothing in flight"
                );
                self.finished = true;
                return Some(Err(PipelineError::ResultLost {
                    correlation_id: self.next_to_show,
                }));
            }
            // bounded wait, also while draining, so a stop is seen within
            // one poll interval
            self.pipeline.await_any(self.pipeline.poll_interval()).await;
        }
        None
    }
}

/// Runs a session over `frames`, showing every result on `sink` in
/// submission order.
///
/// Frames are submitted as fast as slots free up, and a result is shown as
/// soon as it and every earlier one have completed. Setting `stop` ends the
/// run early: the session is closed and whatever is still in flight is
/// discarded.
///
/// # Errors
///
/// The first inference or sink failure, or [`PipelineError::ResultLost`] if a
/// submitted frame never produced a result. The session is closed before the
/// error is returned.
pub async fn run_ordered<E, P, M, I, S>(
    pipeline: AsyncPipeline<E, P, M>,
    frames: I,
    sink: &mut S,
    stop: &StopHandle,
    metrics_window: Duration,
) -> Result<RunSummary, PipelineError>
where
    E: InferenceEngine,
    P: PostProcess<E::Output, M>,
    M: Send + 'static,
    I: IntoIterator<Item = (E::Input, M)>,
    S: FrameSink<P::Output, M>,
{
    let session = pipeline.session_id();
    let mut metrics = PipelineMetrics::new(session, metrics_window);
    let mut driver = Driver::new(pipeline, frames.into_iter(), stop.clone());

    while let Some(result) = driver.next().await {
        let completed = result?;
        metrics.record(&completed);
        sink.show(completed)?;
    }

    let summary = RunSummary {
        session,
        submitted: driver.next_to_submit,
        shown: metrics.frames(),
        interrupted: driver.interrupted,
        metrics,
    };
    info!(
        %session,
        submitted = summary.submitted,
        shown = summary.shown,
        interrupted = summary.interrupted,
        fps = summary.metrics.fps(),
        "run finished"
    );
    Ok(summary)
}

/// Streams a session's results in submission order.
///
/// Frames are pulled from `frames` only while the stream is polled. The
/// stream ends after the last frame is yielded, after the first error, or
/// once `stop` is set; dropping it closes the session.
pub fn ordered_results<E, P, M, I>(
    pipeline: AsyncPipeline<E, P, M>,
    frames: I,
    stop: StopHandle,
) -> impl Stream<Item = Result<Completed<P::Output, M>, PipelineError>>
where
    E: InferenceEngine,
    P: PostProcess<E::Output, M>,
    M: Send + 'static,
    I: IntoIterator<Item = (E::Input, M)>,
{
    let driver = Driver::new(pipeline, frames.into_iter(), stop);
    futures::stream::unfold(driver, |mut driver| async move {
        driver.next().await.map(|item| (item, driver))
    })
}
