use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::slot::{SlotState, SlotTable};
use super::{Completed, PostProcess};
use crate::config::PipelineConfig;
use crate::device::Device;
use crate::engine::InferenceEngine;
use crate::error::PipelineError;

/// State shared between the consumer and the tasks serving each slot.
struct Shared<E, P, M>
where
    E: InferenceEngine,
    P: PostProcess<E::Output, M>,
{
    session: Uuid,
    engine: Arc<E>,
    post_process: P,
    device: Device,

    /// Slot records and buffered results, guarded together
    table: Mutex<SlotTable<P::Output, M>>,

    /// Signalled every time a slot completes
    completion: Notify,

    /// Bumped under the table lock by every completion. A stored `Notify`
    /// permit can outlive the completion it was for, so waiters compare this
    /// instead of trusting a wakeup
    completions: AtomicU64,

    /// Cleared when the session is closed; late completions are then dropped
    running: AtomicBool,
}

/// # AsyncPipeline
///
/// Multiplexes up to `capacity` concurrent inference requests over a single
/// engine and hands results back one correlation id at a time.
///
/// A session is driven by exactly one consumer: it checks
/// [`is_ready`](Self::is_ready), [`submit`](Self::submit)s a frame under the
/// next correlation id, and asks for results strictly in id order with
/// [`get_result`](Self::get_result). Engine completions arrive in whatever
/// order inference latency dictates; they are buffered until asked for.
///
/// All methods must be called from within a Tokio runtime.
///
/// # Example
///
/// ```ignore
/// let pipeline = AsyncPipeline::new(engine, Passthrough, &PipelineConfig::default())?;
/// pipeline.submit(frame, 0, ());
/// pipeline.await_all().await;
/// let first = pipeline.get_result(0)?.expect("finished after await_all");
/// ```
pub struct AsyncPipeline<E, P, M>
where
    E: InferenceEngine,
    P: PostProcess<E::Output, M>,
    M: Send + 'static,
{
    shared: Arc<Shared<E, P, M>>,
    poll_interval: Duration,
}

impl<E, P, M> AsyncPipeline<E, P, M>
where
    E: InferenceEngine,
    P: PostProcess<E::Output, M>,
    M: Send + 'static,
{
    /// Starts a session.
    ///
    /// The device and the slot count are resolved here, once: the configured
    /// device must be one the engine offers, and `max_num_requests = 0` is
    /// replaced by the engine's preferred request count.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or a device the engine does not offer.
    pub fn new(
        engine: impl Into<Arc<E>>,
        post_process: P,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let engine = engine.into();
        let requested = config.requested_device()?;
        let device = Device::resolve(requested.as_ref(), &engine.available_devices())?;

        let capacity = match config.max_num_requests {
            0 => engine.optimal_request_count().max(1),
            n => n,
        };

        let session = Uuid::new_v4();
        info!(
            %session,
            engine = engine.name(),
            %device,
            capacity,
            "inference session started"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                session,
                engine,
                post_process,
                device,
                table: Mutex::new(SlotTable::new(capacity)),
                completion: Notify::new(),
                completions: AtomicU64::new(0),
                running: AtomicBool::new(true),
            }),
            poll_interval: config.poll_interval(),
        })
    }

    /// Hands `payload` to a free slot and starts inference on it.
    ///
    /// Never blocks.
    ///
    /// # Panics
    ///
    /// When no slot is free, or when `correlation_id` is not greater than the
    /// previously submitted id. Both are caller bugs: check
    /// [`is_ready`](Self::is_ready) first.
    pub fn submit(&self, payload: E::Input, correlation_id: u64, meta: M) {
        let mut table = self.shared.table.lock();
        let Some(slot) = table.first_free() else {
            panic!(
                "submit({correlation_id}) called while all {} slots are busy; check is_ready() first",
                table.capacity()
            );
        };
        table.admit(correlation_id);
        let submitted_at = Instant::now();

        // the task cannot report back before the lock is released, so the
        // handle is always recorded first
        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            shared.serve(slot, correlation_id, payload, meta, submitted_at).await;
        });
        table.occupy(slot, correlation_id, task);

        debug!(session = %self.shared.session, slot, correlation_id, "submitted");
    }

    /// Whether at least one slot is free.
    ///
    /// A slot frees as soon as its request completes, even when the result
    /// still waits behind an earlier id.
    pub fn is_ready(&self) -> bool {
        let mut table = self.shared.table.lock();
        table.reap_terminated();
        table.first_free().is_some()
    }

    /// Waits until some busy slot completes or `timeout` elapses.
    ///
    /// Returns at once when nothing is in flight. A completion that happened
    /// before the call, and was already collected, does not end the wait.
    pub async fn await_any(&self, timeout: Duration) {
        let seen = {
            let table = self.shared.table.lock();
            if table.busy_count() == 0 {
                return;
            }
            self.shared.completions.load(Ordering::SeqCst)
        };
        let deadline = Instant::now() + timeout;
        while self.shared.completions.load(Ordering::SeqCst) == seen {
            if tokio::time::timeout_at(deadline, self.shared.completion.notified())
                .await
                .is_err()
            {
                trace!(session = %self.shared.session, "await_any timed out");
                break;
            }
        }
        self.shared.table.lock().reap_terminated();
    }

    /// Waits until no slot is busy.
    pub async fn await_all(&self) {
        loop {
            {
                let mut table = self.shared.table.lock();
                table.reap_terminated();
                if table.busy_count() == 0 {
                    return;
                }
            }
            let _ = tokio::time::timeout(self.poll_interval, self.shared.completion.notified()).await;
        }
    }

    /// Takes the result for exactly `correlation_id`, if it has completed.
    ///
    /// `Ok(None)` only means "not yet": the request may still be in flight.
    /// A hit removes the entry, so every result is handed out once.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Inference`] when the engine failed this request.
    pub fn get_result(
        &self,
        correlation_id: u64,
    ) -> Result<Option<Completed<P::Output, M>>, PipelineError> {
        let mut table = self.shared.table.lock();
        table.reap_terminated();
        match table.take(correlation_id) {
            None => Ok(None),
            Some(Ok(completed)) => Ok(Some(completed)),
            Some(Err(source)) => Err(PipelineError::Inference {
                correlation_id,
                source,
            }),
        }
    }

    /// Whether some result is buffered and waiting to be collected.
    pub fn has_completed_request(&self) -> bool {
        let mut table = self.shared.table.lock();
        table.reap_terminated();
        table.pending_count() > 0
    }

    /// Number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.shared.table.lock().capacity()
    }

    /// Number of busy slots.
    pub fn in_flight(&self) -> usize {
        self.shared.table.lock().busy_count()
    }

    /// Number of buffered results.
    pub fn pending(&self) -> usize {
        self.shared.table.lock().pending_count()
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.shared.table.lock().states()
    }

    /// The device resolved at session start.
    pub fn device(&self) -> &Device {
        &self.shared.device
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.session
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Ends the session.
    ///
    /// Requests still in flight run to completion on the engine; their
    /// results are discarded, as is anything buffered and not yet collected.
    pub fn close(self) {
        drop(self)
    }

    fn shutdown(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let (in_flight, discarded) = {
            let mut table = self.shared.table.lock();
            (table.busy_count(), table.discard_pending())
        };
        self.shared.completion.notify_waiters();
        info!(
            session = %self.shared.session,
            in_flight,
            discarded,
            "inference session closed"
        );
    }
}

impl<E, P, M> Shared<E, P, M>
where
    E: InferenceEngine,
    P: PostProcess<E::Output, M>,
    M: Send + 'static,
{
    /// Runs one request and acts as its completion handler.
    async fn serve(
        &self,
        slot: usize,
        correlation_id: u64,
        payload: E::Input,
        meta: M,
        submitted_at: Instant,
    ) {
        let outcome = self
            .engine
            .infer(&self.device, payload)
            .await
            .map(|raw| {
                let output = self.post_process.process(raw, &meta);
                Completed {
                    correlation_id,
                    slot,
                    output,
                    meta,
                    submitted_at,
                    completed_at: Instant::now(),
                }
            });

        {
            let mut table = self.table.lock();
            table.release(slot, correlation_id);
            self.completions.fetch_add(1, Ordering::SeqCst);
            if self.running.load(Ordering::SeqCst) {
                debug!(session = %self.session, slot, correlation_id, ok = outcome.is_ok(), "completed");
                table.store(correlation_id, outcome);
            } else {
                debug!(session = %self.session, slot, correlation_id, "session closed, discarding result");
            }
        }
        self.completion.notify_one();
    }
}

/// Closes the session, see [`AsyncPipeline::close`].
impl<E, P, M> Drop for AsyncPipeline<E, P, M>
where
    E: InferenceEngine,
    P: PostProcess<E::Output, M>,
    M: Send + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::pipeline::{Passthrough, post_process_fn};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Sleeps for the requested number of milliseconds, then echoes the input.
    struct SleepyEngine {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SleepyEngine {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InferenceEngine for SleepyEngine {
        type Input = u64;
        type Output = u64;

        fn name(&self) -> &str {
            "sleepy"
        }

        fn available_devices(&self) -> Vec<Device> {
            vec![Device::Cpu]
        }

        fn optimal_request_count(&self) -> usize {
            3
        }

        async fn infer(&self, _device: &Device, millis: u64) -> Result<u64, EngineError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            if millis == 13 {
                return Err(EngineError::inference("unlucky"));
            }
            if millis == 17 {
                panic!("engine crashed");
            }
            Ok(millis)
        }
    }

    fn config(max_num_requests: usize) -> PipelineConfig {
        PipelineConfig {
            max_num_requests,
            ..Default::default()
        }
    }

    fn pipeline(max_num_requests: usize) -> AsyncPipeline<SleepyEngine, Passthrough, ()> {
        AsyncPipeline::new(SleepyEngine::new(), Passthrough, &config(max_num_requests)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_requests_defers_to_engine() {
        let pipeline = pipeline(0);
        assert_eq!(pipeline.capacity(), 3);
        assert_eq!(pipeline.device(), &Device::Cpu);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_device_fails_session_start() {
        let config = PipelineConfig {
            device: Some("GPU".into()),
            ..Default::default()
        };
        let result = AsyncPipeline::<SleepyEngine, Passthrough, ()>::new(SleepyEngine::new(), Passthrough, &config);
        assert!(matches!(result, Err(PipelineError::DeviceUnavailable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_ready_false_only_when_all_slots_busy() {
        let pipeline = pipeline(2);
        assert!(pipeline.is_ready());

        pipeline.submit(30, 0, ());
        assert!(pipeline.is_ready());
        pipeline.submit(10, 1, ());
        assert!(!pipeline.is_ready());
        assert_eq!(
            pipeline.slot_states(),
            vec![
                SlotState::Busy { correlation_id: 0 },
                SlotState::Busy { correlation_id: 1 }
            ]
        );

        // id 1 completes first; its slot frees although id 0 is still pending
        pipeline.await_any(Duration::from_secs(1)).await;
        assert!(pipeline.is_ready());
        assert_eq!(pipeline.slot_states()[1], SlotState::Free);
        assert!(pipeline.get_result(0).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "check is_ready() first")]
    async fn test_submit_when_full_fails_fast() {
        let pipeline = pipeline(1);
        pipeline.submit(10, 0, ());
        pipeline.submit(10, 1, ());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_completion_is_buffered() {
        let pipeline = pipeline(2);
        pipeline.submit(30, 0, ());
        pipeline.submit(10, 1, ());

        pipeline.await_any(Duration::from_secs(1)).await;
        assert!(pipeline.get_result(0).unwrap().is_none());
        assert!(pipeline.has_completed_request());
        assert_eq!(pipeline.pending(), 1);

        pipeline.await_all().await;
        let first = pipeline.get_result(0).unwrap().unwrap();
        let second = pipeline.get_result(1).unwrap().unwrap();
        assert_eq!((first.output, first.slot), (30, 0));
        assert_eq!((second.output, second.slot), (10, 1));
        assert!(first.completed_at > second.completed_at);
        assert!(!pipeline.has_completed_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_is_handed_out_once() {
        let pipeline = pipeline(1);
        pipeline.submit(5, 0, ());
        pipeline.await_all().await;

        assert!(pipeline.get_result(0).unwrap().is_some());
        assert!(pipeline.get_result(0).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_slots_never_exceed_capacity() {
        let engine = Arc::new(SleepyEngine::new());
        let pipeline: AsyncPipeline<SleepyEngine, Passthrough, ()> =
            AsyncPipeline::new(engine.clone(), Passthrough, &config(3)).unwrap();

        let mut next_id = 0;
        let mut shown = 0;
        while shown < 12 {
            if let Some(done) = pipeline.get_result(shown).unwrap() {
                assert_eq!(done.correlation_id, shown);
                shown += 1;
                continue;
            }
            if next_id < 12 && pipeline.is_ready() {
                pipeline.submit(5 + (next_id * 3) % 7, next_id, ());
                next_id += 1;
            } else {
                assert!(pipeline.in_flight() <= 3);
                pipeline.await_any(pipeline.poll_interval()).await;
            }
        }
        assert_eq!(engine.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_failure_is_reported_for_its_id() {
        let pipeline = pipeline(2);
        pipeline.submit(13, 0, ());
        pipeline.submit(5, 1, ());
        pipeline.await_all().await;

        let err = pipeline.get_result(0).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Inference { correlation_id: 0, source: EngineError::Inference { .. } }
        ));
        assert!(pipeline.get_result(1).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_engine_does_not_wedge_the_pool() {
        let pipeline = pipeline(1);
        pipeline.submit(17, 0, ());
        pipeline.await_all().await;

        assert_eq!(pipeline.slot_states(), vec![SlotState::Free]);
        let err = pipeline.get_result(0).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Inference { source: EngineError::TaskTerminated { slot: 0 }, .. }
        ));
        assert!(pipeline.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_process_sees_metadata() {
        let post = post_process_fn(|raw: u64, label: &&'static str| format!("{label}:{raw}"));
        let pipeline: AsyncPipeline<SleepyEngine, _, _> =
            AsyncPipeline::new(SleepyEngine::new(), post, &config(1)).unwrap();
        pipeline.submit(4, 0, "frame");
        pipeline.await_all().await;

        let done = pipeline.get_result(0).unwrap().unwrap();
        assert_eq!(done.output, "frame:4");
        assert_eq!(done.meta, "frame");
        assert!(done.inference_latency() >= Duration::from_millis(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_session_discards_in_flight_results() {
        let engine = Arc::new(SleepyEngine::new());
        let pipeline: AsyncPipeline<SleepyEngine, Passthrough, ()> =
            AsyncPipeline::new(engine.clone(), Passthrough, &config(2)).unwrap();
        let shared = pipeline.shared.clone();

        pipeline.submit(20, 0, ());
        pipeline.submit(40, 1, ());
        pipeline.close();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let table = shared.table.lock();
        assert_eq!(table.busy_count(), 0);
        assert_eq!(table.pending_count(), 0);
        assert_eq!(engine.current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_any_returns_immediately_when_idle() {
        let pipeline = pipeline(1);
        let before = Instant::now();
        pipeline.await_any(Duration::from_secs(5)).await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_any_ignores_already_collected_completion() {
        let pipeline = pipeline(1);
        pipeline.submit(5, 0, ());
        // completes with nobody waiting, leaving a wakeup behind
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pipeline.get_result(0).unwrap().is_some());

        pipeline.submit(50, 1, ());
        let before = Instant::now();
        pipeline.await_any(Duration::from_secs(1)).await;
        assert_eq!(Instant::now() - before, Duration::from_millis(50));
        assert!(pipeline.has_completed_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_any_still_times_out() {
        let pipeline = pipeline(1);
        pipeline.submit(500, 0, ());
        let before = Instant::now();
        pipeline.await_any(Duration::from_millis(20)).await;
        assert_eq!(Instant::now() - before, Duration::from_millis(20));
        assert_eq!(pipeline.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_counts_from_submit() {
        let pipeline = pipeline(1);
        let before = Instant::now();
        pipeline.submit(4, 0, ());
        // the serve task has not been polled yet
        tokio::time::advance(Duration::from_millis(7)).await;
        pipeline.await_all().await;

        let done = pipeline.get_result(0).unwrap().unwrap();
        assert_eq!(done.submitted_at, before);
        assert!(done.inference_latency() >= Duration::from_millis(11));
    }
}
