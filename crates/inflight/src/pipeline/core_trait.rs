/// # PostProcess
///
/// The transform a session applies to every raw engine output before
/// buffering it for the consumer. It runs on the task that served the
/// request, outside the slot-table lock, so a slow transform delays only its
/// own slot.
///
/// ## Type Parameters
///
/// * `R` - The raw engine output
/// * `M` - The per-frame metadata supplied at submission
///
/// ## Implementation Notes
///
/// Implementations must not fail: malformed raw output should map to an
/// empty result. A panic inside `process` is reported to the consumer as a
/// terminated task for that correlation id.
pub trait PostProcess<R, M>: Send + Sync + 'static {
    /// What the consumer receives.
    type Output: Send + 'static;

    /// Transforms one raw output. `meta` is the metadata submitted with the
    /// frame, still owned by the session.
    fn process(&self, raw: R, meta: &M) -> Self::Output;
}

/// Hands raw engine outputs to the consumer untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl<R, M> PostProcess<R, M> for Passthrough
where
    R: Send + 'static,
{
    type Output = R;

    fn process(&self, raw: R, _meta: &M) -> R {
        raw
    }
}

/// A [`PostProcess`] backed by a closure, see [`post_process_fn`].
#[derive(Debug, Clone, Copy)]
pub struct PostProcessFn<F>(F);

/// Wraps a closure as a [`PostProcess`] transform.
pub fn post_process_fn<F>(f: F) -> PostProcessFn<F> {
    PostProcessFn(f)
}

impl<R, M, O, F> PostProcess<R, M> for PostProcessFn<F>
where
    F: Fn(R, &M) -> O + Send + Sync + 'static,
    O: Send + 'static,
{
    type Output = O;

    fn process(&self, raw: R, meta: &M) -> O {
        (self.0)(raw, meta)
    }
}
