//! Full-fidelity renderer with background generation
//!
//! State per instance: `Idle -> Generating -> Ready`, or straight to `Ready`
//! on a cache hit at construction. At most one generation thread exists per
//! renderer; requests arriving while it runs attach their callback to it.

use super::generator::CompositeGenerator;
use super::source::{panic_message, CompositeSource};
use super::{Composite, CompositeCallback, CompositeStatus, RenderError, RenderOptions, RenderResult};
use crate::cache::FileCache;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

enum JobState {
    Idle,
    /// Callbacks in attachment order
    Generating(Vec<CompositeCallback>),
    Ready(RenderResult),
}

/// Everything the render thread needs
struct RenderJob {
    source: Arc<dyn CompositeSource>,
    generator: CompositeGenerator,
    cache: Option<Arc<FileCache>>,
    source_path: Option<PathBuf>,
    variant: String,
    placeholder_size: (u32, u32),
}

impl RenderJob {
    fn produce(&self) -> RenderResult {
        let outcome = self.generator.generate(self.source.as_ref());
        let composite = Composite::from_outcome(outcome, self.placeholder_size)?;

        if composite.is_cacheable() {
            if let (Some(cache), Some(path)) = (&self.cache, &self.source_path) {
                cache.save_image_to_cache(&composite.image, path, &self.variant);
            }
        }

        Ok(Arc::new(composite))
    }
}

pub struct FullRenderer {
    job: Arc<RenderJob>,
    state: Arc<Mutex<JobState>>,
}

impl FullRenderer {
    /// Create the renderer, consulting the cache synchronously
    pub fn new(source: Arc<dyn CompositeSource>, options: RenderOptions) -> Self {
        let mut state = JobState::Idle;

        if let (Some(cache), Some(path)) = (&options.cache, &options.source_path) {
            if let Some(image) = cache.get_cached_image(path, &options.variant) {
                tracing::debug!("Composite cache hit for {:?} ({})", path, options.variant);
                state = JobState::Ready(Ok(Arc::new(Composite {
                    image,
                    status: CompositeStatus::Cached,
                })));
            }
        }

        Self {
            job: Arc::new(RenderJob {
                source,
                generator: CompositeGenerator::new(options.parallel_decode),
                cache: options.cache,
                source_path: options.source_path,
                variant: options.variant,
                placeholder_size: options.placeholder_size,
            }),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Return the composite if ready, otherwise attach `callback` to the
    /// in-flight job (starting it if needed) and return `None`.
    pub fn get_composite(
        &self,
        callback: Option<CompositeCallback>,
    ) -> Result<Option<Arc<Composite>>, RenderError> {
        let mut state = self.state.lock();

        if let JobState::Ready(result) = &*state {
            return result.clone().map(Some);
        }
        if let JobState::Generating(callbacks) = &mut *state {
            callbacks.extend(callback);
            return Ok(None);
        }

        *state = JobState::Generating(callback.into_iter().collect());
        drop(state);
        self.spawn();
        Ok(None)
    }

    pub fn ready(&self) -> Option<Arc<Composite>> {
        match &*self.state.lock() {
            JobState::Ready(Ok(composite)) => Some(composite.clone()),
            _ => None,
        }
    }

    pub fn is_generating(&self) -> bool {
        matches!(&*self.state.lock(), JobState::Generating(_))
    }

    fn spawn(&self) {
        let job = Arc::clone(&self.job);
        let state = Arc::clone(&self.state);

        let spawned = std::thread::Builder::new()
            .name("psd-composite".into())
            .spawn(move || run_job(&job, &state));

        if let Err(e) = spawned {
            self.fail_to_start(e);
        }
    }

    /// The render thread never started. The failure reaches the attached
    /// callbacks and later requests, not the request that triggered it.
    pub(super) fn fail_to_start(&self, e: std::io::Error) {
        tracing::error!("Failed to start render thread: {}", e);
        finish(&self.state, Err(RenderError::Io(e.to_string())));
    }
}

fn run_job(job: &RenderJob, state: &Mutex<JobState>) {
    let result = catch_unwind(AssertUnwindSafe(|| job.produce())).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!("Render thread panicked: {}", message);
        Err(RenderError::Composite(format!("render job panicked: {}", message)))
    });
    finish(state, result);
}

/// Publish the result, then fire every attached callback exactly once
fn finish(state: &Mutex<JobState>, result: RenderResult) {
    let callbacks = {
        let mut guard = state.lock();
        match std::mem::replace(&mut *guard, JobState::Ready(result.clone())) {
            JobState::Generating(callbacks) => callbacks,
            _ => Vec::new(),
        }
    };

    for (i, callback) in callbacks.into_iter().enumerate() {
        let delivered = result.clone();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(move || callback(delivered))) {
            tracing::error!(
                "Error in composite callback {}: {}",
                i,
                panic_message(payload.as_ref())
            );
        }
    }
}
