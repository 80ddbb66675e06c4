/// Process-wide handle to the running path scheduler
///
/// Game-side systems that have no scheduler reference of their own submit
/// through here. Installing a new scheduler swaps it in atomically; requests
/// already handed to the old one still finish on the old pool.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;

use crate::error::PathError;
use crate::request::{PathBufferPool, PathHandle};
use crate::scheduler::PathScheduler;

static ACTIVE: Lazy<ArcSwapOption<PathScheduler>> = Lazy::new(ArcSwapOption::empty);

static BUFFER_POOL: Lazy<Arc<PathBufferPool>> = Lazy::new(|| Arc::new(PathBufferPool::default()));

/// Make `scheduler` the active one, returning the previous scheduler
pub fn install(scheduler: Arc<PathScheduler>) -> Option<Arc<PathScheduler>> {
    let previous = ACTIVE.swap(Some(scheduler));
    tracing::info!(replaced = previous.is_some(), "path scheduler installed");
    previous
}

pub fn get() -> Option<Arc<PathScheduler>> {
    ACTIVE.load_full()
}

/// Remove the active scheduler. It shuts down once the last reference drops.
pub fn clear() -> Option<Arc<PathScheduler>> {
    ACTIVE.swap(None)
}

/// Submit to the active scheduler
pub fn submit(request: &PathHandle) -> Result<(), PathError> {
    match ACTIVE.load().as_ref() {
        Some(scheduler) => scheduler.submit(request),
        None => Err(PathError::SchedulerStopped),
    }
}

/// Drain the active scheduler's return pipeline (consumer thread only)
pub fn drain(time_sliced: bool) -> usize {
    match ACTIVE.load().as_ref() {
        Some(scheduler) => scheduler.pipeline().drain(time_sliced),
        None => 0,
    }
}

/// Shared path buffer pool for requests built without their own
pub fn buffer_pool() -> Arc<PathBufferPool> {
    Arc::clone(&BUFFER_POOL)
}
