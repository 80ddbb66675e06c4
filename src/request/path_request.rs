/// Path request: one reference-counted, stateful pathfinding query
///
/// A request owns its traversal policy and cost model by value. Both are
/// fixed at build time and only reachable through `&` afterwards, so worker
/// threads can read them without locks while other requests run concurrently
/// with different settings.
///
/// Claims:
/// - the caller holds `Claimant::Caller` from the moment the request is built
/// - the scheduler takes `Claimant::Scheduler` while the request is in flight
///   and releases it after the request is `Returned`
///
/// The backing path buffer goes back to the pool only when the claim count is
/// zero *and* the request is `Returned`, whichever happens last.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::pool::PathBufferPool;
use super::state::{AtomicPathState, CompleteState, PathState};
use crate::error::PathError;
use crate::graph::{NodeIndex, Position};
use crate::traversal::{CostModel, TraversalPolicy};

/// Shared handle to a request
pub type PathHandle = Arc<PathRequest>;

/// Completion callback, called once with the finished request
pub type PathCallback = Box<dyn FnOnce(&PathRequest) + Send>;

/// Party holding a claim on a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Claimant {
    Caller,
    Scheduler,
    Custom(u32),
}

/// Outcome of `PathRequest::release`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other claims remain
    Held(u32),
    /// Last claim dropped; buffer recycled if the request was returned
    Free,
}

/// Atomic claim counter plus the list of current holders (for auditing)
#[derive(Debug, Default)]
struct Claims {
    count: AtomicU32,
    holders: Mutex<Vec<Claimant>>,
}

impl Claims {
    fn claimed_by(claimant: Claimant) -> Self {
        Self {
            count: AtomicU32::new(1),
            holders: Mutex::new(vec![claimant]),
        }
    }

    fn claim(&self, claimant: Claimant) -> Result<u32, PathError> {
        let mut holders = self.holders.lock();
        if holders.contains(&claimant) {
            return Err(PathError::AlreadyClaimed(claimant));
        }
        holders.push(claimant);
        Ok(self.count.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn release(&self, claimant: Claimant) -> Result<u32, PathError> {
        let mut holders = self.holders.lock();
        let position = holders
            .iter()
            .position(|held| *held == claimant)
            .ok_or(PathError::NotClaimed(claimant))?;
        holders.swap_remove(position);
        Ok(self.count.fetch_sub(1, Ordering::AcqRel) - 1)
    }
}

/// Search output written by the worker, read by the consumer after return
#[derive(Debug, Default, Clone)]
pub struct PathResult {
    pub path: Vec<NodeIndex>,
    pub total_cost: u64,
    pub complete: CompleteState,
    pub error: Option<String>,
    pub searched_nodes: u32,
    pub duration: Option<Duration>,
}

pub struct PathRequest {
    id: Ulid,
    start: Position,
    end: Position,
    policy: TraversalPolicy,
    costs: CostModel,

    state: AtomicPathState,
    claims: Claims,
    cancelled: AtomicBool,
    recycled: AtomicBool,

    callback: Mutex<Option<PathCallback>>,
    immediate_callback: Mutex<Option<PathCallback>>,

    result: Mutex<PathResult>,
    pool: Option<Arc<PathBufferPool>>,
    created_at: Instant,
}

impl fmt::Debug for PathRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathRequest")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("claims", &self.claim_count())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl PathRequest {
    pub fn builder(start: Position, end: Position) -> PathRequestBuilder {
        PathRequestBuilder::new(start, end)
    }

    #[inline]
    pub fn id(&self) -> Ulid {
        self.id
    }

    #[inline]
    pub fn start(&self) -> Position {
        self.start
    }

    #[inline]
    pub fn end(&self) -> Position {
        self.end
    }

    #[inline]
    pub fn policy(&self) -> &TraversalPolicy {
        &self.policy
    }

    #[inline]
    pub fn costs(&self) -> &CostModel {
        &self.costs
    }

    #[inline]
    pub fn state(&self) -> PathState {
        self.state.load()
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state().is_returned()
    }

    /// Checked transition, no assertion
    pub fn try_advance(&self, next: PathState) -> Result<PathState, PathError> {
        self.state.try_advance(next)
    }

    /// Transition that must not fail under correct usage.
    /// Asserts in debug builds; logged no-op in release.
    pub(crate) fn advance(&self, next: PathState) -> bool {
        match self.state.try_advance(next) {
            Ok(_) => true,
            Err(err) => {
                debug_assert!(false, "path request {}: {}", self.id, err);
                tracing::error!(request = %self.id, error = %err, "ignored invalid path state transition");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Claims
    // ------------------------------------------------------------------

    pub fn claim(&self, claimant: Claimant) -> Result<(), PathError> {
        self.claims.claim(claimant).map(|_| ())
    }

    pub fn release(&self, claimant: Claimant) -> Result<Release, PathError> {
        let remaining = self.claims.release(claimant)?;
        if remaining > 0 {
            return Ok(Release::Held(remaining));
        }
        self.try_recycle();
        Ok(Release::Free)
    }

    #[inline]
    pub fn claim_count(&self) -> u32 {
        self.claims.count.load(Ordering::Acquire)
    }

    pub fn is_claimed_by(&self, claimant: Claimant) -> bool {
        self.claims.holders.lock().contains(&claimant)
    }

    /// Current claim holders, in no particular order
    pub fn claimants(&self) -> Vec<Claimant> {
        self.claims.holders.lock().clone()
    }

    /// Whether the backing buffer went back to the pool
    pub fn is_recycled(&self) -> bool {
        self.recycled.load(Ordering::Acquire)
    }

    /// Called after the last release and after `Returned`; only the later of
    /// the two finds both conditions true.
    pub(crate) fn try_recycle(&self) {
        if self.claim_count() != 0 || !self.is_done() {
            return;
        }
        if self.recycled.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(pool) = &self.pool {
            let buffer = std::mem::take(&mut self.result.lock().path);
            pool.put(buffer);
        }
        debug_log!("path request {} recycled", self.id);
    }

    // ------------------------------------------------------------------
    // Search side
    // ------------------------------------------------------------------

    /// Ask the search to stop. The request is still delivered, as errored.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Store a successful (possibly partial) result. State stays `Processing`.
    pub fn complete(&self, path: &[NodeIndex], total_cost: u64, partial: bool, searched_nodes: u32) {
        let mut result = self.result.lock();
        result.path.clear();
        result.path.extend_from_slice(path);
        result.total_cost = total_cost;
        result.searched_nodes = searched_nodes;
        result.complete = if partial {
            CompleteState::Partial
        } else {
            CompleteState::Complete
        };
        result.duration = Some(self.created_at.elapsed());
    }

    /// Record an error and move `Processing -> Errored`
    pub fn fail(&self, message: impl fmt::Display) {
        {
            let mut result = self.result.lock();
            result.path.clear();
            result.complete = CompleteState::Error;
            result.error = Some(message.to_string());
            result.duration = Some(self.created_at.elapsed());
        }
        self.advance(PathState::Errored);
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Lock the result for reading. Only meaningful once the request is returned.
    pub fn result(&self) -> MutexGuard<'_, PathResult> {
        self.result.lock()
    }

    pub fn path(&self) -> Vec<NodeIndex> {
        self.result.lock().path.clone()
    }

    pub fn complete_state(&self) -> CompleteState {
        self.result.lock().complete
    }

    pub fn error(&self) -> Option<String> {
        self.result.lock().error.clone()
    }

    pub fn is_error(&self) -> bool {
        self.complete_state() == CompleteState::Error
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    /// Run the completion callback if it has not run yet.
    /// Returns false if the callback panicked.
    pub(crate) fn run_callback(&self) -> bool {
        let callback = self.callback.lock().take();
        self.invoke(callback, "callback")
    }

    /// Run the worker-thread callback if it has not run yet
    pub(crate) fn run_immediate_callback(&self) -> bool {
        let callback = self.immediate_callback.lock().take();
        self.invoke(callback, "immediate callback")
    }

    fn invoke(&self, callback: Option<PathCallback>, kind: &'static str) -> bool {
        let Some(callback) = callback else {
            return true;
        };

        match catch_unwind(AssertUnwindSafe(|| callback(self))) {
            Ok(()) => true,
            Err(payload) => {
                tracing::error!(
                    request = %self.id,
                    panic = %panic_message(payload.as_ref()),
                    "path {} panicked", kind
                );
                false
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct PathRequestBuilder {
    start: Position,
    end: Position,
    policy: TraversalPolicy,
    costs: CostModel,
    callback: Option<PathCallback>,
    immediate_callback: Option<PathCallback>,
    pool: Option<Arc<PathBufferPool>>,
}

impl PathRequestBuilder {
    fn new(start: Position, end: Position) -> Self {
        Self {
            start,
            end,
            policy: TraversalPolicy::default(),
            costs: CostModel::default(),
            callback: None,
            immediate_callback: None,
            pool: None,
        }
    }

    pub fn policy(mut self, policy: TraversalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn costs(mut self, costs: CostModel) -> Self {
        self.costs = costs;
        self
    }

    /// Called once on the consumer thread while the pipeline drains
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&PathRequest) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Called once on the worker thread, before the request is queued for return
    pub fn on_complete_immediate<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&PathRequest) + Send + 'static,
    {
        self.immediate_callback = Some(Box::new(callback));
        self
    }

    pub fn pool(mut self, pool: Arc<PathBufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Build the request, claimed by `Claimant::Caller`
    pub fn build(self) -> PathHandle {
        let path = self.pool.as_ref().map(|pool| pool.take()).unwrap_or_default();

        Arc::new(PathRequest {
            id: Ulid::new(),
            start: self.start,
            end: self.end,
            policy: self.policy,
            costs: self.costs,
            state: AtomicPathState::default(),
            claims: Claims::claimed_by(Claimant::Caller),
            cancelled: AtomicBool::new(false),
            recycled: AtomicBool::new(false),
            callback: Mutex::new(self.callback),
            immediate_callback: Mutex::new(self.immediate_callback),
            result: Mutex::new(PathResult {
                path,
                ..PathResult::default()
            }),
            pool: self.pool,
            created_at: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn request_with_pool(pool: &Arc<PathBufferPool>) -> PathHandle {
        PathRequest::builder(Position::ZERO, Position::ZERO)
            .pool(Arc::clone(pool))
            .build()
    }

    /// Walks a request through the full lifecycle the way the scheduler and
    /// pipeline do, without any threads
    fn drive_to_returned(request: &PathRequest) {
        request.try_advance(PathState::Queued).unwrap();
        request.try_advance(PathState::Processing).unwrap();
        request.complete(&[1, 2, 3], 30, false, 3);
        request.try_advance(PathState::ReturnQueued).unwrap();
        request.try_advance(PathState::Returning).unwrap();
        request.run_callback();
        request.try_advance(PathState::Returned).unwrap();
        request.try_recycle();
    }

    #[test]
    fn test_starts_claimed_by_caller() {
        let request = PathRequest::builder(Position::ZERO, Position::ZERO).build();
        assert_eq!(request.state(), PathState::Created);
        assert_eq!(request.claim_count(), 1);
        assert!(request.is_claimed_by(Claimant::Caller));
    }

    #[test]
    fn test_duplicate_claim_and_double_release() {
        let request = PathRequest::builder(Position::ZERO, Position::ZERO).build();
        assert_eq!(
            request.claim(Claimant::Caller),
            Err(PathError::AlreadyClaimed(Claimant::Caller))
        );

        request.claim(Claimant::Custom(7)).unwrap();
        assert_eq!(request.claim_count(), 2);

        assert_eq!(request.release(Claimant::Custom(7)), Ok(Release::Held(1)));
        assert_eq!(
            request.release(Claimant::Custom(7)),
            Err(PathError::NotClaimed(Claimant::Custom(7)))
        );
        assert_eq!(request.claim_count(), 1);
    }

    // Four orderings/timings of the two releases. The count reaches zero only
    // after both, and the buffer is recycled only once it is also returned.

    #[test]
    fn test_release_caller_then_scheduler_after_return() {
        let pool = Arc::new(PathBufferPool::new(8));
        let request = request_with_pool(&pool);
        request.claim(Claimant::Scheduler).unwrap();
        drive_to_returned(&request);

        assert_eq!(request.release(Claimant::Caller), Ok(Release::Held(1)));
        assert!(!request.is_recycled());
        assert_eq!(request.release(Claimant::Scheduler), Ok(Release::Free));
        assert_eq!(request.claim_count(), 0);
        assert!(request.is_recycled());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_release_scheduler_then_caller_after_return() {
        let pool = Arc::new(PathBufferPool::new(8));
        let request = request_with_pool(&pool);
        request.claim(Claimant::Scheduler).unwrap();
        drive_to_returned(&request);

        assert_eq!(request.release(Claimant::Scheduler), Ok(Release::Held(1)));
        // Caller can still read the result
        assert_eq!(request.path(), vec![1, 2, 3]);
        assert!(!request.is_recycled());

        assert_eq!(request.release(Claimant::Caller), Ok(Release::Free));
        assert!(request.is_recycled());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_caller_releases_while_in_flight() {
        let pool = Arc::new(PathBufferPool::new(8));
        let request = request_with_pool(&pool);
        request.claim(Claimant::Scheduler).unwrap();
        request.try_advance(PathState::Queued).unwrap();

        assert_eq!(request.release(Claimant::Caller), Ok(Release::Held(1)));
        assert_eq!(request.claim_count(), 1);

        request.try_advance(PathState::Processing).unwrap();
        request.complete(&[4], 1, false, 1);
        request.try_advance(PathState::ReturnQueued).unwrap();
        request.try_advance(PathState::Returning).unwrap();
        request.try_advance(PathState::Returned).unwrap();
        assert!(!request.is_recycled());

        assert_eq!(request.release(Claimant::Scheduler), Ok(Release::Free));
        assert!(request.is_recycled());
    }

    #[test]
    fn test_both_release_before_return_defers_recycle() {
        let pool = Arc::new(PathBufferPool::new(8));
        let request = request_with_pool(&pool);
        request.claim(Claimant::Scheduler).unwrap();

        assert_eq!(request.release(Claimant::Scheduler), Ok(Release::Held(1)));
        assert_eq!(request.release(Claimant::Caller), Ok(Release::Free));
        assert_eq!(request.claim_count(), 0);
        // Not returned yet, so nothing may be reused
        assert!(!request.is_recycled());
        assert!(pool.is_empty());

        drive_to_returned(&request);
        assert!(request.is_recycled());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_callback_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let request = PathRequest::builder(Position::ZERO, Position::ZERO)
            .on_complete(move |req| {
                assert_eq!(req.state(), PathState::Returning);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        drive_to_returned(&request);
        assert!(request.run_callback());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_panic_is_contained() {
        let request = PathRequest::builder(Position::ZERO, Position::ZERO)
            .on_complete(|_| panic!("boom"))
            .build();

        request.try_advance(PathState::Queued).unwrap();
        request.try_advance(PathState::Processing).unwrap();
        request.try_advance(PathState::ReturnQueued).unwrap();
        request.try_advance(PathState::Returning).unwrap();
        assert!(!request.run_callback());
        assert!(request.try_advance(PathState::Returned).is_ok());
    }

    #[test]
    fn test_fail_moves_to_errored() {
        let request = PathRequest::builder(Position::ZERO, Position::ZERO).build();
        request.try_advance(PathState::Queued).unwrap();
        request.try_advance(PathState::Processing).unwrap();
        request.fail("no path");

        assert_eq!(request.state(), PathState::Errored);
        assert!(request.is_error());
        assert_eq!(request.error().as_deref(), Some("no path"));
    }

    #[test]
    fn test_panic_message() {
        let payload = catch_unwind(|| panic!("bad {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "bad 1");
    }
}
