/// Return pipeline: hands finished requests from workers to the consumer thread
///
/// Double-buffered queue:
/// - producers (worker threads) push onto `write_queue` under its lock
/// - the consumer pops from `read_queue`; when that is empty it swaps the two
///   buffers in one short critical section
///
/// The write lock is taken once per enqueue and at most once per drain,
/// however many requests are pending. The read buffer is refilled only after
/// it runs dry, so requests left over from a time-sliced drain go out first.
/// Draining never waits for producers.
///
/// Callbacks and listeners run while the consumer side is locked; they must
/// not call `drain` themselves.
///
/// Every enqueued request is returned exactly once: its state moves
/// `ReturnQueued -> Returning -> Returned`, its callback runs on the consumer
/// thread, and the scheduler's claim is released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::PipelineConfig;
use crate::error::PathError;
use crate::request::{Claimant, PathHandle, PathState};

/// Fired once per non-empty drain with the number of requests returned
pub type ReturnedListener = Box<dyn Fn(usize) + Send + Sync>;

pub struct ReturnPipeline {
    write_queue: Mutex<VecDeque<PathHandle>>,

    /// Only touched by the consumer thread; the lock is never contended
    read_queue: Mutex<VecDeque<PathHandle>>,

    /// Enqueued but not yet returned
    pending: AtomicUsize,
    backlog_warned: AtomicBool,

    listeners: Mutex<Vec<ReturnedListener>>,
    config: PipelineConfig,
}

impl Default for ReturnPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl ReturnPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            write_queue: Mutex::new(VecDeque::new()),
            read_queue: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            backlog_warned: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Requests enqueued and not yet returned
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Pending count is at or above the configured watermark
    pub fn is_backlogged(&self) -> bool {
        match self.config.max_pending {
            Some(limit) => self.pending() >= limit,
            None => false,
        }
    }

    /// Register a listener for the aggregate "paths were returned" notification
    pub fn on_paths_returned<F>(&self, listener: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Queue a finished request for return. Callable from any thread.
    ///
    /// Performs the `Processing | Errored -> ReturnQueued` transition before
    /// publishing, so the consumer never sees a request whose results are
    /// still being written. Fails if the request was already queued.
    pub fn enqueue(&self, request: PathHandle) -> Result<(), PathError> {
        request.try_advance(PathState::ReturnQueued)?;

        let pending = {
            let mut write = self.write_queue.lock();
            write.push_back(request);
            self.pending.fetch_add(1, Ordering::AcqRel) + 1
        };

        if let Some(limit) = self.config.max_pending {
            if pending > limit && !self.backlog_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    pending,
                    limit,
                    "return pipeline backlog above watermark; is drain being called?"
                );
            }
        }
        Ok(())
    }

    /// Swap the buffers if the read side is empty
    fn refill(&self, read: &mut VecDeque<PathHandle>) {
        if !read.is_empty() {
            return;
        }
        let mut write = self.write_queue.lock();
        std::mem::swap(&mut *write, read);
    }

    /// Return queued requests. Consumer thread only.
    ///
    /// With `time_sliced`, stops once the time budget is spent *and* at least
    /// `min_returns_per_slice` requests were returned; the rest waits for the
    /// next call. Without it, returns everything that was pending when the
    /// call started.
    ///
    /// Returns the number of requests returned.
    pub fn drain(&self, time_sliced: bool) -> usize {
        let deadline = time_sliced.then(|| Instant::now() + self.config.time_slice());
        let min_returns = self.config.min_returns_per_slice;

        let mut read = self.read_queue.lock();
        let mut swapped = false;

        let mut returned = 0;
        loop {
            let Some(request) = read.pop_front() else {
                // One swap per call: leftovers from a previous slice go first,
                // then whatever producers queued since
                if swapped {
                    break;
                }
                swapped = true;
                self.refill(&mut read);
                if read.is_empty() {
                    break;
                }
                continue;
            };

            self.return_one(&request);
            returned += 1;

            if let Some(deadline) = deadline {
                if returned >= min_returns && Instant::now() >= deadline {
                    break;
                }
            }
        }
        drop(read);

        if returned > 0 {
            let remaining = self.pending.fetch_sub(returned, Ordering::AcqRel) - returned;
            if self.config.max_pending.map_or(true, |limit| remaining <= limit) {
                self.backlog_warned.store(false, Ordering::Relaxed);
            }

            debug_log!("return pipeline drained {} request(s), {} pending", returned, remaining);
            for listener in self.listeners.lock().iter() {
                listener(returned);
            }
        }

        returned
    }

    fn return_one(&self, request: &PathHandle) {
        if !request.advance(PathState::Returning) {
            return;
        }

        if !request.run_callback() {
            tracing::warn!(request = %request.id(), "path callback failed; continuing drain");
        }

        request.advance(PathState::Returned);

        match request.release(Claimant::Scheduler) {
            Ok(_) => {}
            // Enqueued directly by a search layer that never claimed it
            Err(PathError::NotClaimed(_)) => request.try_recycle(),
            Err(err) => tracing::error!(request = %request.id(), error = %err, "release failed"),
        }
    }

    /// Drain until `request` is returned. Consumer thread only.
    ///
    /// Spins while the request is still being searched, so only call this for
    /// requests that are already submitted.
    pub fn block_until_returned(&self, request: &PathHandle) {
        while !request.is_done() {
            if self.drain(false) == 0 {
                std::thread::yield_now();
            }
        }
    }
}
