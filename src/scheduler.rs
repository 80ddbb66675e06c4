/// Path scheduler: worker pool between callers and the return pipeline
///
/// Callers submit built requests; the scheduler claims them, feeds them to N
/// worker threads over a channel, and each worker runs the search and then
/// enqueues the request into the return pipeline. Delivery to callbacks
/// happens later, on the consumer thread, when it drains the pipeline.
///
/// Every submitted request is enqueued exactly once, whether the search
/// succeeded, failed, panicked or was cancelled.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use ulid::Ulid;

use crate::config::SchedulerConfig;
use crate::error::{ConfigError, PathError, SearchError};
use crate::pipeline::ReturnPipeline;
use crate::request::{panic_message, Claimant, PathHandle, PathState};
use crate::search::PathSearch;

/// In-flight requests by id, for cancellation
type InFlight = Arc<DashMap<Ulid, PathHandle>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub workers: usize,
    pub in_flight: usize,
    pub pending_returns: usize,
}

pub struct PathScheduler {
    pipeline: Arc<ReturnPipeline>,
    sender: Mutex<Option<Sender<PathHandle>>>,
    in_flight: InFlight,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    running: AtomicBool,
}

impl PathScheduler {
    /// Spawn the worker pool
    pub fn start(
        config: SchedulerConfig,
        searcher: Arc<dyn PathSearch>,
        pipeline: Arc<ReturnPipeline>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (sender, receiver) = unbounded::<PathHandle>();
        let in_flight: InFlight = Arc::new(DashMap::new());
        let mut workers = Vec::with_capacity(config.worker_count);

        for i in 0..config.worker_count {
            let receiver = receiver.clone();
            let searcher = Arc::clone(&searcher);
            let pipeline = Arc::clone(&pipeline);
            let in_flight = Arc::clone(&in_flight);

            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, i))
                .spawn(move || worker_loop(receiver, searcher, pipeline, in_flight))
                .map_err(ConfigError::WorkerSpawn)?;
            workers.push(handle);
        }

        tracing::info!(workers = config.worker_count, "path scheduler started");

        Ok(Self {
            pipeline,
            sender: Mutex::new(Some(sender)),
            in_flight,
            workers: Mutex::new(workers),
            worker_count: config.worker_count,
            running: AtomicBool::new(true),
        })
    }

    pub fn pipeline(&self) -> &Arc<ReturnPipeline> {
        &self.pipeline
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Hand a `Created` request to the workers.
    ///
    /// Takes the scheduler's claim, which the pipeline releases once the
    /// request is returned. Refused while the return pipeline is at its
    /// pending watermark.
    pub fn submit(&self, request: &PathHandle) -> Result<(), PathError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(PathError::SchedulerStopped);
        };

        let state = request.state();
        if state != PathState::Created {
            return Err(PathError::NotCreated(state));
        }

        if let Some(limit) = self.pipeline.config().max_pending {
            let pending = self.pipeline.pending() + self.in_flight.len();
            if pending >= limit {
                return Err(PathError::Backlogged { pending, limit });
            }
        }

        request.claim(Claimant::Scheduler)?;
        if let Err(err) = request.try_advance(PathState::Queued) {
            // Lost a race with another submit of the same request
            let _ = request.release(Claimant::Scheduler);
            return Err(err);
        }

        self.in_flight.insert(request.id(), Arc::clone(request));
        debug_log!("path request {} queued", request.id());

        if sender.send(Arc::clone(request)).is_err() {
            // All workers gone; still deliver the request, as errored
            tracing::error!(request = %request.id(), "no path workers left, failing request");
            self.in_flight.remove(&request.id());
            request.advance(PathState::Processing);
            request.fail(SearchError::Other("no path workers running".to_string()));
            if let Err(err) = self.pipeline.enqueue(Arc::clone(request)) {
                tracing::error!(request = %request.id(), error = %err, "failed to enqueue request");
            }
        }
        Ok(())
    }

    /// Flag an in-flight request as cancelled. It is delivered as errored.
    pub fn cancel(&self, id: Ulid) -> bool {
        match self.in_flight.get(&id) {
            Some(entry) => {
                entry.value().cancel();
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            workers: self.worker_count,
            in_flight: self.in_flight.len(),
            pending_returns: self.pipeline.pending(),
        }
    }

    /// Stop accepting requests and join the workers. Requests already
    /// submitted are still searched and enqueued before the workers exit.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        // Dropping the sender closes the channel once the queue is empty
        self.sender.lock().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("path worker exited with a panic");
            }
        }

        tracing::info!("path scheduler stopped");
    }
}

impl Drop for PathScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    receiver: Receiver<PathHandle>,
    searcher: Arc<dyn PathSearch>,
    pipeline: Arc<ReturnPipeline>,
    in_flight: InFlight,
) {
    while let Ok(request) = receiver.recv() {
        process_request(&request, searcher.as_ref(), &pipeline);
        in_flight.remove(&request.id());
    }
}

/// Run one request from `Queued` to `ReturnQueued`
fn process_request(request: &PathHandle, searcher: &dyn PathSearch, pipeline: &ReturnPipeline) {
    if !request.advance(PathState::Processing) {
        return;
    }

    if request.is_cancelled() {
        request.fail(SearchError::Cancelled);
    } else {
        match catch_unwind(AssertUnwindSafe(|| searcher.search(request))) {
            Ok(Ok(_)) if request.is_cancelled() => request.fail(SearchError::Cancelled),
            Ok(Ok(outcome)) => {
                request.complete(&outcome.path, outcome.total_cost, outcome.partial, outcome.searched_nodes);
                debug_log!(
                    "path request {} found {} nodes, cost {}",
                    request.id(),
                    outcome.path.len(),
                    outcome.total_cost
                );
            }
            Ok(Err(err)) => {
                tracing::debug!(request = %request.id(), error = %err, "path search failed");
                request.fail(err);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(request = %request.id(), panic = %message, "path search panicked");
                request.fail(SearchError::Panicked(message));
            }
        }
    }

    request.run_immediate_callback();

    if let Err(err) = pipeline.enqueue(Arc::clone(request)) {
        tracing::error!(request = %request.id(), error = %err, "failed to enqueue finished request");
    }
}
