// Recycles path buffers of requests that nobody holds a claim on anymore

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::graph::NodeIndex;

/// Lock-free pool of node buffers.
///
/// A request takes a buffer when it is built and hands it back once it is
/// `Returned` and every claim has been released.
#[derive(Debug)]
pub struct PathBufferPool {
    buffers: SegQueue<Vec<NodeIndex>>,
    max_pooled: usize,
    recycled: AtomicUsize,
}

impl PathBufferPool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            buffers: SegQueue::new(),
            max_pooled,
            recycled: AtomicUsize::new(0),
        }
    }

    /// Take an empty buffer, allocating if the pool is dry
    pub fn take(&self) -> Vec<NodeIndex> {
        self.buffers.pop().unwrap_or_default()
    }

    /// Return a buffer. Dropped when the pool is full.
    pub fn put(&self, mut buffer: Vec<NodeIndex>) {
        if self.buffers.len() >= self.max_pooled {
            return;
        }
        buffer.clear();
        self.buffers.push(buffer);
        self.recycled.fetch_add(1, Ordering::Relaxed);
    }

    /// Buffers currently available
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Total buffers ever returned to the pool
    pub fn recycled_count(&self) -> usize {
        self.recycled.load(Ordering::Relaxed)
    }
}

impl Default for PathBufferPool {
    fn default() -> Self {
        Self::new(256)
    }
}
