// Error types for configuration, request lifecycle and search failures

use thiserror::Error;

use crate::request::{Claimant, PathState};

/// Malformed configuration, detected eagerly at assignment time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must have exactly {expected} entries, got {actual}")]
    TagArrayLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("tag {0} is out of range (0-31)")]
    InvalidTag(u8),

    #[error("tag {tag} multiplier {value} must be finite and non-negative")]
    InvalidMultiplier { tag: usize, value: f32 },

    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Misuse of the request lifecycle or the scheduler
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition { from: PathState, to: PathState },

    #[error("request already claimed by {0:?}")]
    AlreadyClaimed(Claimant),

    #[error("request is not claimed by {0:?}")]
    NotClaimed(Claimant),

    #[error("request must be in Created state to be submitted, found {0:?}")]
    NotCreated(PathState),

    #[error("return pipeline is backlogged ({pending} pending, limit {limit})")]
    Backlogged { pending: usize, limit: usize },

    #[error("scheduler is not running")]
    SchedulerStopped,
}

/// Failure reported by the search layer. Any of these moves the request
/// into the errored branch; it is still delivered through the pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("no suitable node near the start point")]
    NoStartNode,

    #[error("no suitable node near the end point")]
    NoEndNode,

    #[error("no path between start and end")]
    NoPath,

    #[error("search was cancelled")]
    Cancelled,

    #[error("search panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}
