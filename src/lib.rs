//! pathgate: traversal rules and asynchronous path delivery for pathfinding
//!
//! - `traversal`: which nodes/edges a search may cross, what they cost, and
//!   nearest-node snapping of end points
//! - `request`: the reference-counted path request and its lifecycle
//! - `scheduler`: worker pool that runs searches off the consumer thread
//! - `pipeline`: returns finished requests to the consumer thread, time-sliced
//! - `grid`: 8-connected grid graph with an A* `PathSearch`

macro_rules! debug_log {
    ($($arg:tt)*) => {
        if cfg!(feature = "debug_logs") {
            tracing::debug!($($arg)*);
        }
    };
}

pub mod config;  // Centralized configuration constants
pub mod error;
pub mod graph;
pub mod traversal;
pub mod request;
pub mod search;
pub mod pipeline;
pub mod scheduler;
pub mod active;  // Process-wide scheduler handle
pub mod grid;

pub use config::{PipelineConfig, SchedulerConfig};
pub use error::{ConfigError, PathError, SearchError};
pub use graph::{GraphMask, GraphNode, NodeIndex, Position, Tag};
pub use grid::{GridCell, GridGraph, GridSearch};
pub use pipeline::ReturnPipeline;
pub use request::{
    Claimant, CompleteState, PathBufferPool, PathHandle, PathRequest, PathRequestBuilder, PathState, Release,
};
pub use scheduler::{PathScheduler, SchedulerStats};
pub use search::{PathSearch, SearchOutcome};
pub use traversal::{
    CostModel, CostProvider, DistanceMetric, NearestNodeQuery, TraversalContext, TraversalPolicy, TraversalProvider,
    WalkabilityConstraint,
};
