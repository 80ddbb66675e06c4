// Path requests: lifecycle state, claims, results and buffer pooling

pub mod path_request;
pub mod pool;
pub mod state;

pub use path_request::{
    Claimant, PathCallback, PathHandle, PathRequest, PathRequestBuilder, PathResult, Release,
};
pub(crate) use path_request::panic_message;
pub use pool::PathBufferPool;
pub use state::{AtomicPathState, CompleteState, PathState};
