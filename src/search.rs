// Interface to the search layer that expands the graph on worker threads

use crate::error::SearchError;
use crate::graph::NodeIndex;
use crate::request::PathRequest;

/// What a finished search hands back to its request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    pub path: Vec<NodeIndex>,
    pub total_cost: u64,

    /// End was unreachable; path leads to the closest reachable node instead
    pub partial: bool,

    pub searched_nodes: u32,
}

/// A graph search run once per request on a worker thread.
///
/// Implementations read `request.policy()` and `request.costs()` for every
/// node and edge they consider, and should poll `request.is_cancelled()`
/// periodically. Errors and panics both end in an errored request that is
/// still delivered to its callback.
pub trait PathSearch: Send + Sync {
    fn search(&self, request: &PathRequest) -> Result<SearchOutcome, SearchError>;
}

impl<F> PathSearch for F
where
    F: Fn(&PathRequest) -> Result<SearchOutcome, SearchError> + Send + Sync,
{
    fn search(&self, request: &PathRequest) -> Result<SearchOutcome, SearchError> {
        self(request)
    }
}
