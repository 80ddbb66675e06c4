/// Traversal policy: which nodes and edges a search may cross
///
/// Called for every node and edge a worker considers, from many threads at
/// once. A policy is plain data plus an optional custom filter; once a request
/// carrying it has been submitted, it is only ever read.
///
/// Evaluation order:
/// 1. Built-in check: node is walkable AND its tag bit is set in `tag_mask`
/// 2. Custom filter (predicate or provider), only if step 1 passed
///
/// Custom filters can therefore only narrow what is traversable, never widen it.

use std::fmt;
use std::sync::Arc;

use crate::config::tags;
use crate::graph::{GraphMask, GraphNode};

/// Stateless custom filter
pub type NodePredicate = Arc<dyn Fn(&dyn GraphNode) -> bool + Send + Sync>;

/// Read-only view of the policy handed to providers.
///
/// Providers use it to test other nodes without re-entering their own filter
/// (see `can_traverse_builtin`).
#[derive(Clone, Copy)]
pub struct TraversalContext<'a> {
    pub policy: &'a TraversalPolicy,

    /// False when the caller applies its own walkability rule (nearest node queries)
    pub check_walkability: bool,
}

impl<'a> TraversalContext<'a> {
    /// Built-in check only; never calls the custom filter
    #[inline]
    pub fn can_traverse_builtin(&self, node: &dyn GraphNode) -> bool {
        (!self.check_walkability || node.is_walkable())
            && self.policy.tag_mask & node.tag().bit() != 0
    }
}

/// Default node check used when a provider does not override `can_traverse`
#[inline]
pub fn default_can_traverse(ctx: &TraversalContext<'_>, node: &dyn GraphNode) -> bool {
    ctx.can_traverse_builtin(node)
}

/// Default edge check: an edge is traversable when its destination is
#[inline]
pub fn default_can_traverse_edge(
    ctx: &TraversalContext<'_>,
    _from: &dyn GraphNode,
    to: &dyn GraphNode,
) -> bool {
    default_can_traverse(ctx, to)
}

/// Full custom traversal override.
///
/// Every hook has a default that calls the matching free function, so a
/// provider only overrides what it needs and composes with the defaults by
/// calling them explicitly. Providers are shared across worker threads and
/// must not mutate state that affects their answers during a search.
pub trait TraversalProvider: Send + Sync {
    /// When false, this provider's filter does not block diagonal movement
    /// around the nodes it rejects on grid graphs (only static walkability does).
    /// When true, a rejected node behaves exactly like an unwalkable cell.
    fn filter_diagonal_grid_connections(&self) -> bool {
        true
    }

    fn can_traverse(&self, ctx: &TraversalContext<'_>, node: &dyn GraphNode) -> bool {
        default_can_traverse(ctx, node)
    }

    /// Must imply `can_traverse(ctx, to)`.
    fn can_traverse_edge(
        &self,
        ctx: &TraversalContext<'_>,
        _from: &dyn GraphNode,
        to: &dyn GraphNode,
    ) -> bool {
        self.can_traverse(ctx, to)
    }
}

/// Custom filter slot. One strategy at a time.
#[derive(Clone, Default)]
pub enum Filter {
    #[default]
    None,
    Predicate(NodePredicate),
    Provider(Arc<dyn TraversalProvider>),
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::None => f.write_str("None"),
            Filter::Predicate(_) => f.write_str("Predicate(..)"),
            Filter::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraversalPolicy {
    /// Bit i set = tag i traversable
    tag_mask: u32,

    /// Graphs the search may enter
    graph_mask: GraphMask,

    filter: Filter,
}

impl Default for TraversalPolicy {
    fn default() -> Self {
        Self {
            tag_mask: tags::ALL,
            graph_mask: GraphMask::ALL,
            filter: Filter::None,
        }
    }
}

impl TraversalPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag_mask(mut self, tag_mask: u32) -> Self {
        self.tag_mask = tag_mask;
        self
    }

    pub fn with_graph_mask(mut self, graph_mask: GraphMask) -> Self {
        self.graph_mask = graph_mask;
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn GraphNode) -> bool + Send + Sync + 'static,
    {
        self.set_predicate(predicate);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn TraversalProvider>) -> Self {
        self.set_provider(provider);
        self
    }

    pub fn set_tag_mask(&mut self, tag_mask: u32) {
        self.tag_mask = tag_mask;
    }

    pub fn set_graph_mask(&mut self, graph_mask: GraphMask) {
        self.graph_mask = graph_mask;
    }

    /// Replaces any provider that was set
    pub fn set_predicate<F>(&mut self, predicate: F)
    where
        F: Fn(&dyn GraphNode) -> bool + Send + Sync + 'static,
    {
        self.filter = Filter::Predicate(Arc::new(predicate));
    }

    /// Replaces any predicate that was set
    pub fn set_provider(&mut self, provider: Arc<dyn TraversalProvider>) {
        self.filter = Filter::Provider(provider);
    }

    pub fn clear_filter(&mut self) {
        self.filter = Filter::None;
    }

    #[inline]
    pub fn tag_mask(&self) -> u32 {
        self.tag_mask
    }

    #[inline]
    pub fn graph_mask(&self) -> GraphMask {
        self.graph_mask
    }

    #[inline]
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    #[inline]
    pub fn allows_graph(&self, graph_index: u8) -> bool {
        self.graph_mask.contains_graph(graph_index)
    }

    /// Whether custom-filtered nodes also block diagonal grid moves around them
    pub fn filter_diagonal_grid_connections(&self) -> bool {
        match &self.filter {
            Filter::Provider(provider) => provider.filter_diagonal_grid_connections(),
            _ => true,
        }
    }

    #[inline]
    pub fn context(&self) -> TraversalContext<'_> {
        TraversalContext {
            policy: self,
            check_walkability: true,
        }
    }

    /// Walkable flag and tag mask only, custom filter skipped
    #[inline]
    pub fn can_traverse_builtin(&self, node: &dyn GraphNode) -> bool {
        self.context().can_traverse_builtin(node)
    }

    #[inline]
    pub fn can_traverse(&self, node: &dyn GraphNode) -> bool {
        self.check(self.context(), node)
    }

    /// Tag mask and custom filter, walkable flag skipped
    #[inline]
    pub(crate) fn can_traverse_ignoring_walkability(&self, node: &dyn GraphNode) -> bool {
        self.check(
            TraversalContext {
                policy: self,
                check_walkability: false,
            },
            node,
        )
    }

    fn check(&self, ctx: TraversalContext<'_>, node: &dyn GraphNode) -> bool {
        if !ctx.can_traverse_builtin(node) {
            return false;
        }

        match &self.filter {
            Filter::None => true,
            Filter::Predicate(predicate) => predicate(node),
            Filter::Provider(provider) => provider.can_traverse(&ctx, node),
        }
    }

    /// Edge check. The built-in check is always re-applied to the destination;
    /// a provider's edge answer is otherwise trusted to agree with its node answer.
    pub fn can_traverse_edge(&self, from: &dyn GraphNode, to: &dyn GraphNode) -> bool {
        let ctx = self.context();
        if !ctx.can_traverse_builtin(to) {
            return false;
        }

        match &self.filter {
            Filter::None => true,
            Filter::Predicate(predicate) => predicate(to),
            Filter::Provider(provider) => {
                let allowed = provider.can_traverse_edge(&ctx, from, to);
                debug_assert!(
                    !allowed || provider.can_traverse(&ctx, to),
                    "provider allowed edge {} -> {} but rejects node {}",
                    from.index(),
                    to.index(),
                    to.index()
                );
                allowed
            }
        }
    }
}
