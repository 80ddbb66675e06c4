// Traversal and cost rules queried by the search layer on every node and edge

pub mod cost;
pub mod nearest;
pub mod policy;

pub use cost::{default_connection_cost, default_multiplier, CostModel, CostProvider};
pub use nearest::{DistanceMetric, NearestHit, NearestNodeQuery, WalkabilityConstraint};
pub use policy::{
    default_can_traverse, default_can_traverse_edge, Filter, NodePredicate, TraversalContext,
    TraversalPolicy, TraversalProvider,
};
