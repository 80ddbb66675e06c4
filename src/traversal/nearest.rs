/// Nearest node query: "closest usable node to a point"
///
/// Stricter than a plain traversal policy. A candidate is suitable when:
/// - its area matches `area` (if set)
/// - it satisfies the walkability constraint
/// - it passes the embedded policy's tag mask and custom filter
///
/// The policy's own walkable check is skipped here; the walkability constraint
/// replaces it. The graph mask is not checked: callers pass candidates that are
/// already restricted to allowed graphs.

use serde::{Deserialize, Serialize};

use crate::config::nearest as nearest_config;
use crate::graph::{GraphNode, Position};
use crate::traversal::TraversalPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WalkabilityConstraint {
    #[default]
    RequireWalkable,
    RequireUnwalkable,
    Either,
}

impl WalkabilityConstraint {
    #[inline]
    pub fn accepts(self, walkable: bool) -> bool {
        match self {
            WalkabilityConstraint::RequireWalkable => walkable,
            WalkabilityConstraint::RequireUnwalkable => !walkable,
            WalkabilityConstraint::Either => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    /// Ignores the vertical (y) axis
    ClosestAsSeenFromAbove,
    /// Vertical (y) axis counts at a reduced weight
    ClosestAsSeenFromAboveSoft,
}

impl DistanceMetric {
    pub fn distance_squared(self, a: &Position, b: &Position) -> f32 {
        let dx = a.x - b.x;
        let dy = a.y - b.y;
        let dz = a.z - b.z;
        match self {
            DistanceMetric::Euclidean => dx * dx + dy * dy + dz * dz,
            DistanceMetric::ClosestAsSeenFromAbove => dx * dx + dz * dz,
            DistanceMetric::ClosestAsSeenFromAboveSoft => {
                let dy = dy * nearest_config::SOFT_VERTICAL_WEIGHT;
                dx * dx + dy * dy + dz * dz
            }
        }
    }
}

/// Closest suitable node found by `NearestNodeQuery::nearest`
#[derive(Debug, Clone, Copy)]
pub struct NearestHit<'a, N> {
    pub node: &'a N,
    pub distance_sqr: f32,
}

#[derive(Debug, Clone, Default)]
pub struct NearestNodeQuery {
    policy: TraversalPolicy,
    area: Option<i32>,
    max_distance_sqr: Option<f32>,
    walkability: WalkabilityConstraint,
    metric: DistanceMetric,
}

impl NearestNodeQuery {
    pub fn new(policy: TraversalPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn with_area(mut self, area: i32) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_max_distance_sqr(mut self, max_distance_sqr: f32) -> Self {
        self.max_distance_sqr = Some(max_distance_sqr);
        self
    }

    pub fn with_walkability(mut self, walkability: WalkabilityConstraint) -> Self {
        self.walkability = walkability;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn policy(&self) -> &TraversalPolicy {
        &self.policy
    }

    pub fn area(&self) -> Option<i32> {
        self.area
    }

    pub fn walkability(&self) -> WalkabilityConstraint {
        self.walkability
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn is_suitable(&self, node: &dyn GraphNode) -> bool {
        if let Some(area) = self.area {
            if node.area() != area {
                return false;
            }
        }

        if !self.walkability.accepts(node.is_walkable()) {
            return false;
        }

        self.policy.can_traverse_ignoring_walkability(node)
    }

    /// Configured max distance if set and non-negative, otherwise `library_default`
    pub fn effective_max_distance_sqr(&self, library_default: f32) -> f32 {
        match self.max_distance_sqr {
            Some(value) if value >= 0.0 => value,
            _ => library_default,
        }
    }

    /// Same as `effective_max_distance_sqr` with the crate-wide default
    pub fn max_distance_sqr_or_default(&self) -> f32 {
        self.effective_max_distance_sqr(nearest_config::DEFAULT_MAX_DISTANCE_SQR)
    }

    /// Closest suitable candidate to `point` within range.
    /// Ties keep the earlier candidate.
    pub fn nearest<'a, N, I>(&self, candidates: I, point: &Position, library_default: f32) -> Option<NearestHit<'a, N>>
    where
        N: GraphNode + 'a,
        I: IntoIterator<Item = &'a N>,
    {
        let max_distance_sqr = self.effective_max_distance_sqr(library_default);
        let mut best: Option<NearestHit<'a, N>> = None;

        for node in candidates {
            let distance_sqr = self.metric.distance_squared(&node.position(), point);
            if distance_sqr > max_distance_sqr {
                continue;
            }

            if let Some(current) = &best {
                if distance_sqr >= current.distance_sqr {
                    continue;
                }
            }

            if self.is_suitable(node) {
                best = Some(NearestHit { node, distance_sqr });
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_nodes::TestNode;

    #[test]
    fn test_require_walkable_rejects_unwalkable() {
        let policy = TraversalPolicy::new().with_tag_mask(0b100);
        let node = TestNode::new(0).tagged(2).unwalkable();

        let query = NearestNodeQuery::new(policy.clone());
        assert!(!query.is_suitable(&node));

        // The policy's tag/filter part alone would accept it
        assert!(policy.can_traverse_ignoring_walkability(&node));
    }

    #[test]
    fn test_require_unwalkable_skips_policy_walkable_check() {
        let query = NearestNodeQuery::new(TraversalPolicy::new())
            .with_walkability(WalkabilityConstraint::RequireUnwalkable);

        assert!(query.is_suitable(&TestNode::new(0).unwalkable()));
        assert!(!query.is_suitable(&TestNode::new(1)));
    }

    #[test]
    fn test_either_and_tags() {
        let query = NearestNodeQuery::new(TraversalPolicy::new().with_tag_mask(0b1))
            .with_walkability(WalkabilityConstraint::Either);

        assert!(query.is_suitable(&TestNode::new(0)));
        assert!(query.is_suitable(&TestNode::new(1).unwalkable()));
        assert!(!query.is_suitable(&TestNode::new(2).tagged(4)));
    }

    #[test]
    fn test_area_filter() {
        let query = NearestNodeQuery::new(TraversalPolicy::new()).with_area(7);
        assert!(query.is_suitable(&TestNode::new(0).in_area(7)));
        assert!(!query.is_suitable(&TestNode::new(0).in_area(3)));
    }

    #[test]
    fn test_custom_filter_applies() {
        let query = NearestNodeQuery::new(
            TraversalPolicy::new().with_predicate(|node| node.penalty() == 0),
        );
        assert!(!query.is_suitable(&TestNode::new(0).with_penalty(3)));
    }

    #[test]
    fn test_effective_max_distance() {
        let unset = NearestNodeQuery::default();
        assert_eq!(unset.effective_max_distance_sqr(25.0), 25.0);
        assert_eq!(unset.max_distance_sqr_or_default(), nearest_config::DEFAULT_MAX_DISTANCE_SQR);

        let negative = NearestNodeQuery::default().with_max_distance_sqr(-1.0);
        assert_eq!(negative.effective_max_distance_sqr(25.0), 25.0);

        let zero = NearestNodeQuery::default().with_max_distance_sqr(0.0);
        assert_eq!(zero.effective_max_distance_sqr(25.0), 0.0);
    }

    #[test]
    fn test_nearest_picks_closest_suitable() {
        let nodes = vec![
            TestNode::new(0).at(1.0, 0.0, 0.0).unwalkable(),
            TestNode::new(1).at(2.0, 0.0, 0.0),
            TestNode::new(2).at(3.0, 0.0, 0.0),
            TestNode::new(3).at(50.0, 0.0, 0.0),
        ];
        let query = NearestNodeQuery::new(TraversalPolicy::new());

        let hit = query.nearest(&nodes, &Position::ZERO, 100.0).unwrap();
        assert_eq!(hit.node.index, 1);
        assert_eq!(hit.distance_sqr, 4.0);

        // Out of range
        let far = NearestNodeQuery::new(TraversalPolicy::new()).with_max_distance_sqr(1.0);
        assert!(far.nearest(&nodes, &Position::ZERO, 100.0).is_none());
    }

    #[test]
    fn test_seen_from_above_metrics() {
        let a = Position::new(0.0, 10.0, 0.0);
        let b = Position::new(1.0, 0.0, 0.0);

        assert_eq!(DistanceMetric::Euclidean.distance_squared(&a, &b), 101.0);
        assert_eq!(DistanceMetric::ClosestAsSeenFromAbove.distance_squared(&a, &b), 1.0);
        let soft = DistanceMetric::ClosestAsSeenFromAboveSoft.distance_squared(&a, &b);
        assert!((soft - 5.0).abs() < 1e-4);
    }
}
