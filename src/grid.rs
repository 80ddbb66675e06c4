/// Grid graph and A* search
///
/// Reference implementation of the search layer: an 8-connected grid whose
/// cells are `GraphNode`s, and a `PathSearch` that resolves the request's end
/// points with a `NearestNodeQuery` and runs A* under the request's traversal
/// policy and cost model.
///
/// Cell (x, y) sits at world position (x + 0.5, 0, y + 0.5). Straight steps
/// are 1000 mm, diagonal steps 1414 mm.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::config::{cost, nearest as nearest_config};
use crate::error::SearchError;
use crate::graph::{GraphNode, NodeIndex, Position, Tag};
use crate::request::PathRequest;
use crate::search::{PathSearch, SearchOutcome};
use crate::traversal::{NearestNodeQuery, TraversalPolicy};

/// Expansions between cancellation checks
const CANCEL_POLL_INTERVAL: u32 = 256;

const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

// ============================================================================
// GRID GRAPH
// ============================================================================

#[derive(Debug, Clone)]
pub struct GridCell {
    index: NodeIndex,
    x: u32,
    y: u32,
    walkable: bool,
    tag: Tag,
    penalty: u32,
    area: i32,
    graph_index: u8,
}

impl GridCell {
    pub fn coords(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    pub fn set_walkable(&mut self, walkable: bool) -> &mut Self {
        self.walkable = walkable;
        self
    }

    pub fn set_tag(&mut self, tag: Tag) -> &mut Self {
        self.tag = tag;
        self
    }

    pub fn set_penalty(&mut self, penalty: u32) -> &mut Self {
        self.penalty = penalty;
        self
    }
}

impl GraphNode for GridCell {
    fn index(&self) -> NodeIndex {
        self.index
    }

    fn is_walkable(&self) -> bool {
        self.walkable
    }

    fn tag(&self) -> Tag {
        self.tag
    }

    fn penalty(&self) -> u32 {
        self.penalty
    }

    fn area(&self) -> i32 {
        self.area
    }

    fn graph_index(&self) -> u8 {
        self.graph_index
    }

    fn position(&self) -> Position {
        Position::new(self.x as f32 + 0.5, 0.0, self.y as f32 + 0.5)
    }
}

/// Rectangular grid of cells. Build it, edit cells, call `recompute_areas`,
/// then share it behind an `Arc`; it is read-only from then on.
#[derive(Debug, Clone)]
pub struct GridGraph {
    width: u32,
    height: u32,
    graph_index: u8,
    cells: Vec<GridCell>,
}

impl GridGraph {
    /// All cells walkable, tag 0, no penalty, one area
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_graph_index(width, height, 0)
    }

    pub fn with_graph_index(width: u32, height: u32, graph_index: u8) -> Self {
        let mut cells = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                cells.push(GridCell {
                    index: y * width + x,
                    x,
                    y,
                    walkable: true,
                    tag: Tag::DEFAULT,
                    penalty: 0,
                    area: 1,
                    graph_index,
                });
            }
        }
        Self {
            width,
            height,
            graph_index,
            cells,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn graph_index(&self) -> u8 {
        self.graph_index
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    #[inline]
    pub fn index_of(&self, x: u32, y: u32) -> Option<NodeIndex> {
        (x < self.width && y < self.height).then(|| y * self.width + x)
    }

    #[inline]
    pub fn node(&self, index: NodeIndex) -> Option<&GridCell> {
        self.cells.get(index as usize)
    }

    pub fn cell(&self, x: u32, y: u32) -> Option<&GridCell> {
        self.index_of(x, y).and_then(|index| self.node(index))
    }

    pub fn cell_mut(&mut self, x: u32, y: u32) -> Option<&mut GridCell> {
        let index = self.index_of(x, y)?;
        self.cells.get_mut(index as usize)
    }

    /// Cell containing a world position, ignoring height
    pub fn cell_at(&self, position: &Position) -> Option<&GridCell> {
        if position.x < 0.0 || position.z < 0.0 {
            return None;
        }
        self.cell(position.x as u32, position.z as u32)
    }

    fn offset(&self, cell: &GridCell, dx: i32, dy: i32) -> Option<&GridCell> {
        let x = cell.x.checked_add_signed(dx)?;
        let y = cell.y.checked_add_signed(dy)?;
        self.cell(x, y)
    }

    /// Flood-fill connected components of walkable cells (8-connected).
    /// Unwalkable cells get area 0; components are numbered from 1.
    pub fn recompute_areas(&mut self) -> i32 {
        for cell in &mut self.cells {
            cell.area = 0;
        }

        let mut next_area = 0;
        let mut stack = Vec::new();
        for start in 0..self.cells.len() {
            if !self.cells[start].walkable || self.cells[start].area != 0 {
                continue;
            }

            next_area += 1;
            self.cells[start].area = next_area;
            stack.push(start);

            while let Some(current) = stack.pop() {
                for (dx, dy) in NEIGHBOR_OFFSETS {
                    let neighbor = match self.offset(&self.cells[current], dx, dy) {
                        Some(cell) if cell.walkable && cell.area == 0 => cell.index as usize,
                        _ => continue,
                    };
                    self.cells[neighbor].area = next_area;
                    stack.push(neighbor);
                }
            }
        }

        debug_log!("grid areas recomputed: {} area(s)", next_area);
        next_area
    }
}

// ============================================================================
// A* SEARCH
// ============================================================================

/// Open-set entry, ordered by lowest f cost first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    index: NodeIndex,
    g_cost: u64,
    f_cost: u64,
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_cost
            .cmp(&self.f_cost)
            .then_with(|| self.g_cost.cmp(&other.g_cost))
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct GridSearch {
    graph: Arc<GridGraph>,
    partial_paths: bool,
    heuristic_scale: f32,
    nearest_max_distance_sqr: f32,
}

impl GridSearch {
    pub fn new(graph: Arc<GridGraph>) -> Self {
        Self {
            graph,
            partial_paths: false,
            heuristic_scale: 1.0,
            nearest_max_distance_sqr: nearest_config::DEFAULT_MAX_DISTANCE_SQR,
        }
    }

    /// Return a path to the reachable node closest to the end instead of
    /// `NoPath` when the end cannot be reached
    pub fn with_partial_paths(mut self, partial_paths: bool) -> Self {
        self.partial_paths = partial_paths;
        self
    }

    /// Scale the octile heuristic. Keep it at or below the lowest tag
    /// multiplier in use for optimal paths.
    pub fn with_heuristic_scale(mut self, scale: f32) -> Self {
        self.heuristic_scale = scale.max(0.0);
        self
    }

    /// Library default for end point snapping when a request sets none
    pub fn with_nearest_max_distance(mut self, max_distance: f32) -> Self {
        self.nearest_max_distance_sqr = max_distance * max_distance;
        self
    }

    pub fn graph(&self) -> &Arc<GridGraph> {
        &self.graph
    }

    fn heuristic(&self, from: &GridCell, to: &GridCell) -> u64 {
        let dx = from.x.abs_diff(to.x) as u64;
        let dy = from.y.abs_diff(to.y) as u64;
        let diagonal = dx.min(dy);
        let straight = dx.max(dy) - diagonal;
        let mm = diagonal * cost::DIAGONAL_MM as u64 + straight * cost::MM_PER_UNIT as u64;
        (mm as f64 * self.heuristic_scale as f64) as u64
    }

    /// Corner-cutting rule for a diagonal step. With diagonal filtering both
    /// flanking cells must pass the full policy; without it, only their
    /// static walkability counts.
    fn diagonal_allowed(&self, policy: &TraversalPolicy, from: &GridCell, dx: i32, dy: i32) -> bool {
        let flankers = [self.graph.offset(from, dx, 0), self.graph.offset(from, 0, dy)];
        let filter = policy.filter_diagonal_grid_connections();

        flankers.iter().all(|flanker| match flanker {
            Some(cell) if filter => policy.can_traverse(*cell),
            Some(cell) => cell.is_walkable(),
            None => false,
        })
    }

    fn resolve(&self, request: &PathRequest, point: &Position) -> Option<&GridCell> {
        NearestNodeQuery::new(request.policy().clone())
            .nearest(self.graph.cells.iter(), point, self.nearest_max_distance_sqr)
            .map(|hit| hit.node)
    }

    fn reconstruct(came_from: &[Option<NodeIndex>], mut current: NodeIndex) -> Vec<NodeIndex> {
        let mut path = vec![current];
        while let Some(previous) = came_from[current as usize] {
            path.push(previous);
            current = previous;
        }
        path.reverse();
        path
    }
}

impl PathSearch for GridSearch {
    fn search(&self, request: &PathRequest) -> Result<SearchOutcome, SearchError> {
        let policy = request.policy();
        let costs = request.costs();

        if request.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        if !policy.allows_graph(self.graph.graph_index) {
            return Err(SearchError::NoStartNode);
        }

        let start = self.resolve(request, &request.start()).ok_or(SearchError::NoStartNode)?;
        let goal = self.resolve(request, &request.end()).ok_or(SearchError::NoEndNode)?;

        // Different static components can never connect
        if start.area != goal.area && !self.partial_paths {
            return Err(SearchError::NoPath);
        }

        let node_count = self.graph.cells.len();
        let mut g_score = vec![u64::MAX; node_count];
        let mut came_from: Vec<Option<NodeIndex>> = vec![None; node_count];
        let mut closed = vec![false; node_count];
        let mut open_set = BinaryHeap::new();

        let start_h = self.heuristic(start, goal);
        g_score[start.index as usize] = 0;
        open_set.push(OpenNode {
            index: start.index,
            g_cost: 0,
            f_cost: start_h,
        });

        let mut closest = (start.index, start_h);
        let mut searched_nodes = 0u32;

        while let Some(current) = open_set.pop() {
            let current_index = current.index as usize;
            if closed[current_index] {
                continue;
            }
            closed[current_index] = true;
            searched_nodes += 1;

            if searched_nodes % CANCEL_POLL_INTERVAL == 0 && request.is_cancelled() {
                return Err(SearchError::Cancelled);
            }

            if current.index == goal.index {
                return Ok(SearchOutcome {
                    path: Self::reconstruct(&came_from, current.index),
                    total_cost: current.g_cost,
                    partial: false,
                    searched_nodes,
                });
            }

            let Some(cell) = self.graph.node(current.index) else {
                continue;
            };

            let h = self.heuristic(cell, goal);
            if h < closest.1 {
                closest = (cell.index, h);
            }

            for (dx, dy) in NEIGHBOR_OFFSETS {
                let Some(neighbor) = self.graph.offset(cell, dx, dy) else {
                    continue;
                };
                if closed[neighbor.index as usize] {
                    continue;
                }

                let diagonal = dx != 0 && dy != 0;
                if diagonal && !self.diagonal_allowed(policy, cell, dx, dy) {
                    continue;
                }

                if !policy.can_traverse_edge(cell, neighbor) {
                    continue;
                }

                let distance_mm = if diagonal { cost::DIAGONAL_MM } else { cost::MM_PER_UNIT };
                let tentative = current.g_cost + costs.step_cost(cell, neighbor, distance_mm) as u64;

                if tentative < g_score[neighbor.index as usize] {
                    g_score[neighbor.index as usize] = tentative;
                    came_from[neighbor.index as usize] = Some(cell.index);
                    open_set.push(OpenNode {
                        index: neighbor.index,
                        g_cost: tentative,
                        f_cost: tentative.saturating_add(self.heuristic(neighbor, goal)),
                    });
                }
            }
        }

        if self.partial_paths && closest.0 != start.index {
            let (index, _) = closest;
            debug_log!("grid search falling back to partial path ending at {}", index);
            return Ok(SearchOutcome {
                path: Self::reconstruct(&came_from, index),
                total_cost: g_score[index as usize],
                partial: true,
                searched_nodes,
            });
        }

        Err(SearchError::NoPath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{tags, SchedulerConfig};
    use crate::pipeline::ReturnPipeline;
    use crate::request::CompleteState;
    use crate::scheduler::PathScheduler;
    use crate::traversal::{CostModel, TraversalContext, TraversalProvider};

    fn center(x: u32, y: u32) -> Position {
        Position::new(x as f32 + 0.5, 0.0, y as f32 + 0.5)
    }

    fn request(from: (u32, u32), to: (u32, u32), policy: TraversalPolicy, costs: CostModel) -> Arc<PathRequest> {
        PathRequest::builder(center(from.0, from.1), center(to.0, to.1))
            .policy(policy)
            .costs(costs)
            .build()
    }

    /// 5x3 grid with tag 1 on (2,0) and (2,1)
    fn tagged_grid() -> Arc<GridGraph> {
        let mut graph = GridGraph::new(5, 3);
        let tag = Tag::new(1).unwrap();
        graph.cell_mut(2, 0).unwrap().set_tag(tag);
        graph.cell_mut(2, 1).unwrap().set_tag(tag);
        Arc::new(graph)
    }

    fn idx(graph: &GridGraph, x: u32, y: u32) -> NodeIndex {
        graph.index_of(x, y).unwrap()
    }

    #[test]
    fn test_straight_path() {
        let graph = tagged_grid();
        let search = GridSearch::new(Arc::clone(&graph));
        let outcome = search
            .search(&request((0, 0), (4, 0), TraversalPolicy::new(), CostModel::new()))
            .unwrap();

        let expected: Vec<_> = (0..5).map(|x| idx(&graph, x, 0)).collect();
        assert_eq!(outcome.path, expected);
        assert_eq!(outcome.total_cost, 4000);
        assert!(!outcome.partial);
    }

    #[test]
    fn test_tag_mask_forces_detour() {
        let graph = tagged_grid();
        let search = GridSearch::new(Arc::clone(&graph));
        let policy = TraversalPolicy::new().with_tag_mask(tags::ALL & !0b10);
        let outcome = search.search(&request((0, 0), (4, 0), policy, CostModel::new())).unwrap();

        assert!(outcome.path.contains(&idx(&graph, 2, 2)));
        assert!(!outcome.path.contains(&idx(&graph, 2, 0)));
        assert!(!outcome.path.contains(&idx(&graph, 2, 1)));
    }

    #[test]
    fn test_multiplier_prefers_cheaper_detour() {
        let graph = tagged_grid();
        let search = GridSearch::new(Arc::clone(&graph));
        let mut multipliers = vec![1.0; tags::COUNT];
        multipliers[1] = 10.0;
        let costs = CostModel::new().with_tag_multipliers(&multipliers).unwrap();

        let outcome = search
            .search(&request((0, 0), (4, 0), TraversalPolicy::new(), costs))
            .unwrap();

        let expected = vec![
            idx(&graph, 0, 0),
            idx(&graph, 1, 1),
            idx(&graph, 2, 2),
            idx(&graph, 3, 1),
            idx(&graph, 4, 0),
        ];
        assert_eq!(outcome.path, expected);
        assert_eq!(outcome.total_cost, 4 * 1414);
    }

    #[test]
    fn test_entry_cost_and_penalty_counted() {
        let mut graph = GridGraph::new(3, 1);
        graph.cell_mut(1, 0).unwrap().set_penalty(50);
        let search = GridSearch::new(Arc::new(graph));
        let mut entry_costs = vec![0u32; tags::COUNT];
        entry_costs[0] = 7;
        let costs = CostModel::new().with_tag_entry_costs(&entry_costs).unwrap();

        let outcome = search
            .search(&request((0, 0), (2, 0), TraversalPolicy::new(), costs))
            .unwrap();
        assert_eq!(outcome.total_cost, 2000 + 2 * 7 + 50);
    }

    /// Rejects (1,0) and (0,1) on a 3x3 grid
    struct BlockCorners {
        filter_diagonals: bool,
    }

    impl TraversalProvider for BlockCorners {
        fn filter_diagonal_grid_connections(&self) -> bool {
            self.filter_diagonals
        }

        fn can_traverse(&self, ctx: &TraversalContext<'_>, node: &dyn GraphNode) -> bool {
            ctx.can_traverse_builtin(node) && node.index() != 1 && node.index() != 3
        }
    }

    #[test]
    fn test_filtered_flankers_block_diagonal() {
        let search = GridSearch::new(Arc::new(GridGraph::new(3, 3)));
        let policy = TraversalPolicy::new().with_provider(Arc::new(BlockCorners { filter_diagonals: true }));

        let result = search.search(&request((0, 0), (2, 2), policy, CostModel::new()));
        assert_eq!(result, Err(SearchError::NoPath));
    }

    #[test]
    fn test_unfiltered_provider_allows_diagonal() {
        let search = GridSearch::new(Arc::new(GridGraph::new(3, 3)));
        let policy = TraversalPolicy::new().with_provider(Arc::new(BlockCorners { filter_diagonals: false }));

        let outcome = search.search(&request((0, 0), (2, 2), policy, CostModel::new())).unwrap();
        assert_eq!(outcome.path, vec![0, 4, 8]);
        assert_eq!(outcome.total_cost, 2 * 1414);
    }

    #[test]
    fn test_unwalkable_flankers_always_block_diagonal() {
        let mut graph = GridGraph::new(2, 2);
        graph.cell_mut(1, 0).unwrap().set_walkable(false);
        graph.cell_mut(0, 1).unwrap().set_walkable(false);
        graph.recompute_areas();
        let search = GridSearch::new(Arc::new(graph)).with_partial_paths(true);

        // Areas still connect diagonally, but the step is a corner cut
        let result = search.search(&request((0, 0), (1, 1), TraversalPolicy::new(), CostModel::new()));
        assert_eq!(result, Err(SearchError::NoPath));
    }

    fn walled_grid() -> GridGraph {
        let mut graph = GridGraph::new(5, 1);
        graph.cell_mut(2, 0).unwrap().set_walkable(false);
        assert_eq!(graph.recompute_areas(), 2);
        graph
    }

    #[test]
    fn test_disconnected_areas_no_path() {
        let search = GridSearch::new(Arc::new(walled_grid()));
        let result = search.search(&request((0, 0), (4, 0), TraversalPolicy::new(), CostModel::new()));
        assert_eq!(result, Err(SearchError::NoPath));
    }

    #[test]
    fn test_partial_path_to_closest_node() {
        let search = GridSearch::new(Arc::new(walled_grid())).with_partial_paths(true);
        let outcome = search
            .search(&request((0, 0), (4, 0), TraversalPolicy::new(), CostModel::new()))
            .unwrap();

        assert!(outcome.partial);
        assert_eq!(outcome.path, vec![0, 1]);
        assert_eq!(outcome.total_cost, 1000);
    }

    #[test]
    fn test_end_points_snap_to_nearest_suitable_node() {
        let graph = walled_grid();
        let search = GridSearch::new(Arc::new(graph));
        // End point inside the wall snaps to a neighbour
        let req = PathRequest::builder(center(0, 0), Position::new(2.4, 0.0, 0.5)).build();
        let outcome = search.search(&req).unwrap();
        assert_eq!(outcome.path, vec![0, 1]);

        let far = PathRequest::builder(Position::new(500.0, 0.0, 500.0), center(0, 0)).build();
        assert_eq!(search.search(&far), Err(SearchError::NoStartNode));
    }

    #[test]
    fn test_graph_mask_excludes_grid() {
        let search = GridSearch::new(Arc::new(GridGraph::with_graph_index(3, 3, 2)));
        let policy = TraversalPolicy::new().with_graph_mask(crate::graph::GraphMask::from_graph_index(0));
        let result = search.search(&request((0, 0), (2, 2), policy, CostModel::new()));
        assert_eq!(result, Err(SearchError::NoStartNode));
    }

    #[test]
    fn test_cancelled_before_search() {
        let search = GridSearch::new(Arc::new(GridGraph::new(3, 3)));
        let req = request((0, 0), (2, 2), TraversalPolicy::new(), CostModel::new());
        req.cancel();
        assert_eq!(search.search(&req), Err(SearchError::Cancelled));
    }

    #[test]
    fn test_grid_search_through_scheduler() {
        let graph = tagged_grid();
        let pipeline = Arc::new(ReturnPipeline::default());
        let config = SchedulerConfig {
            worker_count: 2,
            ..SchedulerConfig::default()
        };
        let scheduler = PathScheduler::start(
            config,
            Arc::new(GridSearch::new(Arc::clone(&graph))),
            Arc::clone(&pipeline),
        )
        .unwrap();

        let open = request((0, 0), (4, 0), TraversalPolicy::new(), CostModel::new());
        let blocked = request(
            (0, 0),
            (4, 0),
            TraversalPolicy::new().with_graph_mask(crate::graph::GraphMask::NONE),
            CostModel::new(),
        );
        scheduler.submit(&open).unwrap();
        scheduler.submit(&blocked).unwrap();
        pipeline.block_until_returned(&open);
        pipeline.block_until_returned(&blocked);

        assert_eq!(open.complete_state(), CompleteState::Complete);
        assert_eq!(open.result().total_cost, 4000);
        assert!(blocked.is_error());
    }
}
