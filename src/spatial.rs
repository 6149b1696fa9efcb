use crate::grid::GridIndex;
use crate::quadtree::QuadTree;
use colony_common::{Agent, AgentId, IndexKind, Phenotype, Vec2};

/// Slack added to query boxes so float noise at cell edges never drops a candidate.
pub(crate) const QUERY_PAD: f64 = 1e-9;

/// The one distance predicate both index kinds use.
#[inline(always)]
pub(crate) fn within_radius(centre: Vec2, pos: Vec2, radius_sq: f64) -> bool {
    centre.distance_squared(pos) < radius_sq
}

/// Neighbourhood census around one point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeighborCounts {
    /// Every indexed agent in range, the querying agent included.
    pub total: u32,
    pub count_a: u32,
    pub count_b: u32,
}

/// Neighbour index over the agents of one step, rebuilt from scratch every step.
#[derive(Debug, Clone)]
pub enum SpatialIndex {
    Grid(GridIndex),
    Tree(QuadTree),
}

impl SpatialIndex {
    /// `cell_size` is the bucket edge of the grid variant (the neighbour radius).
    pub fn new(kind: IndexKind, cell_size: f64) -> Self {
        match kind {
            IndexKind::Grid => SpatialIndex::Grid(GridIndex::new(cell_size)),
            IndexKind::Quadtree => SpatialIndex::Tree(QuadTree::new()),
        }
    }

    pub fn rebuild(&mut self, agents: &[Agent]) {
        let points = agents.iter().map(|a| (a.id, a.position())).collect();
        match self {
            SpatialIndex::Grid(grid) => grid.rebuild(points),
            SpatialIndex::Tree(tree) => tree.rebuild(points),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SpatialIndex::Grid(grid) => grid.len(),
            SpatialIndex::Tree(tree) => tree.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each_within<F>(&self, x: f64, y: f64, radius: f64, f: F)
    where
        F: FnMut(AgentId),
    {
        match self {
            SpatialIndex::Grid(grid) => grid.for_each_within(x, y, radius, f),
            SpatialIndex::Tree(tree) => tree.for_each_within(x, y, radius, f),
        }
    }

    /// Counts agents within `radius` and splits them by phenotype.
    ///
    /// Agents for which `classify` returns `None` count only towards `total`.
    pub fn count_neighbors<C>(&self, x: f64, y: f64, radius: f64, classify: C) -> NeighborCounts
    where
        C: Fn(AgentId) -> Option<Phenotype>,
    {
        let mut counts = NeighborCounts::default();
        self.for_each_within(x, y, radius, |id| {
            counts.total += 1;
            match classify(id) {
                Some(Phenotype::A) => counts.count_a += 1,
                Some(Phenotype::B) => counts.count_b += 1,
                None => {}
            }
        });
        counts
    }
}
