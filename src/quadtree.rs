use crate::spatial::{within_radius, QUERY_PAD};
use colony_common::{AgentId, Vec2};

const LEAF_CAPACITY: usize = 8;
const MAX_DEPTH: u32 = 20;

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min: Vec2,
    max: Vec2,
}

impl Bounds {
    fn centre(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    fn quadrant(&self, pos: Vec2) -> usize {
        let mid = self.centre();
        (pos.x >= mid.x) as usize + 2 * (pos.y >= mid.y) as usize
    }

    fn child(&self, quadrant: usize) -> Bounds {
        let mid = self.centre();
        let (min_x, max_x) = if quadrant & 1 == 0 { (self.min.x, mid.x) } else { (mid.x, self.max.x) };
        let (min_y, max_y) = if quadrant & 2 == 0 { (self.min.y, mid.y) } else { (mid.y, self.max.y) };
        Bounds { min: Vec2::new(min_x, min_y), max: Vec2::new(max_x, max_y) }
    }

    fn intersects(&self, lo: Vec2, hi: Vec2) -> bool {
        self.min.x <= hi.x && self.max.x >= lo.x && self.min.y <= hi.y && self.max.y >= lo.y
    }
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Bounds,
    depth: u32,
    /// First of four consecutive child nodes; `None` for leaves.
    first_child: Option<u32>,
    points: Vec<u32>,
}

/// Point quadtree stored as a flat node arena.
#[derive(Debug, Clone, Default)]
pub struct QuadTree {
    nodes: Vec<Node>,
    points: Vec<(AgentId, Vec2)>,
}

impl QuadTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Discards the previous tree and inserts `points` in order.
    pub fn rebuild(&mut self, points: Vec<(AgentId, Vec2)>) {
        self.nodes.clear();
        self.points = points;
        if self.points.is_empty() {
            return;
        }
        let (min, max) = self.points.iter().fold(
            (Vec2::new(f64::INFINITY, f64::INFINITY), Vec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY)),
            |(lo, hi), (_, p)| (lo.min(*p), hi.max(*p)),
        );
        // Square root cell keeps quadrants isotropic
        let side = (max.x - min.x).max(max.y - min.y).max(f64::EPSILON);
        let bounds = Bounds { min, max: min + Vec2::new(side, side) };
        self.nodes.push(Node { bounds, depth: 0, first_child: None, points: Vec::new() });
        for point_idx in 0..self.points.len() as u32 {
            self.insert(point_idx);
        }
    }

    fn insert(&mut self, point_idx: u32) {
        let pos = self.points[point_idx as usize].1;
        let mut node_idx = 0usize;
        loop {
            match self.nodes[node_idx].first_child {
                Some(first) => {
                    node_idx = first as usize + self.nodes[node_idx].bounds.quadrant(pos);
                }
                None => {
                    let node = &mut self.nodes[node_idx];
                    if node.points.len() < LEAF_CAPACITY || node.depth >= MAX_DEPTH {
                        node.points.push(point_idx);
                        return;
                    }
                    self.split(node_idx);
                }
            }
        }
    }

    fn split(&mut self, node_idx: usize) {
        let first = self.nodes.len() as u32;
        let bounds = self.nodes[node_idx].bounds;
        let depth = self.nodes[node_idx].depth + 1;
        for quadrant in 0..4 {
            self.nodes.push(Node { bounds: bounds.child(quadrant), depth, first_child: None, points: Vec::new() });
        }
        let resident = std::mem::take(&mut self.nodes[node_idx].points);
        self.nodes[node_idx].first_child = Some(first);
        for point_idx in resident {
            let pos = self.points[point_idx as usize].1;
            let child = first as usize + bounds.quadrant(pos);
            self.nodes[child].points.push(point_idx);
        }
    }

    /// Calls `f` for every indexed point strictly within `radius` of `(x, y)`.
    pub fn for_each_within<F>(&self, x: f64, y: f64, radius: f64, mut f: F)
    where
        F: FnMut(AgentId),
    {
        if self.nodes.is_empty() {
            return;
        }
        let centre = Vec2::new(x, y);
        let reach = radius + QUERY_PAD;
        let lo = Vec2::new(x - reach, y - reach);
        let hi = Vec2::new(x + reach, y + reach);
        let radius_sq = radius * radius;

        let mut stack = vec![0usize];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx];
            if !node.bounds.intersects(lo, hi) {
                continue;
            }
            match node.first_child {
                Some(first) => stack.extend((first as usize..first as usize + 4).rev()),
                None => {
                    for &point_idx in &node.points {
                        let (id, pos) = self.points[point_idx as usize];
                        if within_radius(centre, pos, radius_sq) {
                            f(id);
                        }
                    }
                }
            }
        }
    }
}
