use crate::spatial::{within_radius, QUERY_PAD};
use colony_common::{AgentId, Vec2};
use rayon::prelude::*;

// Keeps sparse colonies with a tiny radius from allocating huge bucket arrays
const MAX_CELLS_PER_AXIS: usize = 2048;

/// Uniform bucket grid built by counting sort.
///
/// `cell_counts[c]` entries of cell `c` live contiguously in `cell_entries`
/// starting at `cell_starts[c]`.
#[derive(Debug, Clone)]
pub struct GridIndex {
    cell_size: f64,
    inv_cell_size: f64,
    origin: Vec2,
    dim_x: usize,
    dim_y: usize,
    points: Vec<(AgentId, Vec2)>,
    point_cells: Vec<usize>,
    cell_counts: Vec<u32>,
    cell_starts: Vec<u32>,
    cell_entries: Vec<u32>,
}

impl GridIndex {
    pub fn new(cell_size: f64) -> Self {
        GridIndex {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            origin: Vec2::default(),
            dim_x: 0,
            dim_y: 0,
            points: Vec::new(),
            point_cells: Vec::new(),
            cell_counts: Vec::new(),
            cell_starts: Vec::new(),
            cell_entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Cell coordinate along one axis, clamped to the grid.
    #[inline(always)]
    fn axis_cell(&self, value: f64, origin: f64, dim: usize) -> usize {
        let cell = ((value - origin) * self.inv_cell_size).floor();
        if cell <= 0.0 {
            0
        } else {
            (cell as usize).min(dim - 1)
        }
    }

    #[inline(always)]
    fn cell_of(&self, pos: Vec2) -> usize {
        let cx = self.axis_cell(pos.x, self.origin.x, self.dim_x);
        let cy = self.axis_cell(pos.y, self.origin.y, self.dim_y);
        cy * self.dim_x + cx
    }

    /// Discards the previous contents and bins `points`.
    pub fn rebuild(&mut self, points: Vec<(AgentId, Vec2)>) {
        self.points = points;
        let num_points = self.points.len();
        if num_points == 0 {
            self.dim_x = 0;
            self.dim_y = 0;
            self.cell_counts.clear();
            self.cell_starts.clear();
            self.cell_entries.clear();
            self.point_cells.clear();
            return;
        }

        // Phase 1: bounds and dimensions
        let (min, max) = self.points.iter().fold(
            (Vec2::new(f64::INFINITY, f64::INFINITY), Vec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY)),
            |(lo, hi), (_, p)| (lo.min(*p), hi.max(*p)),
        );
        let extent = max - min;
        let mut cell_size = self.cell_size;
        let widest = extent.x.max(extent.y);
        if widest / cell_size >= MAX_CELLS_PER_AXIS as f64 {
            cell_size = widest / (MAX_CELLS_PER_AXIS - 1) as f64;
        }
        self.inv_cell_size = 1.0 / cell_size;
        self.origin = min;
        self.dim_x = (extent.x * self.inv_cell_size).floor() as usize + 1;
        self.dim_y = (extent.y * self.inv_cell_size).floor() as usize + 1;
        let num_cells = self.dim_x * self.dim_y;

        // Phase 2: cell of each point (parallel)
        let mut point_cells = std::mem::take(&mut self.point_cells);
        point_cells.resize(num_points, 0);
        {
            let this = &*self;
            point_cells
                .par_iter_mut()
                .zip(this.points.par_iter())
                .for_each(|(cell_out, (_, pos))| *cell_out = this.cell_of(*pos));
        }
        self.point_cells = point_cells;

        // Phase 3: counts and prefix sum
        self.cell_counts.clear();
        self.cell_counts.resize(num_cells, 0);
        for &cell in &self.point_cells {
            self.cell_counts[cell] += 1;
        }
        self.cell_starts.clear();
        self.cell_starts.resize(num_cells, 0);
        let mut total = 0u32;
        for (start, count) in self.cell_starts.iter_mut().zip(&self.cell_counts) {
            *start = total;
            total += count;
        }

        // Phase 4: scatter in input order so every cell lists its points deterministically
        self.cell_entries.clear();
        self.cell_entries.resize(num_points, 0);
        let mut cursor = self.cell_starts.clone();
        for (point_idx, &cell) in self.point_cells.iter().enumerate() {
            self.cell_entries[cursor[cell] as usize] = point_idx as u32;
            cursor[cell] += 1;
        }
    }

    /// Calls `f` for every indexed point strictly within `radius` of `(x, y)`.
    pub fn for_each_within<F>(&self, x: f64, y: f64, radius: f64, mut f: F)
    where
        F: FnMut(AgentId),
    {
        if self.points.is_empty() {
            return;
        }
        let centre = Vec2::new(x, y);
        let reach = radius + QUERY_PAD;
        let radius_sq = radius * radius;

        // Cells overlapping the query square, clamped to the populated box
        let first_x = self.axis_cell(x - reach, self.origin.x, self.dim_x);
        let last_x = self.axis_cell(x + reach, self.origin.x, self.dim_x);
        let first_y = self.axis_cell(y - reach, self.origin.y, self.dim_y);
        let last_y = self.axis_cell(y + reach, self.origin.y, self.dim_y);

        for cy in first_y..=last_y {
            for cx in first_x..=last_x {
                let cell = cy * self.dim_x + cx;
                let start = self.cell_starts[cell] as usize;
                let end = start + self.cell_counts[cell] as usize;
                for &entry in &self.cell_entries[start..end] {
                    let (id, pos) = self.points[entry as usize];
                    if within_radius(centre, pos, radius_sq) {
                        f(id);
                    }
                }
            }
        }
    }
}
