use crate::tridiagonal::TridiagonalSolver;
use anyhow::Result;
use colony_common::SimParams;
use log::{trace, warn};
use rayon::prelude::*;

/// Geometry and physical constants of one diffusion grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldGeometry {
    pub width: usize,
    pub height: usize,
    pub dx: f64,
    pub diffusion_rate: f64,
    /// ADI micro step (seconds).
    pub dt: f64,
    pub max_concentration: f64,
}

impl FieldGeometry {
    pub fn from_params(params: &SimParams) -> Self {
        FieldGeometry {
            width: params.grid_width as usize,
            height: params.grid_height as usize,
            dx: params.dx,
            diffusion_rate: params.diffusion_rate,
            dt: params.dt,
            max_concentration: params.max_concentration,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.width * self.height
    }

    /// Coupling constant of both Peaceman-Rachford half-steps.
    pub fn alpha(&self) -> f64 {
        self.diffusion_rate * self.dt / (2.0 * self.dx * self.dx)
    }

    fn validate(&self) -> Result<()> {
        if self.width < 2 || self.height < 2 {
            anyhow::bail!("Diffusion grid must be at least 2x2 (got {}x{}).", self.width, self.height);
        }
        if !(self.dx > 0.0) || !(self.dt > 0.0) {
            anyhow::bail!("Diffusion grid needs positive dx and dt (dx={}, dt={}).", self.dx, self.dt);
        }
        if !(self.diffusion_rate >= 0.0) || !self.diffusion_rate.is_finite() {
            anyhow::bail!("Diffusion rate must be finite and non-negative (got {}).", self.diffusion_rate);
        }
        Ok(())
    }
}

/// Outcome of one `advance` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    pub substeps: u32,
    /// Cells zeroed by post-solve validation (NaN, infinite, negative or above the ceiling).
    pub repaired_cells: usize,
}

/// Constant implicit-operator diagonals for one line length.
#[derive(Debug, Clone)]
struct Diagonals {
    lower: Vec<f64>,
    main: Vec<f64>,
    upper: Vec<f64>,
}

impl Diagonals {
    /// `-alpha, 1 + 2 alpha, -alpha` with zero-flux ends.
    fn implicit(n: usize, alpha: f64) -> Self {
        let mut lower = vec![-alpha; n];
        let mut main = vec![1.0 + 2.0 * alpha; n];
        let mut upper = vec![-alpha; n];
        lower[0] = 0.0;
        upper[n - 1] = 0.0;
        main[0] = 1.0 + alpha;
        main[n - 1] = 1.0 + alpha;
        Diagonals { lower, main, upper }
    }
}

/// Peaceman-Rachford ADI solver working on caller-owned grids.
///
/// Holds only the scratch buffers, so a field and the background worker can each own one.
#[derive(Debug, Clone)]
pub struct AdiSolver {
    geometry: FieldGeometry,
    alpha: f64,
    row_diagonals: Diagonals,
    column_diagonals: Diagonals,
    net_source: Vec<f64>,
    intermediate: Vec<f64>,
    transposed: Vec<f64>,
}

impl AdiSolver {
    pub fn new(geometry: FieldGeometry) -> Result<Self> {
        geometry.validate()?;
        let alpha = geometry.alpha();
        let n = geometry.num_cells();
        Ok(AdiSolver {
            geometry,
            alpha,
            row_diagonals: Diagonals::implicit(geometry.width, alpha),
            column_diagonals: Diagonals::implicit(geometry.height, alpha),
            net_source: vec![0.0; n],
            intermediate: vec![0.0; n],
            transposed: vec![0.0; n],
        })
    }

    pub fn geometry(&self) -> &FieldGeometry {
        &self.geometry
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Changes the diffusion coefficient and rebuilds the implicit operators.
    pub fn set_diffusion_rate(&mut self, diffusion_rate: f64) -> Result<()> {
        let mut geometry = self.geometry;
        geometry.diffusion_rate = diffusion_rate;
        *self = AdiSolver::new(geometry)?;
        Ok(())
    }

    /// Advances `grid` by `round(elapsed / dt)` micro steps with constant sources and sinks.
    pub fn advance(&mut self, grid: &mut [f64], sources: &[f64], sinks: &[f64], elapsed: f64) -> Result<AdvanceReport> {
        let n = self.geometry.num_cells();
        if grid.len() != n || sources.len() != n || sinks.len() != n {
            anyhow::bail!(
                "Field buffers do not match the {}x{} grid (grid={}, sources={}, sinks={}).",
                self.geometry.width, self.geometry.height, grid.len(), sources.len(), sinks.len()
            );
        }
        let substeps = substep_count(elapsed, self.geometry.dt);
        if substeps == 0 {
            return Ok(AdvanceReport::default());
        }

        let half_dt = 0.5 * self.geometry.dt;
        self.net_source
            .par_iter_mut()
            .zip(sources.par_iter().zip(sinks.par_iter()))
            .for_each(|(net, (src, sink))| *net = (src - sink) * half_dt);

        let mut repair = Repair::default();
        for _ in 0..substeps {
            self.row_half_step(grid)?;
            self.column_half_step(grid)?;
            repair.scan(grid, self.geometry.max_concentration);
        }
        repair.report(substeps);
        trace!("ADI advanced {} substeps (alpha={:.4}).", substeps, self.alpha);
        Ok(AdvanceReport { substeps, repaired_cells: repair.count })
    }

    /// Implicit along x, explicit along y. Reads `grid`, writes `intermediate`.
    fn row_half_step(&mut self, grid: &[f64]) -> Result<()> {
        let w = self.geometry.width;
        let h = self.geometry.height;
        let alpha = self.alpha;
        let diagonals = &self.row_diagonals;
        let net_source = &self.net_source;

        self.intermediate
            .par_chunks_mut(w)
            .enumerate()
            .try_for_each_init(
                || (TridiagonalSolver::with_capacity(w), vec![0.0; w]),
                |(solver, rhs), (j, out_row)| {
                    let row = &grid[j * w..(j + 1) * w];
                    let below = if j > 0 { &grid[(j - 1) * w..j * w] } else { row };
                    let above = if j + 1 < h { &grid[(j + 1) * w..(j + 2) * w] } else { row };
                    let net_row = &net_source[j * w..(j + 1) * w];
                    for i in 0..w {
                        rhs[i] = alpha * below[i] + (1.0 - 2.0 * alpha) * row[i] + alpha * above[i] + net_row[i];
                    }
                    solver.solve_into(&diagonals.lower, &diagonals.main, &diagonals.upper, rhs, out_row)
                },
            )
    }

    /// Implicit along y, explicit along x. Reads `intermediate`, writes `grid`.
    fn column_half_step(&mut self, grid: &mut [f64]) -> Result<()> {
        let w = self.geometry.width;
        let h = self.geometry.height;
        let alpha = self.alpha;
        let diagonals = &self.column_diagonals;
        let net_source = &self.net_source;
        let intermediate = &self.intermediate;

        // Columns are solved into a transposed buffer so each line is a contiguous chunk
        self.transposed
            .par_chunks_mut(h)
            .enumerate()
            .try_for_each_init(
                || (TridiagonalSolver::with_capacity(h), vec![0.0; h]),
                |(solver, rhs), (i, out_column)| {
                    for j in 0..h {
                        let idx = j * w + i;
                        let centre = intermediate[idx];
                        let left = if i > 0 { intermediate[idx - 1] } else { centre };
                        let right = if i + 1 < w { intermediate[idx + 1] } else { centre };
                        rhs[j] = alpha * left + (1.0 - 2.0 * alpha) * centre + alpha * right + net_source[idx];
                    }
                    solver.solve_into(&diagonals.lower, &diagonals.main, &diagonals.upper, rhs, out_column)
                },
            )?;

        for (i, column) in self.transposed.chunks(h).enumerate() {
            for (j, value) in column.iter().enumerate() {
                grid[j * w + i] = *value;
            }
        }
        Ok(())
    }
}

fn substep_count(elapsed: f64, dt: f64) -> u32 {
    if !(elapsed > 0.0) || !(dt > 0.0) {
        return 0;
    }
    (elapsed / dt).round() as u32
}

/// Aggregates post-solve repairs so one advance emits one warning.
#[derive(Debug, Default)]
struct Repair {
    count: usize,
    first: Option<(usize, f64)>,
}

impl Repair {
    fn scan(&mut self, grid: &mut [f64], max_concentration: f64) {
        for (idx, value) in grid.iter_mut().enumerate() {
            if !value.is_finite() || *value < 0.0 || *value > max_concentration {
                if self.first.is_none() {
                    self.first = Some((idx, *value));
                }
                self.count += 1;
                *value = 0.0;
            }
        }
    }

    fn report(&self, substeps: u32) {
        if let Some((idx, value)) = self.first {
            warn!(
                "Zeroed {} invalid concentration values over {} substeps (first at cell {}: {}).",
                self.count, substeps, idx, value
            );
        }
    }
}

/// A named concentration grid with its source and sink terms.
#[derive(Debug, Clone)]
pub struct DiffusionField {
    name: String,
    solver: AdiSolver,
    grid: Vec<f64>,
    sources: Vec<f64>,
    sinks: Vec<f64>,
}

impl DiffusionField {
    pub fn new(name: impl Into<String>, geometry: FieldGeometry) -> Result<Self> {
        let solver = AdiSolver::new(geometry)?;
        let n = geometry.num_cells();
        Ok(DiffusionField {
            name: name.into(),
            solver,
            grid: vec![0.0; n],
            sources: vec![0.0; n],
            sinks: vec![0.0; n],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &FieldGeometry {
        self.solver.geometry()
    }

    pub fn alpha(&self) -> f64 {
        self.solver.alpha()
    }

    pub fn values(&self) -> &[f64] {
        &self.grid
    }

    pub fn sources(&self) -> &[f64] {
        &self.sources
    }

    pub fn sinks(&self) -> &[f64] {
        &self.sinks
    }

    /// Copy of the concentration grid for collaborators that outlive the borrow.
    pub fn snapshot(&self) -> Vec<f64> {
        self.grid.clone()
    }

    #[inline(always)]
    pub fn value_at(&self, cell: usize) -> f64 {
        self.grid.get(cell).copied().unwrap_or(0.0)
    }

    pub fn set_value(&mut self, cell: usize, value: f64) {
        if let Some(slot) = self.grid.get_mut(cell) {
            *slot = value;
        }
    }

    pub fn fill(&mut self, value: f64) {
        self.grid.iter_mut().for_each(|v| *v = value);
    }

    pub fn mean(&self) -> f64 {
        self.grid.iter().sum::<f64>() / self.grid.len() as f64
    }

    pub fn clear_sources(&mut self) {
        self.sources.iter_mut().for_each(|v| *v = 0.0);
        self.sinks.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn add_source(&mut self, cell: usize, amount: f64) {
        if let Some(slot) = self.sources.get_mut(cell) {
            *slot += amount;
        }
    }

    pub fn add_sink(&mut self, cell: usize, amount: f64) {
        if let Some(slot) = self.sinks.get_mut(cell) {
            *slot += amount;
        }
    }

    /// Zeroes the grid and its source terms.
    pub fn reset(&mut self) {
        self.fill(0.0);
        self.clear_sources();
    }

    pub fn set_diffusion_rate(&mut self, diffusion_rate: f64) -> Result<()> {
        self.solver.set_diffusion_rate(diffusion_rate)
    }

    /// Advances the field by `elapsed` seconds of ADI micro steps.
    pub fn advance(&mut self, elapsed: f64) -> Result<AdvanceReport> {
        self.solver.advance(&mut self.grid, &self.sources, &self.sinks, elapsed)
    }

    /// Forward-Euler reference scheme with the same zero-flux boundaries.
    ///
    /// Conditionally stable: `dt` must not exceed `dx^2 / (4 D)`.
    pub fn advance_explicit(&mut self, elapsed: f64, dt: f64) -> Result<AdvanceReport> {
        let geometry = *self.solver.geometry();
        if !(dt > 0.0) {
            anyhow::bail!("Explicit step must be positive (got {}).", dt);
        }
        let d = geometry.diffusion_rate;
        if d > 0.0 {
            let bound = geometry.dx * geometry.dx / (4.0 * d);
            if dt > bound {
                anyhow::bail!("Explicit step {} exceeds the stability bound {:.6}.", dt, bound);
            }
        }
        let substeps = substep_count(elapsed, dt);
        if substeps == 0 {
            return Ok(AdvanceReport::default());
        }

        let (w, h) = (geometry.width, geometry.height);
        let coupling = d * dt / (geometry.dx * geometry.dx);
        let mut next = vec![0.0; self.grid.len()];
        let mut repair = Repair::default();
        for _ in 0..substeps {
            let grid = &self.grid;
            let sources = &self.sources;
            let sinks = &self.sinks;
            next.par_chunks_mut(w).enumerate().for_each(|(j, out_row)| {
                for (i, out) in out_row.iter_mut().enumerate() {
                    let idx = j * w + i;
                    let centre = grid[idx];
                    let left = if i > 0 { grid[idx - 1] } else { centre };
                    let right = if i + 1 < w { grid[idx + 1] } else { centre };
                    let below = if j > 0 { grid[idx - w] } else { centre };
                    let above = if j + 1 < h { grid[idx + w] } else { centre };
                    let laplacian = left + right + below + above - 4.0 * centre;
                    *out = centre + coupling * laplacian + (sources[idx] - sinks[idx]) * dt;
                }
            });
            std::mem::swap(&mut self.grid, &mut next);
            repair.scan(&mut self.grid, geometry.max_concentration);
        }
        repair.report(substeps);
        Ok(AdvanceReport { substeps, repaired_cells: repair.count })
    }

    /// Replaces the grid with a solution computed elsewhere.
    pub(crate) fn commit(&mut self, grid: Vec<f64>) -> Result<()> {
        if grid.len() != self.grid.len() {
            anyhow::bail!("Solved grid for '{}' has {} cells, expected {}.", self.name, grid.len(), self.grid.len());
        }
        self.grid = grid;
        Ok(())
    }
}
