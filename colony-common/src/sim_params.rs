use serde::{Deserialize, Serialize};
use crate::config::{EngineMode, FeedbackSign, IndexKind};

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Grid
    pub grid_width: u32,
    pub grid_height: u32,
    pub num_grid_cells: u32,
    pub dx: f64,
    pub inv_dx: f64,
    pub half_extent_x: f64, // Grid spans [-half_extent_x, half_extent_x] in simulation units
    pub half_extent_y: f64,

    // Diffusion
    pub diffusion_rate: f64,
    pub dt: f64, // ADI micro step
    pub alpha: f64, // D * dt / (2 * dx^2)
    pub max_concentration: f64,

    // Time
    pub macro_dt: f64,
    pub substeps_per_step: u32,
    pub euler_dt: f64,

    // Neighbours
    pub neighbor_radius: f64,
    pub neighbor_radius_sq: f64,
    pub index_kind: IndexKind,

    // State machine
    pub mode: EngineMode,
    pub feedback: FeedbackSign,
    pub signal: f64,
    pub signal_min: f64,
    pub signal_max: f64,
    pub basal_switch_rate: f64,
    pub source_rate: f64,
    pub sink_rate: f64,
}

impl SimParams {
    /// Maps a simulation-space position to its (clamped) grid cell index.
    /// The grid is centred on the origin.
    #[inline(always)]
    pub fn cell_index(&self, x: f64, y: f64) -> usize {
        let i = (x * self.inv_dx + self.grid_width as f64 / 2.0).round();
        let j = (y * self.inv_dx + self.grid_height as f64 / 2.0).round();
        // NaN casts to 0, which lands in the corner cell
        let i = (i.max(0.0) as u32).min(self.grid_width - 1);
        let j = (j.max(0.0) as u32).min(self.grid_height - 1);
        (j * self.grid_width + i) as usize
    }

    /// Whether a position lies inside the grid extent (inclusive of the half-cell border).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let margin = 0.5 * self.dx;
        x.abs() <= self.half_extent_x + margin && y.abs() <= self.half_extent_y + margin
    }
}
