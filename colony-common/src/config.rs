use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::SimParams;
use std::collections::BTreeMap;
use std::path::Path;

// Diffusion grid geometry and solver constants
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GridConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_dx")]
    pub dx: f64,
    pub diffusion_rate: f64,
    /// ADI micro time step (seconds).
    pub dt: f64,
    /// Sanity ceiling; solved values above it are treated as numerical defects.
    #[serde(default = "default_max_concentration")]
    pub max_concentration: f64,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    /// Simulated seconds between two trajectory steps.
    pub macro_dt: f64,
    /// Number of trajectory steps to run (None = whole trajectory).
    #[serde(default)]
    pub total_steps: Option<u32>,
    #[serde(default = "default_record_interval")]
    pub record_interval_steps: u32,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Grid,
    Quadtree,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NeighborConfig {
    #[serde(default = "default_neighbor_radius")]
    pub radius: f64,
    #[serde(default = "default_index_kind")]
    pub index: IndexKind,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        NeighborConfig {
            radius: default_neighbor_radius(),
            index: default_index_kind(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    Phenotype,
    Cytoplasm,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_engine_mode")]
    pub mode: EngineMode,
    /// Seed for the engine RNG (phenotype bootstrap and switching).
    #[serde(default)]
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { mode: default_engine_mode(), seed: 0 }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSign {
    Positive,
    Negative,
}

// Parameters of the discrete two-state switch
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PhenotypeConfig {
    #[serde(default = "default_feedback")]
    pub feedback: FeedbackSign,
    #[serde(default = "default_signal")]
    pub signal: f64,
    #[serde(default)]
    pub signal_min: f64,
    #[serde(default = "default_signal_max")]
    pub signal_max: f64,
    /// Rate added to both transition rates (0 disables it).
    #[serde(default)]
    pub basal_switch_rate: f64,
    /// Amount each A agent adds to `sources` per step.
    #[serde(default = "default_unit_rate")]
    pub source_rate: f64,
    /// Amount each B agent adds to `sinks` per step.
    #[serde(default = "default_unit_rate")]
    pub sink_rate: f64,
}

impl Default for PhenotypeConfig {
    fn default() -> Self {
        PhenotypeConfig {
            feedback: default_feedback(),
            signal: default_signal(),
            signal_min: 0.0,
            signal_max: default_signal_max(),
            basal_switch_rate: 0.0,
            source_rate: default_unit_rate(),
            sink_rate: default_unit_rate(),
        }
    }
}

// Continuous cytoplasm model selection and overrides
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CytoplasmConfig {
    #[serde(default = "default_circuit")]
    pub circuit: String,
    /// Euler step for the interior ODEs; falls back to `timing.macro_dt`.
    #[serde(default)]
    pub euler_dt: Option<f64>,
    /// Kinetic parameter overrides, merged over the circuit defaults.
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    /// Initial value overrides per species name.
    #[serde(default)]
    pub initial: BTreeMap<String, f64>,
}

impl Default for CytoplasmConfig {
    fn default() -> Self {
        CytoplasmConfig {
            circuit: default_circuit(),
            euler_dt: None,
            parameters: BTreeMap::new(),
            initial: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OffloadConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_offload_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        OffloadConfig { enabled: false, timeout_ms: default_offload_timeout_ms() }
    }
}

// Demo lineage used by the driver when no recorded trajectory is given
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SyntheticConfig {
    #[serde(default = "default_synthetic_founders")]
    pub founders: u32,
    #[serde(default = "default_synthetic_steps")]
    pub steps: u32,
    #[serde(default = "default_division_interval")]
    pub division_interval_steps: u32,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            founders: default_synthetic_founders(),
            steps: default_synthetic_steps(),
            division_interval_steps: default_division_interval(),
            jitter: default_jitter(),
            seed: 0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct InputConfig {
    /// Recorded trajectory file; when absent a synthetic lineage is generated.
    #[serde(default)]
    pub trajectory: Option<String>,
    /// "json", "bincode" or "messagepack" (defaults to the file extension).
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default = "default_true")]
    pub save_history: bool,
    #[serde(default = "default_true")]
    pub save_snapshots: bool,
    #[serde(default)]
    pub save_agents_in_snapshot: bool,
    #[serde(default)]
    pub save_field_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub grid: GridConfig,
    pub timing: TimingConfig,
    #[serde(default)]
    pub neighbors: NeighborConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub phenotype: PhenotypeConfig,
    #[serde(default)]
    pub cytoplasm: CytoplasmConfig,
    #[serde(default)]
    pub offload: OffloadConfig,
    #[serde(default)]
    pub input: InputConfig,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        Ok(config)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the engine cannot run. Called before the first step.
    pub fn validate(&self) -> Result<()> {
        let grid = &self.grid;
        if grid.width < 2 || grid.height < 2 {
            anyhow::bail!("grid must be at least 2x2 cells (got {}x{}).", grid.width, grid.height);
        }
        if !(grid.dx > 0.0) {
            anyhow::bail!("grid.dx must be positive.");
        }
        if !(grid.dt > 0.0) {
            anyhow::bail!("grid.dt must be positive.");
        }
        if !(grid.diffusion_rate >= 0.0) || !grid.diffusion_rate.is_finite() {
            anyhow::bail!("grid.diffusion_rate must be a finite non-negative number.");
        }
        if !(grid.max_concentration > 0.0) {
            anyhow::bail!("grid.max_concentration must be positive.");
        }
        if !(self.timing.macro_dt >= 0.0) || !self.timing.macro_dt.is_finite() {
            anyhow::bail!("timing.macro_dt must be a finite non-negative number.");
        }
        if self.timing.record_interval_steps == 0 {
            anyhow::bail!("timing.record_interval_steps must be greater than 0.");
        }
        if !(self.neighbors.radius > 0.0) {
            anyhow::bail!("neighbors.radius must be positive.");
        }
        let pheno = &self.phenotype;
        if pheno.signal_min > pheno.signal_max {
            anyhow::bail!(
                "phenotype.signal_min ({}) exceeds signal_max ({}).",
                pheno.signal_min, pheno.signal_max
            );
        }
        if pheno.signal < 0.0 || pheno.basal_switch_rate < 0.0 {
            anyhow::bail!("phenotype.signal and basal_switch_rate must be non-negative.");
        }
        if pheno.source_rate < 0.0 || pheno.sink_rate < 0.0 {
            anyhow::bail!("phenotype.source_rate and sink_rate must be non-negative.");
        }
        if let Some(euler_dt) = self.cytoplasm.euler_dt {
            if !(euler_dt > 0.0) {
                anyhow::bail!("cytoplasm.euler_dt must be positive.");
            }
        }
        if self.offload.enabled && self.offload.timeout_ms == 0 {
            anyhow::bail!("offload.timeout_ms must be greater than 0 when offloading is enabled.");
        }
        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let grid_width = self.grid.width;
        let grid_height = self.grid.height;
        let dx = self.grid.dx;
        let dt = self.grid.dt;
        let diffusion_rate = self.grid.diffusion_rate;

        // Coupling constant of both ADI half-steps
        let alpha = diffusion_rate * dt / (2.0 * dx * dx);

        let macro_dt = self.timing.macro_dt;
        let substeps_per_step = (macro_dt / dt).round() as u32;

        let neighbor_radius = self.neighbors.radius;

        SimParams {
            // Grid
            grid_width,
            grid_height,
            num_grid_cells: grid_width * grid_height,
            dx,
            inv_dx: 1.0 / dx,
            half_extent_x: grid_width as f64 * dx / 2.0,
            half_extent_y: grid_height as f64 * dx / 2.0,
            // Diffusion
            diffusion_rate,
            dt,
            alpha,
            max_concentration: self.grid.max_concentration,
            // Time
            macro_dt,
            substeps_per_step,
            euler_dt: self.cytoplasm.euler_dt.unwrap_or(macro_dt),
            // Neighbours
            neighbor_radius,
            neighbor_radius_sq: neighbor_radius * neighbor_radius,
            index_kind: self.neighbors.index,
            // State machine
            mode: self.engine.mode,
            feedback: self.phenotype.feedback,
            signal: clamp(self.phenotype.signal, self.phenotype.signal_min, self.phenotype.signal_max),
            signal_min: self.phenotype.signal_min,
            signal_max: self.phenotype.signal_max,
            basal_switch_rate: self.phenotype.basal_switch_rate,
            source_rate: self.phenotype.source_rate,
            sink_rate: self.phenotype.sink_rate,
        }
    }
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

fn default_dx() -> f64 {
    1.0
}

fn default_max_concentration() -> f64 {
    1.0e6
}

fn default_record_interval() -> u32 {
    1
}

fn default_neighbor_radius() -> f64 {
    7.0
}

fn default_index_kind() -> IndexKind {
    IndexKind::Grid
}

fn default_engine_mode() -> EngineMode {
    EngineMode::Phenotype
}

fn default_feedback() -> FeedbackSign {
    FeedbackSign::Negative
}

fn default_signal() -> f64 {
    0.0015
}

fn default_signal_max() -> f64 {
    1.0
}

fn default_unit_rate() -> f64 {
    1.0
}

fn default_circuit() -> String {
    "aim".to_string()
}

fn default_offload_timeout_ms() -> u64 {
    5_000
}

fn default_synthetic_founders() -> u32 {
    8
}

fn default_synthetic_steps() -> u32 {
    120
}

fn default_division_interval() -> u32 {
    20
}

fn default_jitter() -> f64 {
    0.6
}

fn default_true() -> bool {
    true
}
