use crate::diffusion::DiffusionField;
use crate::state::{EngineState, SimState};
use crate::worker::DiffusionWorker;
use anyhow::Result;
use colony_common::{
    Agent, AgentRecord, History, Phenotype, SimParams, SimulationConfig, Snapshot, StepStatistics, Trajectory,
};
use log::{debug, info, trace};
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

/// What one step hands to the rendering and charting collaborators.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub statistics: StepStatistics,
    pub agents: Vec<AgentRecord>,
}

/// Drives the per-step pipeline over a recorded trajectory.
pub struct Simulation {
    /// The simulation configuration the engine was built from.
    config: SimulationConfig,
    /// Fields, index, engine and per-step buffers.
    state: SimState,
    /// Positions to replay, keyed by trajectory step.
    trajectory: Trajectory,
    /// Next trajectory step `step()` will play.
    cursor: Option<u32>,
    /// Present when `offload.enabled` is set.
    worker: Option<DiffusionWorker>,
    /// Number of steps played since the last reset.
    current_step: u32,
    visible: bool,
    history: History,
    last_statistics: StepStatistics,
    last_records: Vec<AgentRecord>,
    /// Stores collected snapshots at record intervals.
    recorded_snapshots: Vec<Snapshot>,
}

impl Simulation {
    /// Validates the configuration and allocates every field and store. No trajectory is loaded yet.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let state = SimState::new(&config)?;
        let worker = if config.offload.enabled {
            Some(DiffusionWorker::spawn()?)
        } else {
            None
        };
        info!(
            "Engine ready: {:?} mode, {} field(s) on a {}x{} grid, {:?} neighbour index.",
            state.params.mode,
            state.fields.len(),
            state.params.grid_width,
            state.params.grid_height,
            state.params.index_kind
        );
        let mut last_statistics = StepStatistics::default();
        for field in &state.fields {
            last_statistics.field_means.insert(field.name().to_string(), field.mean());
        }

        Ok(Simulation {
            config,
            state,
            trajectory: Trajectory::new(),
            cursor: None,
            worker,
            current_step: 0,
            visible: true,
            history: History::default(),
            last_statistics,
            last_records: Vec::new(),
            recorded_snapshots: Vec::new(),
        })
    }

    /// Rejects agents outside the grid, non-finite coordinates and repeated ids within a step.
    fn validate_agents(&self, step: u32, agents: &[Agent]) -> Result<()> {
        let params = &self.state.params;
        let mut seen = HashSet::with_capacity(agents.len());
        for agent in agents {
            if !agent.x.is_finite() || !agent.y.is_finite() {
                anyhow::bail!("Agent {} at step {} has a non-finite position.", agent.id, step);
            }
            if !params.contains(agent.x, agent.y) {
                anyhow::bail!(
                    "Agent {} at step {} lies outside the grid: ({:.3}, {:.3}) beyond +/-({:.3}, {:.3}).",
                    agent.id, step, agent.x, agent.y, params.half_extent_x, params.half_extent_y
                );
            }
            if !seen.insert(agent.id) {
                anyhow::bail!("Agent id {} appears twice at step {}.", agent.id, step);
            }
        }
        Ok(())
    }

    /// Replaces the trajectory and resets all engine state.
    pub fn load_trajectory(&mut self, trajectory: Trajectory) -> Result<()> {
        for (step, agents) in &trajectory.steps {
            self.validate_agents(*step, agents)?;
        }
        info!(
            "Loaded trajectory: {} steps ({:?}..={:?}), {} agent records.",
            trajectory.len(),
            trajectory.first_step(),
            trajectory.last_step(),
            trajectory.agent_count()
        );
        self.trajectory = trajectory;
        self.reset();
        Ok(())
    }

    /// Plays the next trajectory step. Returns `None` once the trajectory is exhausted.
    pub fn step(&mut self) -> Result<Option<StepOutput>> {
        let Some(key) = self.cursor else {
            return Ok(None);
        };
        match self.trajectory.get(key) {
            Some(agents) => self.state.load_agents(agents),
            None => self.state.load_agents(&[]),
        }
        self.cursor = self.trajectory.steps.range(key + 1..).next().map(|(k, _)| *k);
        self.run_step().map(Some)
    }

    /// Runs one step on caller-supplied agents instead of the loaded trajectory.
    pub fn step_with(&mut self, agents: &[Agent]) -> Result<StepOutput> {
        self.validate_agents(self.current_step, agents)?;
        self.state.load_agents(agents);
        self.run_step()
    }

    fn run_step(&mut self) -> Result<StepOutput> {
        let step_start = Instant::now();

        // --- 1. Rebuild Spatial Index ---
        self.state.rebuild_index();

        // --- 2. Update Agents (reads the field as it was before this step) ---
        self.state.update_agents()?;

        // --- 3. Refill Sources and Sinks ---
        self.state.populate_sources();

        // --- 4. Advance Diffusion Fields ---
        self.advance_fields()?;

        // --- 5. Similarity and Statistics ---
        self.state.compute_similarity();
        self.current_step += 1;
        let time = self.current_step as f64 * self.state.params.macro_dt;
        let statistics = self.state.statistics(self.current_step, time);
        self.history.push(&statistics);

        self.last_records = self.state.agent_records(self.visible);
        self.last_statistics = statistics.clone();

        trace!(
            "Step {} done in {:.2} ms ({} agents).",
            self.current_step,
            step_start.elapsed().as_secs_f64() * 1000.0,
            statistics.total
        );
        Ok(StepOutput { statistics, agents: self.last_records.clone() })
    }

    fn advance_fields(&mut self) -> Result<()> {
        let elapsed = self.state.params.macro_dt;
        let timeout = Duration::from_millis(self.config.offload.timeout_ms);
        for field in self.state.fields.iter_mut() {
            match self.worker.as_mut() {
                Some(worker) => {
                    worker.advance(field, elapsed, timeout)?;
                }
                None => {
                    field.advance(elapsed)?;
                }
            }
        }
        Ok(())
    }

    /// Updates one runtime parameter by name. Unknown names leave everything unchanged.
    ///
    /// Recognised: `diffusion_rate`; in phenotype mode `signal` (clamped to its bounds),
    /// `basal_switch_rate`, `source_rate`, `sink_rate`; in cytoplasm mode any kinetic constant.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            anyhow::bail!("Parameter '{}' must be finite (got {}).", name, value);
        }
        if name == "diffusion_rate" {
            if value < 0.0 {
                anyhow::bail!("diffusion_rate must be non-negative (got {}).", value);
            }
            for field in self.state.fields.iter_mut() {
                field.set_diffusion_rate(value)?;
            }
            let params = &mut self.state.params;
            params.diffusion_rate = value;
            params.alpha = value * params.dt / (2.0 * params.dx * params.dx);
            info!("diffusion_rate set to {} (alpha={:.4}).", value, params.alpha);
            return Ok(());
        }

        match &mut self.state.engine {
            EngineState::Phenotype(engine) => {
                let params = &mut self.state.params;
                match name {
                    "signal" => {
                        params.signal = engine.set_signal(value);
                    }
                    "basal_switch_rate" | "source_rate" | "sink_rate" if value < 0.0 => {
                        anyhow::bail!("{} must be non-negative (got {}).", name, value);
                    }
                    "basal_switch_rate" => {
                        engine.set_basal_switch_rate(value);
                        params.basal_switch_rate = value;
                    }
                    "source_rate" => params.source_rate = value,
                    "sink_rate" => params.sink_rate = value,
                    _ => anyhow::bail!("Unknown parameter '{}'.", name),
                }
            }
            EngineState::Cytoplasm(engine) => engine.set_parameter(name, value)?,
        }
        info!("Parameter '{}' set to {}.", name, value);
        Ok(())
    }

    /// Clears lineage state, fields, history and snapshots and rewinds the trajectory.
    pub fn reset(&mut self) {
        self.state.reset();
        self.cursor = self.trajectory.first_step();
        self.current_step = 0;
        self.history.clear();
        self.recorded_snapshots.clear();
        self.last_records.clear();
        self.last_statistics = StepStatistics::default();
        for field in &self.state.fields {
            self.last_statistics.field_means.insert(field.name().to_string(), field.mean());
        }
        debug!("Simulation reset.");
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        for record in &mut self.last_records {
            record.visible = visible;
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Stores a snapshot of the latest step (or the initial state before any step).
    pub fn record_snapshot(&mut self) -> Result<()> {
        let output = &self.config.output;
        let agents = output.save_agents_in_snapshot.then(|| self.last_records.clone());
        let fields = output.save_field_in_snapshot.then(|| {
            self.state
                .fields
                .iter()
                .map(|f| (f.name().to_string(), f.snapshot()))
                .collect::<BTreeMap<_, _>>()
        });
        debug!("Recording snapshot at step {}...", self.current_step);
        self.recorded_snapshots.push(Snapshot {
            step: self.current_step,
            time: self.current_step as f64 * self.state.params.macro_dt,
            statistics: self.last_statistics.clone(),
            agents,
            fields,
        });
        Ok(())
    }

    /// Provides access to the recorded snapshots.
    pub fn get_recorded_snapshots(&self) -> &Vec<Snapshot> {
        &self.recorded_snapshots
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Concentration grid of the named field.
    pub fn field(&self, name: &str) -> Option<&[f64]> {
        self.diffusion_field(name).map(DiffusionField::values)
    }

    pub fn field_snapshot(&self, name: &str) -> Option<Vec<f64>> {
        self.diffusion_field(name).map(DiffusionField::snapshot)
    }

    pub fn diffusion_field(&self, name: &str) -> Option<&DiffusionField> {
        self.state.fields.iter().find(|f| f.name() == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.state.fields.iter().map(|f| f.name()).collect()
    }

    /// Current phenotype of `id` in phenotype mode.
    pub fn phenotype(&self, id: u64) -> Option<Phenotype> {
        match &self.state.engine {
            EngineState::Phenotype(engine) => engine.phenotype(id),
            EngineState::Cytoplasm(_) => None,
        }
    }

    /// Current interior concentration of `species` in `id` in cytoplasm mode.
    pub fn interior_value(&self, id: u64, species: &str) -> Option<f64> {
        match &self.state.engine {
            EngineState::Cytoplasm(engine) => {
                let idx = engine.model().interior_index(species)?;
                engine.interior_value(id, idx)
            }
            EngineState::Phenotype(_) => None,
        }
    }

    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    pub fn agent_count(&self) -> usize {
        self.state.agents.len()
    }

    /// Steps left in the loaded trajectory.
    pub fn remaining_steps(&self) -> usize {
        match self.cursor {
            Some(key) => self.trajectory.steps.range(key..).count(),
            None => 0,
        }
    }

    /// Provides access to the simulation parameters.
    pub fn params(&self) -> &SimParams {
        &self.state.params
    }

    /// Provides access to the original simulation configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }
}
