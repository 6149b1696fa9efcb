use crate::cytoplasm::{AgentCytoplasm, CytoplasmEngine};
use crate::diffusion::{DiffusionField, FieldGeometry};
use crate::phenotype::{PhenotypeEngine, PhenotypeParams, SimilarityMetrics};
use crate::spatial::SpatialIndex;
use anyhow::Result;
use colony_common::{
    Agent, AgentRecord, AgentState, EngineMode, Phenotype, SimParams, SimulationConfig, StepStatistics,
};
use rand::prelude::*;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Name of the single field the discrete engine secretes into.
pub const SIGNAL_FIELD: &str = "signal";

/// The per-agent state machine selected by `engine.mode`.
#[derive(Debug)]
pub enum EngineState {
    Phenotype(PhenotypeEngine),
    Cytoplasm(CytoplasmEngine),
}

/// Everything the orchestrator mutates during a step, owned in one place.
#[derive(Debug)]
pub struct SimState {
    pub params: SimParams,
    pub fields: Vec<DiffusionField>,
    pub index: SpatialIndex,
    pub engine: EngineState,
    /// Engine RNG (phenotype bootstrap and switching draws).
    pub rng: StdRng,
    seed: u64,

    // --- Current step buffers, overwritten every step ---
    /// Agents of the current step, in trajectory order.
    pub agents: Vec<Agent>,
    /// Grid cell index of each current agent.
    pub agent_cells: Vec<usize>,
    /// Filled after the advance in phenotype mode.
    pub similarity: Vec<SimilarityMetrics>,
    /// Filled during the update in cytoplasm mode.
    pub cytoplasm: Vec<AgentCytoplasm>,
}

impl SimState {
    /// Builds fields, index and engine from a validated configuration.
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        let params = config.get_sim_params();
        let geometry = FieldGeometry::from_params(&params);

        let (engine, field_names): (EngineState, Vec<String>) = match params.mode {
            EngineMode::Phenotype => {
                let engine = PhenotypeEngine::new(PhenotypeParams::from_params(&params));
                (EngineState::Phenotype(engine), vec![SIGNAL_FIELD.to_string()])
            }
            EngineMode::Cytoplasm => {
                let engine = CytoplasmEngine::from_config(&config.cytoplasm, params.euler_dt)?;
                let names = engine.exterior_names().map(str::to_string).collect();
                (EngineState::Cytoplasm(engine), names)
            }
        };
        let fields = field_names
            .into_iter()
            .map(|name| DiffusionField::new(name, geometry))
            .collect::<Result<Vec<_>>>()?;

        Ok(SimState {
            index: SpatialIndex::new(params.index_kind, params.neighbor_radius),
            params,
            fields,
            engine,
            rng: StdRng::seed_from_u64(config.engine.seed),
            seed: config.engine.seed,
            agents: Vec::new(),
            agent_cells: Vec::new(),
            similarity: Vec::new(),
            cytoplasm: Vec::new(),
        })
    }

    /// Clears lineage stores, fields and step buffers and reseeds the RNG.
    pub fn reset(&mut self) {
        match &mut self.engine {
            EngineState::Phenotype(engine) => engine.reset(),
            EngineState::Cytoplasm(engine) => engine.reset(),
        }
        self.fields.iter_mut().for_each(DiffusionField::reset);
        self.rng = StdRng::seed_from_u64(self.seed);
        self.agents.clear();
        self.agent_cells.clear();
        self.similarity.clear();
        self.cytoplasm.clear();
        self.index.rebuild(&[]);
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    /// Copies this step's agents in and maps each onto its grid cell.
    pub fn load_agents(&mut self, agents: &[Agent]) {
        self.agents.clear();
        self.agents.extend_from_slice(agents);
        let params = &self.params;
        self.agent_cells.clear();
        self.agent_cells.par_extend(agents.par_iter().map(|a| params.cell_index(a.x, a.y)));
        self.similarity.clear();
        self.cytoplasm.clear();
    }

    pub fn rebuild_index(&mut self) {
        self.index.rebuild(&self.agents);
    }

    /// Runs the engine for every current agent against the pre-advance fields.
    pub fn update_agents(&mut self) -> Result<()> {
        match &mut self.engine {
            EngineState::Phenotype(engine) => {
                let field = &self.fields[0];
                let cells = &self.agent_cells;
                engine.update(&self.agents, |k| field.value_at(cells[k]), &mut self.rng);
            }
            EngineState::Cytoplasm(engine) => {
                self.cytoplasm = engine.update(&self.agents, &self.agent_cells, &self.fields, &mut self.rng)?;
            }
        }
        Ok(())
    }

    /// Zeroes every field's sources and sinks and refills them from the agents' current state.
    pub fn populate_sources(&mut self) {
        self.fields.iter_mut().for_each(DiffusionField::clear_sources);
        match &self.engine {
            EngineState::Phenotype(engine) => {
                let field = &mut self.fields[0];
                for (agent, &cell) in self.agents.iter().zip(&self.agent_cells) {
                    match engine.phenotype(agent.id) {
                        Some(Phenotype::A) => field.add_source(cell, self.params.source_rate),
                        Some(Phenotype::B) => field.add_sink(cell, self.params.sink_rate),
                        None => {}
                    }
                }
            }
            EngineState::Cytoplasm(_) => {
                for (result, &cell) in self.cytoplasm.iter().zip(&self.agent_cells) {
                    for (field, &exchange) in self.fields.iter_mut().zip(&result.secretion) {
                        if exchange > 0.0 {
                            field.add_source(cell, exchange);
                        } else if exchange < 0.0 {
                            field.add_sink(cell, -exchange);
                        }
                    }
                }
            }
        }
    }

    /// Neighbourhood similarity of the discrete engine; a no-op in cytoplasm mode.
    pub fn compute_similarity(&mut self) {
        if let EngineState::Phenotype(engine) = &self.engine {
            self.similarity = engine.similarity(&self.agents, &self.index, self.params.neighbor_radius);
        }
    }

    pub fn statistics(&self, step: u32, time: f64) -> StepStatistics {
        let total = self.agents.len();
        let mut stats = StepStatistics { step, time, total: total as u32, ..Default::default() };

        match &self.engine {
            EngineState::Phenotype(engine) => {
                for agent in &self.agents {
                    match engine.phenotype(agent.id) {
                        Some(Phenotype::A) => stats.count_a += 1,
                        Some(Phenotype::B) => stats.count_b += 1,
                        None => {}
                    }
                }
                if !self.similarity.is_empty() {
                    stats.mean_similarity =
                        self.similarity.iter().map(|m| m.similarity).sum::<f64>() / self.similarity.len() as f64;
                    stats.similarity_index = (stats.mean_similarity - 0.5) * 2.0;
                }
            }
            EngineState::Cytoplasm(engine) => {
                // Every species gets a value each step; an empty step reports 0
                let n = self.cytoplasm.len().max(1) as f64;
                for (i, name) in engine.interior_names().enumerate() {
                    let mean = self.cytoplasm.iter().map(|r| r.interior[i]).sum::<f64>() / n;
                    stats.species_means.insert(name.to_string(), mean);
                }
            }
        }
        for field in &self.fields {
            stats.field_means.insert(field.name().to_string(), field.mean());
        }
        stats
    }

    /// Render records for the current agents.
    pub fn agent_records(&self, visible: bool) -> Vec<AgentRecord> {
        let record = |agent: &Agent, state: AgentState| AgentRecord {
            id: agent.id,
            x: agent.x,
            y: agent.y,
            angle: agent.angle,
            length: agent.length,
            state,
            visible,
        };
        match &self.engine {
            EngineState::Phenotype(engine) => self
                .agents
                .iter()
                .enumerate()
                .filter_map(|(k, agent)| {
                    let phenotype = engine.phenotype(agent.id)?;
                    let metrics = self.similarity.get(k).copied().unwrap_or_default();
                    Some(record(
                        agent,
                        AgentState::Phenotype {
                            phenotype,
                            similarity: metrics.similarity,
                            proportion_a: metrics.proportion_a,
                            proportion_b: metrics.proportion_b,
                            changed: engine.changed(agent.id),
                        },
                    ))
                })
                .collect(),
            EngineState::Cytoplasm(engine) => self
                .agents
                .iter()
                .zip(&self.cytoplasm)
                .map(|(agent, result)| {
                    let interior: BTreeMap<String, f64> =
                        engine.interior_names().map(str::to_string).zip(result.interior.iter().copied()).collect();
                    let exterior: BTreeMap<String, f64> =
                        engine.exterior_names().map(str::to_string).zip(result.exterior.iter().copied()).collect();
                    record(agent, AgentState::Cytoplasm { interior, exterior })
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: &str) -> SimulationConfig {
        let toml = format!(
            r#"
            [grid]
            width = 20
            height = 10
            diffusion_rate = 1.0
            dt = 0.1

            [timing]
            macro_dt = 1.0

            [engine]
            mode = "{mode}"
            seed = 3

            [output]
            base_filename = "state"
            "#
        );
        SimulationConfig::from_toml_str(&toml).unwrap()
    }

    #[test]
    fn fields_follow_engine_mode() {
        let state = SimState::new(&config("phenotype")).unwrap();
        assert_eq!(state.fields.len(), 1);
        assert_eq!(state.field_index(SIGNAL_FIELD), Some(0));

        let state = SimState::new(&config("cytoplasm")).unwrap();
        let names: Vec<&str> = state.fields.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["AimP", "testField"]);
    }

    #[test]
    fn agents_map_to_centred_cells() {
        let mut state = SimState::new(&config("phenotype")).unwrap();
        state.load_agents(&[Agent::new(1, 0.0, 0.0), Agent::new(2, -10.0, -5.0), Agent::new(3, 9.6, 4.4)]);
        assert_eq!(state.agent_cells, vec![5 * 20 + 10, 0, 9 * 20 + 19]);
    }

    #[test]
    fn phenotypes_drive_sources_and_sinks() {
        let mut state = SimState::new(&config("phenotype")).unwrap();
        state.load_agents(&[Agent::new(1, 0.0, 0.0), Agent::new(2, 0.0, 0.0), Agent::new(3, 3.0, 0.0)]);
        state.update_agents().unwrap();
        state.populate_sources();

        let counts = state.statistics(1, 1.0);
        let field = &state.fields[0];
        let injected: f64 = field.sources().iter().sum();
        let removed: f64 = field.sinks().iter().sum();
        assert_eq!(injected, counts.count_a as f64);
        assert_eq!(removed, counts.count_b as f64);
        assert_eq!(counts.count_a + counts.count_b, 3);

        // A second fill replaces rather than accumulates
        state.populate_sources();
        assert_eq!(state.fields[0].sources().iter().sum::<f64>(), injected);
    }

    #[test]
    fn empty_cytoplasm_step_still_reports_every_species() {
        let mut state = SimState::new(&config("cytoplasm")).unwrap();
        state.load_agents(&[]);
        state.update_agents().unwrap();
        let stats = state.statistics(1, 1.0);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.species_means.keys().map(String::as_str).collect::<Vec<_>>(), vec!["AimP", "AimR"]);
        assert!(stats.species_means.values().all(|m| *m == 0.0));
    }

    #[test]
    fn reset_clears_fields_and_buffers() {
        let mut state = SimState::new(&config("phenotype")).unwrap();
        state.fields[0].fill(1.0);
        state.load_agents(&[Agent::new(1, 0.0, 0.0)]);
        state.update_agents().unwrap();
        state.reset();
        assert!(state.agents.is_empty());
        assert_eq!(state.fields[0].mean(), 0.0);
        match &state.engine {
            EngineState::Phenotype(engine) => assert_eq!(engine.phenotype(1), None),
            EngineState::Cytoplasm(_) => unreachable!(),
        }
    }
}
