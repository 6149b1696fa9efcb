use crate::diffusion::DiffusionField;
use crate::kinetics::{CytoplasmModel, Initial, KineticState, Parameters};
use crate::lineage::LineageStore;
use anyhow::Result;
use colony_common::{Agent, AgentId, CytoplasmConfig};
use log::debug;
use rand::Rng;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Interior concentrations never drop below this after an Euler step.
pub const MIN_CONCENTRATION: f64 = 1e-6;

/// Result of integrating one agent for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCytoplasm {
    pub interior: Vec<f64>,
    /// Medium concentrations under the agent before this step's advance.
    pub exterior: Vec<f64>,
    /// Net exchange with each field: positive feeds `sources`, negative feeds `sinks`.
    pub secretion: Vec<f64>,
}

/// Continuous interior state of every agent, integrated with explicit Euler.
#[derive(Debug)]
pub struct CytoplasmEngine {
    model: CytoplasmModel,
    params: Parameters,
    initial: Vec<Initial>,
    euler_dt: f64,
    interior: Vec<LineageStore<f64>>,
    exterior: Vec<LineageStore<f64>>,
}

impl CytoplasmEngine {
    pub fn new(
        model: CytoplasmModel,
        overrides: &BTreeMap<String, f64>,
        initial_overrides: &BTreeMap<String, f64>,
        euler_dt: f64,
    ) -> Result<Self> {
        if !(euler_dt > 0.0) {
            anyhow::bail!("Euler step must be positive (got {}).", euler_dt);
        }
        let mut params = model.defaults.clone();
        params.merge(overrides);
        model.validate(&params)?;

        let mut initial: Vec<Initial> = model.interior.iter().map(|s| s.initial).collect();
        for (name, value) in initial_overrides {
            let idx = model
                .interior_index(name)
                .ok_or_else(|| anyhow::anyhow!("Circuit '{}' has no interior species '{}'.", model.name, name))?;
            initial[idx] = Initial::Fixed(*value);
        }

        let interior = model.interior.iter().map(|_| LineageStore::new()).collect();
        let exterior = model.exterior.iter().map(|_| LineageStore::new()).collect();
        Ok(CytoplasmEngine { model, params, initial, euler_dt, interior, exterior })
    }

    pub fn from_config(config: &CytoplasmConfig, euler_dt: f64) -> Result<Self> {
        let model = CytoplasmModel::preset(&config.circuit)?;
        Self::new(model, &config.parameters, &config.initial, euler_dt)
    }

    pub fn model(&self) -> &CytoplasmModel {
        &self.model
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn interior_names(&self) -> impl Iterator<Item = &str> {
        self.model.interior.iter().map(|s| s.name.as_str())
    }

    pub fn exterior_names(&self) -> impl Iterator<Item = &str> {
        self.model.exterior.iter().map(|s| s.name.as_str())
    }

    /// Updates one kinetic constant. Names the circuit does not define are rejected.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        if !self.params.contains(name) {
            anyhow::bail!("Circuit '{}' has no parameter '{}'.", self.model.name, name);
        }
        if !value.is_finite() {
            anyhow::bail!("Parameter '{}' must be finite (got {}).", name, value);
        }
        self.params.set(name, value);
        Ok(())
    }

    /// Recorded interior value of `id` (no lineage fallback).
    pub fn interior_value(&self, id: AgentId, species: usize) -> Option<f64> {
        self.interior.get(species)?.get(id).copied()
    }

    /// Last exterior value observed by `id`.
    pub fn exterior_value(&self, id: AgentId, species: usize) -> Option<f64> {
        self.exterior.get(species)?.get(id).copied()
    }

    pub fn reset(&mut self) {
        self.interior.iter_mut().for_each(LineageStore::clear);
        self.exterior.iter_mut().for_each(LineageStore::clear);
    }

    /// Own value, else the explicit parent's or the lineage mother's.
    fn resolve_interior(&self, agent: &Agent, species: usize) -> Option<f64> {
        let store = &self.interior[species];
        match agent.parent {
            Some(parent) => store.get(agent.id).or_else(|| store.get(parent)).copied(),
            None => store.resolve(agent.id).value(),
        }
    }

    /// Starting vectors for every agent. Unresolved species take their initial value,
    /// drawn from `rng` in agent order so random starts replay with the seed.
    fn starting_state<R: Rng>(&self, agents: &[Agent], rng: &mut R) -> Vec<Vec<f64>> {
        let species = self.model.interior.len();
        let resolved: Vec<Vec<Option<f64>>> = agents
            .par_iter()
            .map(|agent| (0..species).map(|i| self.resolve_interior(agent, i)).collect())
            .collect();
        resolved
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&self.initial)
                    .map(|(value, initial)| value.unwrap_or_else(|| initial.draw(rng)))
                    .collect()
            })
            .collect()
    }

    fn integrate(&self, old: &[f64], cell: usize, fields: &[DiffusionField]) -> AgentCytoplasm {
        let exterior: Vec<f64> = fields.iter().map(|f| f.value_at(cell)).collect();

        let before = KineticState::new(old, &exterior, &self.params);
        let interior: Vec<f64> = self
            .model
            .interior
            .iter()
            .zip(old)
            .map(|(species, value)| (value + (species.rate)(&before) * self.euler_dt).max(MIN_CONCENTRATION))
            .collect();

        let after = KineticState::new(&interior, &exterior, &self.params);
        let secretion = self.model.exterior.iter().map(|species| (species.rate)(&after)).collect();
        AgentCytoplasm { interior, exterior, secretion }
    }

    /// Integrates every agent one Euler step.
    ///
    /// Agents are evaluated in parallel against the pre-step stores and committed in slice order.
    /// `cells[k]` is the grid cell of `agents[k]`; `fields[e]` holds exterior species `e`.
    pub fn update<R: Rng>(
        &mut self,
        agents: &[Agent],
        cells: &[usize],
        fields: &[DiffusionField],
        rng: &mut R,
    ) -> Result<Vec<AgentCytoplasm>> {
        if cells.len() != agents.len() {
            anyhow::bail!("Got {} grid cells for {} agents.", cells.len(), agents.len());
        }
        if fields.len() != self.model.exterior.len() {
            anyhow::bail!(
                "Circuit '{}' exchanges with {} fields, got {}.",
                self.model.name, self.model.exterior.len(), fields.len()
            );
        }

        let starts = self.starting_state(agents, rng);
        let results: Vec<AgentCytoplasm> = {
            let this = &*self;
            starts
                .par_iter()
                .zip(cells.par_iter())
                .map(|(old, &cell)| this.integrate(old, cell, fields))
                .collect()
        };

        for (agent, result) in agents.iter().zip(&results) {
            for (store, value) in self.interior.iter_mut().zip(&result.interior) {
                store.set(agent.id, *value);
            }
            for (store, value) in self.exterior.iter_mut().zip(&result.exterior) {
                store.set(agent.id, *value);
            }
        }
        debug!("Cytoplasm update: {} agents integrated with dt={}.", agents.len(), self.euler_dt);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diffusion::FieldGeometry;
    use rand::prelude::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(1)
    }

    fn fields(names: &[&str]) -> Vec<DiffusionField> {
        let geometry = FieldGeometry { width: 4, height: 4, dx: 1.0, diffusion_rate: 1.0, dt: 0.1, max_concentration: 1e6 };
        names.iter().map(|n| DiffusionField::new(*n, geometry).unwrap()).collect()
    }

    fn constant(production: f64, dt: f64) -> CytoplasmEngine {
        let overrides = BTreeMap::from([("production".to_string(), production)]);
        CytoplasmEngine::new(CytoplasmModel::constant_secretion(), &overrides, &BTreeMap::new(), dt).unwrap()
    }

    #[test]
    fn constant_production_accumulates_linearly() {
        let mut engine = constant(0.5, 0.1);
        let media = fields(&["signal"]);
        let agents = vec![Agent::new(1, 0.0, 0.0)];
        for _ in 0..20 {
            engine.update(&agents, &[5], &media, &mut rng()).unwrap();
        }
        let value = engine.interior_value(1, 0).unwrap();
        assert!((value - 1.0).abs() < 1e-9, "{value}");
    }

    #[test]
    fn concentrations_are_floored() {
        let mut engine = constant(-10.0, 1.0);
        let results = engine.update(&[Agent::new(1, 0.0, 0.0)], &[0], &fields(&["signal"]), &mut rng()).unwrap();
        assert_eq!(results[0].interior, vec![MIN_CONCENTRATION]);
        assert_eq!(results[0].secretion, vec![1.0]);
    }

    #[test]
    fn daughters_continue_from_mother() {
        let mut engine = constant(1.0, 1.0);
        let media = fields(&["signal"]);
        engine.update(&[Agent::new(3, 0.0, 0.0)], &[0], &media, &mut rng()).unwrap();
        engine.update(&[Agent::new(3, 0.0, 0.0)], &[0], &media, &mut rng()).unwrap();
        engine.update(&[Agent::new(6, 0.0, 0.0), Agent::new(7, 0.0, 0.0)], &[0, 0], &media, &mut rng()).unwrap();
        assert_eq!(engine.interior_value(6, 0), Some(3.0));
        assert_eq!(engine.interior_value(7, 0), Some(3.0));
        // Granddaughters do not reach back two generations
        engine.reset();
        engine.interior[0].set(3, 10.0);
        engine.update(&[Agent::new(12, 0.0, 0.0)], &[0], &media, &mut rng()).unwrap();
        assert_eq!(engine.interior_value(12, 0), Some(1.0));
    }

    #[test]
    fn explicit_parent_overrides_lineage_numbering() {
        let mut engine = constant(1.0, 1.0);
        engine.interior[0].set(40, 5.0);
        let mut agent = Agent::new(9, 0.0, 0.0);
        agent.parent = Some(40);
        engine.update(&[agent], &[0], &fields(&["signal"]), &mut rng()).unwrap();
        assert_eq!(engine.interior_value(9, 0), Some(6.0));
    }

    #[test]
    fn aim_import_reads_medium_under_agent() {
        let model = CytoplasmModel::aim();
        let mut engine = CytoplasmEngine::new(model, &BTreeMap::new(), &BTreeMap::new(), 0.1).unwrap();
        let mut media = fields(&["AimP", "testField"]);
        media[1].set_value(9, 2.0);
        let agents = vec![Agent::new(2, 0.0, 0.0), Agent::new(3, 0.0, 0.0)];
        let results = engine.update(&agents, &[9, 0], &media, &mut rng()).unwrap();
        assert_eq!(results[0].exterior, vec![0.0, 2.0]);
        assert!(results[0].interior[0] > results[1].interior[0]);
        assert_eq!(engine.exterior_value(2, 1), Some(2.0));
        // AimR at 3 secretes 3 * Source into an empty medium
        assert!(results[1].secretion[0] > 0.0);
    }

    #[test]
    fn rejects_unknown_names() {
        let mut engine = constant(1.0, 1.0);
        assert!(engine.set_parameter("Kin", 1.0).is_err());
        engine.set_parameter("production", 2.0).unwrap();
        assert_eq!(engine.parameters().get("production"), 2.0);

        let initial = BTreeMap::from([("AimQ".to_string(), 1.0)]);
        let err = CytoplasmEngine::new(CytoplasmModel::aim(), &BTreeMap::new(), &initial, 0.1).unwrap_err();
        assert!(err.to_string().contains("AimQ"));
    }

    #[test]
    fn field_count_must_match_circuit() {
        let mut engine = constant(1.0, 1.0);
        assert!(engine.update(&[Agent::new(1, 0.0, 0.0)], &[0], &fields(&["a", "b"]), &mut rng()).is_err());
    }

    #[test]
    fn random_initial_values_come_from_the_injected_rng() {
        let model = CytoplasmModel::producer_receiver();
        let mut engine = CytoplasmEngine::new(model, &BTreeMap::new(), &BTreeMap::new(), 1.0).unwrap();
        let media = fields(&["P"]);
        let agents: Vec<Agent> = (1..=64).map(|id| Agent::new(id, 0.0, 0.0)).collect();
        let cells = vec![0; agents.len()];

        let mut seeded = StdRng::seed_from_u64(21);
        let first = engine.update(&agents, &cells, &media, &mut seeded).unwrap();
        let producers = first.iter().filter(|r| r.interior[0] > 0.5).count();
        assert!(producers > 0 && producers < agents.len(), "{producers} producers");
        // Only producers secrete into an empty medium
        for result in &first {
            let producing = result.interior[0] > 0.5;
            assert_eq!(result.secretion[0] > 0.0, producing);
        }

        // The draw is made once: later steps keep each agent's role
        let second = engine.update(&agents, &cells, &media, &mut seeded).unwrap();
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.interior[0] > 0.5, b.interior[0] > 0.5);
        }

        // The same seed gives the same roles
        engine.reset();
        let replay = engine.update(&agents, &cells, &media, &mut StdRng::seed_from_u64(21)).unwrap();
        assert_eq!(first, replay);
    }

    #[test]
    fn initial_override_fixes_a_random_species() {
        let initial = BTreeMap::from([("AimR".to_string(), 5.0)]);
        let model = CytoplasmModel::monotonic_decreasing();
        let mut engine = CytoplasmEngine::new(model, &BTreeMap::new(), &initial, 0.1).unwrap();
        let agents: Vec<Agent> = (1..=16).map(|id| Agent::new(id, 0.0, 0.0)).collect();
        let results = engine.update(&agents, &vec![0; 16], &fields(&["AimP"]), &mut rng()).unwrap();
        assert!(results.iter().all(|r| r.interior[1] > 4.0));
        // AimR carriers do not secrete, so every agent only absorbs
        assert!(results.iter().all(|r| r.secretion[0] <= 0.0));
    }

    #[test]
    fn absent_receptor_stays_absent() {
        let initial = BTreeMap::from([("AimR".to_string(), 0.0)]);
        let model = CytoplasmModel::monotonic_decreasing();
        let mut engine = CytoplasmEngine::new(model, &BTreeMap::new(), &initial, 0.1).unwrap();
        let media = fields(&["AimP"]);
        let agent = [Agent::new(1, 0.0, 0.0)];
        for _ in 0..50 {
            let results = engine.update(&agent, &[0], &media, &mut rng()).unwrap();
            assert_eq!(results[0].interior[1], MIN_CONCENTRATION);
            assert!(results[0].secretion[0] > 0.0);
        }
    }
}
