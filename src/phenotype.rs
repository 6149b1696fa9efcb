use crate::lineage::{LineageStore, Resolved};
use crate::spatial::SpatialIndex;
use colony_common::{Agent, AgentId, FeedbackSign, Phenotype, SimParams};
use log::debug;
use rand::Rng;
use rayon::prelude::*;

/// Parameters of the two-state switch.
#[derive(Debug, Clone, PartialEq)]
pub struct PhenotypeParams {
    pub feedback: FeedbackSign,
    pub signal: f64,
    pub signal_min: f64,
    pub signal_max: f64,
    pub basal_switch_rate: f64,
}

impl PhenotypeParams {
    pub fn from_params(params: &SimParams) -> Self {
        PhenotypeParams {
            feedback: params.feedback,
            signal: params.signal,
            signal_min: params.signal_min,
            signal_max: params.signal_max,
            basal_switch_rate: params.basal_switch_rate,
        }
    }

    /// Stores `value` clamped into `[signal_min, signal_max]` and returns what was stored.
    pub fn set_signal(&mut self, value: f64) -> f64 {
        self.signal = value.max(self.signal_min).min(self.signal_max);
        self.signal
    }

    /// `(k(A->B), k(B->A))` at local concentration `c`.
    pub fn transition_rates(&self, c: f64) -> (f64, f64) {
        let s = self.signal;
        let (a_to_b, b_to_a) = match self.feedback {
            FeedbackSign::Positive => (c * s, s / (c + 1.0)),
            FeedbackSign::Negative => (s / (c + 1.0), c * s),
        };
        (a_to_b + self.basal_switch_rate, b_to_a + self.basal_switch_rate)
    }
}

/// Neighbourhood composition of one agent after the step's phenotypes are decided.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimilarityMetrics {
    pub similarity: f64,
    pub proportion_a: f64,
    pub proportion_b: f64,
}

/// What happened to the population during one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub switched: u32,
    pub inherited: u32,
    pub bootstrapped: u32,
}

/// Discrete phenotype state of every agent seen so far.
#[derive(Debug, Clone)]
pub struct PhenotypeEngine {
    params: PhenotypeParams,
    phenotypes: LineageStore<Phenotype>,
    changed: LineageStore<f64>,
}

/// How an agent's phenotype came about this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Switched,
    /// First phenotype of an agent with no own or lineage state.
    Appeared,
    Kept,
}

fn bootstrap<R: Rng>(rng: &mut R) -> Phenotype {
    if rng.random_bool(0.5) { Phenotype::A } else { Phenotype::B }
}

impl PhenotypeEngine {
    pub fn new(params: PhenotypeParams) -> Self {
        PhenotypeEngine { params, phenotypes: LineageStore::new(), changed: LineageStore::new() }
    }

    pub fn params(&self) -> &PhenotypeParams {
        &self.params
    }

    pub fn set_signal(&mut self, value: f64) -> f64 {
        self.params.set_signal(value)
    }

    pub fn set_basal_switch_rate(&mut self, rate: f64) {
        self.params.basal_switch_rate = rate;
    }

    /// Recorded phenotype of `id` (no lineage fallback).
    pub fn phenotype(&self, id: AgentId) -> Option<Phenotype> {
        self.phenotypes.get(id).copied()
    }

    /// Recency of the last switch: 1.0 on the switching step (or when a phenotype first
    /// appears), halved every step after. Daughters start from 0.
    pub fn changed(&self, id: AgentId) -> f64 {
        self.changed.get(id).copied().unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.phenotypes.clear();
        self.changed.clear();
    }

    /// Decides this step's phenotype for every agent, in slice order.
    ///
    /// `concentration(k)` is the field value under `agents[k]` before this step's advance.
    pub fn update<R, C>(&mut self, agents: &[Agent], concentration: C, rng: &mut R) -> UpdateSummary
    where
        R: Rng,
        C: Fn(usize) -> f64,
    {
        let mut summary = UpdateSummary::default();
        for (k, agent) in agents.iter().enumerate() {
            let (next, transition) = self.decide(agent, || concentration(k), rng, &mut summary);
            let changed = match transition {
                Transition::Switched => {
                    summary.switched += 1;
                    1.0
                }
                Transition::Appeared => 1.0,
                Transition::Kept => self.changed(agent.id) * 0.5,
            };
            self.phenotypes.set(agent.id, next);
            self.changed.set(agent.id, changed);
        }
        debug!(
            "Phenotype update: {} agents, {} switched, {} inherited, {} bootstrapped.",
            agents.len(), summary.switched, summary.inherited, summary.bootstrapped
        );
        summary
    }

    fn decide<R, C>(&self, agent: &Agent, concentration: C, rng: &mut R, summary: &mut UpdateSummary) -> (Phenotype, Transition)
    where
        R: Rng,
        C: FnOnce() -> f64,
    {
        if agent.random_switch {
            return match self.phenotypes.resolve(agent.id).value() {
                Some(current) => (current.flipped(), Transition::Switched),
                None => {
                    summary.bootstrapped += 1;
                    (bootstrap(rng), Transition::Appeared)
                }
            };
        }

        // Externally supplied lineage: plain copy, no feedback
        if let Some(parent) = agent.parent {
            if let Some(own) = self.phenotype(agent.id) {
                return (own, Transition::Kept);
            }
            return match self.phenotype(parent) {
                Some(inherited) => {
                    summary.inherited += 1;
                    (inherited, Transition::Kept)
                }
                None => {
                    summary.bootstrapped += 1;
                    (bootstrap(rng), Transition::Appeared)
                }
            };
        }

        match self.phenotypes.resolve(agent.id) {
            Resolved::Own(current) => {
                let (a_to_b, b_to_a) = self.params.transition_rates(concentration());
                let rate = match current {
                    Phenotype::A => a_to_b,
                    Phenotype::B => b_to_a,
                };
                let draw: f64 = rng.random();
                if draw < rate { (current.flipped(), Transition::Switched) } else { (current, Transition::Kept) }
            }
            Resolved::Inherited(inherited) => {
                summary.inherited += 1;
                (inherited, Transition::Kept)
            }
            Resolved::Missing => {
                summary.bootstrapped += 1;
                (bootstrap(rng), Transition::Appeared)
            }
        }
    }

    /// Neighbourhood composition per agent, counted over `index` within `radius`.
    pub fn similarity(&self, agents: &[Agent], index: &SpatialIndex, radius: f64) -> Vec<SimilarityMetrics> {
        agents
            .par_iter()
            .map(|agent| {
                let counts = index.count_neighbors(agent.x, agent.y, radius, |id| self.phenotype(id));
                if counts.total == 0 {
                    return SimilarityMetrics::default();
                }
                let total = counts.total as f64;
                let proportion_a = counts.count_a as f64 / total;
                let proportion_b = counts.count_b as f64 / total;
                let similarity = match self.phenotype(agent.id) {
                    Some(Phenotype::A) => proportion_a,
                    Some(Phenotype::B) => proportion_b,
                    None => 0.0,
                };
                SimilarityMetrics { similarity, proportion_a, proportion_b }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_common::IndexKind;
    use rand::prelude::*;

    fn params(feedback: FeedbackSign, signal: f64) -> PhenotypeParams {
        PhenotypeParams { feedback, signal, signal_min: 0.0, signal_max: 1.0, basal_switch_rate: 0.0 }
    }

    fn line(ids: &[AgentId]) -> Vec<Agent> {
        ids.iter().enumerate().map(|(k, id)| Agent::new(*id, k as f64, 0.0)).collect()
    }

    #[test]
    fn feedback_sign_swaps_rates() {
        let positive = params(FeedbackSign::Positive, 0.1);
        let (a_to_b, b_to_a) = positive.transition_rates(2.0);
        assert!((a_to_b - 0.2).abs() < 1e-12);
        assert!((b_to_a - 0.1 / 3.0).abs() < 1e-12);

        let mut negative = params(FeedbackSign::Negative, 0.1);
        negative.basal_switch_rate = 0.01;
        let (a_to_b, b_to_a) = negative.transition_rates(2.0);
        assert!((a_to_b - (0.1 / 3.0 + 0.01)).abs() < 1e-12);
        assert!((b_to_a - 0.21).abs() < 1e-12);
    }

    #[test]
    fn signal_is_clamped_into_bounds() {
        let mut p = params(FeedbackSign::Positive, 0.1);
        p.signal_max = 0.5;
        assert_eq!(p.set_signal(3.0), 0.5);
        assert_eq!(p.set_signal(-1.0), 0.0);
        assert_eq!(p.set_signal(0.25), 0.25);
    }

    #[test]
    fn unseen_agents_bootstrap_then_daughters_inherit() {
        let mut engine = PhenotypeEngine::new(params(FeedbackSign::Positive, 0.0));
        let mut rng = StdRng::seed_from_u64(1);
        let founders = line(&[4, 5, 6, 7]);
        let summary = engine.update(&founders, |_| 0.0, &mut rng);
        assert_eq!(summary.bootstrapped, 4);

        assert!(founders.iter().all(|a| engine.changed(a.id) == 1.0));

        let daughters = line(&[8, 9, 14, 15]);
        let summary = engine.update(&daughters, |_| 0.0, &mut rng);
        assert_eq!(summary.inherited, 4);
        assert_eq!(summary.switched, 0);
        assert_eq!(engine.phenotype(8), engine.phenotype(4));
        assert_eq!(engine.phenotype(9), engine.phenotype(4));
        assert_eq!(engine.phenotype(15), engine.phenotype(7));
    }

    #[test]
    fn zero_signal_never_switches() {
        let mut engine = PhenotypeEngine::new(params(FeedbackSign::Negative, 0.0));
        let mut rng = StdRng::seed_from_u64(9);
        let agents = line(&(1..=50u64).collect::<Vec<_>>());
        engine.update(&agents, |_| 5.0, &mut rng);
        let initial: Vec<_> = agents.iter().map(|a| engine.phenotype(a.id)).collect();
        for _ in 0..100 {
            let summary = engine.update(&agents, |_| 5.0, &mut rng);
            assert_eq!(summary.switched, 0);
        }
        let after: Vec<_> = agents.iter().map(|a| engine.phenotype(a.id)).collect();
        assert_eq!(initial, after);
    }

    #[test]
    fn certain_rate_always_switches() {
        let mut engine = PhenotypeEngine::new(params(FeedbackSign::Positive, 1.0));
        engine.phenotypes.set(3, Phenotype::A);
        let mut rng = StdRng::seed_from_u64(2);
        // k(A->B) = c * s = 2.0 under positive feedback
        engine.update(&line(&[3]), |_| 2.0, &mut rng);
        assert_eq!(engine.phenotype(3), Some(Phenotype::B));
    }

    #[test]
    fn forced_switch_flips_and_resets_recency() {
        let mut engine = PhenotypeEngine::new(params(FeedbackSign::Positive, 0.0));
        engine.phenotypes.set(6, Phenotype::B);
        let mut rng = StdRng::seed_from_u64(4);
        let mut agents = line(&[6]);
        agents[0].random_switch = true;
        let summary = engine.update(&agents, |_| 0.0, &mut rng);
        assert_eq!(summary.switched, 1);
        assert_eq!(engine.phenotype(6), Some(Phenotype::A));
        assert_eq!(engine.changed(6), 1.0);

        agents[0].random_switch = false;
        engine.update(&agents, |_| 0.0, &mut rng);
        assert_eq!(engine.changed(6), 0.5);
        engine.update(&agents, |_| 0.0, &mut rng);
        assert_eq!(engine.changed(6), 0.25);
    }

    #[test]
    fn daughters_do_not_inherit_recency() {
        let mut engine = PhenotypeEngine::new(params(FeedbackSign::Positive, 0.0));
        engine.phenotypes.set(5, Phenotype::A);
        let mut rng = StdRng::seed_from_u64(8);
        let mut mother = line(&[5]);
        mother[0].random_switch = true;
        engine.update(&mother, |_| 0.0, &mut rng);
        assert_eq!(engine.changed(5), 1.0);

        engine.update(&line(&[10, 11]), |_| 0.0, &mut rng);
        assert_eq!(engine.phenotype(10), Some(Phenotype::B));
        assert_eq!(engine.changed(10), 0.0);
        assert_eq!(engine.changed(11), 0.0);
    }

    #[test]
    fn explicit_parent_is_copied() {
        let mut engine = PhenotypeEngine::new(params(FeedbackSign::Positive, 1.0));
        engine.phenotypes.set(7, Phenotype::B);
        let mut rng = StdRng::seed_from_u64(5);
        let mut agents = line(&[100]);
        agents[0].parent = Some(7);
        let summary = engine.update(&agents, |_| 10.0, &mut rng);
        assert_eq!(summary.inherited, 1);
        assert_eq!(engine.phenotype(100), Some(Phenotype::B));
        // Copy mode never applies the rate rule
        engine.update(&agents, |_| 10.0, &mut rng);
        assert_eq!(engine.phenotype(100), Some(Phenotype::B));
    }

    #[test]
    fn similarity_reports_neighbourhood_proportions() {
        let mut engine = PhenotypeEngine::new(params(FeedbackSign::Positive, 0.0));
        engine.phenotypes.set(1, Phenotype::A);
        engine.phenotypes.set(2, Phenotype::A);
        engine.phenotypes.set(3, Phenotype::B);
        engine.phenotypes.set(4, Phenotype::B);
        let mut agents = line(&[1, 2, 3]);
        agents.push(Agent::new(4, 100.0, 0.0));
        let mut index = SpatialIndex::new(IndexKind::Grid, 5.0);
        index.rebuild(&agents);

        let metrics = engine.similarity(&agents, &index, 5.0);
        assert!((metrics[0].similarity - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics[2].similarity - 1.0 / 3.0).abs() < 1e-12);
        assert!((metrics[2].proportion_a - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(metrics[3], SimilarityMetrics { similarity: 1.0, proportion_a: 0.0, proportion_b: 1.0 });
    }
}
