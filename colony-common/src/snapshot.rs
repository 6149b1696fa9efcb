use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use crate::agent::{AgentId, Phenotype};

/// Per-agent state attached to a render record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentState {
    /// Discrete engine output.
    Phenotype {
        phenotype: Phenotype,
        /// Fraction of neighbours sharing this agent's phenotype.
        similarity: f64,
        proportion_a: f64,
        proportion_b: f64,
        /// 1.0 on the step the phenotype switched, halved every step after.
        changed: f64,
    },
    /// Continuous engine output, keyed by species name.
    Cytoplasm {
        interior: BTreeMap<String, f64>,
        exterior: BTreeMap<String, f64>,
    },
}

/// Everything the rendering layer needs to draw one bacterium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub length: f64,
    pub state: AgentState,
    pub visible: bool,
}

/// Population aggregates for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepStatistics {
    pub step: u32,
    /// Simulated seconds elapsed since the first step.
    pub time: f64,
    pub total: u32,
    pub count_a: u32,
    pub count_b: u32,
    pub mean_similarity: f64,
    /// `(mean_similarity - 0.5) * 2`: 0 for a well-mixed colony, 1 for full segregation.
    pub similarity_index: f64,
    pub species_means: BTreeMap<String, f64>,
    pub field_means: BTreeMap<String, f64>,
}

/// Time series of the statistics, consumed by the charting layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub steps: Vec<u32>,
    pub time: Vec<f64>,
    pub total: Vec<u32>,
    pub count_a: Vec<u32>,
    pub count_b: Vec<u32>,
    pub mean_similarity: Vec<f64>,
    pub species_means: BTreeMap<String, Vec<f64>>,
    pub field_means: BTreeMap<String, Vec<f64>>,
}

/// Appends one row to named series, padding with NaN so every series keeps one entry per row.
fn push_named(series: &mut BTreeMap<String, Vec<f64>>, values: &BTreeMap<String, f64>, row: usize) {
    for (name, value) in values {
        let column = series.entry(name.clone()).or_default();
        column.resize(row, f64::NAN);
        column.push(*value);
    }
    for column in series.values_mut() {
        column.resize(row + 1, f64::NAN);
    }
}

impl History {
    pub fn push(&mut self, stats: &StepStatistics) {
        let row = self.steps.len();
        self.steps.push(stats.step);
        self.time.push(stats.time);
        self.total.push(stats.total);
        self.count_a.push(stats.count_a);
        self.count_b.push(stats.count_b);
        self.mean_similarity.push(stats.mean_similarity);
        push_named(&mut self.species_means, &stats.species_means, row);
        push_named(&mut self.field_means, &stats.field_means, row);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn clear(&mut self) {
        *self = History::default();
    }
}

/// A snapshot of the simulation state and metrics at a specific step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub step: u32,
    pub time: f64,
    pub statistics: StepStatistics,
    /// Render records, included only if `output.save_agents_in_snapshot` is true.
    pub agents: Option<Vec<AgentRecord>>,
    /// Concentration grids by field name, included only if `output.save_field_in_snapshot` is true.
    pub fields: Option<BTreeMap<String, Vec<f64>>>,
}
