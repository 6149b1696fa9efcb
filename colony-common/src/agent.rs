use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::vecmath::Vec2;

/// Lineage identity. Daughters of `p` are `2p` and `2p + 1`.
pub type AgentId = u64;

/// Identity of the mother cell under the binary lineage numbering.
#[inline(always)]
pub fn lineage_parent(id: AgentId) -> AgentId {
    id >> 1
}

/// One bacterium at one trajectory step, as recorded by the external tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub length: f64,
    /// Explicit mother identity for externally supplied lineages.
    #[serde(default)]
    pub parent: Option<AgentId>,
    /// Forces a phenotype flip on this step (perturbation experiments).
    #[serde(default)]
    pub random_switch: bool,
}

impl Agent {
    pub fn new(id: AgentId, x: f64, y: f64) -> Self {
        Agent { id, x, y, angle: 0.0, length: 1.0, parent: None, random_switch: false }
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

/// Discrete phenotype of the two-state switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phenotype {
    A,
    B,
}

impl Phenotype {
    pub fn flipped(self) -> Self {
        match self {
            Phenotype::A => Phenotype::B,
            Phenotype::B => Phenotype::A,
        }
    }
}

/// Pre-computed agent positions keyed by trajectory step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub steps: BTreeMap<u32, Vec<Agent>>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, step: u32, agents: Vec<Agent>) {
        self.steps.insert(step, agents);
    }

    pub fn get(&self, step: u32) -> Option<&[Agent]> {
        self.steps.get(&step).map(|agents| agents.as_slice())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn first_step(&self) -> Option<u32> {
        self.steps.keys().next().copied()
    }

    pub fn last_step(&self) -> Option<u32> {
        self.steps.keys().next_back().copied()
    }

    pub fn agent_count(&self) -> usize {
        self.steps.values().map(Vec::len).sum()
    }
}
