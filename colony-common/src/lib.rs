pub mod agent;
pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use agent::{lineage_parent, Agent, AgentId, Phenotype, Trajectory};
pub use config::{
    CytoplasmConfig, EngineConfig, EngineMode, FeedbackSign, GridConfig, IndexKind, InputConfig,
    NeighborConfig, OffloadConfig, OutputConfig, PhenotypeConfig, SimulationConfig, SyntheticConfig,
    TimingConfig,
};
pub use sim_params::SimParams;
pub use snapshot::{AgentRecord, AgentState, History, Snapshot, StepStatistics};
pub use vecmath::{angle_to_vec, Vec2};
