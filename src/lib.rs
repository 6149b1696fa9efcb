pub mod cytoplasm;
pub mod diffusion;
pub mod grid;
pub mod kinetics;
pub mod lineage;
pub mod output;
pub mod phenotype;
pub mod quadtree;
pub mod simulation;
pub mod spatial;
pub mod state;
pub mod synthetic;
pub mod tridiagonal;
pub mod worker;

pub use cytoplasm::{AgentCytoplasm, CytoplasmEngine};
pub use diffusion::{AdiSolver, AdvanceReport, DiffusionField, FieldGeometry};
pub use kinetics::{CytoplasmModel, Parameters};
pub use lineage::{LineageStore, Resolved};
pub use phenotype::{PhenotypeEngine, PhenotypeParams, SimilarityMetrics};
pub use simulation::{Simulation, StepOutput};
pub use spatial::{NeighborCounts, SpatialIndex};
pub use tridiagonal::TridiagonalSolver;
pub use worker::DiffusionWorker;
