#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod consistency;
pub mod context;
pub mod engine;
pub mod feature;
pub mod geometry;
pub mod placement_codec;
pub mod provider;
pub mod registry;
pub mod render;
pub mod results;
pub mod scene;
pub mod solver;
#[cfg(feature = "cli")]
pub mod telemetry;

#[cfg(feature = "cli")]
pub use cli::run;
pub use engine::{LabelingEngine, MapSettings, StagedLabelingEngine};
pub use provider::LabelProvider;
pub use solver::PlacementSolver;
