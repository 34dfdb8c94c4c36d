//! Network path schedules and the controllers that replay them.

pub mod config;
pub mod controller;
pub mod stage;

pub use config::{PathConfig, QueueDiscipline};
pub use controller::{PathCommands, PathController, DEFAULT_STOP_POLL};
pub use stage::{PathStage, StageChain, StageDescriptor, Stages, MAX_STAGE_SECS};
