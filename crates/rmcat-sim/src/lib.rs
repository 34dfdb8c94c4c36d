//! Test-plan orchestration for congestion-control experiments.
//!
//! Models a test as concurrent flows plus independently scheduled
//! network path mutations. Every effect is a [`ShellCommand`] handed to a
//! [`Testbed`]; nothing in this crate spawns a process itself.

pub mod command;
pub mod error;
pub mod flow;
pub mod flow_controller;
pub mod midbox;
pub mod path;
pub mod scenario;
pub mod test_controller;
pub mod testbed;
pub mod units;

pub mod test_util;

pub use command::{CommandOutput, CommandSink, ShellCommand};
pub use error::{ChannelError, ScenarioError};
pub use flow::{Flow, FlowDescription, FlowEvaluation, StatFiles};
pub use flow_controller::FlowController;
pub use midbox::MidboxController;
pub use scenario::{Scenario, ScenarioParams};
pub use test_controller::{RunOutcome, TestController};
pub use testbed::{Role, Testbed};
pub use units::{Algorithm, Codec, TrafficUnit};
