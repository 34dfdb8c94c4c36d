use std::fmt;
use std::sync::Arc;

use crate::command::CommandSink;

/// The four places a testbed accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Testbed,
    Source,
    Midbox,
    Sink,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Testbed, Role::Source, Role::Midbox, Role::Sink];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Testbed => "testbed",
            Role::Source => "source",
            Role::Midbox => "midbox",
            Role::Sink => "sink",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A process-execution backend with one input per testbed role.
///
/// The testbed input runs host-level commands. Source, midbox and sink
/// inputs usually run inside their own network namespace.
pub trait Testbed: Send + Sync {
    fn input(&self, role: Role) -> Arc<dyn CommandSink>;

    fn testbed_input(&self) -> Arc<dyn CommandSink> {
        self.input(Role::Testbed)
    }

    fn source_input(&self) -> Arc<dyn CommandSink> {
        self.input(Role::Source)
    }

    fn midbox_input(&self) -> Arc<dyn CommandSink> {
        self.input(Role::Midbox)
    }

    fn sink_input(&self) -> Arc<dyn CommandSink> {
        self.input(Role::Sink)
    }
}
