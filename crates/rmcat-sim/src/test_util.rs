use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;

use crate::command::{CommandSink, ShellCommand};
use crate::testbed::{Role, Testbed};

/// Check whether `ip netns` works here. Namespace-backed tests skip
/// themselves when it does not.
pub fn check_privileges() -> bool {
    match Command::new("ip").arg("netns").output() {
        Ok(o) => o.status.success(),
        Err(_) => false,
    }
}

static NS_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Namespace name unique to this process and call, at most 15 characters.
pub fn unique_ns_name(prefix: &str) -> String {
    let seq = NS_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = format!("{}_{:x}_{}", prefix, std::process::id() % 0xFFFF, seq);
    name.truncate(15);
    name
}

/// One command as seen by a [`RecordingTestbed`].
#[derive(Debug, Clone)]
pub struct Recorded {
    pub role: Role,
    pub command: ShellCommand,
    pub at: Instant,
}

/// Testbed that runs nothing and remembers every command it was given.
#[derive(Debug, Default, Clone)]
pub struct RecordingTestbed {
    log: Arc<Mutex<Vec<Recorded>>>,
}

impl RecordingTestbed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Recorded>> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.lock().clone()
    }

    pub fn recorded_on(&self, role: Role) -> Vec<Recorded> {
        self.lock()
            .iter()
            .filter(|r| r.role == role)
            .cloned()
            .collect()
    }

    /// Command lines received on `role`, in arrival order.
    pub fn lines_on(&self, role: Role) -> Vec<String> {
        self.recorded_on(role)
            .into_iter()
            .map(|r| r.command.line().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

struct RecordingInput {
    role: Role,
    log: Arc<Mutex<Vec<Recorded>>>,
}

impl CommandSink for RecordingInput {
    fn execute(&self, command: ShellCommand) {
        let entry = Recorded {
            role: self.role,
            command,
            at: Instant::now(),
        };
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}

impl Testbed for RecordingTestbed {
    fn input(&self, role: Role) -> Arc<dyn CommandSink> {
        Arc::new(RecordingInput {
            role,
            log: Arc::clone(&self.log),
        })
    }
}
