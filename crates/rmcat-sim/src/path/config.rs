use std::fmt;

use crate::command::ShellCommand;

/// Queueing discipline used on an emulated link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueDiscipline {
    #[default]
    DropTail,
}

/// One network condition: what a link looks like during a path stage.
///
/// Burst and minimum burst are derived as a tenth of the bandwidth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    bandwidth_kbit: u64,
    latency_ms: u32,
    jitter_ms: u32,
    queue: QueueDiscipline,
    burst_kbit: u64,
    min_burst: u64,
}

impl PathConfig {
    pub fn new(bandwidth_kbit: u64, latency_ms: u32, jitter_ms: u32) -> Self {
        Self::with_queue(bandwidth_kbit, latency_ms, jitter_ms, QueueDiscipline::DropTail)
    }

    pub fn with_queue(
        bandwidth_kbit: u64,
        latency_ms: u32,
        jitter_ms: u32,
        queue: QueueDiscipline,
    ) -> Self {
        Self {
            bandwidth_kbit,
            latency_ms,
            jitter_ms,
            queue,
            burst_kbit: bandwidth_kbit / 10,
            min_burst: bandwidth_kbit / 10,
        }
    }

    pub fn bandwidth_kbit(&self) -> u64 {
        self.bandwidth_kbit
    }

    pub fn latency_ms(&self) -> u32 {
        self.latency_ms
    }

    pub fn jitter_ms(&self) -> u32 {
        self.jitter_ms
    }

    pub fn queue(&self) -> QueueDiscipline {
        self.queue
    }

    pub fn burst_kbit(&self) -> u64 {
        self.burst_kbit
    }

    pub fn min_burst(&self) -> u64 {
        self.min_burst
    }

    /// Builds the `tc` invocation that moves `interface` to this condition.
    ///
    /// The link is expected to already carry a token bucket filter at
    /// `parent 1: handle 2:`, so this is a `change`, not an `add`.
    pub fn shaping_command(&self, interface: &str) -> ShellCommand {
        let mut args: Vec<String> = vec![
            "tc".into(),
            "qdisc".into(),
            "change".into(),
            "dev".into(),
            interface.into(),
            "parent".into(),
            "1:".into(),
            "handle".into(),
            "2:".into(),
        ];
        append_tbf_params(self, &mut args);
        ShellCommand::new(args.join(" "))
    }
}

/// Appends the token-bucket parameters for the configured queue.
fn append_tbf_params(config: &PathConfig, args: &mut Vec<String>) {
    match config.queue {
        QueueDiscipline::DropTail => {
            args.push("tbf".into());
            args.push("rate".into());
            args.push(format!("{}kbit", config.bandwidth_kbit));
            args.push("burst".into());
            args.push(format!("{}kbit", config.burst_kbit));
            args.push("latency".into());
            args.push(format!("{}ms", config.latency_ms));
            args.push("minburst".into());
            args.push(config.min_burst.to_string());
        }
    }
}

impl fmt::Display for PathConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}kbit latency {}ms jitter {}ms burst {}kbit minburst {} ({:?})",
            self.bandwidth_kbit,
            self.latency_ms,
            self.jitter_ms,
            self.burst_kbit,
            self.min_burst,
            self.queue
        )
    }
}
