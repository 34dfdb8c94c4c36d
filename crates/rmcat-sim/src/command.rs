//! Shell command values and the push-style channels that carry them.
//!
//! Controllers never run anything themselves. They produce
//! [`ShellCommand`] values and hand them to a [`CommandOutput`], which
//! forwards to whatever [`CommandSink`] the testbed bound to it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::error::ChannelError;

/// A complete shell invocation plus the file its output belongs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    line: String,
    log_file: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            log_file: None,
        }
    }

    /// Route the process' stdout/stderr into `path`.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    /// First word of the invocation.
    pub fn program(&self) -> &str {
        self.line.split_whitespace().next().unwrap_or("")
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Receiving end of a command channel, usually a process runner.
///
/// Implementations may be invoked concurrently from many tasks and may
/// block; callers run them on the blocking pool.
pub trait CommandSink: Send + Sync {
    fn execute(&self, command: ShellCommand);
}

/// Single-consumer delivery point for commands.
///
/// Bound at most once. Transmitting on an unbound output silently drops
/// the command, which lets controllers run with no testbed attached.
#[derive(Default)]
pub struct CommandOutput {
    target: OnceLock<Arc<dyn CommandSink>>,
}

impl CommandOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, target: Arc<dyn CommandSink>) -> Result<(), ChannelError> {
        self.target
            .set(target)
            .map_err(|_| ChannelError::AlreadyConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.target.get().is_some()
    }

    pub fn transmit(&self, command: ShellCommand) {
        if let Some(target) = self.target.get() {
            target.execute(command);
        }
    }
}

impl fmt::Debug for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandOutput")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Transmit `command` on the blocking pool and wait for the sink to
/// accept it.
pub(crate) async fn dispatch(output: Arc<CommandOutput>, command: ShellCommand) {
    if let Err(e) = tokio::task::spawn_blocking(move || output.transmit(command)).await {
        tracing::error!(error = %e, "command sink panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl CommandSink for Collect {
        fn execute(&self, command: ShellCommand) {
            self.0.lock().unwrap().push(command.line().to_string());
        }
    }

    #[test]
    fn transmit_without_target_is_a_noop() {
        let out = CommandOutput::new();
        assert!(!out.is_connected());
        out.transmit(ShellCommand::new("pkill iperf"));
    }

    #[test]
    fn transmit_reaches_connected_target() {
        let out = CommandOutput::new();
        let sink = Arc::new(Collect::default());
        out.connect(sink.clone()).unwrap();
        out.transmit(ShellCommand::new("iperf -s -p 12345"));
        assert_eq!(sink.0.lock().unwrap().as_slice(), ["iperf -s -p 12345"]);
    }

    #[test]
    fn second_connect_is_rejected() {
        let out = CommandOutput::new();
        out.connect(Arc::new(Collect::default())).unwrap();
        assert!(matches!(
            out.connect(Arc::new(Collect::default())),
            Err(ChannelError::AlreadyConnected)
        ));
    }

    #[test]
    fn program_is_first_word() {
        let cmd = ShellCommand::new("tc qdisc change dev veth2").with_log_file("tc.log");
        assert_eq!(cmd.program(), "tc");
        assert_eq!(cmd.log_file(), Some(Path::new("tc.log")));
        assert_eq!(cmd.to_string(), "tc qdisc change dev veth2");
    }
}
