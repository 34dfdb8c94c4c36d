use std::process::Command;
use std::sync::Arc;

use rmcat_sim::{CommandSink, Role, ShellCommand, Testbed};

use crate::config::TestbedConfig;
use crate::process;

/// A Linux network namespace reached via `ip netns`.
///
/// The namespace is expected to exist already; the testbed setup
/// scripts create and wire them.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub use_sudo: bool,
}

impl Namespace {
    pub fn new(name: &str, use_sudo: bool) -> Self {
        Self {
            name: name.to_string(),
            use_sudo,
        }
    }

    fn ip(&self) -> Command {
        if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("ip");
            cmd
        } else {
            Command::new("ip")
        }
    }

    pub fn exists(&self) -> std::io::Result<bool> {
        let output = self.ip().args(["netns", "list"]).output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "ip netns list failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(listing
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .any(|n| n == self.name))
    }

    /// `[sudo] ip netns exec <name> bash -c <line>`
    pub fn command(&self, line: &str) -> Command {
        let mut cmd = self.ip();
        cmd.args(["netns", "exec", &self.name, "bash", "-c", line]);
        cmd
    }

    fn describe(&self, line: &str) -> String {
        let sudo = if self.use_sudo { "sudo " } else { "" };
        format!("{sudo}ip netns exec {} bash -c '{line}'", self.name)
    }
}

/// Runs every command it receives inside one namespace.
pub struct NamespaceInput {
    namespace: Namespace,
}

impl CommandSink for NamespaceInput {
    fn execute(&self, command: ShellCommand) {
        let cmd = self.namespace.command(command.line());
        if let Err(e) = process::spawn_detached(cmd, &self.namespace.name, command.log_file()) {
            tracing::error!(ns = %self.namespace.name, command = %command, error = %e, "failed to launch");
        }
    }
}

/// Runs commands in the host namespace.
pub struct HostInput;

impl CommandSink for HostInput {
    fn execute(&self, command: ShellCommand) {
        let mut cmd = Command::new("bash");
        cmd.args(["-c", command.line()]);
        if let Err(e) = process::spawn_detached(cmd, "host", command.log_file()) {
            tracing::error!(command = %command, error = %e, "failed to launch");
        }
    }
}

/// Testbed of three namespaces on the local machine.
#[derive(Debug, Clone)]
pub struct LinuxTestbed {
    source: Namespace,
    midbox: Namespace,
    sink: Namespace,
}

impl LinuxTestbed {
    pub fn new(cfg: &TestbedConfig) -> Self {
        Self {
            source: Namespace::new(&cfg.source_namespace, cfg.use_sudo),
            midbox: Namespace::new(&cfg.midbox_namespace, cfg.use_sudo),
            sink: Namespace::new(&cfg.sink_namespace, cfg.use_sudo),
        }
    }

    pub fn namespace(&self, role: Role) -> Option<&Namespace> {
        match role {
            Role::Testbed => None,
            Role::Source => Some(&self.source),
            Role::Midbox => Some(&self.midbox),
            Role::Sink => Some(&self.sink),
        }
    }

    /// Fails unless all three namespaces exist.
    pub fn preflight(&self) -> anyhow::Result<()> {
        for role in [Role::Source, Role::Midbox, Role::Sink] {
            let Some(ns) = self.namespace(role) else {
                continue;
            };
            if !ns.exists()? {
                anyhow::bail!("{role} namespace {} does not exist", ns.name);
            }
        }
        Ok(())
    }
}

impl Testbed for LinuxTestbed {
    fn input(&self, role: Role) -> Arc<dyn CommandSink> {
        match self.namespace(role) {
            Some(ns) => Arc::new(NamespaceInput {
                namespace: ns.clone(),
            }),
            None => Arc::new(HostInput),
        }
    }
}

/// Dry-run testbed: logs what the namespace testbed would run.
#[derive(Debug, Clone)]
pub struct LoggingTestbed {
    inner: LinuxTestbed,
}

impl LoggingTestbed {
    pub fn new(cfg: &TestbedConfig) -> Self {
        Self {
            inner: LinuxTestbed::new(cfg),
        }
    }
}

struct LoggingInput {
    role: Role,
    namespace: Option<Namespace>,
}

impl CommandSink for LoggingInput {
    fn execute(&self, command: ShellCommand) {
        let line = match &self.namespace {
            Some(ns) => ns.describe(command.line()),
            None => format!("bash -c '{}'", command.line()),
        };
        match command.log_file() {
            Some(log) => tracing::info!(role = %self.role, log = %log.display(), "{line}"),
            None => tracing::info!(role = %self.role, "{line}"),
        }
    }
}

impl Testbed for LoggingTestbed {
    fn input(&self, role: Role) -> Arc<dyn CommandSink> {
        Arc::new(LoggingInput {
            role,
            namespace: self.inner.namespace(role).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcat_sim::test_util::{check_privileges, unique_ns_name};
    use std::time::{Duration, Instant};

    /// Namespace created for one test and deleted afterwards.
    struct Scratch(Namespace);

    impl Scratch {
        fn create(prefix: &str) -> Self {
            let ns = Namespace::new(&unique_ns_name(prefix), true);
            let status = ns
                .ip()
                .args(["netns", "add", &ns.name])
                .status()
                .expect("ip netns add");
            assert!(status.success(), "failed to create {}", ns.name);
            Scratch(ns)
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = self.0.ip().args(["netns", "del", &self.0.name]).status();
        }
    }

    #[test]
    fn namespace_command_line() {
        let ns = Namespace::new("ns_snd", true);
        let cmd = ns.command("iperf -s -p 12345");
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["ip", "netns", "exec", "ns_snd", "bash", "-c", "iperf -s -p 12345"]
        );

        let plain = Namespace::new("ns_rcv", false).command("true");
        assert_eq!(plain.get_program(), "ip");
    }

    #[test]
    fn dry_run_description() {
        let ns = Namespace::new("ns_mid", false);
        assert_eq!(
            ns.describe("pkill tcpdump"),
            "ip netns exec ns_mid bash -c 'pkill tcpdump'"
        );
    }

    #[test]
    fn roles_map_to_configured_namespaces() {
        let bed = LinuxTestbed::new(&TestbedConfig::default());
        assert!(bed.namespace(Role::Testbed).is_none());
        assert_eq!(bed.namespace(Role::Source).unwrap().name, "ns_snd");
        assert_eq!(bed.namespace(Role::Midbox).unwrap().name, "ns_mid");
        assert_eq!(bed.namespace(Role::Sink).unwrap().name, "ns_rcv");
    }

    #[test]
    fn preflight_and_exec_in_namespace() {
        if !check_privileges() {
            eprintln!("Skipping test, unsufficient privileges or missing tools");
            return;
        }
        let snd = Scratch::create("rmc_s");
        let mid = Scratch::create("rmc_m");
        let rcv = Scratch::create("rmc_r");
        let cfg = TestbedConfig {
            source_namespace: snd.0.name.clone(),
            midbox_namespace: mid.0.name.clone(),
            sink_namespace: rcv.0.name.clone(),
            use_sudo: true,
        };
        let bed = LinuxTestbed::new(&cfg);
        bed.preflight().expect("namespaces exist");

        let log = std::env::temp_dir().join(format!("{}.log", snd.0.name));
        bed.source_input()
            .execute(ShellCommand::new("ip link show lo").with_log_file(&log));

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let text = std::fs::read_to_string(&log).unwrap_or_default();
            if text.contains("lo") {
                break;
            }
            assert!(Instant::now() < deadline, "no output from namespace");
            std::thread::sleep(Duration::from_millis(50));
        }
        let _ = std::fs::remove_file(&log);
    }

    #[test]
    fn preflight_rejects_missing_namespace() {
        if !check_privileges() {
            eprintln!("Skipping test, unsufficient privileges or missing tools");
            return;
        }
        let cfg = TestbedConfig {
            source_namespace: unique_ns_name("rmc_none"),
            ..TestbedConfig::default()
        };
        assert!(LinuxTestbed::new(&cfg).preflight().is_err());
    }
}
