use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

const MIN_STOP_POLL_MS: u64 = 10;
const MAX_STOP_POLL_MS: u64 = 1000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunnerConfigInput {
    pub testbed: TestbedConfigInput,
    pub binaries: BinariesConfigInput,
    pub output: OutputConfigInput,
    pub timing: TimingConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestbedConfigInput {
    pub source_namespace: Option<String>,
    pub midbox_namespace: Option<String>,
    pub sink_namespace: Option<String>,
    pub use_sudo: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BinariesConfigInput {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfigInput {
    pub dir: Option<PathBuf>,
    pub plot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimingConfigInput {
    pub stop_poll_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestbedConfig {
    pub source_namespace: String,
    pub midbox_namespace: String,
    pub sink_namespace: String,
    pub use_sudo: bool,
}

impl Default for TestbedConfig {
    fn default() -> Self {
        Self {
            source_namespace: "ns_snd".into(),
            midbox_namespace: "ns_mid".into(),
            sink_namespace: "ns_rcv".into(),
            use_sudo: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub testbed: TestbedConfig,
    /// Holds `snd_pipeline`, `rcv_pipeline`, `statmaker` and `logsplitter`.
    pub bin_dir: PathBuf,
    pub output_dir: PathBuf,
    pub plot_dir: PathBuf,
    pub stop_poll: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            testbed: TestbedConfig::default(),
            bin_dir: PathBuf::from("./"),
            output_dir: PathBuf::from("temp/"),
            plot_dir: PathBuf::from("plots/"),
            stop_poll: Duration::from_millis(MAX_STOP_POLL_MS),
        }
    }
}

fn non_empty(value: Option<String>, fallback: String) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
}

impl RunnerConfigInput {
    pub fn resolve(self) -> RunnerConfig {
        let defaults = RunnerConfig::default();
        let testbed = TestbedConfig {
            source_namespace: non_empty(
                self.testbed.source_namespace,
                defaults.testbed.source_namespace,
            ),
            midbox_namespace: non_empty(
                self.testbed.midbox_namespace,
                defaults.testbed.midbox_namespace,
            ),
            sink_namespace: non_empty(self.testbed.sink_namespace, defaults.testbed.sink_namespace),
            use_sudo: self.testbed.use_sudo.unwrap_or(defaults.testbed.use_sudo),
        };
        let stop_poll_ms = self
            .timing
            .stop_poll_ms
            .unwrap_or(MAX_STOP_POLL_MS)
            .clamp(MIN_STOP_POLL_MS, MAX_STOP_POLL_MS);

        RunnerConfig {
            testbed,
            bin_dir: self.binaries.dir.unwrap_or(defaults.bin_dir),
            output_dir: self.output.dir.unwrap_or(defaults.output_dir),
            plot_dir: self.output.plot_dir.unwrap_or(defaults.plot_dir),
            stop_poll: Duration::from_millis(stop_poll_ms),
        }
    }
}

impl RunnerConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        if input.trim().is_empty() {
            return Ok(RunnerConfig::default());
        }
        let parsed: RunnerConfigInput =
            toml::from_str(input).context("invalid runner config TOML")?;
        Ok(parsed.resolve())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_gives_defaults() {
        assert_eq!(RunnerConfig::from_toml_str("").unwrap(), RunnerConfig::default());
    }

    #[test]
    fn parse_runner_config() {
        let toml = r#"
            [testbed]
            source_namespace = "left"
            sink_namespace = "  "
            use_sudo = false

            [binaries]
            dir = "/opt/rmcat/bin"

            [output]
            dir = "/var/tmp/rmcat"

            [timing]
            stop_poll_ms = 2
        "#;
        let cfg = RunnerConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.testbed.source_namespace, "left");
        assert_eq!(cfg.testbed.midbox_namespace, "ns_mid");
        assert_eq!(cfg.testbed.sink_namespace, "ns_rcv");
        assert!(!cfg.testbed.use_sudo);
        assert_eq!(cfg.bin_dir, PathBuf::from("/opt/rmcat/bin"));
        assert_eq!(cfg.output_dir, PathBuf::from("/var/tmp/rmcat"));
        assert_eq!(cfg.plot_dir, PathBuf::from("plots/"));
        assert_eq!(cfg.stop_poll, Duration::from_millis(10));
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(RunnerConfig::from_toml_str("[timing]\nstop_poll_ms = \"soon\"").is_err());
    }
}
