//! Post-run evaluation with the `logsplitter` and `statmaker` tools.
//!
//! Only called once a run has fully stopped; the tools read the packet
//! logs the media pipelines wrote during the run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Context;
use rmcat_sim::{FlowDescription, FlowEvaluation, Scenario};
use serde::Serialize;

use crate::process;

const RTP_PAYLOAD_TYPE: u8 = 96;
const TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// One invocation of an external evaluation tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolInvocation {
    fn new(program: PathBuf, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            program,
            args: args.into_iter().collect(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Everything needed to evaluate one flow.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationPlan {
    pub commands: Vec<ToolInvocation>,
    pub csv_files: BTreeMap<String, PathBuf>,
    /// Path bandwidth schedule to write as `pathbw`, one value per second.
    pub bandwidths: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    bin_dir: PathBuf,
    output_dir: PathBuf,
    fec_payload_type: u8,
}

fn path_arg(p: &Path) -> String {
    p.display().to_string()
}

/// `snd_packets_1.csv` with `rtp` becomes `snd_rtp_packets_1.csv`.
fn split_log_name(sender_log: &Path, kind: &str) -> PathBuf {
    let name = sender_log
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let split = match name.strip_prefix("snd_") {
        Some(rest) => format!("snd_{kind}_{rest}"),
        None => format!("{kind}_{name}"),
    };
    sender_log.with_file_name(split)
}

/// Trailing `_<n>` of the sender log's stem.
fn flow_suffix(sender_log: &Path, fallback: u32) -> String {
    sender_log
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit_once('_'))
        .map(|(_, idx)| idx.to_string())
        .filter(|idx| !idx.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

impl Evaluator {
    pub fn new(bin_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, fec_payload_type: u8) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            output_dir: output_dir.into(),
            fec_payload_type,
        }
    }

    fn tool(&self, name: &str) -> PathBuf {
        self.bin_dir.join(name)
    }

    /// Works out tool invocations and output files for one flow. `None`
    /// when the flow has no media packet logs to evaluate.
    pub fn plan(&self, desc: &FlowDescription, bandwidths: &[u64]) -> Option<EvaluationPlan> {
        let snd = desc.stats.sender.as_deref()?;
        let suffix = flow_suffix(snd, desc.flow_id);
        let csv = |metric: &str| self.output_dir.join(format!("{metric}_{suffix}.csv"));

        let mut csv_files = BTreeMap::new();
        let mut commands = Vec::new();

        let rtp_packets = split_log_name(snd, "rtp");
        let fec_packets = split_log_name(snd, "fec");
        let logsplitter = self.tool("logsplitter");
        commands.push(ToolInvocation::new(
            logsplitter.clone(),
            [
                path_arg(snd),
                path_arg(&rtp_packets),
                format!("payload_type {RTP_PAYLOAD_TYPE}"),
            ],
        ));
        commands.push(ToolInvocation::new(
            logsplitter,
            [
                path_arg(snd),
                path_arg(&fec_packets),
                format!("payload_type {}", self.fec_payload_type),
            ],
        ));

        let statmaker = self.tool("statmaker");
        let mut stat = |metric: &str, name: &str, inputs: &[&Path]| {
            let out = csv(name);
            let args = std::iter::once(path_arg(&out))
                .chain(std::iter::once(metric.to_string()))
                .chain(inputs.iter().map(|p| path_arg(p)));
            commands.push(ToolInvocation::new(statmaker.clone(), args));
            csv_files.insert(name.to_string(), out);
        };

        stat("sr", "sr", &[snd]);
        if let Some(rcv) = desc.stats.receiver.as_deref() {
            stat("qmd", "qmd", &[snd, rcv]);
        }
        if let Some(ply) = desc.stats.playout.as_deref() {
            stat("gp_avg", "gp_avg", &[ply]);
            stat("lr", "lr", &[rtp_packets.as_path(), ply]);
            stat("nlf", "nlf", &[rtp_packets.as_path(), ply]);
        }
        stat("fec_avg", "fec_avg", &[fec_packets.as_path()]);
        if let Some(tcp) = desc.stats.tcp.as_deref() {
            stat("tcpstat", "tcprate", &[tcp]);
        }

        csv_files.insert("pathbw".to_string(), csv("pathbw"));
        if csv_files.contains_key("qmd") {
            csv_files.insert("qmd_avg".to_string(), csv("qmd_avg"));
        }

        Some(EvaluationPlan {
            commands,
            csv_files,
            bandwidths: bandwidths.to_vec(),
        })
    }

    /// Evaluates one flow and returns what it produced.
    ///
    /// A failing tool is logged and skipped; the remaining metrics are
    /// still computed.
    pub fn evaluate(&self, desc: &FlowDescription, bandwidths: &[u64]) -> anyhow::Result<Option<FlowEvaluation>> {
        let Some(plan) = self.plan(desc, bandwidths) else {
            tracing::debug!(flow = %desc.title, "no packet logs, skipping evaluation");
            return Ok(None);
        };
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating {}", self.output_dir.display()))?;

        if let Some(pathbw) = plan.csv_files.get("pathbw") {
            write_column(pathbw, &plan.bandwidths)?;
        }

        for tool in &plan.commands {
            tracing::debug!(flow = %desc.title, "{tool}");
            match process::run_with_timeout(tool.command(), TOOL_TIMEOUT) {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::warn!(flow = %desc.title, tool = %tool, %status, "tool failed"),
                Err(e) => tracing::warn!(flow = %desc.title, tool = %tool, error = %e, "tool did not run"),
            }
        }

        let mut queue_delay_avg = None;
        if let (Some(qmd), Some(target)) = (plan.csv_files.get("qmd"), plan.csv_files.get("qmd_avg")) {
            match average_file(qmd) {
                Ok(Some(avg)) => {
                    write_column(target, &[avg])?;
                    queue_delay_avg = Some(avg);
                }
                Ok(None) => tracing::warn!(flow = %desc.title, "queue delay log is empty"),
                Err(e) => tracing::warn!(flow = %desc.title, error = %e, "no queue delay average"),
            }
        }

        tracing::info!(flow = %desc.title, outputs = plan.csv_files.len(), "flow evaluated");
        Ok(Some(FlowEvaluation {
            csv_files: plan.csv_files,
            queue_delay_avg,
        }))
    }

    /// Evaluates every described flow of `scenario` and stores the
    /// results in the descriptions.
    pub fn evaluate_scenario(&self, scenario: &mut Scenario) -> anyhow::Result<()> {
        let schedules: Vec<Vec<u64>> = scenario
            .descriptions()
            .iter()
            .map(|d| {
                d.path
                    .as_deref()
                    .and_then(|link| scenario.bandwidths(link))
                    .map(<[u64]>::to_vec)
                    .unwrap_or_default()
            })
            .collect();

        for (desc, bandwidths) in scenario.descriptions_mut().iter_mut().zip(schedules) {
            desc.evaluation = self.evaluate(desc, &bandwidths)?;
            desc.source_files = [
                &desc.stats.sender,
                &desc.stats.receiver,
                &desc.stats.playout,
                &desc.stats.tcp,
            ]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        }
        Ok(())
    }
}

fn write_column<T: fmt::Display>(path: &Path, values: &[T]) -> anyhow::Result<()> {
    let mut text = String::new();
    for v in values {
        text.push_str(&v.to_string());
        text.push('\n');
    }
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

/// Mean over rows of the row sums, or `None` for an empty file.
pub fn average_csv(text: &str) -> anyhow::Result<Option<f64>> {
    let mut sum = 0.0;
    let mut rows = 0u64;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        for field in line.split(',') {
            let field = field.trim();
            sum += field
                .parse::<f64>()
                .with_context(|| format!("not a number: {field:?}"))?;
        }
        rows += 1;
    }
    Ok((rows > 0).then(|| sum / rows as f64))
}

fn average_file(path: &Path) -> anyhow::Result<Option<f64>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    average_csv(&text)
}

#[derive(Serialize)]
struct FlowSummary<'a> {
    flow_id: u32,
    title: &'a str,
    path: Option<&'a str>,
    start_delay_secs: u64,
    stats: &'a rmcat_sim::StatFiles,
    evaluation: Option<&'a FlowEvaluation>,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    scenario: &'a str,
    algorithm: String,
    run: u32,
    duration_secs: u64,
    flows: Vec<FlowSummary<'a>>,
}

/// Writes a JSON summary of an evaluated run and returns its path.
pub fn write_summary(scenario: &Scenario, run: u32, dir: &Path) -> anyhow::Result<PathBuf> {
    let summary = RunSummary {
        scenario: scenario.name(),
        algorithm: scenario.algorithm().to_string(),
        run,
        duration_secs: scenario.duration().as_secs(),
        flows: scenario
            .descriptions()
            .iter()
            .map(|d| FlowSummary {
                flow_id: d.flow_id,
                title: &d.title,
                path: d.path.as_deref(),
                start_delay_secs: d.start_delay().as_secs(),
                stats: &d.stats,
                evaluation: d.evaluation.as_ref(),
            })
            .collect(),
    };
    let path = dir.join(format!("summary_{}_{run}.json", scenario.name()));
    let json = serde_json::to_string_pretty(&summary)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
