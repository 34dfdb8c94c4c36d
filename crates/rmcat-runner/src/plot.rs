//! Sending rate and queue delay plots rendered with gnuplot.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Context;
use rmcat_sim::Scenario;

use crate::process;

const COLORS: &[&str] = &[
    "blue", "0x008c48", "0xf47d23", "0x662c91", "0xa21d21", "0xb43894",
];
const CAPACITY_COLOR: &str = "0xDC143C";
const GNUPLOT_TIMEOUT: Duration = Duration::from_secs(60);

/// One flow's series on the plot.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSeries {
    pub sr_csv: PathBuf,
    pub qmd_csv: Option<PathBuf>,
    pub title: String,
    pub fec_title: Option<String>,
    pub start_delay_secs: u64,
}

/// Two-panel plot: sending rates over path capacity, then queue delay.
#[derive(Debug, Clone, PartialEq)]
pub struct SrQmdPlot {
    pub output_file: PathBuf,
    pub pathbw_csv: Option<PathBuf>,
    /// One-way path latency subtracted from the measured delay.
    pub path_delay_ms: u32,
    pub duration_secs: u64,
    pub series: Vec<FlowSeries>,
}

fn color(index: usize) -> &'static str {
    COLORS[index % COLORS.len()]
}

impl SrQmdPlot {
    /// Collects the evaluated flows of `scenario`. `None` when nothing was
    /// evaluated.
    pub fn from_scenario(scenario: &Scenario, output_file: impl Into<PathBuf>) -> Option<Self> {
        let mut pathbw_csv = None;
        let mut series = Vec::new();
        for desc in scenario.descriptions() {
            let Some(eval) = desc.evaluation.as_ref() else {
                continue;
            };
            let Some(sr) = eval.csv("sr") else {
                continue;
            };
            if pathbw_csv.is_none() {
                pathbw_csv = eval.csv("pathbw").map(Path::to_path_buf);
            }
            series.push(FlowSeries {
                sr_csv: sr.to_path_buf(),
                qmd_csv: eval.csv("qmd").map(Path::to_path_buf),
                title: desc.title.clone(),
                fec_title: desc.plot_fec.then(|| desc.fec_title.clone()).flatten(),
                start_delay_secs: desc.start_delay().as_secs(),
            });
        }
        if series.is_empty() {
            return None;
        }
        Some(Self {
            output_file: output_file.into(),
            pathbw_csv,
            path_delay_ms: scenario.params().latency_ms,
            duration_secs: scenario.duration().as_secs(),
            series,
        })
    }

    /// The gnuplot script drawing this plot.
    pub fn script(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "path_delay={}", u64::from(self.path_delay_ms) * 1000);
        let _ = writeln!(s, "output_file='{}'", self.output_file.display());
        let _ = writeln!(s, "duration={}", self.duration_secs);
        s.push_str(
            "set terminal pdf enhanced rounded size 18,6\n\
             set output output_file\n\
             set datafile separator \",\"\n\
             set multiplot layout 2, 1 font \",18\"\n\
             set tmargin 4\n\
             set bmargin 5\n\
             set lmargin 20\n\
             set rmargin 10\n\
             set key font \",22\"\n\
             set ytics font \",26\"\n\
             set grid ytics lt 0 lw 1 lc rgb \"#bbbbbb\"\n\
             set grid xtics lt 0 lw 1 lc rgb \"#bbbbbb\"\n",
        );

        // Sending rate panel. Rates are logged in bytes per 100 ms.
        s.push_str(
            "set yrange [0:3000]\n\
             set ytics 1000\n\
             set xrange [0:duration]\n\
             set xtics 10 offset 0,-1\n\
             set format x \" \"\n\
             unset xlabel\n\
             set ylabel \"Throughput [kbps]\" offset -7,0 font \", 22\"\n",
        );
        let mut terms = Vec::new();
        let mut slot = 0;
        for flow in &self.series {
            terms.push(format!(
                "'{}' using ($0*0.1 + {}):($1/125) with point pointtype 7 ps 0.3 lc rgb \"{}\" title \"{}\"",
                flow.sr_csv.display(),
                flow.start_delay_secs,
                color(slot),
                flow.title
            ));
            if let Some(fec_title) = &flow.fec_title {
                slot += 1;
                terms.push(format!(
                    "'{}' using ($0*0.1 + {}):(($1+$2)/125) with point pointtype 7 ps 0.3 lc rgb \"{}\" title \"{}\"",
                    flow.sr_csv.display(),
                    flow.start_delay_secs,
                    color(slot),
                    fec_title
                ));
            }
            slot += 1;
        }
        if let Some(pathbw) = &self.pathbw_csv {
            terms.push(format!(
                "'{}' using 0:1 with lines lc rgb \"{CAPACITY_COLOR}\" title \"Path Capacity\"",
                pathbw.display()
            ));
        }
        push_plot(&mut s, &terms);

        // Queue delay panel.
        s.push_str(
            "set yrange [0:0.5]\n\
             set ytics 0.25\n\
             set xrange [0:duration]\n\
             set xtics 10 offset 0,-0.5\n\
             set format x \"%3.0f\"\n\
             set xtics font \", 26\"\n\
             set ylabel \"Queue Delay [s]\" offset -7,0 font \", 22\"\n\
             set xlabel \"Time [s]\" offset 0,-1.1 font \", 22\"\n",
        );
        let mut terms = Vec::new();
        let mut slot = 0;
        for flow in &self.series {
            if let Some(qmd) = &flow.qmd_csv {
                terms.push(format!(
                    "'{}' using ($0*0.1 + {}):(($1 - path_delay)/1000000) with point pointtype 7 ps 0.3 lc rgb \"{}\" title \"{}\"",
                    qmd.display(),
                    flow.start_delay_secs,
                    color(slot),
                    flow.title
                ));
            }
            slot += if flow.fec_title.is_some() { 2 } else { 1 };
        }
        push_plot(&mut s, &terms);
        s.push_str("unset multiplot\n");
        s
    }

    /// Writes the script next to the output and runs gnuplot on it.
    pub fn render(&self, script_file: &Path) -> anyhow::Result<()> {
        if let Some(parent) = self.output_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(script_file, self.script())
            .with_context(|| format!("writing {}", script_file.display()))?;

        let mut cmd = Command::new("gnuplot");
        cmd.arg(script_file);
        let status = process::run_with_timeout(cmd, GNUPLOT_TIMEOUT)?;
        if !status.success() {
            anyhow::bail!("gnuplot exited with {status}");
        }
        tracing::info!(output = %self.output_file.display(), "plot written");
        Ok(())
    }
}

fn push_plot(s: &mut String, terms: &[String]) {
    if terms.is_empty() {
        return;
    }
    s.push_str("plot ");
    s.push_str(&terms.join(", \\\n\t"));
    s.push('\n');
}
