//! RMCAT test runner
//!
//! Runs a congestion-control scenario on a three-namespace testbed:
//!
//! - Builds the scenario up front and refuses to start on any error
//! - Starts flows and path shaping, stops everything after the
//!   scenario duration or on Ctrl-C
//! - Evaluates packet logs and plots sending rate and queue delay

mod config;
mod evaluate;
mod plot;
mod process;
mod testbed;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rmcat_sim::scenario::{self, ScenarioFile};
use rmcat_sim::{
    Algorithm, Codec, RunOutcome, Scenario, ScenarioError, ScenarioParams, TestController,
    Testbed,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use config::RunnerConfig;
use testbed::{LinuxTestbed, LoggingTestbed};

/// Congestion-control test runner.
#[derive(Parser, Debug)]
#[command(name = "rmcat-runner", about = "Run RMCAT congestion-control test scenarios")]
struct Cli {
    /// Built-in scenario to run.
    #[arg(default_value = "rmcat1")]
    scenario: String,

    /// Congestion control algorithm (FRACTaL or SCReAM).
    #[arg(short, long, default_value = "FRACTaL")]
    algorithm: String,

    /// Media codec.
    #[arg(long, default_value = "VP8")]
    codec: String,

    /// One-way path latency in ms.
    #[arg(short, long, default_value_t = 50)]
    latency: u32,

    /// Path jitter in ms.
    #[arg(short, long, default_value_t = 0)]
    jitter: u32,

    /// Source pipeline type passed to the sender.
    #[arg(long, default_value = "FILE:foreman_cif.yuv:1:352:288:2:25/1")]
    source_type: String,

    /// Sink pipeline type passed to the receiver.
    #[arg(long, default_value = "FAKESINK")]
    sink_type: String,

    /// RTP header extension id carrying MPRTP information.
    #[arg(long, default_value_t = 3)]
    mprtp_ext: u8,

    /// Payload type of FEC packets.
    #[arg(long, default_value_t = 126)]
    fec_payload_type: u8,

    /// Number of consecutive runs.
    #[arg(short, long, default_value_t = 1)]
    runs: u32,

    /// Seed of the random scenario.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Capture packets on every shaped link.
    #[arg(long, default_value_t = false)]
    capture: bool,

    /// Run a scenario from a TOML file instead of a built-in one.
    #[arg(long)]
    scenario_file: Option<PathBuf>,

    /// Runner configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log commands instead of executing them.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Skip evaluation and plotting.
    #[arg(long, default_value_t = false)]
    no_eval: bool,
}

/// Where the scenario of every run comes from.
enum ScenarioSource {
    BuiltIn(String),
    File(ScenarioFile),
}

impl ScenarioSource {
    fn build(&self, params: &ScenarioParams) -> Result<Scenario, ScenarioError> {
        match self {
            ScenarioSource::BuiltIn(name) => scenario::build(name, params),
            ScenarioSource::File(file) => file.build(params),
        }
    }
}

fn scenario_params(cli: &Cli, cfg: &RunnerConfig) -> anyhow::Result<ScenarioParams> {
    let algorithm: Algorithm = cli.algorithm.parse()?;
    let codec: Codec = cli.codec.parse()?;
    Ok(ScenarioParams {
        algorithm,
        codec,
        latency_ms: cli.latency,
        jitter_ms: cli.jitter,
        source_type: cli.source_type.clone(),
        sink_type: cli.sink_type.clone(),
        ext_header_id: cli.mprtp_ext,
        fec_payload_type: cli.fec_payload_type,
        bin_dir: cfg.bin_dir.clone(),
        output_dir: cfg.output_dir.clone(),
        capture: cli.capture,
        stop_poll: cfg.stop_poll,
        seed: cli.seed,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };
    let params = scenario_params(&cli, &cfg)?;

    let source = match &cli.scenario_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading scenario file {}", path.display()))?;
            ScenarioSource::File(ScenarioFile::from_toml_str(&text)?)
        }
        None => ScenarioSource::BuiltIn(cli.scenario.clone()),
    };
    // Fail before anything is launched.
    let probe = source.build(&params)?;

    tracing::info!(
        scenario = %probe.name(),
        algorithm = %params.algorithm,
        duration_s = probe.duration().as_secs(),
        runs = cli.runs,
        dry_run = cli.dry_run,
        "rmcat-runner starting"
    );
    drop(probe);

    let testbed: Arc<dyn Testbed> = if cli.dry_run {
        Arc::new(LoggingTestbed::new(&cfg.testbed))
    } else {
        let bed = LinuxTestbed::new(&cfg.testbed);
        bed.preflight().context("testbed preflight")?;
        Arc::new(bed)
    };
    std::fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("creating {}", cfg.output_dir.display()))?;

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received SIGINT, stopping test");
            let _ = shutdown_tx.send(true);
        }
    });

    for run in 1..=cli.runs {
        let scenario = source.build(&params)?;
        let (flows, midbox) = scenario.controllers();
        let controller = TestController::new(flows, midbox, Arc::clone(&testbed))?;
        let lifetime = scenario.duration() + controller.max_source_to_sink_delay();

        tracing::info!(run, scenario = %scenario.name(), lifetime_s = lifetime.as_secs(), "run starting");
        match controller.run(lifetime, shutdown_rx.clone()).await {
            RunOutcome::Completed => tracing::info!(run, "run completed"),
            RunOutcome::Interrupted => {
                tracing::warn!(run, "run interrupted, skipping evaluation and remaining runs");
                break;
            }
        }

        if cli.no_eval || cli.dry_run {
            continue;
        }
        let evaluated =
            evaluate_in_background(scenario, run, cfg.clone(), params.fec_payload_type).await;
        if let Err(e) = evaluated {
            tracing::error!(run, error = %e, "evaluation failed");
        }
    }

    tracing::info!("rmcat-runner stopped");
    Ok(())
}

/// Runs [`evaluate_run`] on the blocking pool; the tools it waits for can
/// take minutes.
async fn evaluate_in_background(
    mut scenario: Scenario,
    run: u32,
    cfg: RunnerConfig,
    fec_payload_type: u8,
) -> anyhow::Result<Scenario> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<Scenario> {
        evaluate_run(&mut scenario, run, &cfg, fec_payload_type)?;
        Ok(scenario)
    })
    .await
    .context("evaluation task failed")?
}

fn evaluate_run(
    scenario: &mut Scenario,
    run: u32,
    cfg: &RunnerConfig,
    fec_payload_type: u8,
) -> anyhow::Result<()> {
    let evaluator = evaluate::Evaluator::new(&cfg.bin_dir, &cfg.output_dir, fec_payload_type);
    evaluator.evaluate_scenario(scenario)?;
    let summary = evaluate::write_summary(scenario, run, &cfg.output_dir)?;
    tracing::info!(run, summary = %summary.display(), "evaluation written");

    let stem = format!("{}_{}_{run}", scenario.name(), scenario.algorithm());
    let Some(plot) = plot::SrQmdPlot::from_scenario(scenario, cfg.plot_dir.join(format!("{stem}.pdf")))
    else {
        tracing::warn!(run, "nothing to plot");
        return Ok(());
    };
    let script = cfg.output_dir.join(format!("{stem}.plot"));
    if let Err(e) = plot.render(&script) {
        tracing::warn!(run, error = %e, "plotting failed");
    }
    Ok(())
}
