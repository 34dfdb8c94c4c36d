//! # Scenarios
//!
//! A scenario is plain data: the flows of a test, the stage schedule of
//! every link and the flow descriptions evaluation works from. Building
//! one never starts anything, so a scenario that fails to build keeps
//! every process from launching.
//!
//! Built-in scenarios live in [`rmcat`]; [`file`] loads one from TOML.

pub mod file;
pub mod random_walk;
pub mod rmcat;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ScenarioError;
use crate::flow::{Flow, FlowDescription, StatFiles, DEFAULT_SINK_TO_SOURCE_DELAY};
use crate::flow_controller::FlowController;
use crate::midbox::MidboxController;
use crate::path::{PathConfig, PathController, StageChain, StageDescriptor, DEFAULT_STOP_POLL};
use crate::units::{Algorithm, Codec, RtpReceiver, RtpSender, TrafficUnit};

pub use file::ScenarioFile;
pub use random_walk::RandomWalkConfig;

/// Names accepted by [`build`].
pub const NAMES: &[&str] = &[
    "rmcat1", "rmcat2", "rmcat3", "rmcat6", "rmcat7", "mprtp1", "random",
];

/// Knobs shared by every scenario.
#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub algorithm: Algorithm,
    pub codec: Codec,
    pub latency_ms: u32,
    pub jitter_ms: u32,
    pub source_type: String,
    pub sink_type: String,
    pub ext_header_id: u8,
    pub fec_payload_type: u8,
    /// Directory holding `snd_pipeline` and `rcv_pipeline`.
    pub bin_dir: PathBuf,
    /// Directory for unit logs, packet logs and captures.
    pub output_dir: PathBuf,
    /// Add a packet capture controller for every link.
    pub capture: bool,
    pub stop_poll: Duration,
    /// Seed of the `random` scenario.
    pub seed: u64,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Fractal,
            codec: Codec::Vp8,
            latency_ms: 50,
            jitter_ms: 0,
            source_type: "FILE:foreman_cif.yuv:1:352:288:2:25/1".into(),
            sink_type: "FAKESINK".into(),
            ext_header_id: 3,
            fec_payload_type: 126,
            bin_dir: PathBuf::from("./"),
            output_dir: PathBuf::from("temp/"),
            capture: false,
            stop_poll: DEFAULT_STOP_POLL,
            seed: 42,
        }
    }
}

/// Addresses of a single-path RTP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpEndpoints {
    /// Address the receiver listens on.
    pub rtp_ip: String,
    pub rtp_port: u16,
    /// Address the sender expects RTCP on.
    pub rtcp_ip: String,
    pub rtcp_port: u16,
}

impl RtpEndpoints {
    pub fn new(rtp_ip: &str, rtp_port: u16, rtcp_ip: &str, rtcp_port: u16) -> Self {
        Self {
            rtp_ip: rtp_ip.to_string(),
            rtp_port,
            rtcp_ip: rtcp_ip.to_string(),
            rtcp_port,
        }
    }
}

impl ScenarioParams {
    pub fn log_file(&self, unit: &str) -> PathBuf {
        self.output_dir.join(format!("{unit}.log"))
    }

    /// `<output>/<kind>_packets_<index>.csv`, the name the evaluator
    /// derives its outputs from.
    pub fn stat_file(&self, kind: &str, index: u32) -> PathBuf {
        self.output_dir.join(format!("{kind}_packets_{index}.csv"))
    }

    pub fn pcap_file(&self, link: &str) -> PathBuf {
        self.output_dir.join(format!("{link}.pcap"))
    }

    /// Stat files of the media flow with the given index.
    pub fn media_stats(&self, index: u32) -> StatFiles {
        StatFiles {
            sender: Some(self.stat_file("snd", index)),
            receiver: Some(self.stat_file("rcv", index)),
            playout: Some(self.stat_file("ply", index)),
            tcp: None,
        }
    }

    /// A single-path RTP flow with sender and receiver numbered `index`.
    pub fn rtp_flow(&self, index: u32, ep: &RtpEndpoints) -> Result<Flow, ScenarioError> {
        let stats = self.media_stats(index);
        let sender = RtpSender {
            name: format!("rtpsender_{index}"),
            bin_dir: self.bin_dir.clone(),
            codec: self.codec,
            algorithm: self.algorithm,
            rtp_ip: ep.rtp_ip.clone(),
            rtp_port: ep.rtp_port,
            rtcp_port: ep.rtcp_port,
            snd_stat: stats.sender,
            source_type: self.source_type.clone(),
            ext_header_id: self.ext_header_id,
            log_file: self.log_file(&format!("rtpsender_{index}")),
        };
        let receiver = RtpReceiver {
            name: format!("rtpreceiver_{index}"),
            bin_dir: self.bin_dir.clone(),
            codec: self.codec,
            algorithm: self.algorithm,
            rtp_port: ep.rtp_port,
            rtcp_ip: ep.rtcp_ip.clone(),
            rtcp_port: ep.rtcp_port,
            rcv_stat: stats.receiver,
            ply_stat: stats.playout,
            sink_type: self.sink_type.clone(),
            ext_header_id: self.ext_header_id,
            log_file: self.log_file(&format!("rtpreceiver_{index}")),
        };
        Ok(Flow::new(
            format!("rtp_{index}"),
            Some(TrafficUnit::RtpSender(sender)),
            Some(TrafficUnit::RtpReceiver(receiver)),
        )?
        .with_sink_to_source_delay(DEFAULT_SINK_TO_SOURCE_DELAY))
    }

    /// Title used in plots for the media flow with the given index.
    pub fn media_title(&self, index: u32, total: u32) -> String {
        if total > 1 {
            format!("{} {index}", self.algorithm)
        } else {
            self.algorithm.to_string()
        }
    }

    /// Builds a stage descriptor with this run's latency and jitter.
    pub fn stage(&self, duration_secs: u64, bandwidth_kbit: u64) -> StageDescriptor {
        StageDescriptor::new(
            duration_secs,
            PathConfig::new(bandwidth_kbit, self.latency_ms, self.jitter_ms),
        )
    }
}

/// Everything one test run needs, built up front.
#[derive(Debug)]
pub struct Scenario {
    name: String,
    duration: Duration,
    params: ScenarioParams,
    flows: Vec<Arc<Flow>>,
    links: Vec<Link>,
    descriptions: Vec<FlowDescription>,
}

#[derive(Debug)]
struct Link {
    name: String,
    shaping: Arc<PathController>,
    capture: Option<Arc<PathController>>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, duration_secs: u64, params: ScenarioParams) -> Self {
        Self {
            name: name.into(),
            duration: Duration::from_secs(duration_secs),
            params,
            flows: Vec::new(),
            links: Vec::new(),
            descriptions: Vec::new(),
        }
    }

    /// Registers `flow` and returns the shared handle descriptions refer to.
    pub fn add_flow(&mut self, flow: Flow) -> Arc<Flow> {
        let flow = Arc::new(flow);
        self.flows.push(Arc::clone(&flow));
        flow
    }

    /// Adds a shaped link, plus a capture on it when captures are enabled.
    pub fn add_link(&mut self, link: &str, stages: Vec<StageDescriptor>) {
        let chain = StageChain::build(stages);
        let shaping =
            Arc::new(PathController::shaping(link, chain).with_stop_poll(self.params.stop_poll));
        let capture = self
            .params
            .capture
            .then(|| Arc::new(PathController::capture(link, self.params.pcap_file(link))));
        self.links.push(Link {
            name: link.to_string(),
            shaping,
            capture,
        });
    }

    pub fn describe(&mut self, description: FlowDescription) {
        self.descriptions.push(description);
    }

    /// Rejects scenarios that would start nothing.
    pub fn finish(self) -> Result<Self, ScenarioError> {
        if self.flows.is_empty() {
            return Err(ScenarioError::NoFlows(self.name));
        }
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn params(&self) -> &ScenarioParams {
        &self.params
    }

    pub fn algorithm(&self) -> Algorithm {
        self.params.algorithm
    }

    pub fn flows(&self) -> &[Arc<Flow>] {
        &self.flows
    }

    pub fn link_names(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|l| l.name.as_str())
    }

    /// All path controllers, shaping first then captures, link by link.
    pub fn path_controllers(&self) -> Vec<Arc<PathController>> {
        self.links
            .iter()
            .flat_map(|l| std::iter::once(&l.shaping).chain(l.capture.as_ref()))
            .cloned()
            .collect()
    }

    /// Per-second bandwidth schedule of `link`.
    pub fn bandwidths(&self, link: &str) -> Option<&[u64]> {
        self.links
            .iter()
            .find(|l| l.name == link)
            .map(|l| l.shaping.bandwidths())
    }

    pub fn descriptions(&self) -> &[FlowDescription] {
        &self.descriptions
    }

    pub fn descriptions_mut(&mut self) -> &mut [FlowDescription] {
        &mut self.descriptions
    }

    /// Fresh controllers for one run. Path controllers are single-use, so
    /// a scenario is rebuilt for every run.
    pub fn controllers(&self) -> (FlowController, MidboxController) {
        let mut flows = FlowController::new();
        flows.add_flows(self.flows.iter().cloned());
        let mut midbox = MidboxController::new();
        midbox.add_path_controllers(self.path_controllers());
        (flows, midbox)
    }
}

/// Builds the named built-in scenario.
pub fn build(name: &str, params: &ScenarioParams) -> Result<Scenario, ScenarioError> {
    let scenario = match name {
        "rmcat1" => rmcat::rmcat1(params),
        "rmcat2" => rmcat::rmcat2(params),
        "rmcat3" => rmcat::rmcat3(params),
        "rmcat6" => rmcat::rmcat6(params),
        "rmcat7" => rmcat::rmcat7(params),
        "mprtp1" => rmcat::mprtp1(params),
        "random" => rmcat::random(params),
        other => return Err(ScenarioError::UnknownScenario(other.to_string())),
    }?;
    scenario.finish()
}
