//! Flows and the per-flow records handed to evaluation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::ScenarioError;
use crate::units::TrafficUnit;

/// Delay between sink and source start used by media flows.
pub const DEFAULT_SINK_TO_SOURCE_DELAY: Duration = Duration::from_secs(2);

/// One logical traffic stream: a source unit, a sink unit and start timing.
///
/// Either side may be absent. A TCP client reusing another flow's server
/// has no sink of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    name: String,
    source: Option<TrafficUnit>,
    sink: Option<TrafficUnit>,
    start_delay: Duration,
    sink_to_source_delay: Duration,
    flipped: bool,
    pcap_files: Vec<PathBuf>,
}

impl Flow {
    /// Validates both units and, for multipath pairs, that their subflow
    /// lists line up.
    pub fn new(
        name: impl Into<String>,
        source: Option<TrafficUnit>,
        sink: Option<TrafficUnit>,
    ) -> Result<Self, ScenarioError> {
        for unit in source.iter().chain(sink.iter()) {
            unit.validate()?;
        }
        if let (Some(TrafficUnit::MprtpSender(snd)), Some(TrafficUnit::MprtpReceiver(rcv))) =
            (&source, &sink)
        {
            if snd.subflows.len() != rcv.subflows.len() {
                return Err(ScenarioError::SubflowMismatch(
                    snd.subflows.len(),
                    rcv.subflows.len(),
                ));
            }
        }
        Ok(Self {
            name: name.into(),
            source,
            sink,
            start_delay: Duration::ZERO,
            sink_to_source_delay: Duration::ZERO,
            flipped: false,
            pcap_files: Vec::new(),
        })
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_sink_to_source_delay(mut self, delay: Duration) -> Self {
        self.sink_to_source_delay = delay;
        self
    }

    /// Marks the flow as return-path traffic: its sink command goes out on
    /// the source channel and vice versa.
    pub fn flipped(mut self, flipped: bool) -> Self {
        self.flipped = flipped;
        self
    }

    pub fn with_pcap_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pcap_files.push(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&TrafficUnit> {
        self.source.as_ref()
    }

    pub fn sink(&self) -> Option<&TrafficUnit> {
        self.sink.as_ref()
    }

    pub fn start_delay(&self) -> Duration {
        self.start_delay
    }

    pub fn sink_to_source_delay(&self) -> Duration {
        self.sink_to_source_delay
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    pub fn pcap_files(&self) -> &[PathBuf] {
        &self.pcap_files
    }

    /// Log files of every present unit, source first.
    pub fn log_files(&self) -> Vec<&Path> {
        self.source
            .iter()
            .chain(self.sink.iter())
            .map(TrafficUnit::log_file)
            .collect()
    }
}

/// Packet logs the media pipelines write for one flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatFiles {
    pub sender: Option<PathBuf>,
    pub receiver: Option<PathBuf>,
    pub playout: Option<PathBuf>,
    /// `iperf` output of a competing TCP flow, if any.
    pub tcp: Option<PathBuf>,
}

/// Results filled in by the evaluator once a run has stopped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowEvaluation {
    /// Produced CSVs keyed by metric (`sr`, `qmd`, `pathbw`, ...).
    pub csv_files: BTreeMap<String, PathBuf>,
    pub queue_delay_avg: Option<f64>,
}

impl FlowEvaluation {
    pub fn csv(&self, metric: &str) -> Option<&Path> {
        self.csv_files.get(metric).map(PathBuf::as_path)
    }
}

/// Descriptive record of one flow for evaluation and plotting.
///
/// Immutable apart from `evaluation` and `source_files`, which are only
/// written after the run has stopped.
#[derive(Debug, Clone)]
pub struct FlowDescription {
    pub flow_id: u32,
    pub title: String,
    pub flow: Arc<Flow>,
    pub stats: StatFiles,
    /// Link whose bandwidth schedule is drawn as capacity for this flow.
    pub path: Option<String>,
    pub plot_fec: bool,
    pub fec_title: Option<String>,
    pub evaluation: Option<FlowEvaluation>,
    pub source_files: Vec<PathBuf>,
}

impl FlowDescription {
    pub fn new(flow_id: u32, title: impl Into<String>, flow: Arc<Flow>) -> Self {
        Self {
            flow_id,
            title: title.into(),
            flow,
            stats: StatFiles::default(),
            path: None,
            plot_fec: false,
            fec_title: None,
            evaluation: None,
            source_files: Vec::new(),
        }
    }

    pub fn with_stats(mut self, stats: StatFiles) -> Self {
        self.stats = stats;
        self
    }

    pub fn on_path(mut self, link: impl Into<String>) -> Self {
        self.path = Some(link.into());
        self
    }

    pub fn with_fec(mut self, title: impl Into<String>) -> Self {
        self.plot_fec = true;
        self.fec_title = Some(title.into());
        self
    }

    pub fn start_delay(&self) -> Duration {
        self.flow.start_delay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{
        Algorithm, Codec, MprtpReceiver, MprtpSender, ReceiverSubflow, SenderSubflow, TcpClient,
        TcpServer,
    };

    fn server() -> TcpServer {
        TcpServer {
            name: "tcpserver".into(),
            ip: "10.0.0.6".into(),
            port: 12345,
            log_file: PathBuf::from("tcpserver.log"),
        }
    }

    #[test]
    fn flow_defaults_and_builders() {
        let srv = server();
        let client = TcpClient::connect_to("tcpclient", &srv, None, "tcpclient.log");
        let flow = Flow::new(
            "tcp",
            Some(TrafficUnit::TcpClient(client)),
            Some(TrafficUnit::TcpServer(srv)),
        )
        .unwrap()
        .with_start_delay(Duration::from_secs(30))
        .with_pcap_file("veth2.pcap");
        assert_eq!(flow.start_delay(), Duration::from_secs(30));
        assert_eq!(flow.sink_to_source_delay(), Duration::ZERO);
        assert!(!flow.is_flipped());
        assert_eq!(
            flow.log_files(),
            vec![Path::new("tcpclient.log"), Path::new("tcpserver.log")]
        );
        assert_eq!(flow.pcap_files(), &[PathBuf::from("veth2.pcap")]);
    }

    #[test]
    fn absent_sink_is_valid() {
        let client = TcpClient::connect_to("tcpclient2", &server(), None, "c2.log");
        let flow = Flow::new("tcp2", Some(TrafficUnit::TcpClient(client)), None).unwrap();
        assert!(flow.sink().is_none());
        assert_eq!(flow.log_files().len(), 1);
    }

    #[test]
    fn multipath_pair_must_agree_on_subflows() {
        let sender = MprtpSender {
            name: "mprtpsender".into(),
            bin_dir: PathBuf::from("./"),
            codec: Codec::Vp8,
            algorithm: Algorithm::Fractal,
            subflows: vec![
                SenderSubflow {
                    rtp_ip: "10.0.0.6".into(),
                    rtp_port: 5000,
                    rtcp_port: 5001,
                },
                SenderSubflow {
                    rtp_ip: "10.0.1.6".into(),
                    rtp_port: 5002,
                    rtcp_port: 5003,
                },
            ],
            snd_stat: None,
            source_type: "TESTSRC".into(),
            ext_header_id: 0,
            log_file: PathBuf::from("snd.log"),
        };
        let receiver = MprtpReceiver {
            name: "mprtpreceiver".into(),
            bin_dir: PathBuf::from("./"),
            codec: Codec::Vp8,
            algorithm: Algorithm::Fractal,
            subflows: vec![ReceiverSubflow {
                rtp_port: 5000,
                rtcp_ip: "10.0.0.1".into(),
                rtcp_port: 5001,
            }],
            rcv_stat: None,
            ply_stat: None,
            sink_type: "FAKESINK".into(),
            ext_header_id: 0,
            log_file: PathBuf::from("rcv.log"),
        };
        let err = Flow::new(
            "mprtp",
            Some(TrafficUnit::MprtpSender(sender)),
            Some(TrafficUnit::MprtpReceiver(receiver)),
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::SubflowMismatch(2, 1)));
    }

    #[test]
    fn description_slots_start_empty() {
        let flow = Arc::new(Flow::new("empty", None, None).unwrap());
        let desc = FlowDescription::new(1, "FRACTaL", flow).with_fec("FEC");
        assert!(desc.plot_fec);
        assert!(desc.evaluation.is_none());
        assert!(desc.source_files.is_empty());
        assert_eq!(desc.start_delay(), Duration::ZERO);
    }
}
