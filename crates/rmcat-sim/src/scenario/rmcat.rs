//! # Built-in Test Cases
//!
//! Topologies of the RMCAT evaluation test cases and the multipath tests.
//! Addresses follow the three-namespace testbed: the sender side is
//! `10.0.0.1`/`10.0.1.1`, the receiver side `10.0.0.6`/`10.0.1.6`, the
//! forward links are `veth2` and `veth6`, the backward link is `veth1`.

use std::sync::Arc;
use std::time::Duration;

use super::{RandomWalkConfig, RtpEndpoints, Scenario, ScenarioParams};
use crate::error::ScenarioError;
use crate::flow::{Flow, FlowDescription, DEFAULT_SINK_TO_SOURCE_DELAY};
use crate::units::{
    Algorithm, MprtpReceiver, MprtpSender, ReceiverSubflow, SenderSubflow, TcpClient, TcpServer, TrafficUnit,
};

const FORWARD: &str = "veth2";
const FORWARD_2: &str = "veth6";
const BACKWARD: &str = "veth1";

const SENDER_IP: &str = "10.0.0.1";
const RECEIVER_IP: &str = "10.0.0.6";
const SENDER_IP_2: &str = "10.0.1.1";
const RECEIVER_IP_2: &str = "10.0.1.6";

const TCP_PORT: u16 = 12345;

fn forward_endpoints(index: u32) -> RtpEndpoints {
    let base = 5000 + 2 * (index as u16 - 1);
    RtpEndpoints::new(RECEIVER_IP, base, SENDER_IP, base + 1)
}

impl ScenarioParams {
    fn on_link(&self, flow: Flow, link: &str) -> Flow {
        if self.capture {
            flow.with_pcap_file(self.pcap_file(link))
        } else {
            flow
        }
    }

    fn media_description(
        &self,
        index: u32,
        title: String,
        flow: Arc<Flow>,
        link: &str,
    ) -> FlowDescription {
        let desc = FlowDescription::new(index, title.clone(), flow)
            .with_stats(self.media_stats(index))
            .on_path(link);
        match self.algorithm {
            Algorithm::Fractal => desc.with_fec(format!("{title} + FEC")),
            Algorithm::Scream => desc,
        }
    }

    fn tcp_server(&self, name: &str) -> TcpServer {
        TcpServer {
            name: name.to_string(),
            ip: RECEIVER_IP.to_string(),
            port: TCP_PORT,
            log_file: self.log_file(name),
        }
    }
}

/// Variable available capacity with a single flow.
pub fn rmcat1(params: &ScenarioParams) -> Result<Scenario, ScenarioError> {
    let mut scenario = Scenario::new("rmcat1", 100, params.clone());
    let flow = params.on_link(params.rtp_flow(1, &forward_endpoints(1))?, FORWARD);
    let flow = scenario.add_flow(flow);
    scenario.describe(params.media_description(1, params.media_title(1, 1), flow, FORWARD));
    scenario.add_link(
        FORWARD,
        vec![
            params.stage(20, 1000),
            params.stage(20, 2800),
            params.stage(20, 600),
            params.stage(40, 1000),
        ],
    );
    Ok(scenario)
}

/// Variable capacity in both directions, with a return-path flow.
pub fn rmcat2(params: &ScenarioParams) -> Result<Scenario, ScenarioError> {
    let mut scenario = Scenario::new("rmcat2", 100, params.clone());

    let forward = params.on_link(params.rtp_flow(1, &forward_endpoints(1))?, FORWARD);
    let forward = scenario.add_flow(forward);
    scenario.describe(params.media_description(
        1,
        format!("{} forward", params.algorithm),
        forward,
        FORWARD,
    ));

    // Sender lives on the receiver side and talks back to 10.0.0.1.
    let backward = params
        .rtp_flow(2, &RtpEndpoints::new(SENDER_IP, 5002, RECEIVER_IP, 5003))?
        .flipped(true);
    let backward = scenario.add_flow(params.on_link(backward, BACKWARD));
    scenario.describe(params.media_description(
        2,
        format!("{} backward", params.algorithm),
        backward,
        BACKWARD,
    ));

    scenario.add_link(
        FORWARD,
        vec![
            params.stage(25, 2000),
            params.stage(25, 1000),
            params.stage(25, 500),
            params.stage(25, 2000),
        ],
    );
    scenario.add_link(BACKWARD, vec![params.stage(35, 800), params.stage(65, 2000)]);
    Ok(scenario)
}

/// Congested bottleneck shared by three flows joining 10 s apart.
pub fn rmcat3(params: &ScenarioParams) -> Result<Scenario, ScenarioError> {
    let mut scenario = Scenario::new("rmcat3", 120, params.clone());
    for index in 1..=3u32 {
        let flow = params
            .rtp_flow(index, &forward_endpoints(index))?
            .with_start_delay(Duration::from_secs(10 * u64::from(index - 1)));
        let flow = scenario.add_flow(params.on_link(flow, FORWARD));
        scenario.describe(params.media_description(
            index,
            params.media_title(index, 3),
            flow,
            FORWARD,
        ));
    }
    scenario.add_link(FORWARD, vec![params.stage(120, 3500)]);
    Ok(scenario)
}

/// Media flow competing with a short TCP flow.
pub fn rmcat6(params: &ScenarioParams) -> Result<Scenario, ScenarioError> {
    let mut scenario = Scenario::new("rmcat6", 120, params.clone());
    let rtp = scenario.add_flow(params.on_link(
        params.rtp_flow(1, &forward_endpoints(1))?,
        FORWARD,
    ));

    let server = params.tcp_server("tcpserver");
    let client = TcpClient::connect_to("tcpclient", &server, Some(60), params.log_file("tcpclient"));
    let tcp_log = client.log_file.clone();
    let tcp = Flow::new(
        "tcp",
        Some(TrafficUnit::TcpClient(client)),
        Some(TrafficUnit::TcpServer(server)),
    )?
    .with_start_delay(Duration::from_secs(30))
    .with_sink_to_source_delay(DEFAULT_SINK_TO_SOURCE_DELAY);
    scenario.add_flow(params.on_link(tcp, FORWARD));

    let mut desc = params.media_description(1, params.media_title(1, 1), rtp, FORWARD);
    desc.stats.tcp = Some(tcp_log);
    scenario.describe(desc);
    scenario.add_link(FORWARD, vec![params.stage(120, 2000)]);
    Ok(scenario)
}

/// Media flow competing with two long TCP flows on one server.
pub fn rmcat7(params: &ScenarioParams) -> Result<Scenario, ScenarioError> {
    let mut scenario = Scenario::new("rmcat7", 300, params.clone());
    let rtp = scenario.add_flow(params.on_link(
        params.rtp_flow(1, &forward_endpoints(1))?,
        FORWARD,
    ));

    let server = params.tcp_server("tcpserver");
    let first = TcpClient::connect_to("tcpclient_1", &server, None, params.log_file("tcpclient_1"));
    let second = TcpClient::connect_to("tcpclient_2", &server, None, params.log_file("tcpclient_2"));
    let tcp_log = first.log_file.clone();

    let tcp1 = Flow::new(
        "tcp_1",
        Some(TrafficUnit::TcpClient(first)),
        Some(TrafficUnit::TcpServer(server)),
    )?
    .with_sink_to_source_delay(DEFAULT_SINK_TO_SOURCE_DELAY);
    scenario.add_flow(params.on_link(tcp1, FORWARD));

    // Reuses the first flow's server, so it has no sink of its own.
    let tcp2 = Flow::new("tcp_2", Some(TrafficUnit::TcpClient(second)), None)?
        .with_start_delay(Duration::from_secs(5));
    scenario.add_flow(params.on_link(tcp2, FORWARD));

    let mut desc = params.media_description(1, params.media_title(1, 1), rtp, FORWARD);
    desc.stats.tcp = Some(tcp_log);
    scenario.describe(desc);
    scenario.add_link(FORWARD, vec![params.stage(300, 3500)]);
    Ok(scenario)
}

/// One multipath flow over two independently shaped subflows.
pub fn mprtp1(params: &ScenarioParams) -> Result<Scenario, ScenarioError> {
    let mut scenario = Scenario::new("mprtp1", 120, params.clone());
    let stats = params.media_stats(1);

    let sender = MprtpSender {
        name: "mprtpsender_1".into(),
        bin_dir: params.bin_dir.clone(),
        codec: params.codec,
        algorithm: params.algorithm,
        subflows: vec![
            SenderSubflow {
                rtp_ip: RECEIVER_IP.into(),
                rtp_port: 5000,
                rtcp_port: 5001,
            },
            SenderSubflow {
                rtp_ip: RECEIVER_IP_2.into(),
                rtp_port: 5002,
                rtcp_port: 5003,
            },
        ],
        snd_stat: stats.sender.clone(),
        source_type: params.source_type.clone(),
        ext_header_id: params.ext_header_id,
        log_file: params.log_file("mprtpsender_1"),
    };
    let receiver = MprtpReceiver {
        name: "mprtpreceiver_1".into(),
        bin_dir: params.bin_dir.clone(),
        codec: params.codec,
        algorithm: params.algorithm,
        subflows: vec![
            ReceiverSubflow {
                rtp_port: 5000,
                rtcp_ip: SENDER_IP.into(),
                rtcp_port: 5001,
            },
            ReceiverSubflow {
                rtp_port: 5002,
                rtcp_ip: SENDER_IP_2.into(),
                rtcp_port: 5003,
            },
        ],
        rcv_stat: stats.receiver.clone(),
        ply_stat: stats.playout.clone(),
        sink_type: params.sink_type.clone(),
        ext_header_id: params.ext_header_id,
        log_file: params.log_file("mprtpreceiver_1"),
    };
    let flow = Flow::new(
        "mprtp_1",
        Some(TrafficUnit::MprtpSender(sender)),
        Some(TrafficUnit::MprtpReceiver(receiver)),
    )?
    .with_sink_to_source_delay(DEFAULT_SINK_TO_SOURCE_DELAY);
    let flow = params.on_link(params.on_link(flow, FORWARD), FORWARD_2);
    let flow = scenario.add_flow(flow);

    scenario.describe(
        FlowDescription::new(1, format!("{} MPRTP", params.algorithm), flow)
            .with_stats(stats)
            .on_path(FORWARD),
    );

    scenario.add_link(
        FORWARD,
        vec![
            params.stage(20, 1000),
            params.stage(20, 2800),
            params.stage(20, 600),
            params.stage(60, 1000),
        ],
    );
    scenario.add_link(
        FORWARD_2,
        vec![
            params.stage(30, 2000),
            params.stage(30, 1000),
            params.stage(30, 500),
            params.stage(30, 2000),
        ],
    );
    Ok(scenario)
}

/// Single flow over a seeded random-walk capacity.
pub fn random(params: &ScenarioParams) -> Result<Scenario, ScenarioError> {
    let walk = RandomWalkConfig {
        seed: params.seed,
        latency_ms: params.latency_ms,
        jitter_ms: params.jitter_ms,
        ..RandomWalkConfig::default()
    };
    let mut scenario = Scenario::new("random", walk.duration_secs, params.clone());
    let flow = scenario.add_flow(params.on_link(
        params.rtp_flow(1, &forward_endpoints(1))?,
        FORWARD,
    ));
    scenario.describe(params.media_description(1, params.media_title(1, 1), flow, FORWARD));
    scenario.add_link(FORWARD, walk.stages());
    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rmcat1_schedule() {
        let scenario = rmcat1(&ScenarioParams::default()).unwrap();
        assert_eq!(scenario.duration(), Duration::from_secs(100));
        let bw = scenario.bandwidths(FORWARD).unwrap();
        assert_eq!(bw.len(), 100);
        assert_eq!(bw[0], 1000);
        assert_eq!(bw[20], 2800);
        assert_eq!(bw[40], 600);
        assert_eq!(bw[99], 1000);

        let flow = &scenario.flows()[0];
        assert_eq!(flow.sink_to_source_delay(), Duration::from_secs(2));
        let desc = &scenario.descriptions()[0];
        assert_eq!(desc.title, "FRACTaL");
        assert!(desc.plot_fec);
        assert_eq!(desc.path.as_deref(), Some(FORWARD));
    }

    #[test]
    fn rmcat2_return_flow_is_flipped() {
        let scenario = rmcat2(&ScenarioParams::default()).unwrap();
        let flipped: Vec<bool> = scenario.flows().iter().map(|f| f.is_flipped()).collect();
        assert_eq!(flipped, vec![false, true]);
        assert_eq!(scenario.bandwidths(BACKWARD).unwrap().len(), 100);
    }

    #[test]
    fn rmcat3_staggers_flow_starts() {
        let scenario = rmcat3(&ScenarioParams::default()).unwrap();
        let delays: Vec<u64> = scenario
            .flows()
            .iter()
            .map(|f| f.start_delay().as_secs())
            .collect();
        assert_eq!(delays, vec![0, 10, 20]);
        assert_eq!(scenario.descriptions()[2].title, "FRACTaL 3");
    }

    #[test]
    fn rmcat7_second_tcp_flow_has_no_sink() {
        let scenario = rmcat7(&ScenarioParams::default()).unwrap();
        assert_eq!(scenario.flows().len(), 3);
        assert!(scenario.flows()[2].sink().is_none());
        assert!(scenario.descriptions()[0].stats.tcp.is_some());
    }

    #[test]
    fn mprtp_needs_fractal() {
        let params = ScenarioParams {
            algorithm: Algorithm::Scream,
            ..ScenarioParams::default()
        };
        assert!(matches!(
            mprtp1(&params),
            Err(ScenarioError::UnsupportedAlgorithm { .. })
        ));
        let scenario = mprtp1(&ScenarioParams::default()).unwrap();
        assert_eq!(scenario.link_names().collect::<Vec<_>>(), vec![FORWARD, FORWARD_2]);
    }

    #[test]
    fn random_depends_on_seed() {
        let a = random(&ScenarioParams::default()).unwrap();
        let b = random(&ScenarioParams {
            seed: 1,
            ..ScenarioParams::default()
        })
        .unwrap();
        assert_eq!(a.bandwidths(FORWARD).unwrap().len(), 120);
        assert_ne!(a.bandwidths(FORWARD), b.bandwidths(FORWARD));
    }
}
