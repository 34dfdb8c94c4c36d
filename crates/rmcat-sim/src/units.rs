//! Traffic units: the processes at either end of a flow.
//!
//! A unit only describes how it is started and stopped. Running the
//! resulting [`ShellCommand`]s is the testbed's job.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::command::ShellCommand;
use crate::error::ScenarioError;

pub const SENDER_PROGRAM: &str = "snd_pipeline";
pub const RECEIVER_PROGRAM: &str = "rcv_pipeline";
pub const TCP_PROGRAM: &str = "iperf";

/// Congestion control algorithm driven by the media pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Fractal,
    Scream,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Fractal => "FRACTaL",
            Algorithm::Scream => "SCReAM",
        }
    }
}

impl FromStr for Algorithm {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fractal" => Ok(Algorithm::Fractal),
            "scream" => Ok(Algorithm::Scream),
            _ => Err(ScenarioError::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Codec {
    #[default]
    Vp8,
}

impl Codec {
    pub fn name(self) -> &'static str {
        match self {
            Codec::Vp8 => "VP8",
        }
    }
}

impl FromStr for Codec {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vp8" => Ok(Codec::Vp8),
            _ => Err(ScenarioError::UnknownCodec(s.to_string())),
        }
    }
}

/// Media sender over a single RTP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpSender {
    pub name: String,
    pub bin_dir: PathBuf,
    pub codec: Codec,
    pub algorithm: Algorithm,
    pub rtp_ip: String,
    pub rtp_port: u16,
    pub rtcp_port: u16,
    pub snd_stat: Option<PathBuf>,
    pub source_type: String,
    pub ext_header_id: u8,
    pub log_file: PathBuf,
}

/// Media receiver over a single RTP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpReceiver {
    pub name: String,
    pub bin_dir: PathBuf,
    pub codec: Codec,
    pub algorithm: Algorithm,
    pub rtp_port: u16,
    pub rtcp_ip: String,
    pub rtcp_port: u16,
    pub rcv_stat: Option<PathBuf>,
    pub ply_stat: Option<PathBuf>,
    pub sink_type: String,
    pub ext_header_id: u8,
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderSubflow {
    pub rtp_ip: String,
    pub rtp_port: u16,
    pub rtcp_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverSubflow {
    pub rtp_port: u16,
    pub rtcp_ip: String,
    pub rtcp_port: u16,
}

/// Multipath media sender, one entry per subflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MprtpSender {
    pub name: String,
    pub bin_dir: PathBuf,
    pub codec: Codec,
    pub algorithm: Algorithm,
    pub subflows: Vec<SenderSubflow>,
    pub snd_stat: Option<PathBuf>,
    pub source_type: String,
    pub ext_header_id: u8,
    pub log_file: PathBuf,
}

/// Multipath media receiver, one entry per subflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MprtpReceiver {
    pub name: String,
    pub bin_dir: PathBuf,
    pub codec: Codec,
    pub algorithm: Algorithm,
    pub subflows: Vec<ReceiverSubflow>,
    pub rcv_stat: Option<PathBuf>,
    pub ply_stat: Option<PathBuf>,
    pub sink_type: String,
    pub ext_header_id: u8,
    pub log_file: PathBuf,
}

/// `iperf` server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpServer {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub log_file: PathBuf,
}

/// `iperf` client; runs for `duration_secs` when set, otherwise until stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpClient {
    pub name: String,
    pub server_ip: String,
    pub server_port: u16,
    pub duration_secs: Option<u64>,
    pub log_file: PathBuf,
}

impl TcpClient {
    /// Client connecting to `server`.
    pub fn connect_to(
        name: impl Into<String>,
        server: &TcpServer,
        duration_secs: Option<u64>,
        log_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            server_ip: server.ip.clone(),
            server_port: server.port,
            duration_secs,
            log_file: log_file.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficUnit {
    RtpSender(RtpSender),
    RtpReceiver(RtpReceiver),
    MprtpSender(MprtpSender),
    MprtpReceiver(MprtpReceiver),
    TcpClient(TcpClient),
    TcpServer(TcpServer),
}

impl TrafficUnit {
    pub fn name(&self) -> &str {
        match self {
            TrafficUnit::RtpSender(u) => &u.name,
            TrafficUnit::RtpReceiver(u) => &u.name,
            TrafficUnit::MprtpSender(u) => &u.name,
            TrafficUnit::MprtpReceiver(u) => &u.name,
            TrafficUnit::TcpClient(u) => &u.name,
            TrafficUnit::TcpServer(u) => &u.name,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            TrafficUnit::RtpSender(_) => "RTP sender",
            TrafficUnit::RtpReceiver(_) => "RTP receiver",
            TrafficUnit::MprtpSender(_) => "MPRTP sender",
            TrafficUnit::MprtpReceiver(_) => "MPRTP receiver",
            TrafficUnit::TcpClient(_) => "TCP client",
            TrafficUnit::TcpServer(_) => "TCP server",
        }
    }

    /// Where the unit's process output is captured.
    pub fn log_file(&self) -> &Path {
        match self {
            TrafficUnit::RtpSender(u) => &u.log_file,
            TrafficUnit::RtpReceiver(u) => &u.log_file,
            TrafficUnit::MprtpSender(u) => &u.log_file,
            TrafficUnit::MprtpReceiver(u) => &u.log_file,
            TrafficUnit::TcpClient(u) => &u.log_file,
            TrafficUnit::TcpServer(u) => &u.log_file,
        }
    }

    /// Program name used by the stop command.
    pub fn program(&self) -> &'static str {
        match self {
            TrafficUnit::RtpSender(_) | TrafficUnit::MprtpSender(_) => SENDER_PROGRAM,
            TrafficUnit::RtpReceiver(_) | TrafficUnit::MprtpReceiver(_) => RECEIVER_PROGRAM,
            TrafficUnit::TcpClient(_) | TrafficUnit::TcpServer(_) => TCP_PROGRAM,
        }
    }

    /// Rejects unit configurations the media pipelines cannot run.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let algorithm = match self {
            TrafficUnit::MprtpSender(u) => {
                if u.subflows.is_empty() {
                    return Err(ScenarioError::NoSubflows);
                }
                u.algorithm
            }
            TrafficUnit::MprtpReceiver(u) => {
                if u.subflows.is_empty() {
                    return Err(ScenarioError::NoSubflows);
                }
                u.algorithm
            }
            _ => return Ok(()),
        };
        if algorithm != Algorithm::Fractal {
            return Err(ScenarioError::UnsupportedAlgorithm {
                unit: self.kind(),
                algorithm: algorithm.name(),
            });
        }
        Ok(())
    }

    pub fn start_cmd(&self) -> ShellCommand {
        let line = match self {
            TrafficUnit::RtpSender(u) => rtp_sender_line(u),
            TrafficUnit::RtpReceiver(u) => rtp_receiver_line(u),
            TrafficUnit::MprtpSender(u) => mprtp_sender_line(u),
            TrafficUnit::MprtpReceiver(u) => mprtp_receiver_line(u),
            TrafficUnit::TcpServer(u) => format!("{TCP_PROGRAM} -s -p {}", u.port),
            TrafficUnit::TcpClient(u) => {
                let mut args = vec![
                    TCP_PROGRAM.to_string(),
                    format!("-c {}", u.server_ip),
                    format!("-p {}", u.server_port),
                ];
                if let Some(secs) = u.duration_secs.filter(|&s| s > 0) {
                    args.push(format!("-t {secs}"));
                }
                args.join(" ")
            }
        };
        ShellCommand::new(line).with_log_file(self.log_file())
    }

    pub fn stop_cmd(&self) -> ShellCommand {
        ShellCommand::new(format!("pkill {}", self.program()))
    }
}

impl fmt::Display for TrafficUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}

fn program_path(bin_dir: &Path, program: &str) -> String {
    bin_dir.join(program).display().to_string()
}

fn stat_arg(flag: &str, stat: Option<&PathBuf>, ext_header_id: u8) -> Option<String> {
    stat.map(|path| format!("--{flag}={}:{ext_header_id}", path.display()))
}

fn rtp_sender_line(u: &RtpSender) -> String {
    let mut args = vec![
        program_path(&u.bin_dir, SENDER_PROGRAM),
        format!("--codec={}", u.codec.name()),
    ];
    match u.algorithm {
        Algorithm::Fractal => {
            args.push(format!("--sender=MPRTP:1:1:{}:{}", u.rtp_ip, u.rtp_port));
            args.push(format!("--scheduler=MPRTPFRACTAL:MPRTP:1:1:{}", u.rtcp_port));
        }
        Algorithm::Scream => {
            args.push(format!("--sender=RTP:{}:{}", u.rtp_ip, u.rtp_port));
            args.push(format!("--scheduler=SCREAM:RTP:{}", u.rtcp_port));
        }
    }
    args.extend(stat_arg("stat", u.snd_stat.as_ref(), u.ext_header_id));
    args.push(format!("--source={}", u.source_type));
    args.join(" ")
}

fn rtp_receiver_line(u: &RtpReceiver) -> String {
    let mut args = vec![
        program_path(&u.bin_dir, RECEIVER_PROGRAM),
        format!("--codec={}", u.codec.name()),
    ];
    match u.algorithm {
        Algorithm::Fractal => {
            args.push(format!("--receiver=MPRTP:1:1:{}", u.rtp_port));
            args.push(format!(
                "--playouter=MPRTPFRACTAL:MPRTP:1:1:{}:{}",
                u.rtcp_ip, u.rtcp_port
            ));
        }
        Algorithm::Scream => {
            args.push(format!("--receiver=RTP:{}", u.rtp_port));
            args.push(format!("--playouter=SCREAM:RTP:{}:{}", u.rtcp_ip, u.rtcp_port));
        }
    }
    args.extend(stat_arg("stat", u.rcv_stat.as_ref(), u.ext_header_id));
    args.extend(stat_arg("plystat", u.ply_stat.as_ref(), u.ext_header_id));
    args.push(format!("--sink={}", u.sink_type));
    args.join(" ")
}

fn mprtp_sender_line(u: &MprtpSender) -> String {
    let n = u.subflows.len();
    let mut sender = format!("--sender=MPRTP:{n}");
    let mut scheduler = format!("--scheduler=MPRTPFRACTAL:MPRTP:{n}");
    for (idx, sub) in u.subflows.iter().enumerate() {
        let id = idx + 1;
        sender.push_str(&format!(":{id}:{}:{}", sub.rtp_ip, sub.rtp_port));
        scheduler.push_str(&format!(":{id}:{}", sub.rtcp_port));
    }
    let mut args = vec![
        program_path(&u.bin_dir, SENDER_PROGRAM),
        format!("--codec={}", u.codec.name()),
        sender,
        scheduler,
    ];
    args.extend(stat_arg("stat", u.snd_stat.as_ref(), u.ext_header_id));
    args.push(format!("--source={}", u.source_type));
    args.join(" ")
}

fn mprtp_receiver_line(u: &MprtpReceiver) -> String {
    let n = u.subflows.len();
    let mut receiver = format!("--receiver=MPRTP:{n}");
    let mut playouter = format!("--playouter=MPRTPFRACTAL:MPRTP:{n}");
    for (idx, sub) in u.subflows.iter().enumerate() {
        let id = idx + 1;
        receiver.push_str(&format!(":{id}:{}", sub.rtp_port));
        playouter.push_str(&format!(":{id}:{}:{}", sub.rtcp_ip, sub.rtcp_port));
    }
    let mut args = vec![
        program_path(&u.bin_dir, RECEIVER_PROGRAM),
        format!("--codec={}", u.codec.name()),
        receiver,
        playouter,
    ];
    args.extend(stat_arg("stat", u.rcv_stat.as_ref(), u.ext_header_id));
    args.extend(stat_arg("plystat", u.ply_stat.as_ref(), u.ext_header_id));
    args.push(format!("--sink={}", u.sink_type));
    args.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(algorithm: Algorithm) -> RtpSender {
        RtpSender {
            name: "rtpsender".into(),
            bin_dir: PathBuf::from("./"),
            codec: Codec::Vp8,
            algorithm,
            rtp_ip: "10.0.0.6".into(),
            rtp_port: 5000,
            rtcp_port: 5001,
            snd_stat: Some(PathBuf::from("temp/snd_packets_1.csv")),
            source_type: "FILE:foreman_cif.yuv:1:352:288:2:25/1".into(),
            ext_header_id: 3,
            log_file: PathBuf::from("temp/rtpsender.log"),
        }
    }

    #[test]
    fn fractal_sender_uses_single_subflow_mprtp() {
        let cmd = TrafficUnit::RtpSender(sender(Algorithm::Fractal)).start_cmd();
        assert_eq!(
            cmd.line(),
            "./snd_pipeline --codec=VP8 --sender=MPRTP:1:1:10.0.0.6:5000 \
             --scheduler=MPRTPFRACTAL:MPRTP:1:1:5001 --stat=temp/snd_packets_1.csv:3 \
             --source=FILE:foreman_cif.yuv:1:352:288:2:25/1"
        );
        assert_eq!(cmd.log_file(), Some(Path::new("temp/rtpsender.log")));
    }

    #[test]
    fn scream_receiver_uses_plain_rtp() {
        let unit = TrafficUnit::RtpReceiver(RtpReceiver {
            name: "rtpreceiver".into(),
            bin_dir: PathBuf::from("/opt/bin"),
            codec: Codec::Vp8,
            algorithm: Algorithm::Scream,
            rtp_port: 5000,
            rtcp_ip: "10.0.0.1".into(),
            rtcp_port: 5001,
            rcv_stat: None,
            ply_stat: Some(PathBuf::from("ply.csv")),
            sink_type: "FAKESINK".into(),
            ext_header_id: 0,
            log_file: PathBuf::from("rcv.log"),
        });
        assert_eq!(
            unit.start_cmd().line(),
            "/opt/bin/rcv_pipeline --codec=VP8 --receiver=RTP:5000 \
             --playouter=SCREAM:RTP:10.0.0.1:5001 --plystat=ply.csv:0 --sink=FAKESINK"
        );
        assert_eq!(unit.stop_cmd().line(), "pkill rcv_pipeline");
    }

    #[test]
    fn mprtp_sender_lists_every_subflow() {
        let unit = TrafficUnit::MprtpSender(MprtpSender {
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
            log_file: PathBuf::from("mp.log"),
        });
        unit.validate().unwrap();
        let line = unit.start_cmd().line().to_string();
        assert!(line.contains("--sender=MPRTP:2:1:10.0.0.6:5000:2:10.0.1.6:5002"));
        assert!(line.contains("--scheduler=MPRTPFRACTAL:MPRTP:2:1:5001:2:5003"));
    }

    #[test]
    fn mprtp_rejects_scream_and_empty_subflows() {
        let mut receiver = MprtpReceiver {
            name: "mprtpreceiver".into(),
            bin_dir: PathBuf::from("./"),
            codec: Codec::Vp8,
            algorithm: Algorithm::Scream,
            subflows: vec![ReceiverSubflow {
                rtp_port: 5000,
                rtcp_ip: "10.0.0.1".into(),
                rtcp_port: 5001,
            }],
            rcv_stat: None,
            ply_stat: None,
            sink_type: "FAKESINK".into(),
            ext_header_id: 0,
            log_file: PathBuf::from("mp.log"),
        };
        assert!(matches!(
            TrafficUnit::MprtpReceiver(receiver.clone()).validate(),
            Err(ScenarioError::UnsupportedAlgorithm { .. })
        ));
        receiver.algorithm = Algorithm::Fractal;
        receiver.subflows.clear();
        assert!(matches!(
            TrafficUnit::MprtpReceiver(receiver).validate(),
            Err(ScenarioError::NoSubflows)
        ));
    }

    #[test]
    fn tcp_units() {
        let server = TcpServer {
            name: "tcpserver".into(),
            ip: "10.0.0.6".into(),
            port: 12345,
            log_file: PathBuf::from("tcpserver.log"),
        };
        let client = TcpClient::connect_to("tcpclient", &server, Some(30), "tcpclient.log");
        assert_eq!(
            TrafficUnit::TcpServer(server).start_cmd().line(),
            "iperf -s -p 12345"
        );
        let client = TrafficUnit::TcpClient(client);
        assert_eq!(client.start_cmd().line(), "iperf -c 10.0.0.6 -p 12345 -t 30");
        assert_eq!(client.stop_cmd().line(), "pkill iperf");
    }

    #[test]
    fn parse_algorithm_and_codec() {
        assert_eq!("FRACTaL".parse::<Algorithm>().unwrap(), Algorithm::Fractal);
        assert_eq!("scream".parse::<Algorithm>().unwrap(), Algorithm::Scream);
        assert!(matches!(
            "gcc".parse::<Algorithm>(),
            Err(ScenarioError::UnknownAlgorithm(_))
        ));
        assert_eq!("vp8".parse::<Codec>().unwrap(), Codec::Vp8);
        assert!("h264".parse::<Codec>().is_err());
    }
}
