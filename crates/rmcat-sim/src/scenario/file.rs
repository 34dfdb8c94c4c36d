use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use super::{RtpEndpoints, Scenario, ScenarioParams};
use crate::error::ScenarioError;
use crate::flow::FlowDescription;
use crate::path::{PathConfig, StageDescriptor, MAX_STAGE_SECS};

const DEFAULT_NAME: &str = "custom";
const DEFAULT_LINK: &str = "veth2";
const BASE_PORT: u16 = 5000;

/// Longest scenario or link schedule a file may declare, one week.
pub const MAX_SCENARIO_SECS: u64 = 7 * 86_400;

/// RTP port of flow `idx` (zero based) plus `offset`, if it fits.
fn default_port(idx: usize, offset: u16) -> Option<u16> {
    u16::try_from(idx)
        .ok()
        .and_then(|i| i.checked_mul(2))
        .and_then(|o| BASE_PORT.checked_add(o))
        .and_then(|p| p.checked_add(offset))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioFileInput {
    pub name: Option<String>,
    pub duration: Option<u64>,
    pub flows: Vec<FlowInput>,
    pub links: Vec<LinkInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FlowInput {
    pub title: Option<String>,
    pub rtp_ip: Option<String>,
    pub rtp_port: Option<u16>,
    pub rtcp_ip: Option<String>,
    pub rtcp_port: Option<u16>,
    pub start_delay: u64,
    pub flipped: bool,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkInput {
    pub name: String,
    pub stages: Vec<StageInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StageInput {
    pub duration: u64,
    pub bandwidth: u64,
    pub latency: Option<u32>,
    pub jitter: Option<u32>,
}

/// RTP flow declared in a scenario file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFlow {
    pub title: Option<String>,
    pub endpoints: RtpEndpoints,
    pub start_delay: Duration,
    pub flipped: bool,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLink {
    pub name: String,
    pub stages: Vec<FileStage>,
}

/// Stage whose latency and jitter fall back to the run's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStage {
    pub duration_secs: u64,
    pub bandwidth_kbit: u64,
    pub latency_ms: Option<u32>,
    pub jitter_ms: Option<u32>,
}

/// A validated scenario file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioFile {
    pub name: String,
    pub duration_secs: u64,
    pub flows: Vec<FileFlow>,
    pub links: Vec<FileLink>,
}

impl ScenarioFileInput {
    pub fn resolve(self) -> Result<ScenarioFile, ScenarioError> {
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_NAME.to_string());
        if self.flows.is_empty() {
            return Err(ScenarioError::NoFlows(name));
        }

        let mut links = Vec::with_capacity(self.links.len());
        let mut link_names = HashSet::new();
        for (idx, link) in self.links.into_iter().enumerate() {
            let link_name = match link.name.trim() {
                "" => format!("link{idx}"),
                trimmed => trimmed.to_string(),
            };
            if !link_names.insert(link_name.clone()) {
                return Err(ScenarioError::DuplicateLink(link_name));
            }
            let mut stages = Vec::with_capacity(link.stages.len());
            let mut total: u64 = 0;
            for (index, stage) in link.stages.into_iter().enumerate() {
                if stage.bandwidth == 0 {
                    return Err(ScenarioError::ZeroBandwidth {
                        link: link_name,
                        index,
                    });
                }
                if stage.duration > MAX_STAGE_SECS {
                    return Err(ScenarioError::StageTooLong {
                        link: link_name,
                        index,
                        secs: stage.duration,
                        max: MAX_STAGE_SECS,
                    });
                }
                total = total.saturating_add(stage.duration);
                if total > MAX_SCENARIO_SECS {
                    return Err(ScenarioError::ScheduleTooLong {
                        name: link_name,
                        secs: total,
                        max: MAX_SCENARIO_SECS,
                    });
                }
                stages.push(FileStage {
                    duration_secs: stage.duration,
                    bandwidth_kbit: stage.bandwidth,
                    latency_ms: stage.latency,
                    jitter_ms: stage.jitter,
                });
            }
            links.push(FileLink {
                name: link_name,
                stages,
            });
        }

        let mut flows = Vec::with_capacity(self.flows.len());
        for (idx, flow) in self.flows.into_iter().enumerate() {
            let link = flow.link.unwrap_or_else(|| DEFAULT_LINK.to_string());
            if !link_names.contains(&link) {
                return Err(ScenarioError::UnknownLink { flow: idx, link });
            }
            let rtp_port = match flow.rtp_port {
                Some(port) => port,
                None => default_port(idx, 0).ok_or(ScenarioError::PortOverflow(idx))?,
            };
            let rtcp_port = match flow.rtcp_port {
                Some(port) => port,
                None => default_port(idx, 1).ok_or(ScenarioError::PortOverflow(idx))?,
            };
            flows.push(FileFlow {
                title: flow.title,
                endpoints: RtpEndpoints::new(
                    flow.rtp_ip.as_deref().unwrap_or("10.0.0.6"),
                    rtp_port,
                    flow.rtcp_ip.as_deref().unwrap_or("10.0.0.1"),
                    rtcp_port,
                ),
                start_delay: Duration::from_secs(flow.start_delay),
                flipped: flow.flipped,
                link,
            });
        }

        // Without an explicit duration the longest schedule decides.
        let duration_secs = self.duration.filter(|&d| d > 0).unwrap_or_else(|| {
            links
                .iter()
                .map(|l| l.stages.iter().map(|s| s.duration_secs).sum())
                .max()
                .unwrap_or(0)
        });
        if duration_secs > MAX_SCENARIO_SECS {
            return Err(ScenarioError::ScheduleTooLong {
                name,
                secs: duration_secs,
                max: MAX_SCENARIO_SECS,
            });
        }

        Ok(ScenarioFile {
            name,
            duration_secs,
            flows,
            links,
        })
    }
}

impl ScenarioFile {
    pub fn from_toml_str(input: &str) -> Result<Self, ScenarioError> {
        let parsed: ScenarioFileInput =
            toml::from_str(input).map_err(|e| ScenarioError::InvalidFile(e.to_string()))?;
        parsed.resolve()
    }

    /// Builds the scenario, using `params` for everything the file leaves
    /// out.
    pub fn build(&self, params: &ScenarioParams) -> Result<Scenario, ScenarioError> {
        let mut scenario = Scenario::new(self.name.clone(), self.duration_secs, params.clone());
        let total = self.flows.len() as u32;
        for (idx, entry) in self.flows.iter().enumerate() {
            let index = idx as u32 + 1;
            let flow = params
                .rtp_flow(index, &entry.endpoints)?
                .with_start_delay(entry.start_delay)
                .flipped(entry.flipped);
            let flow = if params.capture {
                flow.with_pcap_file(params.pcap_file(&entry.link))
            } else {
                flow
            };
            let flow = scenario.add_flow(flow);
            let title = entry
                .title
                .clone()
                .unwrap_or_else(|| params.media_title(index, total));
            scenario.describe(
                FlowDescription::new(index, title, flow)
                    .with_stats(params.media_stats(index))
                    .on_path(entry.link.clone()),
            );
        }
        for link in &self.links {
            let stages = link
                .stages
                .iter()
                .map(|s| {
                    StageDescriptor::new(
                        s.duration_secs,
                        PathConfig::new(
                            s.bandwidth_kbit,
                            s.latency_ms.unwrap_or(params.latency_ms),
                            s.jitter_ms.unwrap_or(params.jitter_ms),
                        ),
                    )
                })
                .collect();
            scenario.add_link(&link.name, stages);
        }
        scenario.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scenario_file_basic() {
        let toml = r#"
            name = "steps"

            [[flows]]
            title = "probe"

            [[flows]]
            start_delay = 15
            rtp_port = 6000
            link = "veth6"

            [[links]]
            name = "veth2"
            [[links.stages]]
            duration = 30
            bandwidth = 1500
            [[links.stages]]
            duration = 30
            bandwidth = 500
            latency = 100

            [[links]]
            name = "veth6"
            [[links.stages]]
            duration = 45
            bandwidth = 800
        "#;

        let file = ScenarioFile::from_toml_str(toml).unwrap();
        assert_eq!(file.name, "steps");
        assert_eq!(file.duration_secs, 60);
        assert_eq!(file.flows[0].endpoints.rtp_port, 5000);
        assert_eq!(file.flows[1].endpoints.rtp_port, 6000);
        assert_eq!(file.flows[1].endpoints.rtcp_port, 5003);
        assert_eq!(file.flows[1].start_delay, Duration::from_secs(15));

        let scenario = file.build(&ScenarioParams::default()).unwrap();
        assert_eq!(scenario.flows().len(), 2);
        assert_eq!(scenario.descriptions()[0].title, "probe");
        assert_eq!(scenario.descriptions()[1].title, "FRACTaL 2");
        let bw = scenario.bandwidths("veth2").unwrap();
        assert_eq!((bw.len(), bw[0], bw[59]), (60, 1500, 500));

        let controllers = scenario.path_controllers();
        let stage = controllers[0].stages().unwrap().iter().nth(1).unwrap();
        assert_eq!(stage.config().latency_ms(), 100);
        assert_eq!(stage.config().jitter_ms(), 0);
    }

    #[test]
    fn zero_bandwidth_is_rejected() {
        let toml = r#"
            [[flows]]
            [[links]]
            name = "veth2"
            [[links.stages]]
            duration = 10
            bandwidth = 0
        "#;
        let err = ScenarioFile::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ScenarioError::ZeroBandwidth { index: 0, .. }));
    }

    #[test]
    fn file_without_flows_is_rejected() {
        assert!(matches!(
            ScenarioFile::from_toml_str("name = \"idle\""),
            Err(ScenarioError::NoFlows(name)) if name == "idle"
        ));
        assert!(matches!(
            ScenarioFile::from_toml_str("flows = 3"),
            Err(ScenarioError::InvalidFile(_))
        ));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let stage = r#"
            [[flows]]
            [[links]]
            name = "veth2"
            [[links.stages]]
            duration = 100000000000
            bandwidth = 1000
        "#;
        assert!(matches!(
            ScenarioFile::from_toml_str(stage),
            Err(ScenarioError::StageTooLong { index: 0, secs: 100_000_000_000, .. })
        ));

        let mut many = String::from("[[flows]]\n[[links]]\nname = \"veth2\"\n");
        for _ in 0..8 {
            many.push_str("[[links.stages]]\nduration = 86400\nbandwidth = 1000\n");
        }
        assert!(matches!(
            ScenarioFile::from_toml_str(&many),
            Err(ScenarioError::ScheduleTooLong { name, .. }) if name == "veth2"
        ));

        let explicit = "duration = 99999999999\n[[flows]]\n[[links]]\nname = \"veth2\"";
        assert!(matches!(
            ScenarioFile::from_toml_str(explicit),
            Err(ScenarioError::ScheduleTooLong { name, .. }) if name == "custom"
        ));
    }

    #[test]
    fn flow_on_undeclared_link_is_rejected() {
        let toml = r#"
            [[flows]]
            link = "veth9"
            [[links]]
            name = "veth2"
            [[links.stages]]
            duration = 10
            bandwidth = 1000
        "#;
        assert!(matches!(
            ScenarioFile::from_toml_str(toml),
            Err(ScenarioError::UnknownLink { flow: 0, link }) if link == "veth9"
        ));
    }

    #[test]
    fn duplicate_link_is_rejected() {
        let toml = r#"
            [[flows]]
            [[links]]
            name = "veth2"
            [[links]]
            name = " veth2 "
        "#;
        assert!(matches!(
            ScenarioFile::from_toml_str(toml),
            Err(ScenarioError::DuplicateLink(name)) if name == "veth2"
        ));
    }

    #[test]
    fn default_ports_stop_at_u16_range() {
        assert_eq!(default_port(0, 1), Some(5001));
        assert_eq!(default_port(30_266, 1), Some(65_533));
        assert_eq!(default_port(30_267, 1), Some(65_535));
        assert_eq!(default_port(30_268, 0), None);
        assert_eq!(default_port(70_000, 0), None);

        let mut toml = String::from("[[links]]\nname = \"veth2\"\n");
        for _ in 0..30_300 {
            toml.push_str("[[flows]]\n");
        }
        assert!(matches!(
            ScenarioFile::from_toml_str(&toml),
            Err(ScenarioError::PortOverflow(30_268))
        ));
    }
}
