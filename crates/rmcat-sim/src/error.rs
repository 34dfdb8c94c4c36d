use thiserror::Error;

// ── Scenario construction ───────────────────────────────────────────

/// Errors raised while building a scenario.
///
/// All of these surface before any controller is started, so a failing
/// scenario never launches a single process.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
    #[error("unknown congestion control algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("unknown codec: {0}")]
    UnknownCodec(String),
    #[error("{unit} does not support the {algorithm} algorithm")]
    UnsupportedAlgorithm {
        unit: &'static str,
        algorithm: &'static str,
    },
    #[error("multipath unit needs at least one subflow")]
    NoSubflows,
    #[error("subflow lists differ in length ({0} vs {1})")]
    SubflowMismatch(usize, usize),
    #[error("scenario {0} declares no flows")]
    NoFlows(String),
    #[error("stage {index} of link {link} has zero bandwidth")]
    ZeroBandwidth { link: String, index: usize },
    #[error("stage {index} of link {link} lasts {secs} s, over the {max} s limit")]
    StageTooLong {
        link: String,
        index: usize,
        secs: u64,
        max: u64,
    },
    #[error("schedule of {name} spans {secs} s, over the {max} s limit")]
    ScheduleTooLong { name: String, secs: u64, max: u64 },
    #[error("flow {flow} uses undeclared link {link}")]
    UnknownLink { flow: usize, link: String },
    #[error("link {0} is declared more than once")]
    DuplicateLink(String),
    #[error("flow {0} has no free default port")]
    PortOverflow(usize),
    #[error("invalid scenario file: {0}")]
    InvalidFile(String),
}

// ── Command channels ────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("command output is already connected")]
    AlreadyConnected,
}
