use std::fmt;
use std::iter;
use std::time::Duration;

use super::config::PathConfig;

/// Declarative input for one stage: hold `config` for `duration_secs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub duration_secs: u64,
    pub config: PathConfig,
}

impl StageDescriptor {
    pub fn new(duration_secs: u64, config: PathConfig) -> Self {
        Self {
            duration_secs,
            config,
        }
    }
}

/// Longest single stage a schedule accepts, one day.
pub const MAX_STAGE_SECS: u64 = 86_400;

/// One node of an immutable, singly linked stage schedule.
///
/// Cloning, comparing and dropping walk the chain in a loop, so chain
/// length is bounded by memory only.
pub struct PathStage {
    duration_secs: u64,
    config: PathConfig,
    next: Option<Box<PathStage>>,
}

impl PathStage {
    pub fn new(duration_secs: u64, config: PathConfig, next: Option<Box<PathStage>>) -> Self {
        Self {
            duration_secs,
            config,
            next,
        }
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    /// The stage that follows, or `None` for the terminal stage.
    pub fn next(&self) -> Option<&PathStage> {
        self.next.as_deref()
    }

    /// Walks this stage and every stage after it.
    pub fn iter(&self) -> Stages<'_> {
        Stages { cursor: Some(self) }
    }
}

impl Clone for PathStage {
    fn clone(&self) -> Self {
        let nodes: Vec<(u64, PathConfig)> = self
            .iter()
            .map(|s| (s.duration_secs, s.config.clone()))
            .collect();
        let next = link_chain(nodes.iter().skip(1).cloned());
        PathStage::new(self.duration_secs, self.config.clone(), next)
    }
}

impl PartialEq for PathStage {
    fn eq(&self, other: &Self) -> bool {
        self.iter()
            .map(|s| (s.duration_secs, &s.config))
            .eq(other.iter().map(|s| (s.duration_secs, &s.config)))
    }
}

impl Eq for PathStage {}

impl fmt::Debug for PathStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathStage")
            .field("duration_secs", &self.duration_secs)
            .field("config", &self.config)
            .field("following", &self.iter().skip(1).count())
            .finish()
    }
}

impl Drop for PathStage {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut stage) = next {
            next = stage.next.take();
        }
    }
}

/// Forward iterator over a stage chain.
#[derive(Debug, Clone)]
pub struct Stages<'a> {
    cursor: Option<&'a PathStage>,
}

impl<'a> Iterator for Stages<'a> {
    type Item = &'a PathStage;

    fn next(&mut self) -> Option<Self::Item> {
        let stage = self.cursor?;
        self.cursor = stage.next();
        Some(stage)
    }
}

/// A built stage schedule together with its per-second bandwidth trace.
///
/// The trace holds `duration_secs` copies of each stage's bandwidth and is
/// what the plotter draws as path capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageChain {
    head: Option<Box<PathStage>>,
    bandwidths: Vec<u64>,
}

impl StageChain {
    /// Consumes the descriptors front to back. An empty input yields an
    /// empty chain, which is a valid schedule.
    pub fn build(descriptors: impl IntoIterator<Item = StageDescriptor>) -> Self {
        let descriptors: Vec<StageDescriptor> = descriptors.into_iter().collect();
        let bandwidths = descriptors
            .iter()
            .flat_map(|d| iter::repeat(d.config.bandwidth_kbit()).take(d.duration_secs as usize))
            .collect();
        let head = link_chain(
            descriptors
                .into_iter()
                .map(|d| (d.duration_secs, d.config)),
        );
        Self { head, bandwidths }
    }

    pub fn head(&self) -> Option<&PathStage> {
        self.head.as_deref()
    }

    pub fn iter(&self) -> Stages<'_> {
        Stages {
            cursor: self.head(),
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn bandwidths(&self) -> &[u64] {
        &self.bandwidths
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_secs(self.iter().map(PathStage::duration_secs).sum())
    }
}

// Links the nodes tail first, so the head comes out in input order.
fn link_chain(
    nodes: impl DoubleEndedIterator<Item = (u64, PathConfig)>,
) -> Option<Box<PathStage>> {
    nodes.rev().fold(None, |next, (duration_secs, config)| {
        Some(Box::new(PathStage::new(duration_secs, config, next)))
    })
}
