//! # Path Controllers
//!
//! A path controller replays a link schedule as a lazy sequence of shell
//! commands. It never applies anything itself: the midbox controller
//! forwards each command to the testbed.
//!
//! Lifecycle: `idle → running → {stopped | exhausted}`. The sequence is
//! produced once; asking a controller for its commands a second time
//! yields nothing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::stage::{PathStage, StageChain};
use crate::command::ShellCommand;

/// Granularity at which a stage hold re-checks the stop flag.
pub const DEFAULT_STOP_POLL: Duration = Duration::from_secs(1);

const MIN_STOP_POLL: Duration = Duration::from_millis(10);

/// One controlled network link.
#[derive(Debug)]
pub struct PathController {
    link: String,
    kind: Kind,
    started: AtomicBool,
    stop: AtomicBool,
    poll: Duration,
}

#[derive(Debug)]
enum Kind {
    /// Mutates the link's qdisc once per stage.
    Shaping(StageChain),
    /// Runs a single packet capture on the link.
    Capture(PathBuf),
}

impl PathController {
    /// Controller that walks `chain`, reshaping `link` at every stage.
    pub fn shaping(link: impl Into<String>, chain: StageChain) -> Self {
        Self::with_kind(link.into(), Kind::Shaping(chain))
    }

    /// Passive controller that captures packets on `link` into `pcap_file`.
    pub fn capture(link: impl Into<String>, pcap_file: impl Into<PathBuf>) -> Self {
        Self::with_kind(link.into(), Kind::Capture(pcap_file.into()))
    }

    fn with_kind(link: String, kind: Kind) -> Self {
        Self {
            link,
            kind,
            started: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            poll: DEFAULT_STOP_POLL,
        }
    }

    /// Overrides the stop-flag polling interval (clamped to 10ms..=1s).
    pub fn with_stop_poll(mut self, poll: Duration) -> Self {
        self.poll = poll.clamp(MIN_STOP_POLL, DEFAULT_STOP_POLL);
        self
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn stop_poll(&self) -> Duration {
        self.poll
    }

    /// The stage schedule, if this is a shaping controller.
    pub fn stages(&self) -> Option<&StageChain> {
        match &self.kind {
            Kind::Shaping(chain) => Some(chain),
            Kind::Capture(_) => None,
        }
    }

    /// Per-second bandwidth trace of the schedule (empty for capture).
    pub fn bandwidths(&self) -> &[u64] {
        self.stages().map(StageChain::bandwidths).unwrap_or(&[])
    }

    pub fn pcap_file(&self) -> Option<&Path> {
        match &self.kind {
            Kind::Shaping(_) => None,
            Kind::Capture(path) => Some(path.as_path()),
        }
    }

    /// Starts the command sequence.
    pub fn commands(&self) -> PathCommands<'_> {
        let first_run = !self.started.swap(true, Ordering::AcqRel);
        if !first_run {
            warn!(link = %self.link, "path controller already started, ignoring");
        }
        let cursor = match &self.kind {
            Kind::Shaping(chain) if first_run => Cursor::Stage(chain.head()),
            Kind::Capture(_) if first_run => Cursor::Capture,
            _ => Cursor::Done,
        };
        PathCommands {
            ctrl: self,
            cursor,
            hold: None,
        }
    }

    /// Requests the stage walk to end. Idempotent and non-blocking.
    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            debug!(link = %self.link, "path controller stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Command that terminates whatever long-running process this
    /// controller started.
    pub fn stop_cmd(&self) -> Option<ShellCommand> {
        match &self.kind {
            Kind::Shaping(_) => None,
            Kind::Capture(_) => Some(ShellCommand::new("pkill tcpdump")),
        }
    }

    /// Sleeps for `hold`, waking every poll interval to check the stop
    /// flag. Returns `false` if stopped before the hold elapsed. A hold
    /// past the clock's range only ends by stopping.
    async fn hold(&self, hold: Duration) -> bool {
        let deadline = Instant::now().checked_add(hold);
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            let step = match deadline {
                Some(deadline) if now >= deadline => return true,
                Some(deadline) => self.poll.min(deadline - now),
                None => self.poll,
            };
            time::sleep(step).await;
        }
    }
}

#[derive(Debug)]
enum Cursor<'a> {
    Stage(Option<&'a PathStage>),
    Capture,
    Done,
}

/// Lazy, finite, non-restartable command sequence of one controller.
#[derive(Debug)]
pub struct PathCommands<'a> {
    ctrl: &'a PathController,
    cursor: Cursor<'a>,
    hold: Option<Duration>,
}

impl PathCommands<'_> {
    /// Yields the next stage's command.
    ///
    /// Between two shaping commands this waits for the previous stage's
    /// duration. After the last stage it waits out that stage before
    /// reporting the end, so a full walk takes the schedule's total time.
    pub async fn next(&mut self) -> Option<ShellCommand> {
        match self.cursor {
            Cursor::Done => None,
            Cursor::Capture => {
                self.cursor = Cursor::Done;
                let path = self.ctrl.pcap_file()?;
                info!(link = %self.ctrl.link, pcap = %path.display(), "starting capture");
                Some(ShellCommand::new(format!(
                    "tcpdump -i {} -w {}",
                    self.ctrl.link,
                    path.display()
                )))
            }
            Cursor::Stage(stage) => {
                if let Some(hold) = self.hold.take() {
                    if !self.ctrl.hold(hold).await {
                        info!(link = %self.ctrl.link, "path controller stopped");
                        self.cursor = Cursor::Done;
                        return None;
                    }
                }
                let Some(stage) = stage.filter(|_| !self.ctrl.is_stopped()) else {
                    self.cursor = Cursor::Done;
                    return None;
                };
                self.cursor = Cursor::Stage(stage.next());
                if stage.duration_secs() > 0 {
                    self.hold = Some(stage.duration());
                }
                let config = stage.config();
                info!(
                    link = %self.ctrl.link,
                    bandwidth_kbit = config.bandwidth_kbit(),
                    latency_ms = config.latency_ms(),
                    duration_s = stage.duration_secs(),
                    "path stage"
                );
                Some(config.shaping_command(&self.ctrl.link))
            }
        }
    }
}
