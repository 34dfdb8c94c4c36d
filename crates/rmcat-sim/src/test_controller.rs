//! Composition root of one test run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info};

use crate::error::ChannelError;
use crate::flow_controller::FlowController;
use crate::midbox::MidboxController;
use crate::testbed::Testbed;

/// How a [`TestController::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run lasted its full lifetime.
    Completed,
    /// The shutdown signal fired first.
    Interrupted,
}

/// Owns one flow controller, one midbox controller and the testbed their
/// outputs are wired to. The wiring is fixed at construction.
pub struct TestController {
    flows: FlowController,
    midbox: MidboxController,
    testbed: Arc<dyn Testbed>,
}

impl TestController {
    /// Connects the midbox output to the testbed's midbox input and the
    /// flow sink/source outputs to the sink/source inputs.
    pub fn new(
        flows: FlowController,
        midbox: MidboxController,
        testbed: Arc<dyn Testbed>,
    ) -> Result<Self, ChannelError> {
        midbox.output().connect(testbed.midbox_input())?;
        flows.sink_output().connect(testbed.sink_input())?;
        flows.source_output().connect(testbed.source_input())?;
        Ok(Self {
            flows,
            midbox,
            testbed,
        })
    }

    pub fn flows(&self) -> &FlowController {
        &self.flows
    }

    pub fn midbox(&self) -> &MidboxController {
        &self.midbox
    }

    pub fn testbed(&self) -> &Arc<dyn Testbed> {
        &self.testbed
    }

    /// How long the slowest flow's receiver gets before paths are shaped.
    pub fn max_source_to_sink_delay(&self) -> Duration {
        self.flows.max_sink_to_source_delay()
    }

    /// Starts flows and paths concurrently, with path shaping held back by
    /// [`max_source_to_sink_delay`](Self::max_source_to_sink_delay).
    /// Returns once both sides are done.
    pub async fn start(&self) {
        let delay = self.max_source_to_sink_delay();
        info!(
            flows = self.flows.flows().len(),
            links = self.midbox.path_controllers().len(),
            path_delay_ms = delay.as_millis() as u64,
            "starting test"
        );
        let midbox = async {
            time::sleep(delay).await;
            if self.midbox.is_stopped() {
                debug!("test stopped before path shaping began");
                return;
            }
            self.midbox.start().await;
        };
        tokio::join!(self.flows.start(), midbox);
    }

    /// Stops both controllers. Safe to call repeatedly and while
    /// [`start`](Self::start) is still running.
    pub fn stop(&self) {
        info!("stopping test");
        self.flows.stop();
        self.midbox.stop();
    }

    /// Runs the test for `lifetime` or until `shutdown` turns true, then
    /// stops it and waits for the start protocol to unwind.
    pub async fn run(&self, lifetime: Duration, mut shutdown: watch::Receiver<bool>) -> RunOutcome {
        let start = self.start();
        tokio::pin!(start);
        let deadline = time::sleep(lifetime);
        tokio::pin!(deadline);

        let mut start_done = false;
        let mut signal_open = true;
        let outcome = if *shutdown.borrow() {
            // Never polled, nothing to unwind.
            start_done = true;
            RunOutcome::Interrupted
        } else {
            loop {
                tokio::select! {
                    _ = &mut start, if !start_done => start_done = true,
                    _ = &mut deadline => break RunOutcome::Completed,
                    changed = shutdown.changed(), if signal_open => match changed {
                        Ok(()) if *shutdown.borrow() => break RunOutcome::Interrupted,
                        Ok(()) => {}
                        Err(_) => signal_open = false,
                    },
                }
            }
        };

        self.stop();
        if !start_done {
            start.await;
        }
        info!(?outcome, "test finished");
        outcome
    }
}

impl fmt::Debug for TestController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestController")
            .field("flows", &self.flows)
            .field("midbox", &self.midbox)
            .finish_non_exhaustive()
    }
}
