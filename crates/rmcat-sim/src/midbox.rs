use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info};

use crate::command::{dispatch, CommandOutput};
use crate::path::PathController;

/// Runs every path controller concurrently and relays their commands to a
/// single output.
///
/// Commands of one controller are forwarded in the order it produced them.
/// Across controllers they interleave freely.
#[derive(Debug, Default)]
pub struct MidboxController {
    controllers: Vec<Arc<PathController>>,
    output: Arc<CommandOutput>,
    stopped: AtomicBool,
}

impl MidboxController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_path_controller(&mut self, controller: Arc<PathController>) {
        self.controllers.push(controller);
    }

    pub fn add_path_controllers(&mut self, controllers: impl IntoIterator<Item = Arc<PathController>>) {
        self.controllers.extend(controllers);
    }

    pub fn path_controllers(&self) -> &[Arc<PathController>] {
        &self.controllers
    }

    pub fn output(&self) -> &CommandOutput {
        &self.output
    }

    /// Returns once every controller's sequence is exhausted or stopped.
    pub async fn start(&self) {
        let tasks: Vec<_> = self
            .controllers
            .iter()
            .map(|ctrl| {
                let ctrl = Arc::clone(ctrl);
                let output = Arc::clone(&self.output);
                tokio::spawn(async move {
                    debug!(link = %ctrl.link(), "starting path controller");
                    let mut commands = ctrl.commands();
                    while let Some(command) = commands.next().await {
                        debug!(link = %ctrl.link(), command = %command, "forwarding");
                        // A later stage must not overtake this one.
                        dispatch(Arc::clone(&output), command).await;
                    }
                    debug!(link = %ctrl.link(), "path controller finished");
                })
            })
            .collect();

        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "path controller task failed");
            }
        }
    }

    /// Flags every controller to stop and, on the first call only, sends
    /// the stop commands of controllers that left a process running.
    ///
    /// Does not wait for in-flight commands.
    pub fn stop(&self) {
        for ctrl in &self.controllers {
            ctrl.stop();
        }
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(links = self.controllers.len(), "midbox stopped");
        for ctrl in &self.controllers {
            if let Some(cmd) = ctrl.stop_cmd() {
                self.output.transmit(cmd);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
