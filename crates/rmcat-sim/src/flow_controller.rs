//! Concurrent flow start-up and shutdown.
//!
//! Each flow runs its own start protocol on a separate task:
//!
//! 1. wait `start_delay`
//! 2. dispatch the sink's start command
//! 3. wait `sink_to_source_delay`, measured from step 2's dispatch
//! 4. dispatch the source's start command
//! 5. join whatever was dispatched
//!
//! Flipped flows send the sink command out on the source channel and the
//! source command on the sink channel.
//!
//! Start commands are handed over under a read lock on the stop state and
//! `stop()` takes it for writing, so no start command reaches a testbed
//! after the stop commands.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info};

use crate::command::{CommandOutput, ShellCommand};
use crate::flow::Flow;

#[derive(Debug, Default)]
pub struct FlowController {
    flows: Vec<Arc<Flow>>,
    sink_output: Arc<CommandOutput>,
    source_output: Arc<CommandOutput>,
    stopped: Arc<StopState>,
}

/// Stop flag shared by the controller and its dispatch tasks.
#[derive(Debug, Default)]
struct StopState(RwLock<bool>);

impl StopState {
    fn read(&self) -> RwLockReadGuard<'_, bool> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, bool> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    fn is_set(&self) -> bool {
        *self.read()
    }
}

impl FlowController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_flow(&mut self, flow: Arc<Flow>) {
        self.flows.push(flow);
    }

    pub fn add_flows(&mut self, flows: impl IntoIterator<Item = Arc<Flow>>) {
        self.flows.extend(flows);
    }

    pub fn flows(&self) -> &[Arc<Flow>] {
        &self.flows
    }

    pub fn sink_output(&self) -> &CommandOutput {
        &self.sink_output
    }

    pub fn source_output(&self) -> &CommandOutput {
        &self.source_output
    }

    /// Largest sink-to-source delay across all flows; zero with no flows.
    pub fn max_sink_to_source_delay(&self) -> Duration {
        self.flows
            .iter()
            .map(|f| f.sink_to_source_delay())
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Output channels for `flow` as `(sink side, source side)`.
    fn channels(&self, flow: &Flow) -> (&Arc<CommandOutput>, &Arc<CommandOutput>) {
        if flow.is_flipped() {
            (&self.source_output, &self.sink_output)
        } else {
            (&self.sink_output, &self.source_output)
        }
    }

    /// Runs every flow's start protocol concurrently and returns once all
    /// of them have finished dispatching.
    pub async fn start(&self) {
        let tasks: Vec<_> = self
            .flows
            .iter()
            .map(|flow| {
                let (sink_out, source_out) = self.channels(flow);
                tokio::spawn(start_flow(
                    Arc::clone(flow),
                    Arc::clone(sink_out),
                    Arc::clone(source_out),
                    Arc::clone(&self.stopped),
                ))
            })
            .collect();

        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "flow start task failed");
            }
        }
    }

    /// Sends the stop command of every present unit, source before sink.
    ///
    /// Walks the static flow list, so it works whether or not `start` ran.
    /// Only the first call emits anything.
    pub fn stop(&self) {
        let mut stopped = self.stopped.write();
        if *stopped {
            debug!("flow controller already stopped");
            return;
        }
        *stopped = true;
        for flow in &self.flows {
            let (sink_out, source_out) = self.channels(flow);
            info!(flow = %flow.name(), "stopping flow");
            if let Some(source) = flow.source() {
                source_out.transmit(source.stop_cmd());
            }
            if let Some(sink) = flow.sink() {
                sink_out.transmit(sink.stop_cmd());
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_set()
    }
}

/// Hands `command` to `output` on the blocking pool unless the
/// controller was stopped in the meantime.
fn spawn_dispatch(
    output: Arc<CommandOutput>,
    command: ShellCommand,
    stopped: Arc<StopState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let sent = tokio::task::spawn_blocking(move || {
            let stopped = stopped.read();
            if *stopped {
                debug!(command = %command, "stopped, start command dropped");
                return;
            }
            output.transmit(command);
        });
        if let Err(e) = sent.await {
            error!(error = %e, "command sink panicked");
        }
    })
}

async fn start_flow(
    flow: Arc<Flow>,
    sink_out: Arc<CommandOutput>,
    source_out: Arc<CommandOutput>,
    stopped: Arc<StopState>,
) {
    if !flow.start_delay().is_zero() {
        time::sleep(flow.start_delay()).await;
    }
    if stopped.is_set() {
        debug!(flow = %flow.name(), "stopped before start");
        return;
    }
    info!(
        flow = %flow.name(),
        flipped = flow.is_flipped(),
        delay_s = flow.start_delay().as_secs(),
        "starting flow"
    );

    let sink = flow.sink().map(|unit| {
        debug!(flow = %flow.name(), unit = %unit, "sink start");
        spawn_dispatch(Arc::clone(&sink_out), unit.start_cmd(), Arc::clone(&stopped))
    });

    // The sender may only go once the receiver had time to bind.
    if sink.is_some() && !flow.sink_to_source_delay().is_zero() {
        time::sleep(flow.sink_to_source_delay()).await;
    }

    let source = match flow.source() {
        Some(_) if stopped.is_set() => {
            debug!(flow = %flow.name(), "stopped before source start");
            None
        }
        Some(unit) => {
            debug!(flow = %flow.name(), unit = %unit, "source start");
            Some(spawn_dispatch(
                Arc::clone(&source_out),
                unit.start_cmd(),
                Arc::clone(&stopped),
            ))
        }
        None => None,
    };

    for handle in sink.into_iter().chain(source) {
        if let Err(e) = handle.await {
            error!(flow = %flow.name(), error = %e, "dispatch task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use tokio::time::Instant;

    use std::sync::{mpsc, Mutex};

    use crate::command::CommandSink;
    use crate::test_util::RecordingTestbed;
    use crate::testbed::{Role, Testbed};
    use crate::units::{TcpClient, TcpServer, TrafficUnit};

    fn tcp_flow(name: &str, port: u16) -> Flow {
        let server = TcpServer {
            name: format!("{name}-server"),
            ip: "10.0.0.6".into(),
            port,
            log_file: PathBuf::from(format!("{name}-server.log")),
        };
        let client = TcpClient::connect_to(
            format!("{name}-client"),
            &server,
            None,
            format!("{name}-client.log"),
        );
        Flow::new(
            name,
            Some(TrafficUnit::TcpClient(client)),
            Some(TrafficUnit::TcpServer(server)),
        )
        .unwrap()
    }

    fn wired(flows: Vec<Flow>) -> (FlowController, RecordingTestbed) {
        let bed = RecordingTestbed::new();
        let mut ctrl = FlowController::new();
        ctrl.add_flows(flows.into_iter().map(Arc::new));
        ctrl.sink_output().connect(bed.sink_input()).unwrap();
        ctrl.source_output().connect(bed.source_input()).unwrap();
        (ctrl, bed)
    }

    /// Sink that parks every server start until the test releases it.
    struct HeldSink {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        lines: Mutex<Vec<String>>,
    }

    impl CommandSink for HeldSink {
        fn execute(&self, command: ShellCommand) {
            if command.line().starts_with("iperf -s") {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            self.lines.lock().unwrap().push(command.line().to_string());
        }
    }

    #[test]
    fn max_delay_of_empty_controller_is_zero() {
        assert_eq!(FlowController::new().max_sink_to_source_delay(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_then_source_after_delay() {
        let flow = tcp_flow("tcp", 12345).with_sink_to_source_delay(Duration::from_secs(2));
        let (ctrl, bed) = wired(vec![flow]);
        assert_eq!(ctrl.max_sink_to_source_delay(), Duration::from_secs(2));

        let t0 = Instant::now();
        ctrl.start().await;

        let sink = bed.recorded_on(Role::Sink);
        let source = bed.recorded_on(Role::Source);
        assert_eq!(sink.len(), 1);
        assert_eq!(source.len(), 1);
        assert_eq!(sink[0].command.line(), "iperf -s -p 12345");
        let gap = source[0].at - sink[0].at;
        assert!(gap >= Duration::from_millis(1990), "{gap:?}");
        assert!(gap < Duration::from_millis(2100), "{gap:?}");
        assert!(sink[0].at - t0 < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_emitted_once() {
        let (ctrl, bed) = wired(vec![tcp_flow("a", 1), tcp_flow("b", 2)]);
        ctrl.stop();
        ctrl.stop();
        assert_eq!(bed.lines_on(Role::Source), vec!["pkill iperf", "pkill iperf"]);
        assert_eq!(bed.lines_on(Role::Sink), vec!["pkill iperf", "pkill iperf"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_suppresses_dispatch() {
        let (ctrl, bed) = wired(vec![tcp_flow("a", 1)]);
        ctrl.stop();
        let stops = bed.len();
        ctrl.start().await;
        assert_eq!(bed.len(), stops);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_never_overtakes_an_in_flight_start() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let sink = Arc::new(HeldSink {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            lines: Mutex::new(Vec::new()),
        });
        let mut ctrl = FlowController::new();
        ctrl.add_flow(Arc::new(tcp_flow("a", 1)));
        ctrl.sink_output().connect(sink.clone()).unwrap();
        let ctrl = Arc::new(ctrl);

        let starter = tokio::spawn({
            let ctrl = Arc::clone(&ctrl);
            async move { ctrl.start().await }
        });
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();

        let stopper = std::thread::spawn({
            let ctrl = Arc::clone(&ctrl);
            move || ctrl.stop()
        });
        time::sleep(Duration::from_millis(100)).await;
        assert!(!stopper.is_finished(), "stop ran while a start was being handed over");
        assert!(sink.lines.lock().unwrap().is_empty());

        release_tx.send(()).unwrap();
        stopper.join().unwrap();
        starter.await.unwrap();
        assert_eq!(*sink.lines.lock().unwrap(), vec!["iperf -s -p 1", "pkill iperf"]);
    }
}
