//! Child process spawning for testbed inputs and evaluation tools.
//!
//! Testbed commands are fire-and-forget: the caller gets control back as
//! soon as the child exists, and a reaper thread owns it from then on.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Spawns `cmd` without waiting for it.
///
/// With a log file, stdout and stderr are appended to it. Without one
/// they are piped and forwarded line by line as `debug!` events tagged
/// with `scope`. Either way the exit status is logged once the child
/// terminates.
pub fn spawn_detached(mut cmd: Command, scope: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    match log_file {
        Some(path) => {
            let out = open_log(path).with_context(|| format!("opening log {}", path.display()))?;
            let err = out.try_clone()?;
            cmd.stdout(Stdio::from(out)).stderr(Stdio::from(err));
        }
        None => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }
    cmd.stdin(Stdio::null());

    tracing::debug!(scope, cmd = ?cmd, "spawning");
    let mut child = cmd.spawn().with_context(|| format!("spawning {cmd:?}"))?;

    let mut forwarders = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(forward_lines(scope.to_string(), "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(forward_lines(scope.to_string(), "stderr", stderr));
    }

    let scope = scope.to_string();
    let pid = child.id();
    thread::Builder::new()
        .name(format!("reap-{pid}"))
        .spawn(move || {
            let status = child.wait();
            for handle in forwarders {
                let _ = handle.join();
            }
            match status {
                Ok(status) if status.success() => {
                    tracing::debug!(scope = %scope, pid, "process exited");
                }
                Ok(status) => {
                    tracing::warn!(scope = %scope, pid, %status, "process exited with failure");
                }
                Err(e) => tracing::warn!(scope = %scope, pid, error = %e, "wait failed"),
            }
        })
        .context("spawning reaper thread")?;
    Ok(())
}

fn forward_lines<R: Read + Send + 'static>(
    scope: String,
    stream: &'static str,
    reader: R,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(line) => tracing::debug!(scope = %scope, stream, "{line}"),
                Err(_) => break,
            }
        }
    })
}

/// Runs `cmd` to completion, killing it once `timeout` has passed.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> anyhow::Result<ExitStatus> {
    cmd.stdin(Stdio::null());
    let mut child = cmd.spawn().with_context(|| format!("spawning {cmd:?}"))?;
    match wait_with_timeout(&mut child, timeout) {
        Ok(status) => Ok(status),
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(e.context(format!("{cmd:?}")))
        }
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> anyhow::Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timeout waiting for child process");
        }
        thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn detached_output_lands_in_log_file() {
        let dir = std::env::temp_dir().join(format!("rmcat-proc-{}", std::process::id()));
        let log = dir.join("unit.log");
        spawn_detached(sh("echo hello; echo oops >&2"), "test", Some(&log)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let text = std::fs::read_to_string(&log).unwrap_or_default();
            if text.contains("hello") && text.contains("oops") {
                break;
            }
            assert!(Instant::now() < deadline, "log never filled: {text:?}");
            thread::sleep(Duration::from_millis(20));
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn timeout_kills_slow_child() {
        let started = Instant::now();
        assert!(run_with_timeout(sh("sleep 5"), Duration::from_millis(200)).is_err());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn exit_status_is_returned() {
        let status = run_with_timeout(sh("exit 3"), Duration::from_secs(5)).unwrap();
        assert_eq!(status.code(), Some(3));
    }
}
