//! Blocking subprocess execution with a hard timeout.

use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::time::{Duration, Instant};

use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    /// Terminated by a signal (no exit code).
    Signaled,
    /// Killed after exceeding the timeout.
    TimedOut,
}

#[derive(Clone, Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExitKind,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit == ExitKind::Exited(0)
    }
}

#[derive(Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

fn drain<R: Read + Send + 'static>(mut pipe: R, which: Pipe, tx: Sender<(Pipe, Vec<u8>)>) {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send((which, buf));
    });
}

fn timed_out() -> ProcessOutput {
    ProcessOutput {
        stdout: String::new(),
        stderr: String::new(),
        exit: ExitKind::TimedOut,
    }
}

/// Run `program args...`, killing it once `timeout` elapses.
///
/// Output of a killed process is discarded. The deadline also covers
/// draining the pipes: a process that exits while a background child keeps
/// its output open counts as timed out. Spawn failures (missing
/// executable, permissions) are returned as `io::Error`.
pub fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> io::Result<ProcessOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout pipe"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr pipe"))?;
    let (tx, rx) = mpsc::channel();
    drain(stdout, Pipe::Stdout, tx.clone());
    drain(stderr, Pipe::Stderr, tx);

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let Some(status) = status else {
        // Reader threads are left to finish on their own; a grandchild may
        // still hold the pipes open.
        debug!(program, timeout_secs = timeout.as_secs_f64(), "process timed out");
        return Ok(timed_out());
    };

    let deadline = start + timeout;
    let (mut stdout, mut stderr) = (None, None);
    while stdout.is_none() || stderr.is_none() {
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(POLL_INTERVAL);
        match rx.recv_timeout(remaining) {
            Ok((Pipe::Stdout, buf)) => stdout = Some(buf),
            Ok((Pipe::Stderr, buf)) => stderr = Some(buf),
            Err(_) => {
                debug!(program, "process exited but its output stayed open past the timeout");
                return Ok(timed_out());
            }
        }
    }
    let (stdout, stderr) = (stdout.unwrap_or_default(), stderr.unwrap_or_default());
    let exit = match status.code() {
        Some(code) => ExitKind::Exited(code),
        None => ExitKind::Signaled,
    };
    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_captures_output_and_exit_code() {
        let out = run_with_timeout("sh", &sh("echo hello; echo oops >&2; exit 3"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit, ExitKind::Exited(3));
        assert!(!out.success());
    }

    #[test]
    fn test_kills_on_timeout() {
        let started = Instant::now();
        let out = run_with_timeout("sh", &sh("echo early; exec sleep 5"), Duration::from_millis(200))
            .unwrap();
        assert_eq!(out.exit, ExitKind::TimedOut);
        assert!(out.stdout.is_empty());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_background_child_holding_pipes_times_out() {
        let started = Instant::now();
        let out = run_with_timeout("sh", &sh("sleep 6 & echo x"), Duration::from_millis(500)).unwrap();
        assert_eq!(out.exit, ExitKind::TimedOut);
        assert!(out.stdout.is_empty());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_missing_program_is_not_found() {
        let err = run_with_timeout("definitely-not-a-real-binary-xyz", &[], Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
