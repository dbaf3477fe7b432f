//! Spawns the host's storage tools with a deadline and a cancellation flag so
//! a hung `zpool` (stalled I/O on a sick pool) cannot wedge the agent cycle.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use vigil_core::error::{VigilError, VigilResult};
use vigil_core::provider::ToolOutput;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Shared flag flipped when the enclosing agent cycle is being torn down.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return `Cancelled` if the flag is set.
    pub fn check(&self) -> VigilResult<()> {
        if self.is_cancelled() {
            Err(VigilError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
/// Wraps a concrete binary path, its timeout and the cycle's cancellation flag.
pub struct CommandRunner {
    path: PathBuf,
    timeout: Duration,
    cancel: CancelToken,
}

impl CommandRunner {
    pub fn new(path: PathBuf, timeout: Duration, cancel: CancelToken) -> Self {
        Self {
            path,
            timeout,
            cancel,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.path
    }

    /// Execute the binary with `args` and capture its output.
    ///
    /// Non-zero exits are returned as data; only spawn failures, timeouts and
    /// cancellation are errors.
    pub fn run(&self, args: &[&str]) -> VigilResult<ToolOutput> {
        self.cancel.check()?;

        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(child, stdout_pipe, stderr_pipe)
    }

    /// Poll the child until it exits, the deadline passes or the cycle is cancelled.
    ///
    /// The deadline also covers draining the pipes: a grandchild that keeps
    /// them open after the tool exits cannot hold the cycle past it.
    fn wait_with_timeout(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> VigilResult<ToolOutput> {
        let start = Instant::now();
        let (tx, rx) = mpsc::channel();
        Self::spawn_output_reader(Stream::Stdout, stdout_pipe, tx.clone());
        Self::spawn_output_reader(Stream::Stderr, stderr_pipe, tx);
        let mut exit_status = None;

        while start.elapsed() <= self.timeout {
            if self.cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(VigilError::Cancelled);
            }
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        let Some(exit_status) = exit_status else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(self.timed_out());
        };

        let mut stdout = None;
        let mut stderr = None;
        while stdout.is_none() || stderr.is_none() {
            self.cancel.check()?;
            let Some(remaining) = self.timeout.checked_sub(start.elapsed()) else {
                return Err(self.timed_out());
            };
            match rx.recv_timeout(remaining.min(POLL_INTERVAL)) {
                Ok((Stream::Stdout, out)) => stdout = Some(out?),
                Ok((Stream::Stderr, out)) => stderr = Some(out?),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(VigilError::Provider("output reader thread exited early".into()));
                }
            }
        }

        Ok(ToolOutput {
            stdout: stdout.unwrap_or_default(),
            stderr: stderr.unwrap_or_default(),
            status: exit_status.code().unwrap_or(-1),
        })
    }

    fn timed_out(&self) -> VigilError {
        VigilError::Timeout {
            binary: self.path.clone(),
            timeout: self.timeout,
        }
    }

    /// Drain a pipe on a helper thread so a chatty child never blocks on a full buffer.
    fn spawn_output_reader<R>(stream: Stream, pipe: Option<R>, tx: Sender<StreamOutput>)
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || {
            let out = match pipe {
                Some(mut reader) => {
                    let mut buf = Vec::new();
                    reader
                        .read_to_end(&mut buf)
                        .map(|_| String::from_utf8_lossy(&buf).to_string())
                        .map_err(VigilError::from)
                }
                None => Ok(String::new()),
            };
            // the receiver is gone once the run has timed out
            let _ = tx.send((stream, out));
        });
    }
}

type StreamOutput = (Stream, VigilResult<String>);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}
