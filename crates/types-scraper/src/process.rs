// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Supervised child process.
//!
//! Owns one external process and its three standard streams:
//!
//! ```text
//!                 +------------------- ChildProcess -------------------+
//!  pipe_stdin() ->| manual queue --+                                   |
//!  own stdin  --->| (non-tty only) +-> input mux -> [forwarder] -> stdin |-> child
//!                 |                                                    |
//!  monitor()  <---| output mux <- stdout reader, stderr reader         |<- child
//!                 +----------------------------------------------------+
//! ```
//!
//! The forwarder writes every line to the child and flushes after each write.
//! A broken pipe (or invalid handle) ends forwarding quietly; any other
//! write error is reported by [`ChildProcess::monitor`].

use crate::mux::{MuxRound, MuxRounds, MuxStopHandle, MuxedSource, StreamMux};
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, IsTerminal, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Child process errors.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Empty command line")]
    EmptyCommand,

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Process {pid} failed ({status})")]
    Failed { pid: u32, status: ExitStatus },

    #[error("Process already terminated")]
    AlreadyTerminated,

    #[error("Failed to forward input to process {pid}: {source}")]
    StdinForward {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("Stdin forwarding thread panicked")]
    ForwarderPanicked,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProcessError {
    /// Exit code of a failed process.
    ///
    /// Processes killed by a signal report the negated signal number.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { status, .. } => status.code().or_else(|| exit_signal(status).map(|s| -s)),
            _ => None,
        }
    }
}

/// Options for [`ChildProcess::spawn`].
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Forward this process's own standard input to the child.
    pub pipe_stdin: bool,
    /// Bound on every multiplexer wait.
    pub wait_timeout: Option<Duration>,
}

struct Shared {
    pid: u32,
    stdin: Mutex<Option<ChildStdin>>,
    manual_tx: Sender<Option<String>>,
    out_stop: MuxStopHandle,
    in_stop: MuxStopHandle,
    stop_requested: AtomicBool,
    exited: AtomicBool,
}

impl Shared {
    fn close_stdin(&self) {
        if self.stdin.lock().take().is_some() {
            tracing::debug!(pid = self.pid, "closed child stdin");
        }
    }

    fn request_stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(pid = self.pid, "stopping child process");

        self.close_stdin();
        if !self.exited.load(Ordering::SeqCst) {
            if let Err(err) = send_interrupt(self.pid) {
                tracing::debug!(pid = self.pid, "failed to interrupt child: {}", err);
            }
        }
        let _ = self.manual_tx.send(None);
        self.in_stop.stop();
        self.out_stop.stop();
    }
}

/// Cloneable handle to stop a [`ChildProcess`] from another thread.
#[derive(Clone)]
pub struct ProcessStopHandle {
    shared: Arc<Shared>,
}

impl ProcessStopHandle {
    /// Close stdin, interrupt the child and stop both multiplexers.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Child process id.
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }
}

/// An external process with multiplexed output and forwarded input.
pub struct ChildProcess {
    child: Option<Child>,
    out_mux: StreamMux,
    forwarder: Option<JoinHandle<io::Result<()>>>,
    shared: Arc<Shared>,
}

impl ChildProcess {
    /// Start `command` (program followed by its arguments).
    pub fn spawn<S: AsRef<str>>(command: &[S], options: ProcessOptions) -> Result<Self, ProcessError> {
        let (program, args) = command.split_first().ok_or(ProcessError::EmptyCommand)?;
        let program = program.as_ref();

        let mut child = Command::new(program)
            .args(args.iter().map(AsRef::as_ref))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;
        let pid = child.id();

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::Io(io::Error::other("child stdio was not captured")));
        };

        let mut out_mux = StreamMux::new(
            format!("{}-out", pid),
            vec![
                MuxedSource::new("stdout", line_source(stdout)),
                MuxedSource::new("stderr", line_source(stderr)),
            ],
        )
        .with_wait_timeout(options.wait_timeout);

        let (manual_tx, manual_rx) = channel::unbounded::<Option<String>>();
        let mut in_sources = vec![MuxedSource::new(
            "stdin-pipe",
            std::iter::from_fn(move || manual_rx.recv().ok().flatten()),
        )];
        if options.pipe_stdin {
            in_sources.push(controlling_stdin_source());
        }
        let mut in_mux =
            StreamMux::new(format!("{}-in", pid), in_sources).with_wait_timeout(options.wait_timeout);

        let shared = Arc::new(Shared {
            pid,
            stdin: Mutex::new(Some(stdin)),
            manual_tx,
            out_stop: out_mux.stop_handle(),
            in_stop: in_mux.stop_handle(),
            stop_requested: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        });

        let started = (|| -> io::Result<JoinHandle<io::Result<()>>> {
            out_mux.start()?;
            in_mux.start()?;
            let rounds = in_mux.read();
            let worker_shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("stdin-{}", pid))
                .spawn(move || forward_stdin(rounds, &worker_shared))
        })();
        let forwarder = match started {
            Ok(handle) => handle,
            Err(err) => {
                shared.request_stop();
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::Io(err));
            }
        };

        tracing::debug!(pid, program, pipe_stdin = options.pipe_stdin, "started child process");

        Ok(Self {
            child: Some(child),
            out_mux,
            forwarder: Some(forwarder),
            shared,
        })
    }

    /// Child process id.
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    /// Queue a line for the child's stdin. `None` ends the manual input.
    pub fn pipe_stdin(&self, line: Option<String>) {
        if self.shared.manual_tx.send(line).is_err() {
            tracing::debug!(pid = self.shared.pid, "manual stdin already closed");
        }
    }

    /// Request the child to stop. Idempotent.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    /// Handle that can stop this process from another thread.
    pub fn stop_handle(&self) -> ProcessStopHandle {
        ProcessStopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Rounds of `(stdout, stderr)` lines.
    ///
    /// Once output is exhausted the child is waited for: a non-zero exit
    /// (other than an interrupt) is yielded as a final `Err`. Forwarding
    /// errors are reported the same way. Dropping the monitor early stops
    /// the child.
    pub fn monitor(&mut self) -> Monitor<'_> {
        let rounds = self.out_mux.read();
        Monitor {
            process: self,
            rounds,
            done: false,
        }
    }

    fn wait_exit(&mut self) -> Result<(), ProcessError> {
        let mut child = self.child.take().ok_or(ProcessError::AlreadyTerminated)?;
        let pid = self.shared.pid;

        let status = child.wait();
        self.shared.exited.store(true, Ordering::SeqCst);
        // Nothing more can be delivered to a dead process.
        let _ = self.shared.manual_tx.send(None);
        let status = status?;

        let exit = if exited_cleanly(&status) {
            tracing::debug!(pid, %status, "child process exited");
            Ok(())
        } else {
            Err(ProcessError::Failed { pid, status })
        };

        let forwarded = match self.forwarder.take().map(JoinHandle::join) {
            None | Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(source))) => Err(ProcessError::StdinForward { pid, source }),
            Some(Err(_)) => Err(ProcessError::ForwarderPanicked),
        };

        exit.and(forwarded)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            self.shared.request_stop();
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
            self.shared.exited.store(true, Ordering::SeqCst);
        }
    }
}

/// Iterator returned by [`ChildProcess::monitor`].
pub struct Monitor<'a> {
    process: &'a mut ChildProcess,
    rounds: MuxRounds,
    done: bool,
}

impl Iterator for Monitor<'_> {
    type Item = Result<MuxRound, ProcessError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(round) = self.rounds.next() {
            return Some(Ok(round));
        }
        self.done = true;
        self.process.wait_exit().err().map(Err)
    }
}

impl Drop for Monitor<'_> {
    fn drop(&mut self) {
        // Abandoned before exhaustion: the readers only finish once the child
        // releases its pipes.
        if !self.done {
            self.process.request_stop();
        }
    }
}

/// Lines of a byte stream, decoded lossily, without line terminators.
///
/// Read errors end the sequence.
pub fn line_source<R>(reader: R) -> impl Iterator<Item = String> + Send + 'static
where
    R: Read + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    std::iter::from_fn(move || {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                Some(String::from_utf8_lossy(&buf).into_owned())
            }
            Err(err) => {
                tracing::warn!("stream read failed: {}", err);
                None
            }
        }
    })
}

fn controlling_stdin_source() -> MuxedSource {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        // Never block on an interactive terminal.
        MuxedSource::new("stdin", std::iter::empty())
    } else {
        MuxedSource::new("stdin", line_source(stdin))
    }
}

fn forward_stdin(rounds: MuxRounds, shared: &Shared) -> io::Result<()> {
    let lines = rounds.flat_map(MuxRound::into_slots).flatten();
    forward_lines(lines, &shared.stdin, shared.pid)
}

/// Write `lines` to the writer in `slot`, then close it.
///
/// A closed pipe ends forwarding quietly; any other write error is returned.
fn forward_lines<W, I>(mut lines: I, slot: &Mutex<Option<W>>, pid: u32) -> io::Result<()>
where
    W: Write,
    I: Iterator<Item = String>,
{
    let result = write_lines(&mut lines, slot, pid);
    if slot.lock().take().is_some() {
        tracing::debug!(pid, "closed child stdin");
    }
    drop(lines);

    match result {
        Err(err) if is_closed_pipe(&err) => {
            tracing::debug!(pid, "child closed its input: {}", err);
            Ok(())
        }
        other => other,
    }
}

fn write_lines<W, I>(lines: &mut I, slot: &Mutex<Option<W>>, pid: u32) -> io::Result<()>
where
    W: Write,
    I: Iterator<Item = String>,
{
    for line in lines {
        if line.is_empty() {
            continue;
        }
        tracing::trace!(pid, line = %line, "forwarding to stdin");

        let mut guard = slot.lock();
        let Some(stdin) = guard.as_mut() else {
            return Ok(());
        };
        stdin.write_all(line.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()?;
    }
    Ok(())
}

fn is_closed_pipe(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::InvalidInput)
        || is_closed_pipe_errno(err)
}

#[cfg(unix)]
fn is_closed_pipe_errno(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EPIPE) | Some(libc::EINVAL))
}

#[cfg(not(unix))]
fn is_closed_pipe_errno(_err: &io::Error) -> bool {
    false
}

#[cfg(unix)]
const INTERRUPT_SIGNAL: i32 = libc::SIGINT;

#[cfg(not(unix))]
const INTERRUPT_SIGNAL: i32 = 2;

fn exited_cleanly(status: &ExitStatus) -> bool {
    status.success() || exit_signal(status) == Some(INTERRUPT_SIGNAL)
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
#[allow(clippy::cast_possible_wrap)] // pids fit in pid_t
fn send_interrupt(pid: u32) -> io::Result<()> {
    // SAFETY: kill(2) takes plain integers and has no memory preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interrupting child processes is not supported on this platform",
    ))
}
