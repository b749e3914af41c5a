//! One live external symbolizer tool process.
//!
//! The tool is a line-oriented child: requests go down its stdin, replies
//! come back on its stdout. Blocking reads are made timeout-bounded by a
//! dedicated reader thread that forwards lines over a channel; the querying
//! thread waits on the channel with a deadline instead of on the pipe.
//!
//! A timeout does not kill the process. The reply the tool still owes is
//! recorded in a backlog and silently discarded when it eventually arrives,
//! so one slow address cannot poison the stream for every address after it.

// SIGTERM delivery during shutdown requires unsafe
#![allow(unsafe_code)]

use crate::config::{ReplyFraming, ToolSpec};
use crate::domain::{Address, Pid, QueryError, SpawnError};
use crate::image_check;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Grace period between SIGTERM and SIGKILL at shutdown, and how often the
/// child is polled for exit within it.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// Reply text exactly as the tool produced it, one entry per line, with
/// line terminators stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub lines: Vec<String>,
}

/// Replies owed by queries that timed out, still unread on the pipe.
///
/// Only the field matching the tool's framing is ever touched.
#[derive(Debug, Default)]
struct Backlog {
    /// Token-echo framing: the echo tokens still expected, oldest first.
    tokens: VecDeque<String>,
    /// Counted framing: reply lines still to discard.
    lines: usize,
    /// Blank-line framing: reply blocks still to discard.
    blocks: usize,
}

/// A spawned symbolizer tool bound to one `(image, pid)` target.
#[derive(Debug)]
pub struct ToolProcess {
    child: Child,
    stdin: ChildStdin,
    replies: Receiver<String>,
    spec: ToolSpec,
    image: PathBuf,
    debuggee: Pid,
    seq: u64,
    backlog: Backlog,
    last_used: Instant,
    reaped: bool,
}

impl ToolProcess {
    /// Launch the configured tool for `(image, pid)` and wire up its pipes.
    ///
    /// # Errors
    ///
    /// `ExecFailed` when the executable cannot be started, `PipeFailed`
    /// when it starts but its stdio handles or the reader thread cannot be
    /// set up; in the latter case the half-started child is killed before
    /// returning.
    pub fn spawn(spec: &ToolSpec, image: &Path, pid: Pid) -> Result<Self, SpawnError> {
        image_check::warn_if_symbolless(image);

        let args = spec.substituted_args(image, pid);
        let mut child = Command::new(&spec.path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SpawnError::ExecFailed {
                path: spec.path.clone(),
                source,
            })?;

        let Some(stdin) = child.stdin.take() else {
            return Err(abort_spawn(&mut child, "request pipe handle missing"));
        };
        let Some(stdout) = child.stdout.take() else {
            return Err(abort_spawn(&mut child, "reply pipe handle missing"));
        };

        let (tx, rx) = unbounded();
        // Deliberately never joined: it exits on pipe EOF, and a grandchild
        // holding the write end could keep that EOF from ever arriving.
        let reader = thread::Builder::new()
            .name("symtier-tool-reader".to_string())
            .spawn(move || read_reply_lines(stdout, &tx));
        if let Err(err) = reader {
            return Err(abort_spawn(&mut child, &format!("reader thread: {err}")));
        }

        info!(
            "spawned symbolizer tool {} (pid {}) for {} / debuggee {pid}",
            spec.path.display(),
            child.id(),
            image.display()
        );

        Ok(Self {
            child,
            stdin,
            replies: rx,
            spec: spec.clone(),
            image: image.to_path_buf(),
            debuggee: pid,
            seq: 0,
            backlog: Backlog::default(),
            last_used: Instant::now(),
            reaped: false,
        })
    }

    /// One request/response round trip for `address`.
    ///
    /// # Errors
    ///
    /// `Timeout` when no complete reply arrived in time; the process stays
    /// usable and the late reply will be discarded by a later call.
    /// `ProcessDied` when the child exited; the caller must drop this
    /// instance and evict it from any cache. No retry happens here.
    pub fn query(&mut self, address: Address) -> Result<RawReply, QueryError> {
        self.last_used = Instant::now();
        self.seq += 1;
        let token = format!("q{:06}", self.seq);

        let request = match self.spec.framing {
            ReplyFraming::TokenEcho => format!("0x{:x} {token}\n", address.0),
            ReplyFraming::CountedLines(_) | ReplyFraming::BlankLineTerminated => {
                format!("0x{:x}\n", address.0)
            }
        };
        self.stdin
            .write_all(request.as_bytes())
            .map_err(|_| QueryError::ProcessDied)?;

        let deadline = Instant::now() + self.spec.timeout;
        match self.spec.framing {
            ReplyFraming::TokenEcho => self.read_token_reply(deadline, token),
            ReplyFraming::CountedLines(count) => self.read_counted_reply(deadline, count),
            ReplyFraming::BlankLineTerminated => self.read_block_reply(deadline),
        }
    }

    /// When this process last served a query; spawn time until then.
    #[must_use]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// OS pid of the tool child itself (not the debuggee).
    #[must_use]
    pub fn tool_pid(&self) -> u32 {
        self.child.id()
    }

    /// The debuggee this process was bound to at spawn; never rebound.
    #[must_use]
    pub fn debuggee(&self) -> Pid {
        self.debuggee
    }

    /// Collect lines until our token comes back, skipping stale replies.
    fn read_token_reply(
        &mut self,
        deadline: Instant,
        token: String,
    ) -> Result<RawReply, QueryError> {
        let mut lines = Vec::new();
        loop {
            let line = match self.recv_line(deadline) {
                Ok(line) => line,
                Err(err) => {
                    if matches!(err, QueryError::Timeout(_)) {
                        // Our own reply is now owed too; collected partial
                        // lines die with it.
                        self.backlog.tokens.push_back(token);
                    }
                    return Err(err);
                }
            };

            // While earlier echoes are outstanding, everything up to and
            // including each of them belongs to a timed-out query.
            match self.backlog.tokens.front().map(|stale| line == *stale) {
                Some(true) => {
                    self.backlog.tokens.pop_front();
                    debug!("discarded stale symbolizer reply ending at {line:?}");
                    continue;
                }
                Some(false) => continue,
                None => {}
            }

            if line == token {
                return Ok(RawReply { lines });
            }
            lines.push(line);
        }
    }

    /// Collect exactly `count` lines, after discarding owed stale lines.
    fn read_counted_reply(
        &mut self,
        deadline: Instant,
        count: usize,
    ) -> Result<RawReply, QueryError> {
        while self.backlog.lines > 0 {
            match self.recv_line(deadline) {
                Ok(_) => self.backlog.lines -= 1,
                Err(err) => {
                    if matches!(err, QueryError::Timeout(_)) {
                        self.backlog.lines += count;
                    }
                    return Err(err);
                }
            }
        }

        let mut lines = Vec::with_capacity(count);
        while lines.len() < count {
            match self.recv_line(deadline) {
                Ok(line) => lines.push(line),
                Err(err) => {
                    if matches!(err, QueryError::Timeout(_)) {
                        // The tool still owes the remainder of this reply.
                        self.backlog.lines += count - lines.len();
                    }
                    return Err(err);
                }
            }
        }
        Ok(RawReply { lines })
    }

    /// Collect lines until a blank one, after discarding owed stale blocks.
    fn read_block_reply(&mut self, deadline: Instant) -> Result<RawReply, QueryError> {
        while self.backlog.blocks > 0 {
            match self.recv_line(deadline) {
                Ok(line) => {
                    if line.is_empty() {
                        self.backlog.blocks -= 1;
                    }
                }
                Err(err) => {
                    if matches!(err, QueryError::Timeout(_)) {
                        self.backlog.blocks += 1;
                    }
                    return Err(err);
                }
            }
        }

        let mut lines = Vec::new();
        loop {
            match self.recv_line(deadline) {
                Ok(line) => {
                    if line.is_empty() {
                        return Ok(RawReply { lines });
                    }
                    lines.push(line);
                }
                Err(err) => {
                    if matches!(err, QueryError::Timeout(_)) {
                        self.backlog.blocks += 1;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// One line from the reader thread, bounded by `deadline`.
    fn recv_line(&mut self, deadline: Instant) -> Result<String, QueryError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.replies.recv_timeout(remaining) {
            Ok(line) => Ok(line),
            // Reader thread gone means pipe EOF: the tool exited. Lines it
            // produced before dying were already drained above.
            Err(RecvTimeoutError::Disconnected) => Err(QueryError::ProcessDied),
            Err(RecvTimeoutError::Timeout) => {
                // Distinguish a stalled tool from one that quietly exited
                // without closing the pipe chain.
                match self.child.try_wait() {
                    Ok(Some(_)) => Err(QueryError::ProcessDied),
                    _ => Err(QueryError::Timeout(self.spec.timeout)),
                }
            }
        }
    }

    /// Terminate the tool: SIGTERM, a bounded grace period, then SIGKILL
    /// and reap. Idempotent, and never waits longer than the grace period
    /// plus one kill/wait round trip.
    #[allow(clippy::cast_possible_wrap)]
    pub fn shutdown(&mut self) {
        if self.reaped {
            return;
        }
        self.reaped = true;

        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(
                "symbolizer tool for {} already exited: {status}",
                self.image.display()
            );
            return;
        }

        let tool_pid = self.child.id() as libc::pid_t;
        let _ = unsafe { libc::kill(tool_pid, libc::SIGTERM) };

        let grace_end = Instant::now() + SHUTDOWN_GRACE;
        while Instant::now() < grace_end {
            if let Ok(Some(_)) = self.child.try_wait() {
                debug!(
                    "symbolizer tool for {} exited on SIGTERM",
                    self.image.display()
                );
                return;
            }
            thread::sleep(SHUTDOWN_POLL);
        }

        warn!(
            "symbolizer tool {} for {} (debuggee {}) ignored SIGTERM, killing",
            tool_pid,
            self.image.display(),
            self.debuggee
        );
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ToolProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build the `PipeFailed` error for a child that started but could not be
/// wired up, killing it first so nothing leaks.
fn abort_spawn(child: &mut Child, what: &str) -> SpawnError {
    let _ = child.kill();
    let _ = child.wait();
    SpawnError::PipeFailed(what.to_string())
}

/// Reader-thread body: drain the tool's stdout line by line until EOF or
/// until the owning `ToolProcess` is gone.
fn read_reply_lines(stdout: ChildStdout, tx: &Sender<String>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                // Tool output is untrusted; garbage bytes become U+FFFD
                // rather than an error.
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}
