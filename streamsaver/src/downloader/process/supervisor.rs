//! Supervision of one external tool run.
//!
//! A [`ProcessSlot`] is the externally visible handle through which a running
//! child can be terminated. The [`SupervisedChild`] owns the process itself,
//! streams its output, and kills it through its own handle once the slot's
//! token is cancelled.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use process_utils::ExitKind;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::records::RecordReader;
use crate::{Error, Result};

static NEXT_ATTACHMENT: AtomicU64 = AtomicU64::new(1);

struct Attachment {
    id: u64,
    pid: Option<u32>,
    token: CancellationToken,
}

/// Holder for the process currently running on behalf of a job.
#[derive(Clone, Default)]
pub struct ProcessSlot {
    inner: Arc<Mutex<Option<Attachment>>>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, pid: Option<u32>, token: CancellationToken) -> u64 {
        let id = NEXT_ATTACHMENT.fetch_add(1, Ordering::Relaxed);
        *self.inner.lock() = Some(Attachment { id, pid, token });
        id
    }

    fn detach(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.as_ref().is_some_and(|a| a.id == id) {
            *inner = None;
        }
    }

    /// OS process id of the attached child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().as_ref().and_then(|a| a.pid)
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Requests termination of the attached child.
    ///
    /// Returns `true` when a child was attached. Does not wait for it to exit.
    pub fn terminate(&self) -> bool {
        match self.inner.lock().as_ref() {
            Some(attachment) => {
                attachment.token.cancel();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ProcessSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSlot")
            .field("pid", &self.pid())
            .finish()
    }
}

/// Which output stream of the child is read as records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Success,
    /// Termination was requested through the slot, or the child died of `SIGTERM`.
    Terminated,
    Failed(ExitKind),
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "exited cleanly"),
            Self::Terminated => write!(f, "terminated"),
            Self::Failed(kind) => write!(f, "failed: {kind}"),
        }
    }
}

type BoxedOutput = Box<dyn AsyncRead + Send + Unpin>;

/// A running child attached to a [`ProcessSlot`].
pub struct SupervisedChild {
    program: String,
    child: Child,
    records: Option<RecordReader<BoxedOutput>>,
    token: CancellationToken,
    slot: ProcessSlot,
    attachment: u64,
    killed: bool,
}

impl SupervisedChild {
    /// Spawns `cmd` with `stream` piped and the other output discarded.
    pub fn spawn(
        mut cmd: Command,
        program: &str,
        slot: &ProcessSlot,
        stream: OutputStream,
    ) -> Result<Self> {
        match stream {
            OutputStream::Stdout => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::null());
            }
            OutputStream::Stderr => {
                cmd.stdout(Stdio::null()).stderr(Stdio::piped());
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::process(program, format!("failed to start: {e}")))?;

        let output: Option<BoxedOutput> = match stream {
            OutputStream::Stdout => child.stdout.take().map(|s| Box::new(s) as BoxedOutput),
            OutputStream::Stderr => child.stderr.take().map(|s| Box::new(s) as BoxedOutput),
        };
        if output.is_none() {
            warn!(program, "child output pipe unavailable");
        }

        let token = CancellationToken::new();
        let attachment = slot.attach(child.id(), token.clone());
        debug!(program, pid = ?child.id(), "process started");

        Ok(Self {
            program: program.to_string(),
            child,
            records: output.map(RecordReader::new),
            token,
            slot: slot.clone(),
            attachment,
            killed: false,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        if let Err(e) = self.child.start_kill() {
            debug!(program = %self.program, error = %e, "kill failed, process likely exited");
        }
    }

    /// Next output record, or `None` once the stream is exhausted.
    ///
    /// A termination request kills the child; records it already wrote are
    /// still returned until the pipe closes.
    pub async fn next_record(&mut self) -> Option<String> {
        loop {
            if self.token.is_cancelled() {
                self.kill();
            }
            let reader = self.records.as_mut()?;

            tokio::select! {
                _ = self.token.cancelled(), if !self.killed => continue,
                record = reader.next_record() => match record {
                    Ok(record) => return record,
                    Err(e) => {
                        warn!(program = %self.program, error = %e, "failed to read process output");
                        self.records = None;
                        return None;
                    }
                },
            }
        }
    }

    /// Waits for the child to exit and classifies the exit.
    pub async fn wait(mut self) -> Result<ProcessExit> {
        self.records = None;

        let status = loop {
            if self.token.is_cancelled() {
                self.kill();
            }
            tokio::select! {
                _ = self.token.cancelled(), if !self.killed => continue,
                status = self.child.wait() => break status,
            }
        };
        self.slot.detach(self.attachment);

        let status =
            status.map_err(|e| Error::process(&self.program, format!("wait failed: {e}")))?;
        let kind = ExitKind::from_status(&status);
        debug!(program = %self.program, exit = %kind, "process exited");

        Ok(if self.token.is_cancelled() || kind.is_terminated() {
            ProcessExit::Terminated
        } else if kind.is_success() {
            ProcessExit::Success
        } else {
            ProcessExit::Failed(kind)
        })
    }
}

impl Drop for SupervisedChild {
    fn drop(&mut self) {
        self.slot.detach(self.attachment);
    }
}
