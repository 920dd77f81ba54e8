//! Small process-related helpers shared across the workspace.

use std::ffi::OsStr;
use std::process::ExitStatus;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// `SIGTERM` on every unix we target.
pub const SIGTERM: i32 = 15;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` for a background tool.
///
/// The child gets a null stdin, no console window on Windows, and is killed
/// if its handle is dropped before it was reaped.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.stdin(std::process::Stdio::null());
    cmd.kill_on_drop(true);
    cmd
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code zero.
    Success,
    /// Non-zero exit code.
    Code(i32),
    /// Killed by a signal (unix only).
    Signaled(i32),
    /// Neither a code nor a signal was reported.
    Unknown,
}

impl ExitKind {
    /// Classify an [`ExitStatus`].
    pub fn from_status(status: &ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return if code == 0 {
                Self::Success
            } else {
                Self::Code(code)
            };
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }

        Self::Unknown
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether the process was stopped by a termination request rather than
    /// failing on its own.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Signaled(SIGTERM))
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "exit status 0"),
            Self::Code(code) => write!(f, "exit status {code}"),
            Self::Signaled(SIGTERM) => write!(f, "signal: terminated"),
            Self::Signaled(signal) => write!(f, "signal: {signal}"),
            Self::Unknown => write!(f, "unknown exit status"),
        }
    }
}
