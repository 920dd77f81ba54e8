//! Download orchestration engine.
//!
//! - `progress`, `protocol`: parsing of the download tool's output
//! - `session`, `video`: per-job state machine and its records
//! - `admission`: bounded slot pools for per-host and conversion limits
//! - `process`: child process supervision and output reading
//! - `conversion`: probing and HLS conversion of finished videos
//! - `worker`: one job's download runs
//! - `manager`: the registry callers talk to

pub mod admission;
pub mod conversion;
pub mod process;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod video;

mod manager;
mod worker;

pub use admission::{AdmissionPermit, AdmissionQueue};
pub use conversion::{ConversionPipeline, FileSpecs};
pub use manager::{DownloadManager, SessionList};
pub use process::{ProcessExit, ProcessSlot};
pub use progress::{ProgressBar, ProgressParseError, parse_progress_bar};
pub use protocol::ProtocolError;
pub use session::{ReadyVideo, Session, SessionInfo, SessionState, SessionStatus, SharedSession};
pub use video::{SubStreamInfo, Video, VideoStatus};
pub use worker::{DownloadTool, Downloader, SessionRegistry};
