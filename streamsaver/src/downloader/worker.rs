//! Supervisor of one job's download tool runs.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use process_utils::{ExitKind, tokio_command};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use super::admission::AdmissionQueue;
use super::conversion::ConversionPipeline;
use super::process::{OutputStream, ProcessExit, ProcessSlot, SupervisedChild};
use super::progress::FIELD_DELIMITER;
use super::protocol::{PROGRESS_BAR, ProtocolError, is_recognized};
use super::session::{Session, SharedSession};
use crate::Error;
use crate::config::AppConfig;

/// Where newly created sessions are published.
pub trait SessionRegistry: Send + Sync {
    fn post_session(&self, session: SharedSession);
}

/// How the download tool is invoked.
#[derive(Debug, Clone)]
pub struct DownloadTool {
    pub program: String,
    pub extra_args: Vec<String>,
    pub working_dir: PathBuf,
}

impl DownloadTool {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            program: config.ytdlp_path.clone(),
            extra_args: config.ytdlp_extra_args.clone(),
            working_dir: config.download_dir.clone(),
        }
    }

    /// Progress template producing the five-field `[progressbar]` lines.
    pub fn progress_template() -> String {
        let fields = [
            "%(info.playlist_title)s",
            "%(info.playlist_index)s",
            "%(info.n_entries)s",
            "%(info.title)s",
            "%(progress._percent_str)s of %(progress._total_bytes_str)s at %(progress._speed_str)s ETA %(progress._eta_str)s",
        ];
        format!("download:{PROGRESS_BAR} {}", fields.join(FIELD_DELIMITER))
    }

    pub fn command(&self, url: &str) -> Command {
        let mut cmd = tokio_command(&self.program);
        cmd.current_dir(&self.working_dir)
            .arg("--newline")
            .arg("--progress-template")
            .arg(Self::progress_template())
            .args(&self.extra_args)
            .arg(url);
        cmd
    }
}

/// One job: its URL, its current session and the processes running for it.
pub struct Downloader {
    key: String,
    url: String,
    tool: Arc<DownloadTool>,
    admission: AdmissionQueue,
    pipeline: Arc<ConversionPipeline>,
    registry: Arc<dyn SessionRegistry>,
    download_process: ProcessSlot,
    session: RwLock<Option<SharedSession>>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl fmt::Debug for Downloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloader")
            .field("key", &self.key)
            .field("url", &self.url)
            .field("queue", &self.admission.name())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Downloader {
    pub fn new(
        key: impl Into<String>,
        url: impl Into<String>,
        tool: Arc<DownloadTool>,
        admission: AdmissionQueue,
        pipeline: Arc<ConversionPipeline>,
        registry: Arc<dyn SessionRegistry>,
    ) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            tool,
            admission,
            pipeline,
            registry,
            download_process: ProcessSlot::new(),
            session: RwLock::new(None),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn session(&self) -> Option<SharedSession> {
        self.session.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts a fresh session in the background.
    ///
    /// Returns `false` without doing anything if a run is still in progress.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            info!(job_key = %self.key, "download still running, restart ignored");
            return false;
        }

        let session = Session::new(&self.key, &self.url).into_shared();
        *self.session.write() = Some(Arc::clone(&session));
        let cancel = {
            let mut token = self.cancel.lock();
            *token = CancellationToken::new();
            token.clone()
        };
        self.registry.post_session(Arc::clone(&session));

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(session, cancel).await;
            this.running.store(false, Ordering::SeqCst);
        });
        true
    }

    /// Requests termination of the download and conversion processes.
    ///
    /// Returns `true` if at least one process was signalled. Does not wait.
    pub fn terminate(&self) -> bool {
        let download = self.download_process.terminate();
        let conversion = match self.session() {
            Some(session) => {
                let slot = session.lock().conversion_process();
                slot.terminate()
            }
            None => false,
        };
        download || conversion
    }

    /// Terminates running processes and abandons queued work.
    pub fn cancel(&self) -> bool {
        self.cancel.lock().cancel();
        self.terminate()
    }

    async fn run(&self, session: SharedSession, cancel: CancellationToken) {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(job_key = %self.key, "canceled while queued");
                let mut session = session.lock();
                session.mark_canceled();
                session.finalize();
                return;
            }
            permit = self.admission.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    error!(job_key = %self.key, error = %e, "admission failed");
                    session.lock().finalize();
                    return;
                }
            },
        };

        info!(job_key = %self.key, host = %self.admission.name(), "download started");
        let exit = self.download(&session, &cancel).await;

        let ready = session.lock().finish_download(&exit);
        if let Some(ready) = ready {
            self.pipeline.schedule(&session, ready, cancel.clone()).await;
        }
        drop(permit);

        let conversions = session.lock().conversions();
        conversions.close();
        conversions.wait().await;

        let status = {
            let mut session = session.lock();
            session.finalize();
            session.status()
        };
        info!(job_key = %self.key, %exit, ?status, "download finished");
    }

    async fn download(&self, session: &SharedSession, cancel: &CancellationToken) -> ProcessExit {
        let cmd = self.tool.command(&self.url);
        let mut child = match SupervisedChild::spawn(
            cmd,
            &self.tool.program,
            &self.download_process,
            OutputStream::Stdout,
        ) {
            Ok(child) => child,
            Err(e) => {
                error!(job_key = %self.key, error = %e, "failed to start download tool");
                return ProcessExit::Failed(ExitKind::Unknown);
            }
        };

        // A cancel that raced the spawn found no process to signal.
        if cancel.is_cancelled() {
            self.download_process.terminate();
        }

        while let Some(line) = child.next_record().await {
            self.handle_line(session, &line, cancel).await;
        }

        match child.wait().await {
            Ok(exit) => exit,
            Err(e) => {
                error!(job_key = %self.key, error = %e, "failed to wait for download tool");
                ProcessExit::Failed(ExitKind::Unknown)
            }
        }
    }

    async fn handle_line(&self, session: &SharedSession, line: &str, cancel: &CancellationToken) {
        trace!(job_key = %self.key, "{line}");
        if !is_recognized(line) {
            return;
        }

        let parsed = session.lock().parse(line);
        match parsed {
            Ok(Some(ready)) => {
                self.pipeline.schedule(session, ready, cancel.clone()).await;
            }
            Ok(None) | Err(ProtocolError::Terminal(_)) => {}
            Err(e) => {
                session.lock().mark_current_video_error();
                let err = Error::from(e);
                warn!(job_key = %self.key, error = %err, "terminating download");
                self.terminate();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_layout() {
        let tool = DownloadTool {
            program: "yt-dlp".to_string(),
            extra_args: vec!["-f".to_string(), "best".to_string()],
            working_dir: PathBuf::from("/tmp"),
        };
        let cmd = tool.command("https://example.com/v");
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], "--newline");
        assert_eq!(args[1], "--progress-template");
        assert!(args[2].starts_with("download:[progressbar] "));
        assert_eq!(args[2].matches(FIELD_DELIMITER).count(), 4);
        assert_eq!(&args[3..], ["-f", "best", "https://example.com/v"]);
    }
}
