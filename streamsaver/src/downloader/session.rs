//! Per-job state machine driven by the download tool's output.
//!
//! A [`Session`] consumes recognized output lines one at a time and keeps the
//! job's videos, substreams and playlist position current. The externally
//! visible [`SessionStatus`] is always derived from the internal
//! [`SessionState`]; it is never stored.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::process::{ProcessExit, ProcessSlot};
use super::progress::parse_progress_bar;
use super::protocol::{
    ALREADY_DOWNLOADED, DESTINATION, DOWNLOAD_COMPLETED, FORMAT_COUNT, MERGER, PLAYLIST_FINISHED,
    PLAYLIST_ITEM, PLAYLIST_TITLE, PROGRESS_BAR, ProtocolError, REMUXER, RESUMING,
    extract_file_location, parse_playlist_position,
};
use super::video::{Video, VideoStatus};
use crate::utils::time::{serialize_seconds, serialize_seconds_opt};

/// A session shared between its downloader, its conversions and readers.
///
/// The lock is never held across an `.await`.
pub type SharedSession = Arc<Mutex<Session>>;

/// Internal protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Wait,
    PlaylistTitle,
    PlaylistSeq,
    NewVideo,
    DownloadResume,
    DownloadStart,
    DownloadInProgress,
    DownloadComplete,
    Merge,
    Remux,
    HlsConversion,
    SessionComplete,
    Canceled,
    Paused,
    Error,
}

impl SessionState {
    /// The only mapping from internal state to external status.
    pub fn status(self) -> SessionStatus {
        match self {
            Self::Wait => SessionStatus::Wait,
            Self::SessionComplete => SessionStatus::Completed,
            Self::Canceled => SessionStatus::Canceled,
            Self::Paused => SessionStatus::Paused,
            Self::Error => SessionStatus::Error,
            Self::PlaylistTitle
            | Self::PlaylistSeq
            | Self::NewVideo
            | Self::DownloadResume
            | Self::DownloadStart
            | Self::DownloadInProgress
            | Self::DownloadComplete
            | Self::Merge
            | Self::Remux
            | Self::HlsConversion => SessionStatus::Downloading,
        }
    }

    /// States no output line or exit can move the session out of.
    pub fn is_absorbing(self) -> bool {
        matches!(self, Self::Canceled | Self::Error)
    }

    /// States in which output lines are no longer expected.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            Self::SessionComplete | Self::Canceled | Self::Paused | Self::Error
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Wait,
    Downloading,
    Completed,
    Canceled,
    Paused,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A video whose file is on disk and can be handed to conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyVideo {
    pub index: usize,
    pub file_location: PathBuf,
}

/// Serializable point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    #[serde(serialize_with = "serialize_seconds")]
    pub start_time: DateTime<Local>,
    #[serde(serialize_with = "serialize_seconds_opt")]
    pub finish_time: Option<DateTime<Local>>,
    #[serde(rename = "urlraw")]
    pub url: String,
    pub status: SessionStatus,
    pub title: String,
    pub playlist_count: u32,
    pub playlist_index: u32,
    pub is_playlist: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<Video>,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    url: String,
    started_at: DateTime<Local>,
    finished_at: Option<DateTime<Local>>,
    state: SessionState,
    title: String,
    playlist_count: u32,
    playlist_index: u32,
    is_playlist: bool,
    videos: Vec<Video>,
    current_video: Option<usize>,
    conversions: TaskTracker,
    conversion_process: ProcessSlot,
}

impl Session {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            started_at: Local::now(),
            finished_at: None,
            state: SessionState::Wait,
            title: String::new(),
            playlist_count: 1,
            playlist_index: 1,
            is_playlist: false,
            videos: Vec::new(),
            current_video: None,
            conversions: TaskTracker::new(),
            conversion_process: ProcessSlot::new(),
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_playlist(&self) -> bool {
        self.is_playlist
    }

    pub fn playlist_count(&self) -> u32 {
        self.playlist_count
    }

    pub fn playlist_index(&self) -> u32 {
        self.playlist_index
    }

    pub fn videos(&self) -> &[Video] {
        &self.videos
    }

    pub fn current_video(&self) -> Option<&Video> {
        self.current_video.and_then(|i| self.videos.get(i))
    }

    pub fn finished_at(&self) -> Option<DateTime<Local>> {
        self.finished_at
    }

    /// Tracker for the conversion tasks this session spawned.
    pub fn conversions(&self) -> TaskTracker {
        self.conversions.clone()
    }

    /// Slot holding the conversion process currently running for this session.
    pub fn conversion_process(&self) -> ProcessSlot {
        self.conversion_process.clone()
    }

    /// Feeds one recognized output line to the state machine.
    ///
    /// Returns the video that became ready for conversion, if this line
    /// closed one. A line that does not fit the current state forces the
    /// session into [`SessionState::Error`], except after the session has
    /// already finished, where the state is left untouched.
    pub fn parse(&mut self, line: &str) -> Result<Option<ReadyVideo>, ProtocolError> {
        if self.state.is_finished() {
            return Err(ProtocolError::Terminal(self.state));
        }

        let before = self.state;
        match self.transition(line) {
            Ok(ready) => {
                if before != self.state {
                    debug!(job_key = %self.id, from = ?before, to = ?self.state, "session transition");
                }
                Ok(ready)
            }
            Err(e) => {
                warn!(job_key = %self.id, state = ?before, error = %e, "protocol violation");
                self.state = SessionState::Error;
                Err(e)
            }
        }
    }

    fn transition(&mut self, line: &str) -> Result<Option<ReadyVideo>, ProtocolError> {
        use SessionState::*;

        let is_destination = line.contains(DESTINATION) || line.contains(ALREADY_DOWNLOADED);
        let is_progress = line.starts_with(PROGRESS_BAR);

        match self.state {
            Wait if line.starts_with(PLAYLIST_TITLE) => {
                self.title = line[PLAYLIST_TITLE.len()..].trim().to_string();
                self.is_playlist = true;
                self.state = PlaylistTitle;
            }
            Wait | PlaylistSeq if line.contains(FORMAT_COUNT) => self.begin_video(),
            PlaylistTitle if line.contains(PLAYLIST_ITEM) => {
                self.set_playlist_position(line)?;
                self.state = PlaylistSeq;
            }
            NewVideo | DownloadComplete if is_destination => self.begin_substream(),
            NewVideo if line.starts_with(RESUMING) => self.state = DownloadResume,
            DownloadResume if line.contains(DESTINATION) => self.begin_substream(),
            DownloadStart | DownloadInProgress if is_progress => {
                self.apply_progress(line)?;
                self.state = DownloadInProgress;
            }
            DownloadStart | DownloadComplete | Merge if line.contains(REMUXER) => {
                self.begin_remux(line);
            }
            DownloadInProgress if line.contains(DOWNLOAD_COMPLETED) => {
                self.state = DownloadComplete;
            }
            DownloadComplete if line.contains(MERGER) => {
                self.set_current_status(VideoStatus::Merging);
                self.state = Merge;
            }
            Remux if line.contains(PLAYLIST_ITEM) => {
                self.set_playlist_position(line)?;
                let ready = self.close_current_video();
                self.state = PlaylistSeq;
                return Ok(ready);
            }
            Remux if self.is_playlist && line.contains(PLAYLIST_FINISHED) => {
                let ready = self.close_current_video();
                self.state = HlsConversion;
                return Ok(ready);
            }
            state => {
                return Err(ProtocolError::UnexpectedLine {
                    state,
                    line: line.to_string(),
                });
            }
        }

        Ok(None)
    }

    fn begin_video(&mut self) {
        let id = if self.is_playlist {
            self.playlist_index
        } else {
            1
        };
        self.videos.push(Video::new(id));
        self.current_video = Some(self.videos.len() - 1);
        self.state = SessionState::NewVideo;
    }

    fn begin_substream(&mut self) {
        if let Some(video) = self.current_video_mut() {
            video.add_substream();
        }
        self.state = SessionState::DownloadStart;
    }

    fn apply_progress(&mut self, line: &str) -> Result<(), ProtocolError> {
        let bar = parse_progress_bar(line)?;
        let is_playlist = self.is_playlist;

        let Some(video) = self.current_video_mut() else {
            return Ok(());
        };
        video.apply_progress(&bar);
        video.status = VideoStatus::Downloading;
        if !is_playlist {
            let title = video.title.clone();
            self.title = title;
        }
        Ok(())
    }

    fn begin_remux(&mut self, line: &str) {
        let location = extract_file_location(line);
        if let Some(video) = self.current_video_mut() {
            video.status = VideoStatus::Remuxing;
            match location {
                Some(location) => video.file_location = location,
                None => debug!(line, "remuxer line without a file location"),
            }
        }
        self.state = SessionState::Remux;
    }

    fn set_playlist_position(&mut self, line: &str) -> Result<(), ProtocolError> {
        let (index, count) = parse_playlist_position(line)
            .ok_or_else(|| ProtocolError::PlaylistPosition(line.to_string()))?;
        self.playlist_index = index;
        self.playlist_count = count;
        Ok(())
    }

    fn current_video_mut(&mut self) -> Option<&mut Video> {
        self.current_video.and_then(|i| self.videos.get_mut(i))
    }

    fn set_current_status(&mut self, status: VideoStatus) {
        if let Some(video) = self.current_video_mut() {
            video.status = status;
        }
    }

    /// Marks the current video as waiting for conversion.
    ///
    /// A video whose file location never appeared cannot be converted and is
    /// marked errored instead.
    fn close_current_video(&mut self) -> Option<ReadyVideo> {
        let index = self.current_video?;
        let job_key = self.id.clone();
        let video = self.videos.get_mut(index)?;

        if video.file_location.is_empty() {
            warn!(job_key = %job_key, video = video.id, "video finished without a file location");
            video.status = VideoStatus::Error;
            return None;
        }

        video.status = VideoStatus::AwaitingConversion;
        Some(ReadyVideo {
            index,
            file_location: PathBuf::from(&video.file_location),
        })
    }

    /// Applies the download tool's exit to the state machine.
    ///
    /// A clean exit while remuxing closes the last video and moves on to
    /// conversion. A termination request cancels the session and any other
    /// failure errors it, unless it already ended in error or cancellation.
    pub fn finish_download(&mut self, exit: &ProcessExit) -> Option<ReadyVideo> {
        if self.state.is_absorbing() {
            return None;
        }

        match exit {
            ProcessExit::Terminated => {
                self.state = SessionState::Canceled;
                None
            }
            ProcessExit::Failed(kind) => {
                warn!(job_key = %self.id, state = ?self.state, exit = %kind, "download tool failed");
                self.state = SessionState::Error;
                None
            }
            ProcessExit::Success if self.state == SessionState::Remux => {
                let ready = self.close_current_video();
                self.state = SessionState::HlsConversion;
                ready
            }
            ProcessExit::Success => None,
        }
    }

    /// Computes the final state once the download and its conversions ended.
    pub fn finalize(&mut self) {
        self.state = match self.state {
            SessionState::HlsConversion | SessionState::SessionComplete => {
                SessionState::SessionComplete
            }
            SessionState::Canceled => SessionState::Canceled,
            _ => SessionState::Error,
        };
        self.finished_at = Some(Local::now());
    }

    /// Cancels a session that never got to run its download.
    pub fn mark_canceled(&mut self) {
        if !self.state.is_finished() {
            self.state = SessionState::Canceled;
        }
        self.finished_at.get_or_insert_with(Local::now);
    }

    pub fn mark_current_video_error(&mut self) {
        self.set_current_status(VideoStatus::Error);
    }

    /// Runs `f` on the video at `index`, if it exists.
    pub fn update_video<F>(&mut self, index: usize, f: F)
    where
        F: FnOnce(&mut Video),
    {
        if let Some(video) = self.videos.get_mut(index) {
            f(video);
        }
    }

    pub fn snapshot(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            start_time: self.started_at,
            finish_time: self.finished_at,
            url: self.url.clone(),
            status: self.status(),
            title: self.title.clone(),
            playlist_count: self.playlist_count,
            playlist_index: self.playlist_index,
            is_playlist: self.is_playlist,
            videos: self.videos.clone(),
        }
    }
}
