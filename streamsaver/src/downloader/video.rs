//! Per-item records tracked by a session.

use serde::Serialize;

use super::progress::ProgressBar;

/// Status of one video, serialized with the labels clients display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VideoStatus {
    #[serde(rename = "New Video")]
    New,
    #[serde(rename = "Downloading")]
    Downloading,
    #[serde(rename = "Merging")]
    Merging,
    #[serde(rename = "Remuxing")]
    Remuxing,
    #[serde(rename = "Conversion pending")]
    AwaitingConversion,
    #[serde(rename = "Converting")]
    Converting,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Error")]
    Error,
    #[serde(rename = "Paused")]
    Paused,
}

impl VideoStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Progress of one media track within a video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubStreamInfo {
    pub id: usize,
    pub progress: f64,
    pub size: String,
    pub speed: String,
    pub eta: String,
}

impl SubStreamInfo {
    fn new(id: usize) -> Self {
        Self {
            id,
            progress: 0.0,
            size: String::new(),
            speed: String::new(),
            eta: String::new(),
        }
    }
}

/// One playable item of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Video {
    pub id: u32,
    pub title: String,
    pub status: VideoStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub substreams: Vec<SubStreamInfo>,
    #[serde(rename = "filelocation")]
    pub file_location: String,
    #[serde(rename = "streamurl")]
    pub stream_url: String,
    pub duration: String,
    pub resolution: String,
}

impl Video {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            title: String::new(),
            status: VideoStatus::New,
            substreams: Vec::new(),
            file_location: String::new(),
            stream_url: String::new(),
            duration: String::new(),
            resolution: String::new(),
        }
    }

    /// Starts tracking a new destination file. Returns its index.
    pub fn add_substream(&mut self) -> usize {
        let id = self.substreams.len();
        self.substreams.push(SubStreamInfo::new(id));
        id
    }

    /// The substream progress lines currently apply to.
    pub fn current_substream_mut(&mut self) -> Option<&mut SubStreamInfo> {
        self.substreams.last_mut()
    }

    /// Copies a progress record onto this video and its current substream.
    pub fn apply_progress(&mut self, bar: &ProgressBar) {
        self.id = bar.playlist_index;
        self.title.clone_from(&bar.title);
        if let Some(sub) = self.current_substream_mut() {
            sub.progress = bar.progress;
            sub.size.clone_from(&bar.size);
            sub.speed.clone_from(&bar.speed);
            sub.eta.clone_from(&bar.eta);
        }
    }
}
