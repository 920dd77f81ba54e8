//! HLS conversion of downloaded videos.
//!
//! Every finished video is probed for duration and resolution, then queued
//! for conversion. Conversions share one global [`AdmissionQueue`]; each runs
//! as a task on its session's tracker so the downloader can wait for all of
//! them before settling the job's final status.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use process_utils::tokio_command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::admission::AdmissionQueue;
use super::process::{OutputStream, ProcessExit, ProcessSlot, SupervisedChild};
use super::session::{ReadyVideo, SharedSession};
use super::video::VideoStatus;
use crate::config::AppConfig;
use crate::utils::fs::ensure_dir_all_with_op;
use crate::utils::hash::key_from_str;
use crate::{Error, Result};

/// Stderr lines kept for the failure message.
const STDERR_TAIL: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSpecs {
    pub duration: String,
    pub resolution: String,
}

#[derive(Debug)]
pub struct ConversionPipeline {
    queue: AdmissionQueue,
    ffmpeg_path: String,
    ffprobe_path: String,
    media_root: PathBuf,
    hls_root: PathBuf,
    segment_secs: u32,
}

impl ConversionPipeline {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            queue: AdmissionQueue::new("conversion", config.conversion_limit),
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            media_root: config.media_root.clone(),
            hls_root: config.hls_dir.clone(),
            segment_secs: config.hls_segment_secs,
        }
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    /// Output manifest for a downloaded file: `<hls_root>/<hash>/<hash>.m3u8`.
    pub fn manifest_path(&self, input: &Path) -> PathBuf {
        let name = input
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        let hash = key_from_str(&name);
        self.hls_root.join(&hash).join(format!("{hash}.m3u8"))
    }

    /// Reads duration and resolution. Failures leave the fields empty.
    pub async fn probe(&self, input: &Path) -> FileSpecs {
        let duration = self
            .probe_value(
                &[
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ],
                input,
            )
            .await
            .and_then(|raw| format_duration(&raw))
            .unwrap_or_default();

        let resolution = self
            .probe_value(
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=width,height",
                    "-of",
                    "csv=s=x:p=0",
                ],
                input,
            )
            .await
            .unwrap_or_default();

        FileSpecs {
            duration,
            resolution,
        }
    }

    async fn probe_value(&self, args: &[&str], input: &Path) -> Option<String> {
        let output = match tokio_command(&self.ffprobe_path)
            .args(args)
            .arg(input)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(path = %input.display(), error = %e, "failed to run probe");
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                path = %input.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "probe failed"
            );
            return None;
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }

    /// Probes a finished video and queues its conversion on the session's tracker.
    ///
    /// Conversions still waiting for the global slot when `cancel` fires are
    /// abandoned and their video marked errored.
    pub async fn schedule(
        self: &Arc<Self>,
        session: &SharedSession,
        ready: ReadyVideo,
        cancel: CancellationToken,
    ) {
        let specs = self.probe(&ready.file_location).await;
        let manifest = self.manifest_path(&ready.file_location);

        let (tracker, slot, job_key) = {
            let mut session = session.lock();
            session.update_video(ready.index, |video| {
                video.duration = specs.duration;
                video.resolution = specs.resolution;
            });
            (
                session.conversions(),
                session.conversion_process(),
                session.id().to_string(),
            )
        };

        if let Some(dir) = manifest.parent()
            && let Err(e) = ensure_dir_all_with_op("creating conversion directory", dir).await
        {
            warn!(job_key = %job_key, error = %e, "cannot prepare conversion output");
            set_status(session, ready.index, VideoStatus::Error);
            return;
        }

        let pipeline = Arc::clone(self);
        let session = Arc::clone(session);
        tracker.spawn(async move {
            pipeline
                .convert(&session, &job_key, ready, manifest, slot, cancel)
                .await;
        });
    }

    async fn convert(
        &self,
        session: &SharedSession,
        job_key: &str,
        ready: ReadyVideo,
        manifest: PathBuf,
        slot: ProcessSlot,
        cancel: CancellationToken,
    ) {
        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job_key, video = ready.index, "conversion abandoned before start");
                set_status(session, ready.index, VideoStatus::Error);
                return;
            }
            permit = self.queue.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(job_key, error = %e, "conversion queue unavailable");
                    set_status(session, ready.index, VideoStatus::Error);
                    return;
                }
            },
        };

        set_status(session, ready.index, VideoStatus::Converting);
        info!(job_key, input = %ready.file_location.display(), "conversion started");

        let result = self
            .run_ffmpeg(&ready.file_location, &manifest, &slot)
            .await
            .and_then(|()| stream_url(&self.media_root, &manifest));
        drop(permit);

        match result {
            Ok(url) => {
                info!(job_key, manifest = %manifest.display(), "conversion completed");
                session.lock().update_video(ready.index, |video| {
                    video.stream_url = url;
                    video.status = VideoStatus::Completed;
                });
            }
            Err(e) => {
                warn!(job_key, error = %e, "conversion failed");
                set_status(session, ready.index, VideoStatus::Error);
            }
        }
    }

    async fn run_ffmpeg(&self, input: &Path, manifest: &Path, slot: &ProcessSlot) -> Result<()> {
        let mut cmd = tokio_command(&self.ffmpeg_path);
        cmd.arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-start_number", "0", "-hls_time"])
            .arg(self.segment_secs.to_string())
            .args(["-hls_list_size", "0", "-f", "hls"])
            .arg(manifest)
            .args(["-loglevel", "error"]);

        let mut child = SupervisedChild::spawn(cmd, &self.ffmpeg_path, slot, OutputStream::Stderr)?;

        let mut tail = Vec::with_capacity(STDERR_TAIL);
        while let Some(line) = child.next_record().await {
            debug!(program = %self.ffmpeg_path, "{line}");
            if tail.len() == STDERR_TAIL {
                tail.remove(0);
            }
            tail.push(line);
        }

        match child.wait().await? {
            ProcessExit::Success => Ok(()),
            exit => Err(Error::process(
                &self.ffmpeg_path,
                format!("{exit}: {}", tail.join("; ")),
            )),
        }
    }
}

fn set_status(session: &SharedSession, index: usize, status: VideoStatus) {
    session
        .lock()
        .update_video(index, |video| video.status = status);
}

/// Formats a probe duration in seconds as `HH:MM:SS`, or `HH:MM:SS.mmm` when
/// it has a sub-second part.
pub fn format_duration(raw: &str) -> Option<String> {
    let seconds: f64 = raw.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    let total_millis = (seconds * 1000.0).round() as u64;
    let millis = total_millis % 1000;
    let total_secs = total_millis / 1000;
    let (hours, minutes, secs) = (total_secs / 3600, total_secs / 60 % 60, total_secs % 60);

    Some(if millis == 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
    })
}

/// Public URL path of a generated manifest: relative to `media_root`, every
/// component percent-encoded, with a leading `/`.
pub fn stream_url(media_root: &Path, manifest: &Path) -> Result<String> {
    let relative = manifest.strip_prefix(media_root).map_err(|_| {
        Error::validation(format!(
            "{} is outside {}",
            manifest.display(),
            media_root.display()
        ))
    })?;

    let mut url = String::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                url.push('/');
                url.push_str(&urlencoding::encode(&part.to_string_lossy()));
            }
            Component::CurDir => {}
            other => {
                return Err(Error::validation(format!(
                    "unexpected path component {other:?} in {}",
                    manifest.display()
                )));
            }
        }
    }

    if url.is_empty() {
        return Err(Error::validation("empty stream path"));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_whole_seconds() {
        assert_eq!(format_duration("3725.000000").as_deref(), Some("01:02:05"));
        assert_eq!(format_duration("0").as_deref(), Some("00:00:00"));
    }

    #[test]
    fn formats_sub_seconds() {
        assert_eq!(format_duration("61.5\n").as_deref(), Some("00:01:01.500"));
        assert_eq!(format_duration("1.0004").as_deref(), Some("00:00:01"));
        assert_eq!(format_duration("1.9996").as_deref(), Some("00:00:02"));
    }

    #[test]
    fn rejects_bad_durations() {
        assert_eq!(format_duration("N/A"), None);
        assert_eq!(format_duration("-3"), None);
        assert_eq!(format_duration(""), None);
    }

    #[test]
    fn stream_url_is_relative_and_encoded() {
        let url = stream_url(
            Path::new("/media"),
            Path::new("/media/hls/ab-c_d/my clip#1.m3u8"),
        )
        .unwrap();
        assert_eq!(url, "/hls/ab-c_d/my%20clip%231.m3u8");
    }

    #[test]
    fn stream_url_rejects_paths_outside_root() {
        assert!(stream_url(Path::new("/media"), Path::new("/tmp/x.m3u8")).is_err());
        assert!(stream_url(Path::new("/media"), Path::new("/media")).is_err());
    }

    #[test]
    fn manifest_lives_in_hashed_directory() {
        let pipeline = ConversionPipeline::new(&AppConfig::default());
        let manifest = pipeline.manifest_path(Path::new("/media/download/Clip [abc].mp4"));
        let hash = key_from_str("Clip [abc].mp4");

        assert_eq!(
            manifest,
            PathBuf::from("/media/hls").join(&hash).join(format!("{hash}.m3u8"))
        );
    }

    #[tokio::test]
    async fn probe_failure_leaves_specs_empty() {
        let config = AppConfig {
            ffprobe_path: "/nonexistent/ffprobe".to_string(),
            ..AppConfig::default()
        };
        let pipeline = ConversionPipeline::new(&config);
        assert_eq!(
            pipeline.probe(Path::new("/nonexistent/video.mp4")).await,
            FileSpecs::default()
        );
    }
}
