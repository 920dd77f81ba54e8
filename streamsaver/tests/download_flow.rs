//! End-to-end download runs against shell scripts standing in for the
//! download, probe and transcode tools.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use streamsaver::config::AppConfig;
use streamsaver::downloader::{
    DownloadManager, SessionInfo, SessionState, SessionStatus, VideoStatus,
};
use streamsaver::utils::hash::key_from_str;
use tempfile::TempDir;

const DOWNLOAD_TOOL: &str = r#"#!/bin/sh
name="clip-$$"
printf '%s\n' '[info] abc123: Downloading 1 format(s): 22'
printf '%s\n' "[download] Destination: $PWD/$name.webm"
printf '%s\n' '[progressbar] NA$$__$$1$$__$$1$$__$$Clip$$__$$  0.0% of 1.00MiB at 1.00MiB/s ETA 00:01'
printf '%s\r' '[progressbar] NA$$__$$1$$__$$1$$__$$Clip$$__$$ 50.0% of 1.00MiB at 1.00MiB/s ETA 00:01'
printf '%s\n' '[progressbar] NA$$__$$1$$__$$1$$__$$Clip$$__$$100.0% of 1.00MiB at 1.00MiB/s ETA 00:00'
printf '%s\n' '[download] Download completed'
echo video > "$name.mp4"
printf '%s\n' "[VideoRemuxer] Remuxing video from webm to mp4; Destination: $PWD/$name.mp4"
"#;

const PROBE_TOOL: &str = r#"#!/bin/sh
case "$*" in
    *format=duration*) echo 61.5 ;;
    *) echo 1280x720 ;;
esac
"#;

// Appends start/end markers to `<script>.log` so overlapping runs can be
// counted afterwards.
const TRANSCODE_TOOL: &str = r#"#!/bin/sh
echo start >> "$0.log"
prev=""
for arg in "$@"; do
    if [ "$arg" = "-loglevel" ]; then
        out="$prev"
    fi
    prev="$arg"
done
sleep 0.3
echo '#EXTM3U' > "$out"
echo end >> "$0.log"
"#;

const SLOW_TOOL: &str = r#"#!/bin/sh
printf '%s\n' '[info] abc123: Downloading 1 format(s): 22'
exec sleep 30
"#;

const COUNTED_FAILING_TOOL: &str = r#"#!/bin/sh
echo start >> "$0.log"
sleep 0.5
echo end >> "$0.log"
exit 1
"#;

const FAILING_TOOL: &str = r#"#!/bin/sh
echo 'ERROR: Unsupported URL' >&2
exit 1
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

struct Fixture {
    dir: TempDir,
    config: AppConfig,
}

impl Fixture {
    fn new(download_tool: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let download_dir = root.join("download");
        std::fs::create_dir_all(&download_dir).unwrap();

        let config = AppConfig {
            media_root: root.to_path_buf(),
            download_dir,
            hls_dir: root.join("hls"),
            ytdlp_path: write_script(root, "yt-dlp", download_tool),
            ffprobe_path: write_script(root, "ffprobe", PROBE_TOOL),
            ffmpeg_path: write_script(root, "ffmpeg", TRANSCODE_TOOL),
            ..AppConfig::default()
        };
        Self { dir, config }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

async fn wait_for<F>(manager: &DownloadManager, key: &str, done: F) -> SessionInfo
where
    F: Fn(&SessionInfo) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(info) = manager.session_info(key)
            && done(&info)
        {
            return info;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session {key} did not reach the expected state: {:?}",
            manager.session_info(key)
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Number of runs and the most that overlapped, from a tool's marker log.
fn overlap(log: &Path) -> (usize, usize) {
    let text = std::fs::read_to_string(log).unwrap();
    let (mut starts, mut running, mut peak) = (0, 0usize, 0);
    for marker in text.lines() {
        match marker {
            "start" => {
                starts += 1;
                running += 1;
                peak = peak.max(running);
            }
            "end" => running -= 1,
            other => panic!("unexpected marker {other:?}"),
        }
    }
    assert_eq!(running, 0, "every run should have finished");
    (starts, peak)
}

fn is_final(info: &SessionInfo) -> bool {
    matches!(
        info.status,
        SessionStatus::Completed | SessionStatus::Error | SessionStatus::Canceled
    )
}

#[tokio::test]
async fn single_video_is_downloaded_and_converted() {
    let fixture = Fixture::new(DOWNLOAD_TOOL);
    let manager = DownloadManager::new(&fixture.config);
    let url = "https://www.youtube.com/watch?v=abc123";
    let key = key_from_str(url);

    manager.new_download(&key, url);
    let info = wait_for(&manager, &key, is_final).await;

    assert_eq!(info.status, SessionStatus::Completed);
    assert!(info.finish_time.is_some());
    assert_eq!(info.title, "Clip");
    assert_eq!(info.videos.len(), 1);

    let video = &info.videos[0];
    assert_eq!(video.status, VideoStatus::Completed);
    assert_eq!(video.duration, "00:01:01.500");
    assert_eq!(video.resolution, "1280x720");
    assert_eq!(video.substreams[0].progress, 1.0);
    assert!(video.stream_url.starts_with("/hls/"));
    assert!(video.stream_url.ends_with(".m3u8"));

    let manifest = fixture.root().join(video.stream_url.trim_start_matches('/'));
    assert_eq!(std::fs::read_to_string(manifest).unwrap().trim(), "#EXTM3U");
}

#[tokio::test]
async fn failing_tool_ends_in_error() {
    let fixture = Fixture::new(FAILING_TOOL);
    let manager = DownloadManager::new(&fixture.config);
    let url = "https://example.com/unsupported";
    let key = key_from_str(url);

    manager.new_download(&key, url);
    let info = wait_for(&manager, &key, is_final).await;

    assert_eq!(info.status, SessionStatus::Error);
    assert!(info.videos.is_empty());
}

#[tokio::test]
async fn cancel_terminates_running_download() {
    let fixture = Fixture::new(SLOW_TOOL);
    let manager = DownloadManager::new(&fixture.config);
    let url = "https://example.com/slow";
    let key = key_from_str(url);

    manager.new_download(&key, url);
    wait_for(&manager, &key, |info| info.status == SessionStatus::Downloading).await;

    let downloader = manager.find_downloader(&key).unwrap();
    let session = downloader.session().unwrap();

    assert!(manager.cancel_download(&key));
    assert!(manager.session_info(&key).is_none());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while downloader.is_running() {
        assert!(tokio::time::Instant::now() < deadline, "download did not stop");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(session.lock().state(), SessionState::Canceled);
}

#[tokio::test]
async fn same_host_jobs_share_one_slot() {
    let mut fixture = Fixture::new(SLOW_TOOL);
    fixture.config.per_host_download_limit = 1;
    let manager = DownloadManager::new(&fixture.config);

    let urls = ["https://example.com/a", "https://example.com/b"];
    let keys: Vec<String> = urls.iter().map(|url| key_from_str(url)).collect();
    for (key, url) in keys.iter().zip(urls) {
        manager.new_download(key, url);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let statuses = loop {
        let statuses: Vec<SessionStatus> = keys
            .iter()
            .filter_map(|key| manager.session_info(key))
            .map(|info| info.status)
            .collect();
        if statuses.contains(&SessionStatus::Downloading) {
            break statuses;
        }
        assert!(tokio::time::Instant::now() < deadline, "no download started");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    let statuses_later: Vec<SessionStatus> = keys
        .iter()
        .filter_map(|key| manager.session_info(key))
        .map(|info| info.status)
        .collect();

    assert_eq!(statuses.len(), 2);
    assert_eq!(
        statuses_later
            .iter()
            .filter(|status| **status == SessionStatus::Wait)
            .count(),
        1
    );
    assert_eq!(manager.host_queue("example.com").available(), 0);

    // A job on another host is not held back.
    let other = "https://other.example.org/c";
    let other_key = key_from_str(other);
    manager.new_download(&other_key, other);
    wait_for(&manager, &other_key, |info| info.status == SessionStatus::Downloading).await;

    for key in keys.iter().chain([&other_key]) {
        manager.cancel_download(key);
    }
}

#[tokio::test]
async fn three_same_host_jobs_run_two_at_a_time() {
    let fixture = Fixture::new(COUNTED_FAILING_TOOL);
    assert_eq!(fixture.config.per_host_download_limit, 2);
    let manager = DownloadManager::new(&fixture.config);

    let keys: Vec<String> = ["https://example.com/1", "https://example.com/2", "https://example.com/3"]
        .into_iter()
        .map(|url| {
            let key = key_from_str(url);
            manager.new_download(&key, url);
            key
        })
        .collect();

    for key in &keys {
        let info = wait_for(&manager, key, is_final).await;
        assert_eq!(info.status, SessionStatus::Error);
    }

    let (starts, peak) = overlap(&fixture.root().join("yt-dlp.log"));
    assert_eq!(starts, 3);
    assert_eq!(peak, 2);
}

#[tokio::test]
async fn conversions_run_one_at_a_time() {
    let fixture = Fixture::new(DOWNLOAD_TOOL);
    let manager = DownloadManager::new(&fixture.config);

    // Different hosts, so both downloads finish together and their
    // conversions compete for the single slot.
    let keys: Vec<String> = ["https://a.example.com/v", "https://b.example.com/v"]
        .into_iter()
        .map(|url| {
            let key = key_from_str(url);
            manager.new_download(&key, url);
            key
        })
        .collect();

    for key in &keys {
        let info = wait_for(&manager, key, is_final).await;
        assert_eq!(info.status, SessionStatus::Completed);
        assert_eq!(info.videos[0].status, VideoStatus::Completed);
    }

    let (starts, peak) = overlap(&fixture.root().join("ffmpeg.log"));
    assert_eq!(starts, 2);
    assert_eq!(peak, 1);
}
