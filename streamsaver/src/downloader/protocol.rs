//! Line grammar of the download tool's stdout.
//!
//! Only lines tagged with one of [`RECOGNIZED_PREFIXES`] reach the session
//! state machine. The marker constants below are matched literally.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::progress::ProgressParseError;
use super::session::SessionState;

pub const PLAYLIST_TITLE: &str = "[download] Downloading playlist: ";
pub const PLAYLIST_ITEM: &str = "[download] Downloading item ";
pub const FORMAT_COUNT: &str = "Downloading 1 format(s)";
pub const DESTINATION: &str = "[download] Destination: ";
pub const ALREADY_DOWNLOADED: &str = "has already been downloaded";
pub const RESUMING: &str = "[download] Resuming download";
pub const PROGRESS_BAR: &str = "[progressbar]";
pub const DOWNLOAD_COMPLETED: &str = "[download] Download completed";
pub const REMUXER: &str = "[VideoRemuxer]";
pub const MERGER: &str = "[Merger] Merging formats";
pub const PLAYLIST_FINISHED: &str = "[download] Finished downloading playlist";

/// Tags of the lines the session cares about.
pub const RECOGNIZED_PREFIXES: [&str; 5] = [
    "[download]",
    "[info]",
    PROGRESS_BAR,
    "[Merger]",
    REMUXER,
];

static PLAYLIST_POSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Downloading item (\d+) of (\d+)").expect("valid playlist position regex")
});
static QUOTED_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(.+)""#).expect("valid quoted path regex"));
static REMUX_DESTINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Destination: (.+)").expect("valid destination regex"));

/// Failures of the session parser.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("unexpected line in state {state:?}: {line}")]
    UnexpectedLine { state: SessionState, line: String },

    #[error("cannot read playlist position from: {0}")]
    PlaylistPosition(String),

    #[error("malformed progress bar: {0}")]
    Progress(#[from] ProgressParseError),

    #[error("session already finished in state {0:?}")]
    Terminal(SessionState),
}

/// Whether a raw output line should be forwarded to the session.
pub fn is_recognized(line: &str) -> bool {
    RECOGNIZED_PREFIXES
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

/// Reads `N of M` from a playlist item announcement.
pub fn parse_playlist_position(line: &str) -> Option<(u32, u32)> {
    let caps = PLAYLIST_POSITION_RE.captures(line)?;
    let index = caps[1].parse().ok()?;
    let count = caps[2].parse().ok()?;
    Some((index, count))
}

/// Extracts the final file path from a remuxer line.
///
/// The tool either skips remuxing and quotes the existing file, or reports
/// the new destination.
pub fn extract_file_location(line: &str) -> Option<String> {
    let caps = if line.contains("Not remuxing") {
        QUOTED_PATH_RE.captures(line)
    } else if line.contains("Remuxing video") {
        REMUX_DESTINATION_RE.captures(line)
    } else {
        None
    }?;

    let path = caps[1].trim();
    (!path.is_empty()).then(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_noise() {
        assert!(is_recognized("[download] Destination: a.mp4"));
        assert!(is_recognized("[info] abc: Downloading 1 format(s): 22"));
        assert!(is_recognized("[progressbar] NA$$__$$1$$__$$1$$__$$t$$__$$1%"));
        assert!(is_recognized("[Merger] Merging formats into \"a.mkv\""));
        assert!(is_recognized("[VideoRemuxer] Not remuxing media file \"a.mp4\""));

        assert!(!is_recognized("[youtube] abc: Downloading webpage"));
        assert!(!is_recognized("WARNING: something"));
        assert!(!is_recognized(""));
        assert!(!is_recognized("  [download] Destination: a.mp4"));
    }

    #[test]
    fn reads_playlist_position() {
        assert_eq!(
            parse_playlist_position("[download] Downloading item 3 of 12"),
            Some((3, 12))
        );
        assert_eq!(parse_playlist_position("[download] Downloading item x of y"), None);
    }

    #[test]
    fn extracts_not_remuxing_path() {
        let line = r#"[VideoRemuxer] Not remuxing media file "/media/download/My Video [abc].mp4"; already is in target format mp4"#;
        assert_eq!(
            extract_file_location(line).as_deref(),
            Some("/media/download/My Video [abc].mp4")
        );
    }

    #[test]
    fn extracts_remuxed_destination() {
        let line = "[VideoRemuxer] Remuxing video from webm to mp4; Destination: /media/download/clip.mp4";
        assert_eq!(
            extract_file_location(line).as_deref(),
            Some("/media/download/clip.mp4")
        );
    }

    #[test]
    fn unknown_remuxer_line_has_no_location() {
        assert_eq!(extract_file_location("[VideoRemuxer] something else"), None);
        assert_eq!(extract_file_location("[VideoRemuxer] Not remuxing media file"), None);
    }
}
