//! Parser for the download tool's `[progressbar]` lines.
//!
//! The tool is configured to print progress as five fields joined by
//! [`FIELD_DELIMITER`]:
//!
//! `playlist$$__$$playlist_index$$__$$playlist_count$$__$$title$$__$$remainder`
//!
//! where the free-text remainder carries percentage, size, speed and ETA in
//! the tool's own formatting (`42.0%`, `10.50MiB`, `1.20MiB/s`, `01:02`).

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::protocol::PROGRESS_BAR;

/// Literal separator between progress-bar fields.
pub const FIELD_DELIMITER: &str = "$$__$$";

const FIELD_COUNT: usize = 5;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)%").expect("valid percent regex"));
static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+[KMGT]iB)").expect("valid size regex"));
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+[KMGT]iB/s)").expect("valid speed regex"));
static ETA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"((?:\d{2}:){1,2}\d{2})").expect("valid eta regex"));

/// Reasons a progress-bar line cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressParseError {
    #[error("expected {FIELD_COUNT} fields, found {0}")]
    FieldCount(usize),
    #[error("progress line has no title")]
    MissingTitle,
}

/// One parsed progress-bar line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressBar {
    pub playlist: String,
    pub playlist_index: u32,
    pub playlist_count: u32,
    pub title: String,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    pub size: String,
    pub speed: String,
    pub eta: String,
}

/// Parse one progress-bar line.
///
/// Index and count fall back to `1` when not numeric (the tool prints `NA`
/// outside playlists). Percentage, size, speed and ETA are each optional and
/// left empty (or `0.0`) when absent. Only a short field list or an empty
/// title is an error.
pub fn parse_progress_bar(line: &str) -> Result<ProgressBar, ProgressParseError> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if fields.len() < FIELD_COUNT {
        return Err(ProgressParseError::FieldCount(fields.len()));
    }

    let title = fields[3].trim();
    if title.is_empty() {
        return Err(ProgressParseError::MissingTitle);
    }

    let playlist = fields[0]
        .trim_start()
        .strip_prefix(PROGRESS_BAR)
        .unwrap_or(fields[0])
        .trim();

    // The title is the fourth field only. A title containing the delimiter
    // is cut there and its tail lands in the remainder.
    let remainder = fields[FIELD_COUNT - 1..].join(FIELD_DELIMITER);

    Ok(ProgressBar {
        playlist: playlist.to_string(),
        playlist_index: parse_count(fields[1]),
        playlist_count: parse_count(fields[2]),
        title: title.to_string(),
        progress: parse_percent(&remainder),
        size: first_capture(&SIZE_RE, &remainder),
        speed: first_capture(&SPEED_RE, &remainder),
        eta: first_capture(&ETA_RE, &remainder),
    })
}

fn parse_count(field: &str) -> u32 {
    field.trim().parse().unwrap_or(1)
}

fn parse_percent(remainder: &str) -> f64 {
    PERCENT_RE
        .captures(remainder)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| (value / 100.0).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

fn first_capture(re: &Regex, haystack: &str) -> String {
    re.captures(haystack)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}
