//! Service configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::{Error, Result};

/// Paths, tool locations and concurrency limits of the download engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Root against which stream URLs are made relative.
    pub media_root: PathBuf,
    /// Working directory of the download tool.
    pub download_dir: PathBuf,
    /// Root of generated conversion directories.
    pub hls_dir: PathBuf,
    pub ytdlp_path: String,
    /// Extra arguments placed before the URL.
    pub ytdlp_extra_args: Vec<String>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Concurrent downloads allowed per destination host.
    pub per_host_download_limit: usize,
    /// Concurrent conversions allowed system-wide.
    pub conversion_limit: usize,
    pub hls_segment_secs: u32,
    pub log_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("/media"),
            download_dir: PathBuf::from("/media/download"),
            hls_dir: PathBuf::from("/media/hls"),
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_extra_args: Vec::new(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            per_host_download_limit: 2,
            conversion_limit: 1,
            hls_segment_secs: 10,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl AppConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Supported env vars: `MEDIA_ROOT`, `DOWNLOAD_DIR`, `HLS_DIR`,
    /// `YTDLP_PATH`, `YTDLP_EXTRA_ARGS`, `FFMPEG_PATH`, `FFPROBE_PATH`,
    /// `PER_HOST_DOWNLOAD_LIMIT`, `CONVERSION_LIMIT`, `HLS_SEGMENT_SECS`,
    /// `LOG_DIR`.
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env_or_default`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("MEDIA_ROOT") {
            config.media_root = PathBuf::from(value);
        }
        if let Some(value) = get("DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(value);
        }
        if let Some(value) = get("HLS_DIR") {
            config.hls_dir = PathBuf::from(value);
        }
        if let Some(value) = get("YTDLP_PATH") {
            config.ytdlp_path = value;
        }
        if let Some(value) = get("YTDLP_EXTRA_ARGS") {
            config.ytdlp_extra_args = value.split_whitespace().map(str::to_string).collect();
        }
        if let Some(value) = get("FFMPEG_PATH") {
            config.ffmpeg_path = value;
        }
        if let Some(value) = get("FFPROBE_PATH") {
            config.ffprobe_path = value;
        }
        if let Some(value) = get("LOG_DIR") {
            config.log_dir = PathBuf::from(value);
        }

        parse_into(&get, "PER_HOST_DOWNLOAD_LIMIT", &mut config.per_host_download_limit);
        parse_into(&get, "CONVERSION_LIMIT", &mut config.conversion_limit);
        parse_into(&get, "HLS_SEGMENT_SECS", &mut config.hls_segment_secs);

        config
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.per_host_download_limit == 0 {
            return Err(Error::config("PER_HOST_DOWNLOAD_LIMIT must be at least 1"));
        }
        if self.conversion_limit == 0 {
            return Err(Error::config("CONVERSION_LIMIT must be at least 1"));
        }
        if self.hls_segment_secs == 0 {
            return Err(Error::config("HLS_SEGMENT_SECS must be at least 1"));
        }
        if !self.hls_dir.starts_with(&self.media_root) {
            return Err(Error::config(format!(
                "HLS_DIR {} must be inside MEDIA_ROOT {}",
                self.hls_dir.display(),
                self.media_root.display()
            )));
        }
        Ok(())
    }
}

fn parse_into<T, G>(get: &G, key: &str, target: &mut T)
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "ignoring invalid numeric setting"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]);
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.per_host_download_limit, 2);
        assert_eq!(config.conversion_limit, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("MEDIA_ROOT", "/srv/media"),
            ("HLS_DIR", "/srv/media/hls"),
            ("YTDLP_EXTRA_ARGS", "  -f  best --no-mtime "),
            ("PER_HOST_DOWNLOAD_LIMIT", "4"),
            ("HLS_SEGMENT_SECS", "6"),
        ]);
        assert_eq!(config.media_root, PathBuf::from("/srv/media"));
        assert_eq!(config.ytdlp_extra_args, ["-f", "best", "--no-mtime"]);
        assert_eq!(config.per_host_download_limit, 4);
        assert_eq!(config.hls_segment_secs, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_numbers_keep_defaults() {
        let config = load(&[("PER_HOST_DOWNLOAD_LIMIT", "many"), ("CONVERSION_LIMIT", "-1")]);
        assert_eq!(config.per_host_download_limit, 2);
        assert_eq!(config.conversion_limit, 1);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = load(&[("YTDLP_PATH", "   ")]);
        assert_eq!(config.ytdlp_path, "yt-dlp");
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let config = load(&[("CONVERSION_LIMIT", "0")]);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn validate_rejects_hls_outside_media_root() {
        let config = load(&[("HLS_DIR", "/tmp/hls")]);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }
}
