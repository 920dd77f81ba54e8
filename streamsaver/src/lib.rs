//! StreamSaver library crate.
//!
//! Concurrent download orchestration around an external download tool, with
//! per-host admission control and HLS conversion of finished videos.

pub mod api;
pub mod config;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod utils;

pub use error::{Error, Result};
