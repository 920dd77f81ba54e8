//! Shared helpers.

pub mod fs;
pub mod hash;
pub mod time;
pub mod url;
