//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! reduce duplicated `create_dir_all` calls.

use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_nested_directories() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("hls").join("abc");

        ensure_dir_all_with_op("creating stream directory", &nested)
            .await
            .unwrap();
        assert!(nested.is_dir());

        // Existing directories are fine.
        ensure_dir_all_with_op("creating stream directory", &nested)
            .await
            .unwrap();
    }

    #[test]
    fn reports_operation_and_path() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain-file");
        std::fs::write(&file, b"x").unwrap();

        let err = ensure_dir_all_sync_with_op("creating log directory", &file.join("sub"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("creating log directory"));
        assert!(msg.contains("plain-file"));
    }
}
