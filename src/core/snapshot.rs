//! Snapshot capture.
//!
//! Reads the current state of a file before anything writes it. A missing
//! file is a valid snapshot (`existed = false`); a read failure, including
//! content that is not UTF-8 text, is reported as
//! [`SnapshotCaptureResult::Skipped`] and leaves the file unrecoverable by
//! in-batch rollback.

use super::files::DeviceFiles;
use crate::models::snapshot::{Snapshot, SnapshotCaptureResult};

/// Capture one file.
pub async fn capture(files: &DeviceFiles<'_>, path: &str) -> SnapshotCaptureResult {
    match files.read(path).await {
        Ok(Some(content)) => SnapshotCaptureResult::Captured(Snapshot::existing(content)),
        Ok(None) => SnapshotCaptureResult::Captured(Snapshot::absent()),
        Err(e) => SnapshotCaptureResult::Skipped {
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryRemote;
    use crate::services::remote::{CommandKind, RemoteClient};
    use std::time::Duration;

    #[tokio::test]
    async fn test_capture_states() {
        let remote = MemoryRemote::new();
        remote.put_file("h", "/etc/present", "v1\n").fail(
            "h",
            CommandKind::ReadFile,
            "/etc/locked",
        );
        let conn = remote.connect("h").await.unwrap();
        let files = DeviceFiles::new(conn.as_ref(), Duration::from_secs(1));

        match capture(&files, "/etc/present").await {
            SnapshotCaptureResult::Captured(s) => {
                assert!(s.existed);
                assert_eq!(s.content, "v1\n");
            }
            other => panic!("unexpected {:?}", other),
        }
        match capture(&files, "/etc/missing").await {
            SnapshotCaptureResult::Captured(s) => assert!(!s.existed),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            capture(&files, "/etc/locked").await,
            SnapshotCaptureResult::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_non_utf8_file_is_skipped() {
        use crate::services::ssh::{ShellClient, LOCAL_HOST};

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("latin1.conf");
        std::fs::write(&path, b"name=caf\xe9\n").unwrap();
        let path = path.to_string_lossy().to_string();

        let conn = ShellClient::default().connect(LOCAL_HOST).await.unwrap();
        let files = DeviceFiles::new(conn.as_ref(), Duration::from_secs(10));

        match capture(&files, &path).await {
            SnapshotCaptureResult::Skipped { reason } => assert!(reason.contains("non-UTF-8")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"name=caf\xe9\n");
    }
}
