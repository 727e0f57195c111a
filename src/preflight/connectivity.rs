//! Connectivity probe.

use crate::services::remote::{RemoteClient, RemoteCommand};
use std::time::Duration;

/// Connect and run a trivial command, all under `timeout`.
pub async fn probe(
    remote: &dyn RemoteClient,
    hostname: &str,
    timeout: Duration,
) -> std::result::Result<(), String> {
    let attempt = async {
        let conn = remote.connect(hostname).await.map_err(|e| e.to_string())?;
        let result = conn.execute(&RemoteCommand::Probe, timeout).await;
        let _ = conn.disconnect().await;

        let output = result.map_err(|e| e.to_string())?;
        if output.success() {
            Ok(())
        } else {
            Err(format!(
                "probe exited with status {}: {}",
                output.exit_status,
                output.stderr.trim()
            ))
        }
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(format!("probe timed out after {}s", timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryRemote;
    use crate::services::remote::CommandKind;

    #[tokio::test]
    async fn test_probe_ok() {
        let remote = MemoryRemote::new();
        remote.add_host("h");
        assert!(probe(&remote, "h", Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_failing_command() {
        let remote = MemoryRemote::new();
        remote.add_host("h").inject(crate::services::memory::Fault {
            host: "h".to_string(),
            kind: CommandKind::Probe,
            path_contains: None,
            mode: crate::services::memory::FaultMode::ExitStatus(3),
        });
        let err = probe(&remote, "h", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.contains("status 3"));
    }
}
