//! Shell transports for the remote execution contract.
//!
//! Devices are reached through the system `ssh` binary in batch mode. The
//! special hostname `local` runs commands with `sh -c` on this machine.

use super::remote::{CommandOutput, RemoteClient, RemoteCommand, RemoteConnection};
use crate::models::config::SshConfig;
use crate::Result;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Hostname that selects the local shell transport.
pub const LOCAL_HOST: &str = "local";

/// `ssh` exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Remote client backed by `ssh` / `sh`.
#[derive(Debug, Clone, Default)]
pub struct ShellClient {
    config: SshConfig,
}

impl ShellClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RemoteClient for ShellClient {
    async fn connect(&self, hostname: &str) -> Result<Box<dyn RemoteConnection>> {
        let hostname = hostname.trim();
        if hostname.is_empty() || hostname.starts_with('-') {
            return Err(crate::Error::connection(hostname, "invalid hostname"));
        }

        tracing::debug!("Opening shell transport to {}", hostname);
        Ok(Box::new(ShellConnection {
            hostname: hostname.to_string(),
            config: self.config.clone(),
        }))
    }
}

/// One device reached through the shell transport.
pub struct ShellConnection {
    hostname: String,
    config: SshConfig,
}

impl ShellConnection {
    fn is_local(&self) -> bool {
        self.hostname == LOCAL_HOST
    }

    fn build_command(&self, script: &str) -> Command {
        if self.is_local() {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            return cmd;
        }

        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.config.connect_timeout_secs
            ))
            .arg("-p")
            .arg(self.config.port.to_string());
        if let Some(ref user) = self.config.user {
            cmd.arg("-l").arg(user);
        }
        cmd.args(&self.config.extra_args);
        cmd.arg(&self.hostname).arg("--").arg(script);
        cmd
    }

    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        let mut cmd = self.build_command(&command.render());
        cmd.stdin(if command.stdin().is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| crate::Error::connection(&self.hostname, e.to_string()))?;

        if let Some(input) = command.stdin() {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }

        let output = child.wait_with_output().await?;
        let exit_status = output.status.code().unwrap_or(-1);

        if !self.is_local() && exit_status == SSH_CONNECTION_FAILURE {
            return Err(crate::Error::connection(
                &self.hostname,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        // Config content travels as text; a lossy decode would corrupt it on restore.
        let stdout = String::from_utf8(output.stdout).map_err(|_| {
            crate::Error::Configuration(format!("`{}` returned non-UTF-8 content", command))
        })?;

        Ok(CommandOutput {
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status,
        })
    }
}

#[async_trait]
impl RemoteConnection for ShellConnection {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn execute(&self, command: &RemoteCommand, timeout: Duration) -> Result<CommandOutput> {
        tracing::debug!(host = %self.hostname, "exec: {}", command);
        match tokio::time::timeout(timeout, self.run(command)).await {
            Ok(result) => result,
            Err(_) => Err(crate::Error::Timeout {
                operation: format!("{} on {}", command, self.hostname),
                seconds: timeout.as_secs(),
            }),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        // Each command is its own ssh session; nothing stays open.
        Ok(())
    }
}
