//! Remote execution contract.
//!
//! The engine never talks to a transport directly. It issues a small closed
//! set of [`RemoteCommand`]s through a [`RemoteConnection`]; transports render
//! them to POSIX shell (see [`RemoteCommand::render`]) or interpret them
//! directly (see `services::memory`).

use crate::utils::fs::parent_dir;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Exit status used by `ReadFile` when the file does not exist.
pub const NOT_FOUND_EXIT: i32 = 44;

/// Kind of a remote command, used for logging and fault matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Probe,
    ReadFile,
    MakeParentDirs,
    WriteTemp,
    Rename,
    RemoveFile,
    HashFile,
}

/// A command the engine can run on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Trivial command proving the device answers.
    Probe,
    /// Print a file; exits with [`NOT_FOUND_EXIT`] when it is absent.
    ReadFile { path: String },
    /// `mkdir -p` the parent directory of `path`.
    MakeParentDirs { path: String },
    /// Write `content` (fed on stdin) to `temp_path`.
    WriteTemp { temp_path: String, content: String },
    /// Atomically replace `to` with `from`.
    Rename { from: String, to: String },
    /// Remove a file, succeeding when it is already gone.
    RemoveFile { path: String },
    /// Print the SHA-256 of a file.
    HashFile { path: String },
}

impl RemoteCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Probe => CommandKind::Probe,
            Self::ReadFile { .. } => CommandKind::ReadFile,
            Self::MakeParentDirs { .. } => CommandKind::MakeParentDirs,
            Self::WriteTemp { .. } => CommandKind::WriteTemp,
            Self::Rename { .. } => CommandKind::Rename,
            Self::RemoveFile { .. } => CommandKind::RemoveFile,
            Self::HashFile { .. } => CommandKind::HashFile,
        }
    }

    /// The path the command acts on (the destination for renames).
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Probe => None,
            Self::ReadFile { path }
            | Self::MakeParentDirs { path }
            | Self::RemoveFile { path }
            | Self::HashFile { path } => Some(path),
            Self::WriteTemp { temp_path, .. } => Some(temp_path),
            Self::Rename { to, .. } => Some(to),
        }
    }

    /// Data to feed on the command's stdin.
    pub fn stdin(&self) -> Option<&str> {
        match self {
            Self::WriteTemp { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Render as a POSIX shell script.
    pub fn render(&self) -> String {
        match self {
            Self::Probe => "echo ok".to_string(),
            Self::ReadFile { path } => {
                let p = shell_quote(path);
                format!(
                    "if [ -e {p} ]; then cat -- {p}; else exit {code}; fi",
                    p = p,
                    code = NOT_FOUND_EXIT
                )
            }
            Self::MakeParentDirs { path } => match parent_dir(path) {
                Some(dir) => format!("mkdir -p -- {}", shell_quote(dir)),
                None => "true".to_string(),
            },
            Self::WriteTemp { temp_path, .. } => format!("cat > {}", shell_quote(temp_path)),
            Self::Rename { from, to } => {
                format!("mv -f -- {} {}", shell_quote(from), shell_quote(to))
            }
            Self::RemoveFile { path } => format!("rm -f -- {}", shell_quote(path)),
            Self::HashFile { path } => {
                let p = shell_quote(path);
                [
                    format!("P={}", p),
                    "if command -v sha256sum >/dev/null 2>&1; then sha256sum -- \"$P\"; exit $?; fi".to_string(),
                    "if command -v shasum >/dev/null 2>&1; then shasum -a 256 -- \"$P\"; exit $?; fi".to_string(),
                    "if command -v openssl >/dev/null 2>&1; then openssl dgst -sha256 -- \"$P\"; exit $?; fi".to_string(),
                    "echo \"no sha256 tool available\" >&2".to_string(),
                    "exit 127".to_string(),
                ]
                .join("\n")
            }
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::ReadFile { path } => write!(f, "read {}", path),
            Self::MakeParentDirs { path } => write!(f, "mkdir parent of {}", path),
            Self::WriteTemp { temp_path, content } => {
                write!(f, "write {} bytes to {}", content.len(), temp_path)
            }
            Self::Rename { from, to } => write!(f, "rename {} -> {}", from, to),
            Self::RemoveFile { path } => write!(f, "remove {}", path),
            Self::HashFile { path } => write!(f, "hash {}", path),
        }
    }
}

/// Single-quote a value for POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Captured output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: 0,
        }
    }

    pub fn failed(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_status,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Turn a non-zero exit into a `Command` error.
    pub fn into_result(self, command: &RemoteCommand) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(crate::Error::Command {
                command: command.to_string(),
                exit_status: self.exit_status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Opens connections to devices.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn connect(&self, hostname: &str) -> Result<Box<dyn RemoteConnection>>;
}

/// An open connection to one device.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    fn hostname(&self) -> &str;

    /// Run one command. Transport failures and timeouts are errors; a
    /// non-zero exit status is reported in the output.
    async fn execute(&self, command: &RemoteCommand, timeout: Duration) -> Result<CommandOutput>;

    async fn disconnect(&self) -> Result<()>;
}
