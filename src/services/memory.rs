//! In-memory remote fleet.
//!
//! Implements the remote execution contract against a map of per-host
//! filesystems, with fault injection. Used by tests and for embedding the
//! engine without real devices.

use super::remote::{
    CommandKind, CommandOutput, RemoteClient, RemoteCommand, RemoteConnection, NOT_FOUND_EXIT,
};
use crate::utils::hash;
use crate::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How an injected fault manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultMode {
    /// The command runs and exits with this status.
    ExitStatus(i32),
    /// The transport drops mid-command.
    Transport,
}

/// A rule making matching commands fail.
#[derive(Debug, Clone)]
pub struct Fault {
    pub host: String,
    pub kind: CommandKind,
    /// Only commands whose path contains this string match.
    pub path_contains: Option<String>,
    pub mode: FaultMode,
}

#[derive(Debug, Default)]
struct HostState {
    files: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct FleetState {
    hosts: HashMap<String, HostState>,
    unreachable: HashSet<String>,
    faults: Vec<Fault>,
    log: Vec<(String, RemoteCommand)>,
}

/// In-memory multi-host remote client.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<FleetState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        // A poisoned lock only means a test panicked mid-command.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make a host reachable with an empty filesystem.
    pub fn add_host(&self, host: &str) -> &Self {
        self.lock().hosts.entry(host.to_string()).or_default();
        self
    }

    pub fn put_file(&self, host: &str, path: &str, content: &str) -> &Self {
        self.lock()
            .hosts
            .entry(host.to_string())
            .or_default()
            .files
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn file(&self, host: &str, path: &str) -> Option<String> {
        self.lock().hosts.get(host)?.files.get(path).cloned()
    }

    pub fn files(&self, host: &str) -> BTreeMap<String, String> {
        self.lock()
            .hosts
            .get(host)
            .map(|h| h.files.clone())
            .unwrap_or_default()
    }

    pub fn set_unreachable(&self, host: &str) -> &Self {
        self.lock().unreachable.insert(host.to_string());
        self
    }

    pub fn inject(&self, fault: Fault) -> &Self {
        self.lock().faults.push(fault);
        self
    }

    /// Fail every `kind` command on `host` touching a path containing `path_contains`.
    pub fn fail(&self, host: &str, kind: CommandKind, path_contains: &str) -> &Self {
        self.inject(Fault {
            host: host.to_string(),
            kind,
            path_contains: Some(path_contains.to_string()),
            mode: FaultMode::ExitStatus(1),
        })
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Every command executed on `host`, in order.
    pub fn commands(&self, host: &str) -> Vec<RemoteCommand> {
        self.lock()
            .log
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Number of mutating commands executed on `host`.
    pub fn mutation_count(&self, host: &str) -> usize {
        self.commands(host)
            .iter()
            .filter(|c| {
                matches!(
                    c.kind(),
                    CommandKind::MakeParentDirs
                        | CommandKind::WriteTemp
                        | CommandKind::Rename
                        | CommandKind::RemoveFile
                )
            })
            .count()
    }

    fn apply(&self, host: &str, command: &RemoteCommand) -> Result<CommandOutput> {
        let mut state = self.lock();
        state.log.push((host.to_string(), command.clone()));

        if state.unreachable.contains(host) {
            return Err(crate::Error::connection(host, "connection reset"));
        }

        let fault = state.faults.iter().find(|f| {
            f.host == host
                && f.kind == command.kind()
                && match (&f.path_contains, command.path()) {
                    (None, _) => true,
                    (Some(needle), Some(path)) => path.contains(needle.as_str()),
                    (Some(_), None) => false,
                }
        });
        if let Some(fault) = fault {
            return match fault.mode {
                FaultMode::ExitStatus(code) => Ok(CommandOutput::failed(
                    code,
                    format!("injected failure: {}", command),
                )),
                FaultMode::Transport => Err(crate::Error::connection(host, "connection lost")),
            };
        }

        let files = &mut state.hosts.entry(host.to_string()).or_default().files;
        let output = match command {
            RemoteCommand::Probe => CommandOutput::ok("ok\n"),
            RemoteCommand::ReadFile { path } => match files.get(path) {
                Some(content) => CommandOutput::ok(content.clone()),
                None => CommandOutput::failed(NOT_FOUND_EXIT, ""),
            },
            RemoteCommand::MakeParentDirs { .. } => CommandOutput::ok(""),
            RemoteCommand::WriteTemp { temp_path, content } => {
                files.insert(temp_path.clone(), content.clone());
                CommandOutput::ok("")
            }
            RemoteCommand::Rename { from, to } => match files.remove(from) {
                Some(content) => {
                    files.insert(to.clone(), content);
                    CommandOutput::ok("")
                }
                None => CommandOutput::failed(1, format!("mv: cannot stat '{}'", from)),
            },
            RemoteCommand::RemoveFile { path } => {
                files.remove(path);
                CommandOutput::ok("")
            }
            RemoteCommand::HashFile { path } => match files.get(path) {
                Some(content) => {
                    CommandOutput::ok(format!("{}  {}\n", hash::sha256_str(content), path))
                }
                None => CommandOutput::failed(1, format!("sha256sum: {}: No such file", path)),
            },
        };
        Ok(output)
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn connect(&self, hostname: &str) -> Result<Box<dyn RemoteConnection>> {
        {
            let state = self.lock();
            if state.unreachable.contains(hostname) || !state.hosts.contains_key(hostname) {
                return Err(crate::Error::connection(hostname, "no route to host"));
            }
        }
        Ok(Box::new(MemoryConnection {
            hostname: hostname.to_string(),
            remote: self.clone(),
        }))
    }
}

/// Connection to one in-memory host.
pub struct MemoryConnection {
    hostname: String,
    remote: MemoryRemote,
}

#[async_trait]
impl RemoteConnection for MemoryConnection {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn execute(&self, command: &RemoteCommand, _timeout: Duration) -> Result<CommandOutput> {
        self.remote.apply(&self.hostname, command)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
