//! Shared fixtures: an in-memory fleet wired into the engine.

#![allow(dead_code)]

use async_trait::async_trait;
use config_deploy::core::{BatchDeploymentManager, DeploymentServices, TimelineRollback};
use config_deploy::models::config::Config;
use config_deploy::models::request::{BatchDeploymentRequest, ConfigurationFileChange};
use config_deploy::models::snapshot::SnapshotRecord;
use config_deploy::services::devices::{Device, StaticDirectory};
use config_deploy::services::events::{self, Event};
use config_deploy::services::memory::MemoryRemote;
use config_deploy::services::store::{InMemorySnapshotStore, SnapshotQuery, SnapshotStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Device id `dev-x` lives on host `host-x`.
pub fn host(device_id: &str) -> String {
    device_id.replacen("dev-", "host-", 1)
}

pub struct Fleet {
    pub remote: MemoryRemote,
    pub store: Arc<InMemorySnapshotStore>,
    pub directory: StaticDirectory,
    pub events: mpsc::Receiver<Event>,
    pub services: DeploymentServices,
}

impl Fleet {
    /// Every device gets a reachable host with an empty filesystem.
    pub fn new(devices: &[&str]) -> Self {
        let remote = MemoryRemote::new();
        let mut directory = StaticDirectory::new();
        for device in devices {
            remote.add_host(&host(device));
            directory = directory.with_device(Device::new(device, &host(device)));
        }
        let store = Arc::new(InMemorySnapshotStore::new());
        let (sink, rx) = events::channel(64);

        let services = DeploymentServices {
            remote: Arc::new(remote.clone()),
            devices: Arc::new(directory.clone()),
            snapshots: store.clone(),
            events: Arc::new(sink),
        };
        Self {
            remote,
            store,
            directory,
            events: rx,
            services,
        }
    }

    pub fn put(&self, device: &str, path: &str, content: &str) {
        self.remote.put_file(&host(device), path, content);
    }

    pub fn file(&self, device: &str, path: &str) -> Option<String> {
        self.remote.file(&host(device), path)
    }

    pub fn manager(&self) -> BatchDeploymentManager {
        self.manager_with(Config::default())
    }

    pub fn manager_with(&self, config: Config) -> BatchDeploymentManager {
        BatchDeploymentManager::new(self.services.clone(), config)
    }

    pub fn timeline(&self, config: &Config) -> TimelineRollback {
        self.timeline_with_store(config, self.store.clone())
    }

    pub fn timeline_with_store(
        &self,
        config: &Config,
        store: Arc<dyn SnapshotStore>,
    ) -> TimelineRollback {
        TimelineRollback::new(
            self.services.remote.clone(),
            self.services.devices.clone(),
            store,
            self.services.events.clone(),
            config,
        )
    }

    /// Topics published so far.
    pub fn topics(&mut self) -> Vec<String> {
        let mut topics = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            topics.push(event.topic);
        }
        topics
    }
}

pub fn request(devices: &[&str], changes: &[(&str, &str, &str)]) -> BatchDeploymentRequest {
    BatchDeploymentRequest::new(
        devices.iter().map(|d| d.to_string()).collect(),
        changes
            .iter()
            .map(|(id, path, content)| ConfigurationFileChange::new(id, path, content))
            .collect(),
    )
}

/// Snapshot store that counts reads.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemorySnapshotStore,
    pub reads: AtomicUsize,
}

impl CountingStore {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for CountingStore {
    async fn append(&self, record: SnapshotRecord) -> config_deploy::Result<()> {
        self.inner.append(record).await
    }

    async fn get(&self, snapshot_id: &str) -> config_deploy::Result<Option<SnapshotRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(snapshot_id).await
    }

    async fn query(&self, query: &SnapshotQuery) -> config_deploy::Result<Vec<SnapshotRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.query(query).await
    }
}
