//! Transaction registry.
//!
//! The only process-wide shared state: batch_id -> transaction. Entries are
//! evicted a fixed delay after registration, whatever their outcome, by a
//! sweeper task started with [`TransactionRegistry::start`].

use crate::models::config::RegistryConfig;
use crate::models::transaction::{BatchTransaction, TransactionStatus, TransactionSummary};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// A registered transaction and its control flags.
#[derive(Debug)]
pub struct TransactionHandle {
    pub txn: tokio::sync::RwLock<BatchTransaction>,
    pub batch_id: String,
    pub registered_at: DateTime<Utc>,
    cancel_requested: AtomicBool,
    running: AtomicBool,
}

impl TransactionHandle {
    fn new(txn: BatchTransaction) -> Self {
        Self {
            batch_id: txn.batch_id.clone(),
            txn: tokio::sync::RwLock::new(txn),
            registered_at: Utc::now(),
            cancel_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Whether a deployment is currently driving this transaction.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Filter for [`TransactionRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub device_id: Option<String>,
    /// Only transactions that have not reached a terminal status.
    pub active_only: bool,
}

/// Registry of live transactions.
#[derive(Debug, Clone)]
pub struct TransactionRegistry {
    entries: Arc<RwLock<HashMap<String, Arc<TransactionHandle>>>>,
    cleanup_delay: Duration,
    sweep_interval: std::time::Duration,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TransactionRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            cleanup_delay: Duration::seconds(config.cleanup_delay_secs as i64),
            sweep_interval: std::time::Duration::from_secs(config.sweep_interval_secs.max(1)),
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    /// Register a new transaction.
    pub fn register(&self, txn: BatchTransaction) -> Arc<TransactionHandle> {
        let handle = Arc::new(TransactionHandle::new(txn));
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(handle.batch_id.clone(), Arc::clone(&handle));
            }
            Err(e) => tracing::error!("Registry lock poisoned: {}", e),
        }
        tracing::debug!(batch_id = %handle.batch_id, "Registered transaction");
        handle
    }

    pub fn get(&self, batch_id: &str) -> Option<Arc<TransactionHandle>> {
        self.entries.read().ok()?.get(batch_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handles(&self) -> Vec<Arc<TransactionHandle>> {
        self.entries
            .read()
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Summaries of matching transactions, newest first.
    pub async fn list(&self, filter: &TransactionFilter) -> Vec<TransactionSummary> {
        let mut summaries = Vec::new();
        for handle in self.handles() {
            let txn = handle.txn.read().await;
            if let Some(status) = filter.status {
                if txn.status != status {
                    continue;
                }
            }
            if let Some(ref device_id) = filter.device_id {
                if !txn.targets_device(device_id) {
                    continue;
                }
            }
            if filter.active_only && txn.status.is_terminal() {
                continue;
            }
            summaries.push(TransactionSummary::from(&*txn));
        }
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries
    }

    /// Drop entries registered more than the cleanup delay before `now`.
    ///
    /// Entries still being driven by a deployment are kept until it ends.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Registry lock poisoned: {}", e);
                return 0;
            }
        };

        let before = entries.len();
        entries.retain(|batch_id, handle| {
            let expired = now - handle.registered_at >= self.cleanup_delay;
            if expired && handle.is_running() {
                tracing::debug!(batch_id = %batch_id, "Eviction deferred, still running");
                return true;
            }
            if expired {
                tracing::info!(batch_id = %batch_id, "Evicted transaction");
            }
            !expired
        });
        before - entries.len()
    }

    /// Start the background sweeper. Calling it twice has no effect.
    pub fn start(&self) {
        let mut sweeper = match self.sweeper.lock() {
            Ok(sweeper) => sweeper,
            Err(e) => {
                tracing::error!("Sweeper lock poisoned: {}", e);
                return;
            }
        };
        if sweeper.is_some() {
            return;
        }

        let registry = self.clone();
        let period = self.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = registry.evict_expired(Utc::now());
                if evicted > 0 {
                    tracing::debug!(evicted, "Registry sweep");
                }
            }
        }));
        tracing::debug!("Registry sweeper started");
    }

    /// Stop the background sweeper.
    pub fn stop(&self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
                tracing::debug!("Registry sweeper stopped");
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.sweeper.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}
