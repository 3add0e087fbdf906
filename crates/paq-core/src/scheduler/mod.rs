//! The download scheduler: owns the item and queue registries, routes fetch
//! requests to per-method queues and drives the multiplexed event loop.
//!
//! All engine state lives for the duration of one [`Acquire::run`]; nothing
//! is persisted across runs.

mod dispatch;
pub mod progress;
mod run;

pub use progress::{AcquireProgress, NullProgress, ProgressStats};
pub use run::{Failure, RunOutcome, RunResult};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AcquireConfig, QueueMode};
use crate::error::Result;
use crate::item::{FetchItem, ItemId, ItemState};
use crate::method::{self, MethodConfig};
use crate::queue::Queue;
use crate::retry::RetryPolicy;
use crate::worker::Worker;

/// The core download scheduler. Create one, [`Acquire::submit`] items, then
/// [`Acquire::run`] to completion.
pub struct Acquire {
    cfg: AcquireConfig,
    retry: RetryPolicy,
    /// Item arena; `ItemId` values index into it for the life of the run.
    items: Vec<FetchItem>,
    /// Queues keyed by `<access>` or `<access>:<host>`. BTreeMap gives the
    /// deterministic iteration order the tie-break policy relies on.
    queues: BTreeMap<String, Queue>,
    /// Capability cache, one entry per access method, written at first
    /// Capabilities receipt and read-only afterwards.
    configs: HashMap<String, Arc<MethodConfig>>,
    progress: Box<dyn AcquireProgress>,
}

impl Acquire {
    pub fn new(cfg: AcquireConfig) -> Self {
        Self::with_progress(cfg, Box::new(NullProgress))
    }

    pub fn with_progress(cfg: AcquireConfig, progress: Box<dyn AcquireProgress>) -> Self {
        let retry = RetryPolicy::new(cfg.max_retries);
        Self {
            cfg,
            retry,
            items: Vec::new(),
            queues: BTreeMap::new(),
            configs: HashMap::new(),
            progress,
        }
    }

    /// Register an item without routing it anywhere yet.
    pub fn add(&mut self, item: FetchItem) -> ItemId {
        let id = ItemId(self.items.len());
        self.items.push(item);
        id
    }

    /// Register an item and route it to the queue for its access method,
    /// creating the queue on first use. Fails only if no method driver
    /// exists for the URI's scheme; anything the driver does after being
    /// spawned (crash, garbage, silence) surfaces as item failures during
    /// the run, never here.
    pub fn submit(&mut self, item: FetchItem) -> Result<ItemId> {
        let id = self.add(item);
        self.enqueue(id)?;
        Ok(id)
    }

    /// Route a previously added idle item into its queue.
    ///
    /// Queue keys are provisional until the method's Capabilities are known:
    /// a method that later reports Single-Instance gets its per-host queues
    /// collapsed by the dispatcher when the handshake completes.
    pub fn enqueue(&mut self, id: ItemId) -> Result<()> {
        let (access, host) = method::parse_uri(&self.items[id.0].uri)?;
        method::method_path(&self.cfg.methods_dir, &access)?;
        let single_instance = self
            .configs
            .get(&access)
            .map_or(false, |c| c.single_instance);
        let key = self.queue_key(&access, host.as_deref(), single_instance);

        let queue = self
            .queues
            .entry(key)
            .or_insert_with_key(|k| Queue::new(k.clone(), access.clone()));
        self.items[id.0].transition(ItemState::Queued);
        queue.push(id);
        Ok(())
    }

    /// Capability record for an access method. Probes the helper binary with
    /// a short-lived handshake the first time a method is seen; every later
    /// caller gets the cached record. The running event loop never calls
    /// this (it learns capabilities from the worker's own stream); it exists
    /// for out-of-band inspection such as `paq probe`.
    pub async fn get_config(&mut self, access: &str) -> Result<Arc<MethodConfig>> {
        if let Some(cfg) = self.configs.get(access) {
            return Ok(Arc::clone(cfg));
        }
        let mut probe = Worker::start(
            access,
            &self.cfg.methods_dir,
            &self.cfg.options,
            self.startup_timeout(),
        )
        .await?;
        probe.kill();
        let cfg = Arc::clone(&probe.config);
        self.configs.insert(access.to_string(), Arc::clone(&cfg));
        Ok(cfg)
    }

    fn queue_key(&self, access: &str, host: Option<&str>, single_instance: bool) -> String {
        if single_instance || self.cfg.queue_mode == QueueMode::Access {
            return access.to_string();
        }
        match host {
            Some(host) => format!("{access}:{host}"),
            None => access.to_string(),
        }
    }

    pub fn item(&self, id: ItemId) -> &FetchItem {
        &self.items[id.0]
    }

    pub fn items(&self) -> impl Iterator<Item = &FetchItem> {
        self.items.iter()
    }

    pub fn config(&self) -> &AcquireConfig {
        &self.cfg
    }

    /// Total size in bytes of everything in this run, where known.
    pub fn total_needed(&self) -> u64 {
        self.items
            .iter()
            .map(|i| i.expected_size.unwrap_or(i.total_size))
            .sum()
    }

    /// Like [`Acquire::total_needed`] but skipping methods that negotiated
    /// LocalOnly (nothing to transfer for those).
    pub fn fetch_needed(&self) -> u64 {
        self.items
            .iter()
            .filter(|i| {
                method::parse_uri(&i.uri)
                    .ok()
                    .and_then(|(access, _)| self.configs.get(&access))
                    .map_or(true, |c| !c.local_only)
            })
            .map(|i| i.expected_size.unwrap_or(i.total_size))
            .sum()
    }

    /// Bytes already present locally and eligible for resumption.
    pub fn partial_present(&self) -> u64 {
        self.items.iter().map(|i| i.resume_point).sum()
    }

    /// Mark every non-terminal item Cancelled and kill all subprocesses.
    pub fn shutdown(&mut self) {
        for item in &mut self.items {
            if !item.state.is_terminal() {
                item.transition(ItemState::Cancelled);
            }
        }
        for queue in self.queues.values_mut() {
            queue.drain_backlog();
            if let Some(mut worker) = queue.worker.take() {
                worker.kill();
            }
        }
    }

    pub(crate) fn all_terminal(&self) -> bool {
        self.items.iter().all(|i| i.state.is_terminal())
    }

    pub(crate) fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.startup_timeout_secs)
    }

    pub(crate) fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.stall_timeout_secs)
    }
}
