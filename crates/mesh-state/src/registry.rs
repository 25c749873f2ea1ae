use std::collections::BTreeMap;
use std::time::Instant;

use mesh_protocol::PeerAddress;

use crate::worker::{Worker, WorkerConfig};

/// Every peer this node knows about, keyed by listen address.
///
/// Iteration order is the address order, which makes tie-breaking between
/// equally fast workers deterministic.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    config: WorkerConfig,
    workers: BTreeMap<PeerAddress, Worker>,
}

impl WorkerRegistry {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            workers: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn get(&self, address: &PeerAddress) -> Option<&Worker> {
        self.workers.get(address)
    }

    pub fn get_mut(&mut self, address: &PeerAddress) -> Option<&mut Worker> {
        self.workers.get_mut(address)
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.workers.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    pub fn workers_mut(&mut self) -> impl Iterator<Item = &mut Worker> {
        self.workers.values_mut()
    }

    /// Look up a worker, creating a placeholder (not connected, not alive)
    /// the first time an address is seen.
    pub fn ensure(&mut self, address: &PeerAddress) -> &mut Worker {
        let config = &self.config;
        self.workers.entry(address.clone()).or_insert_with(|| {
            tracing::debug!(peer = %address, "Registered new worker");
            Worker::new(address.clone(), config)
        })
    }

    /// Record that `address` spoke. Returns `true` if the worker was not
    /// alive before (first contact or resurrection).
    pub fn heartbeat_received(&mut self, address: &PeerAddress, now: Instant) -> bool {
        let worker = self.ensure(address);
        let revived = !worker.alive;
        worker.heartbeat_received(now);
        if revived {
            tracing::info!(peer = %address, "Worker is alive");
        }
        revived
    }

    pub fn set_connected(&mut self, address: &PeerAddress, connected: bool) {
        self.ensure(address).connected = connected;
    }

    pub fn task_started(&mut self, address: &PeerAddress, now: Instant) {
        if let Some(w) = self.workers.get_mut(address) {
            w.task_started(now);
        }
    }

    pub fn task_finished(&mut self, address: &PeerAddress, now: Instant) {
        if let Some(w) = self.workers.get_mut(address) {
            w.task_finished(now, &self.config);
            tracing::debug!(
                peer = %address,
                ema_secs = w.task_response_ema,
                task_size = w.adaptive_task_size,
                "Worker finished task"
            );
        }
    }

    /// Free a worker whose task was retired without an answer.
    pub fn mark_available(&mut self, address: &PeerAddress) {
        if let Some(w) = self.workers.get_mut(address) {
            w.available = true;
        }
    }

    /// Whether a task held by `address` should be considered lost. Unknown
    /// workers always are.
    pub fn is_task_expired(&self, address: &PeerAddress, now: Instant) -> bool {
        self.workers
            .get(address)
            .map(|w| w.is_task_expired(now, &self.config))
            .unwrap_or(true)
    }

    /// Sweep heartbeats and return the workers declared dead by this pass.
    pub fn expire_heartbeats(&mut self, now: Instant) -> Vec<PeerAddress> {
        let timeout = self.config.heartbeat_timeout;
        let mut dead = Vec::new();
        for worker in self.workers.values_mut() {
            if worker.is_heartbeat_expired(now, timeout) {
                worker.kill();
                tracing::info!(peer = %worker.address, "Worker missed heartbeats, marked dead");
                dead.push(worker.address.clone());
            }
        }
        dead
    }

    /// Declare a worker dead. Returns `true` if it was alive.
    pub fn kill(&mut self, address: &PeerAddress) -> bool {
        match self.workers.get_mut(address) {
            Some(w) => {
                let was_alive = w.alive;
                w.kill();
                was_alive
            }
            None => false,
        }
    }

    pub fn alive_addresses(&self) -> Vec<PeerAddress> {
        self.workers
            .values()
            .filter(|w| w.alive)
            .map(|w| w.address.clone())
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.workers.values().filter(|w| w.alive).count()
    }

    pub fn ready(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values().filter(|w| w.is_ready())
    }

    /// The ready worker with the lowest response EMA; the first in address
    /// order wins a tie.
    pub fn best_ready(&self) -> Option<&Worker> {
        self.ready().min_by(|a, b| {
            a.task_response_ema
                .partial_cmp(&b.task_response_ema)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Mean EMA over alive workers that have completed at least one task.
    pub fn mean_response_ema(&self) -> Option<f64> {
        let observed: Vec<f64> = self
            .workers
            .values()
            .filter(|w| w.alive && w.completed_tasks > 0)
            .map(|w| w.task_response_ema)
            .collect();
        if observed.is_empty() {
            None
        } else {
            Some(observed.iter().sum::<f64>() / observed.len() as f64)
        }
    }
}
