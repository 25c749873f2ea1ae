use std::time::{Duration, Instant};

use mesh_protocol::{
    PeerAddress, DEFAULT_FLOODING_INTERVAL_MS, FLOODING_TIMEOUT_FACTOR, TASK_EMA_ALPHA,
    TASK_TIMEOUT_MULTIPLIER,
};

use crate::stats::StatsRound;

/// Tuning shared by every worker in a registry.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Smoothing factor of the task response EMA.
    pub ema_alpha: f64,
    /// Target duration of one task, in seconds. Task sizes are scaled so
    /// that a worker's EMA approaches this value.
    pub task_size_factor: f64,
    /// Slice size handed to a worker before it has completed anything.
    pub initial_task_size: u64,
    /// Largest factor a task size may grow or shrink by after one completion.
    pub max_growth: f64,
    /// A task expires after `task_timeout_multiplier * EMA`.
    pub task_timeout_multiplier: f64,
    /// Lower bound on the task expiry window.
    pub min_task_timeout: Duration,
    /// Silence after which an alive worker is declared dead.
    pub heartbeat_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ema_alpha: TASK_EMA_ALPHA,
            task_size_factor: 1.0,
            initial_task_size: 100,
            max_growth: 2.0,
            task_timeout_multiplier: TASK_TIMEOUT_MULTIPLIER,
            min_task_timeout: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_millis(
                DEFAULT_FLOODING_INTERVAL_MS * FLOODING_TIMEOUT_FACTOR as u64,
            ),
        }
    }
}

/// A peer able to execute tasks, as seen from this node.
#[derive(Debug, Clone)]
pub struct Worker {
    pub address: PeerAddress,
    /// Whether a live link to this peer is currently held.
    pub connected: bool,
    pub alive: bool,
    pub available: bool,
    pub last_heartbeat_at: Option<Instant>,
    pub last_task_sent_at: Option<Instant>,
    /// Smoothed task turnaround, in seconds.
    pub task_response_ema: f64,
    pub task_size_factor: f64,
    pub adaptive_task_size: u64,
    pub completed_tasks: u64,
    /// Gossiped validations performed by this peer.
    pub validations: StatsRound,
    /// Alive peers this worker listed in its last hello.
    pub known_peers: Vec<PeerAddress>,
}

impl Worker {
    /// A worker we have only heard about: not connected, not alive.
    pub fn new(address: PeerAddress, config: &WorkerConfig) -> Self {
        Self {
            address,
            connected: false,
            alive: false,
            available: true,
            last_heartbeat_at: None,
            last_task_sent_at: None,
            task_response_ema: config.task_size_factor,
            task_size_factor: config.task_size_factor,
            adaptive_task_size: config.initial_task_size.max(1),
            completed_tasks: 0,
            validations: StatsRound::default(),
            known_peers: Vec::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.alive && self.available
    }

    pub fn heartbeat_received(&mut self, now: Instant) {
        self.alive = true;
        self.last_heartbeat_at = Some(now);
    }

    pub fn task_started(&mut self, now: Instant) {
        self.available = false;
        self.last_task_sent_at = Some(now);
    }

    /// Record a completed task and re-derive the next task size from the
    /// updated response EMA.
    ///
    /// The size moves toward `task_size_factor / EMA`. A falling EMA always
    /// grows the size, by at least the speed-up it shows, even while the
    /// worker is still slower than the target.
    pub fn task_finished(&mut self, now: Instant, config: &WorkerConfig) {
        self.available = true;
        let Some(sent_at) = self.last_task_sent_at else {
            return;
        };
        let elapsed = now.saturating_duration_since(sent_at).as_secs_f64();
        let previous_ema = self.task_response_ema;
        self.task_response_ema =
            config.ema_alpha * elapsed + (1.0 - config.ema_alpha) * previous_ema;
        self.completed_tasks += 1;

        let ema = self.task_response_ema;
        let toward_target = if ema > 0.0 {
            self.task_size_factor / ema
        } else {
            config.max_growth
        };
        let sped_up = ema < previous_ema;
        let ratio = if sped_up && ema > 0.0 {
            toward_target.max(previous_ema / ema)
        } else {
            toward_target
        };
        let ratio = ratio.clamp(1.0 / config.max_growth, config.max_growth);

        let prev = self.adaptive_task_size;
        let next = (prev as f64 * ratio).ceil();
        let mut next = if next >= u64::MAX as f64 {
            u64::MAX
        } else {
            (next as u64).max(1)
        };
        if sped_up && config.max_growth > 1.0 {
            next = next.max(prev.saturating_add(1));
        }
        self.adaptive_task_size = next;
    }

    /// Lazily re-evaluate liveness: an alive worker that has been silent for
    /// longer than `timeout` is declared dead by this check.
    pub fn is_heartbeat_expired(&mut self, now: Instant, timeout: Duration) -> bool {
        if !self.alive {
            return false;
        }
        let silent = self
            .last_heartbeat_at
            .map(|at| now.saturating_duration_since(at) > timeout)
            .unwrap_or(true);
        if silent {
            self.alive = false;
        }
        silent
    }

    /// Expiry window of a task sent to this worker.
    pub fn task_timeout(&self, config: &WorkerConfig) -> Duration {
        let secs = config.task_timeout_multiplier * self.task_response_ema;
        Duration::from_secs_f64(secs.max(0.0)).max(config.min_task_timeout)
    }

    pub fn is_task_expired(&self, now: Instant, config: &WorkerConfig) -> bool {
        if !self.alive {
            return true;
        }
        match self.last_task_sent_at {
            Some(at) => now.saturating_duration_since(at) > self.task_timeout(config),
            None => false,
        }
    }

    /// Mark dead. The worker stays available so a resurrected peer is
    /// immediately usable again.
    pub fn kill(&mut self) {
        self.alive = false;
        self.available = true;
        self.connected = false;
    }
}
