//! The node event loop.
//!
//! A single task owns every piece of mutable state: peer links, the worker
//! registry, the scheduler, the stats reconciler and the local executor
//! queue. The HTTP gateway talks to it only through the job/result channels
//! and the two snapshot watches in [`NodeHandle`].
//!
//! Each scheduler tick runs, in order: the flooding tick (commit + hello)
//! when due, the heartbeat sweep, round finalization, and for the active
//! job the timeout sweep, assignment, self-assignment and completion check.
//! Records, job requests and local search results are handled as they
//! arrive between ticks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};

use mesh_network::{ConnectionId, LinkEvent, PeerLinks};
use mesh_protocol::{
    FloodingConfirmation, FloodingHello, JobId, JoinReply, JoinRequest, Metric, PeerAddress,
    Record, SolveReply, SolveRequest, Sudoku, TaskId,
};
use mesh_scheduler::{
    Expired, Finished, JobOutcome, LocalSlot, Scheduler, Submitted, Task, Validator,
};
use mesh_state::{Finalize, NetworkSnapshot, StatsReconciler, StatsSnapshot, WorkerRegistry};

use crate::config::NodeConfig;
use crate::executor::{Execution, Executor, Origin, WorkItem};
use crate::validator::HandicapValidator;

const JOB_QUEUE_CAPACITY: usize = 16;

/// A job pushed by the gateway, answered once on `reply`.
#[derive(Debug)]
pub struct JobRequest {
    pub job_id: JobId,
    pub payload: Sudoku,
    pub reply: oneshot::Sender<JobResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Solved(Sudoku),
    /// Every candidate was checked; there is no solution.
    NotFound,
    /// The job could not be scheduled.
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node event loop has stopped")]
    Stopped,
}

/// Gateway side of the job channel.
#[derive(Clone)]
pub struct JobClient {
    jobs: mpsc::Sender<JobRequest>,
}

impl JobClient {
    /// Submit a job and wait for its result. Dropping the future abandons
    /// the result, not the job.
    pub async fn solve(&self, payload: Sudoku) -> Result<JobResult, NodeError> {
        let (reply, result) = oneshot::channel();
        self.jobs
            .send(JobRequest {
                job_id: JobId::new(),
                payload,
                reply,
            })
            .await
            .map_err(|_| NodeError::Stopped)?;
        result.await.map_err(|_| NodeError::Stopped)
    }
}

/// Everything outside the event loop needs to drive and observe a node.
pub struct NodeHandle {
    pub self_address: PeerAddress,
    pub client: JobClient,
    pub stats: watch::Receiver<StatsSnapshot>,
    pub network: watch::Receiver<NetworkSnapshot>,
}

pub struct Node {
    config: NodeConfig,
    self_address: PeerAddress,
    listener: Option<TcpListener>,
    links: PeerLinks,
    link_rx: Option<mpsc::Receiver<LinkEvent>>,
    registry: WorkerRegistry,
    scheduler: Scheduler,
    stats: StatsReconciler,
    executor: Executor,
    execution_rx: Option<mpsc::Receiver<Execution>>,
    local_slot: LocalSlot,
    active_job: Option<JobId>,
    job_reply: Option<oneshot::Sender<JobResult>>,
    jobs_rx: Option<mpsc::Receiver<JobRequest>>,
    stats_tx: watch::Sender<StatsSnapshot>,
    network_tx: watch::Sender<NetworkSnapshot>,
    last_flood: Option<Instant>,
}

impl Node {
    /// Bind the P2P listener with the validator described by `config`.
    pub async fn bind(config: NodeConfig) -> anyhow::Result<(Self, NodeHandle)> {
        let validator = HandicapValidator::new(
            Duration::from_millis(config.node.handicap_ms),
            Duration::from_secs(config.validator.interval_secs),
            config.validator.threshold,
        );
        Self::bind_with_validator(config, Arc::new(validator)).await
    }

    pub async fn bind_with_validator(
        config: NodeConfig,
        validator: Arc<dyn Validator>,
    ) -> anyhow::Result<(Self, NodeHandle)> {
        config.validate()?;
        let bind_addr = config.p2p_bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind P2P listener on {bind_addr}"))?;
        // Port 0 picks a free port; advertise the real one.
        let port = listener.local_addr()?.port();
        let self_address = PeerAddress::from_parts(&config.node.host, port);

        let (links, link_rx) = PeerLinks::new(config.link_config());
        let (executor, execution_rx) = Executor::new(validator, config.network.channel_capacity);
        let (jobs_tx, jobs_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let (stats_tx, stats_rx) = watch::channel(StatsSnapshot::default());
        let (network_tx, network_rx) = watch::channel(NetworkSnapshot::default());

        let node = Self {
            registry: WorkerRegistry::new(config.worker_config()),
            scheduler: Scheduler::new(config.scheduler.tries_limit),
            stats: StatsReconciler::new(self_address.clone()),
            local_slot: LocalSlot::new(
                config.scheduler.initial_task_size,
                config.scheduler.max_growth,
            ),
            self_address: self_address.clone(),
            listener: Some(listener),
            links,
            link_rx: Some(link_rx),
            executor,
            execution_rx: Some(execution_rx),
            active_job: None,
            job_reply: None,
            jobs_rx: Some(jobs_rx),
            stats_tx,
            network_tx,
            last_flood: None,
            config,
        };
        let handle = NodeHandle {
            self_address,
            client: JobClient { jobs: jobs_tx },
            stats: stats_rx,
            network: network_rx,
        };
        Ok((node, handle))
    }

    pub fn self_address(&self) -> &PeerAddress {
        &self.self_address
    }

    /// Join the mesh through the configured anchor and run until the
    /// process is stopped.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("P2P listener already consumed"))?;
        let mut link_rx = self
            .link_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("Link event receiver already consumed"))?;
        let mut execution_rx = self
            .execution_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("Execution receiver already consumed"))?;
        let mut jobs_rx = self
            .jobs_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("Job receiver already consumed"))?;

        tracing::info!(address = %self.self_address, "Mesh node listening");
        self.join_anchor().await;

        let mut tick = tokio::time::interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.step(Instant::now()).await;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let conn = self.links.register(stream);
                        tracing::debug!(%remote, conn, "Accepted P2P connection");
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to accept P2P connection"),
                },
                Some(request) = jobs_rx.recv(), if self.active_job.is_none() => {
                    self.start_job(request);
                }
                Some(event) = link_rx.recv() => {
                    self.handle_link_event(event, Instant::now()).await;
                }
                Some(execution) = execution_rx.recv() => {
                    self.handle_execution(execution, Instant::now()).await;
                }
            }
        }
    }

    async fn join_anchor(&mut self) {
        let Some(anchor) = self.config.anchor() else {
            return;
        };
        if anchor == self.self_address {
            return;
        }
        let request = Record::JoinRequest(JoinRequest {
            reply_address: self.self_address.clone(),
        });
        if self.deliver(&anchor, &request).await {
            tracing::info!(%anchor, "Sent join request to anchor");
        } else {
            tracing::warn!(%anchor, "Anchor unreachable, running alone");
        }
    }

    /// One scheduler tick.
    async fn step(&mut self, now: Instant) {
        let flood_due = self
            .last_flood
            .map(|at| now.saturating_duration_since(at) >= self.config.flooding_interval())
            .unwrap_or(true);
        if flood_due {
            self.last_flood = Some(now);
            self.stats.commit();
            let hello = Record::FloodingHello(self.stats.hello(&self.registry));
            self.broadcast(&hello).await;
        }

        for dead in self.registry.expire_heartbeats(now) {
            self.kill_worker(&dead);
        }

        match self.stats.try_finalize(&mut self.registry) {
            Finalize::Broadcast(confirmation) => {
                self.broadcast(&Record::FloodingConfirmation(confirmation)).await;
            }
            Finalize::Local | Finalize::Pending => {}
        }

        if let Some(job_id) = self.active_job {
            self.drive_job(job_id, now).await;
        }

        self.publish_snapshots();
    }

    async fn drive_job(&mut self, job_id: JobId, now: Instant) {
        for expired in self.scheduler.sweep_timeouts(&mut self.registry, now) {
            match expired {
                Expired::Retry(task) => self.dispatch(&task).await,
                Expired::Reassign { worker, task } => {
                    tracing::warn!(peer = %worker, task = %task.id, "Worker out of retries, presumed dead");
                    self.kill_worker(&worker);
                }
            }
        }

        for task in self.scheduler.assign(&mut self.registry, now) {
            self.dispatch(&task).await;
        }

        if self.config.scheduler.self_assign && self.executor.is_idle() {
            let size = self.local_slot.task_size();
            if let Some(task) = self.scheduler.assign_local(&self.self_address, size, now) {
                if let Some(payload) = self.scheduler.payload(task.id.job_id).cloned() {
                    self.local_slot.started(now, task.id.len());
                    tracing::debug!(task = %task.id, "Searching slice locally");
                    self.executor.submit(WorkItem {
                        origin: Origin::Local,
                        task_id: task.id,
                        payload,
                    });
                }
            }
        }

        if let Some(outcome) = self.scheduler.outcome(job_id) {
            self.complete_job(job_id, outcome);
        }
    }

    fn start_job(&mut self, request: JobRequest) {
        let JobRequest {
            job_id,
            payload,
            reply,
        } = request;
        match self.scheduler.submit(job_id, payload) {
            Ok(Submitted::Solved(solution)) => {
                self.stats.record(Metric::Solved, 1);
                respond(reply, job_id, JobResult::Solved(solution));
            }
            Ok(Submitted::Started { space }) => {
                tracing::info!(%job_id, space, "Job started");
                self.active_job = Some(job_id);
                self.job_reply = Some(reply);
            }
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "Job rejected");
                respond(reply, job_id, JobResult::Rejected(e.to_string()));
            }
        }
    }

    fn complete_job(&mut self, job_id: JobId, outcome: JobOutcome) {
        let result = match outcome {
            JobOutcome::Solved(solution) => {
                self.stats.record(Metric::Solved, 1);
                JobResult::Solved(solution)
            }
            JobOutcome::Exhausted => {
                self.stats.record(Metric::Invalid, 1);
                JobResult::NotFound
            }
        };
        tracing::info!(%job_id, solved = matches!(result, JobResult::Solved(_)), "Job finished");
        self.scheduler.retire(job_id, &mut self.registry);
        self.active_job = None;
        if let Some(reply) = self.job_reply.take() {
            respond(reply, job_id, result);
        }
    }

    async fn dispatch(&mut self, task: &Task) {
        let Some(payload) = self.scheduler.payload(task.id.job_id).cloned() else {
            return;
        };
        let request = Record::SolveRequest(SolveRequest {
            reply_address: self.self_address.clone(),
            task_id: task.id,
            payload,
        });
        tracing::debug!(peer = %task.worker, task = %task.id, tries = task.tries, "Dispatching task");
        if !self.deliver(&task.worker, &request).await {
            self.kill_worker(&task.worker);
        }
    }

    /// Send over the link to `address`, opening one first if needed.
    async fn deliver(&mut self, address: &PeerAddress, record: &Record) -> bool {
        if !self.links.is_connected(address) {
            match self.links.connect(address).await {
                Ok(_) => {
                    if self.registry.contains(address) {
                        self.registry.set_connected(address, true);
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %address, error = %e, "Connect failed");
                    return false;
                }
            }
        }
        match self.links.send(address, record).await {
            Ok(()) => {
                tracing::trace!(peer = %address, command = record.command(), "Sent record");
                true
            }
            Err(e) => {
                tracing::warn!(peer = %address, error = %e, "Send failed");
                false
            }
        }
    }

    /// Send to every alive peer; peers that cannot be reached are killed.
    async fn broadcast(&mut self, record: &Record) {
        for peer in self.registry.alive_addresses() {
            if !self.deliver(&peer, record).await {
                self.kill_worker(&peer);
            }
        }
    }

    fn kill_worker(&mut self, address: &PeerAddress) {
        let was_alive = self.registry.kill(address);
        let released = self.scheduler.release_worker(address);
        self.links.disconnect(address);
        if was_alive || !released.is_empty() {
            tracing::info!(peer = %address, released = released.len(), "Worker marked dead");
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Record { conn, record } => {
                let from = match record.reply_address() {
                    Some(address) => {
                        if self.links.peer_of(conn).is_none() {
                            self.links.bind(conn, address);
                        }
                        Some(address.clone())
                    }
                    None => self.links.peer_of(conn).cloned(),
                };
                if let Some(from) = &from {
                    if *from != self.self_address {
                        self.registry.heartbeat_received(from, now);
                        let connected = self.links.is_connected(from);
                        self.registry.set_connected(from, connected);
                    }
                }
                tracing::trace!(conn, command = record.command(), "Received record");
                self.handle_record(conn, record, now).await;
            }
            LinkEvent::Closed { conn } => {
                if let Some(peer) = self.links.close(conn) {
                    tracing::info!(%peer, "Peer closed link");
                    self.kill_worker(&peer);
                }
            }
            LinkEvent::Failed { conn, error } => {
                let raw_len = error.raw().map(<[u8]>::len).unwrap_or(0);
                tracing::warn!(conn, error = %error, raw_len, "Dropping link after protocol error");
                if let Some(peer) = self.links.close(conn) {
                    self.registry.set_connected(&peer, false);
                }
            }
        }
    }

    async fn handle_record(&mut self, conn: ConnectionId, record: Record, now: Instant) {
        match record {
            Record::JoinRequest(request) => self.on_join_request(request).await,
            Record::JoinReply(reply) => self.on_join_reply(reply).await,
            Record::FloodingHello(hello) => self.on_hello(hello).await,
            Record::FloodingConfirmation(confirmation) => self.on_confirmation(confirmation),
            Record::SolveRequest(request) => {
                tracing::debug!(peer = %request.reply_address, task = %request.task_id, conn, "Solve request queued");
                self.executor.submit(WorkItem {
                    origin: Origin::Peer(request.reply_address),
                    task_id: request.task_id,
                    payload: request.payload,
                });
            }
            Record::SolveReply(reply) => {
                self.finish(reply.task_id, &reply.reply_address, reply.solution, now);
            }
        }
    }

    async fn on_join_request(&mut self, request: JoinRequest) {
        let requester = request.reply_address;
        let alive_nodes: Vec<PeerAddress> = self
            .registry
            .alive_addresses()
            .into_iter()
            .filter(|a| *a != requester)
            .collect();
        tracing::info!(peer = %requester, peers = alive_nodes.len(), "Peer joining");
        let reply = Record::JoinReply(JoinReply { alive_nodes });
        if !self.deliver(&requester, &reply).await {
            self.kill_worker(&requester);
        }
    }

    async fn on_join_reply(&mut self, reply: JoinReply) {
        tracing::info!(peers = reply.alive_nodes.len(), "Joined mesh");
        let hello = Record::FloodingHello(self.stats.hello(&self.registry));
        for peer in reply.alive_nodes {
            if peer == self.self_address || self.links.is_connected(&peer) {
                continue;
            }
            if !self.deliver(&peer, &hello).await {
                tracing::warn!(%peer, "Could not reach peer listed by anchor");
            }
        }
    }

    async fn on_hello(&mut self, hello: FloodingHello) {
        self.registry
            .ensure(&hello.reply_address)
            .known_peers
            .clone_from(&hello.alive_nodes);
        self.stats.absorb_report(&hello, &mut self.registry);

        let unknown: Vec<PeerAddress> = hello
            .alive_nodes
            .iter()
            .filter(|a| **a != self.self_address && !self.links.is_connected(a))
            .cloned()
            .collect();
        if unknown.is_empty() {
            return;
        }
        let ours = Record::FloodingHello(self.stats.hello(&self.registry));
        for peer in unknown {
            tracing::debug!(%peer, via = %hello.reply_address, "Discovered peer");
            if !self.deliver(&peer, &ours).await {
                tracing::warn!(%peer, "Could not reach discovered peer");
            }
        }
    }

    fn on_confirmation(&mut self, confirmation: FloodingConfirmation) {
        self.stats.absorb_confirmation(&confirmation, &mut self.registry);
    }

    fn finish(
        &mut self,
        task_id: TaskId,
        from: &PeerAddress,
        solution: Option<Sudoku>,
        now: Instant,
    ) {
        match self
            .scheduler
            .finish_task(task_id, from, solution, &mut self.registry, now)
        {
            Finished::Completed => tracing::debug!(task = %task_id, "Task completed"),
            Finished::Solved(job_id) => tracing::debug!(%job_id, task = %task_id, "Task found solution"),
            Finished::Orphaned | Finished::Unknown => {
                tracing::debug!(task = %task_id, "Discarding late reply")
            }
        }
    }

    async fn handle_execution(&mut self, execution: Execution, now: Instant) {
        self.executor.finished();
        let outcome = match execution.outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                // A peer's request goes unanswered and is retried on its side.
                tracing::warn!(task = %execution.task_id, error = %e, "Dropping failed search");
                if execution.origin == Origin::Local {
                    self.local_slot.abandoned();
                    self.scheduler.abandon_local(&execution.task_id);
                }
                return;
            }
        };
        self.stats.record_validations(outcome.validations);
        tracing::debug!(
            task = %execution.task_id,
            validations = outcome.validations,
            found = outcome.solution.is_some(),
            elapsed_ms = execution.elapsed.as_millis() as u64,
            "Search finished"
        );

        match execution.origin {
            Origin::Peer(requester) => {
                let reply = Record::SolveReply(SolveReply {
                    reply_address: self.self_address.clone(),
                    task_id: execution.task_id,
                    solution: outcome.solution,
                });
                if !self.deliver(&requester, &reply).await {
                    self.kill_worker(&requester);
                }
            }
            Origin::Local => {
                let target = self
                    .registry
                    .mean_response_ema()
                    .unwrap_or(self.config.scheduler.task_size_factor_secs);
                self.local_slot.finished(now, target);
                let me = self.self_address.clone();
                self.finish(execution.task_id, &me, outcome.solution, now);
            }
        }
    }

    fn publish_snapshots(&self) {
        self.stats_tx
            .send_replace(self.stats.stats_snapshot(&self.registry));
        self.network_tx
            .send_replace(self.stats.network_snapshot(&self.registry));
    }
}

fn respond(reply: oneshot::Sender<JobResult>, job_id: JobId, result: JobResult) {
    if reply.send(result).is_err() {
        tracing::debug!(%job_id, "Caller went away before the job finished");
    }
}
