use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use mesh_protocol::{JobId, PeerAddress, Sudoku, TaskId, DEFAULT_TRIES_LIMIT};
use mesh_state::WorkerRegistry;

use crate::error::JobError;
use crate::splitter::JobSplitter;
use crate::task::Task;

/// Result of [`Scheduler::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    /// Nothing to search: the payload is its own solution.
    Solved(Sudoku),
    /// Job registered with an index space of `space` candidates.
    Started { space: u64 },
}

/// Result of [`Scheduler::finish_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finished {
    /// An in-flight task completed without a solution.
    Completed,
    /// First solution for this job; every other range was retired.
    Solved(JobId),
    /// Reply for a task no longer in flight with the replier. Any matching
    /// pending range was dropped; a reassigned range keeps its new worker.
    Orphaned,
    /// Reply for a job this scheduler does not hold.
    Unknown,
}

/// A task the timeout sweep acted on.
#[derive(Debug, Clone, PartialEq)]
pub enum Expired {
    /// Resend to the same worker; `tries` was incremented.
    Retry(Task),
    /// Out of retries or the worker is dead. The range is pending again and
    /// `worker` should be treated as dead.
    Reassign { task: Task, worker: PeerAddress },
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Solved(Sudoku),
    /// The whole space was searched without a match.
    Exhausted,
}

/// Range bookkeeping for every active job.
///
/// For each unsolved job, the splitter's remaining cursor, the pending
/// ranges and the in-flight ranges together partition `[0, space)`.
#[derive(Debug)]
pub struct Scheduler {
    tries_limit: u32,
    jobs: BTreeMap<JobId, JobSplitter>,
    /// Ranges handed out once and then abandoned, waiting for a new worker.
    pending: BTreeSet<TaskId>,
    in_flight: BTreeMap<TaskId, Task>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TRIES_LIMIT)
    }
}

impl Scheduler {
    pub fn new(tries_limit: u32) -> Self {
        Self {
            tries_limit,
            jobs: BTreeMap::new(),
            pending: BTreeSet::new(),
            in_flight: BTreeMap::new(),
        }
    }

    pub fn tries_limit(&self) -> u32 {
        self.tries_limit
    }

    pub fn submit(&mut self, job_id: JobId, payload: Sudoku) -> Result<Submitted, JobError> {
        if self.jobs.contains_key(&job_id) {
            return Err(JobError::AlreadyScheduled(job_id));
        }
        let splitter = JobSplitter::new(job_id, payload)?;
        let space = splitter.space();
        if space == 0 {
            tracing::debug!(job = %job_id, "Job has no empty cells, solved on submit");
            return Ok(Submitted::Solved(splitter.payload().clone()));
        }
        tracing::info!(job = %job_id, space, "Job scheduled");
        self.jobs.insert(job_id, splitter);
        Ok(Submitted::Started { space })
    }

    pub fn payload(&self, job_id: JobId) -> Option<&Sudoku> {
        self.jobs.get(&job_id).map(|s| s.payload())
    }

    pub fn has_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &TaskId> {
        self.pending.iter()
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &Task> {
        self.in_flight.values()
    }

    pub fn in_flight_task(&self, task_id: &TaskId) -> Option<&Task> {
        self.in_flight.get(task_id)
    }

    /// Every range of `job_id` not yet answered: cursor, pending and in
    /// flight, sorted by start.
    pub fn outstanding(&self, job_id: JobId) -> Vec<TaskId> {
        let mut ranges: Vec<TaskId> = self
            .jobs
            .get(&job_id)
            .and_then(|s| s.remaining_range())
            .into_iter()
            .chain(self.pending.iter().filter(|t| t.job_id == job_id).copied())
            .chain(self.in_flight.keys().filter(|t| t.job_id == job_id).copied())
            .collect();
        ranges.sort_by_key(|t| t.start);
        ranges
    }

    /// Carve a range of at most `size` indices. Fresh space comes first;
    /// once a job's cursor is exhausted its abandoned ranges are reused,
    /// preferring the smallest one that fits.
    pub fn next_range(&mut self, size: u64) -> Option<TaskId> {
        let size = size.max(1);
        for (job_id, splitter) in self.jobs.iter_mut() {
            if splitter.solution().is_some() {
                continue;
            }
            if let Some(range) = splitter.next_slice(size) {
                return Some(range);
            }

            let candidates = self.pending.iter().filter(|t| t.job_id == *job_id);
            let fitting = candidates.clone().filter(|t| t.len() >= size).min_by_key(|t| t.len());
            let chosen = fitting.or_else(|| candidates.max_by_key(|t| t.len())).copied();
            if let Some(range) = chosen {
                self.pending.remove(&range);
                let (head, rest) = range.split_front(size);
                if let Some(rest) = rest {
                    self.pending.insert(rest);
                }
                return Some(head);
            }
        }
        None
    }

    /// Hand work to ready workers, fastest first, until either runs out.
    pub fn assign(&mut self, registry: &mut WorkerRegistry, now: Instant) -> Vec<Task> {
        let mut tasks = Vec::new();
        while let Some(worker) = registry.best_ready() {
            let address = worker.address.clone();
            let Some(range) = self.next_range(worker.adaptive_task_size) else {
                break;
            };
            registry.task_started(&address, now);
            let task = Task::new(range, address, now);
            self.in_flight.insert(range, task.clone());
            tasks.push(task);
        }
        tasks
    }

    /// Take a range for this node to search itself.
    pub fn assign_local(&mut self, self_address: &PeerAddress, size: u64, now: Instant) -> Option<Task> {
        let range = self.next_range(size)?;
        let mut task = Task::new(range, self_address.clone(), now);
        task.local = true;
        self.in_flight.insert(range, task.clone());
        Some(task)
    }

    /// Settle a reply from `from` for `task_id`.
    ///
    /// Only the worker the range is currently in flight with completes it.
    /// A reply from anyone else leaves that assignment alone, though a
    /// solution it carries still counts.
    pub fn finish_task(
        &mut self,
        task_id: TaskId,
        from: &PeerAddress,
        solution: Option<Sudoku>,
        registry: &mut WorkerRegistry,
        now: Instant,
    ) -> Finished {
        let Some(splitter) = self.jobs.get_mut(&task_id.job_id) else {
            return Finished::Unknown;
        };

        let tracked = match self.in_flight.get(&task_id) {
            Some(task) if task.worker == *from => {
                if !task.local {
                    registry.task_finished(&task.worker, now);
                }
                self.in_flight.remove(&task_id);
                true
            }
            Some(task) => {
                tracing::debug!(
                    task = %task_id,
                    from = %from,
                    assigned = %task.worker,
                    "Reply from a worker the range was taken from"
                );
                false
            }
            None => {
                if self.pending.remove(&task_id) {
                    tracing::debug!(task = %task_id, "Late reply for a pending range");
                }
                false
            }
        };

        if let Some(solution) = solution {
            if splitter.solution().is_none() {
                splitter.record_solution(solution);
                self.retire_ranges(task_id.job_id, registry);
                tracing::info!(job = %task_id.job_id, task = %task_id, "Solution found");
                return Finished::Solved(task_id.job_id);
            }
        }

        if tracked {
            Finished::Completed
        } else {
            Finished::Orphaned
        }
    }

    fn retire_ranges(&mut self, job_id: JobId, registry: &mut WorkerRegistry) {
        self.pending.retain(|t| t.job_id != job_id);
        let retired: Vec<TaskId> = self
            .in_flight
            .keys()
            .filter(|t| t.job_id == job_id)
            .copied()
            .collect();
        for id in retired {
            if let Some(task) = self.in_flight.remove(&id) {
                if !task.local {
                    registry.mark_available(&task.worker);
                }
            }
        }
    }

    /// Check every remote in-flight task for expiry.
    pub fn sweep_timeouts(&mut self, registry: &mut WorkerRegistry, now: Instant) -> Vec<Expired> {
        let expired_ids: Vec<TaskId> = self
            .in_flight
            .values()
            .filter(|t| !t.local && registry.is_task_expired(&t.worker, now))
            .map(|t| t.id)
            .collect();

        let mut expired = Vec::new();
        for id in expired_ids {
            let Some(task) = self.in_flight.get_mut(&id) else {
                continue;
            };
            let worker_alive = registry.get(&task.worker).map(|w| w.alive).unwrap_or(false);
            if worker_alive && !task.has_exceeded_tries(self.tries_limit) {
                task.tries += 1;
                registry.task_started(&task.worker, now);
                tracing::debug!(task = %id, worker = %task.worker, tries = task.tries, "Task timed out, retrying");
                expired.push(Expired::Retry(task.clone()));
            } else if let Some(task) = self.in_flight.remove(&id) {
                self.pending.insert(id);
                tracing::info!(task = %id, worker = %task.worker, "Task abandoned, back to pending");
                expired.push(Expired::Reassign {
                    worker: task.worker.clone(),
                    task,
                });
            }
        }
        expired
    }

    /// Return every remote task held by `worker` to the pending pool.
    pub fn release_worker(&mut self, worker: &PeerAddress) -> Vec<TaskId> {
        let released: Vec<TaskId> = self
            .in_flight
            .values()
            .filter(|t| !t.local && &t.worker == worker)
            .map(|t| t.id)
            .collect();
        for id in &released {
            self.in_flight.remove(id);
            self.pending.insert(*id);
        }
        if !released.is_empty() {
            tracing::info!(peer = %worker, tasks = released.len(), "Released tasks of dead worker");
        }
        released
    }

    /// Put a range this node was searching itself back into the pending
    /// pool. Returns whether it was in flight locally.
    pub fn abandon_local(&mut self, task_id: &TaskId) -> bool {
        match self.in_flight.get(task_id) {
            Some(task) if task.local => {
                self.in_flight.remove(task_id);
                self.pending.insert(*task_id);
                true
            }
            _ => false,
        }
    }

    /// `Some` once the job is solved, or searched through with nothing
    /// outstanding.
    pub fn outcome(&self, job_id: JobId) -> Option<JobOutcome> {
        let splitter = self.jobs.get(&job_id)?;
        if let Some(solution) = splitter.solution() {
            return Some(JobOutcome::Solved(solution.clone()));
        }
        let outstanding = self.pending.iter().any(|t| t.job_id == job_id)
            || self.in_flight.keys().any(|t| t.job_id == job_id);
        (splitter.is_exhausted() && !outstanding).then_some(JobOutcome::Exhausted)
    }

    pub fn is_done(&self, job_id: JobId) -> bool {
        self.outcome(job_id).is_some()
    }

    /// Forget a job and anything still outstanding for it.
    pub fn retire(&mut self, job_id: JobId, registry: &mut WorkerRegistry) {
        self.retire_ranges(job_id, registry);
        self.jobs.remove(&job_id);
    }
}
