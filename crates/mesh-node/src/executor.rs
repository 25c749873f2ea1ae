use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;

use mesh_protocol::{PeerAddress, Sudoku, TaskId};
use mesh_scheduler::{search_range, SearchOutcome, Validator};

/// Who asked for a range to be searched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A SOLVE_REQUEST from this peer; answered with a SOLVE_REPLY.
    Peer(PeerAddress),
    /// A slice this node assigned to itself.
    Local,
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub origin: Origin,
    pub task_id: TaskId,
    pub payload: Sudoku,
}

#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("search aborted: {0}")]
    Aborted(String),
}

/// A finished search, sent back to the event loop. Sent even when the
/// search itself failed, so the queue always moves on.
#[derive(Debug, Clone)]
pub struct Execution {
    pub origin: Origin,
    pub task_id: TaskId,
    pub outcome: Result<SearchOutcome, ExecutionError>,
    pub elapsed: Duration,
}

/// Runs searches one at a time, in arrival order, on the blocking pool.
///
/// The event loop must call [`finished`](Executor::finished) for every
/// [`Execution`] it receives so the next queued item can start.
pub struct Executor {
    validator: Arc<dyn Validator>,
    backlog: VecDeque<WorkItem>,
    running: bool,
    done_tx: mpsc::Sender<Execution>,
}

impl Executor {
    pub fn new(validator: Arc<dyn Validator>, capacity: usize) -> (Self, mpsc::Receiver<Execution>) {
        let (done_tx, done_rx) = mpsc::channel(capacity.max(1));
        let executor = Self {
            validator,
            backlog: VecDeque::new(),
            running: false,
            done_tx,
        };
        (executor, done_rx)
    }

    /// Nothing running and nothing queued.
    pub fn is_idle(&self) -> bool {
        !self.running && self.backlog.is_empty()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn submit(&mut self, item: WorkItem) {
        self.backlog.push_back(item);
        self.start_next();
    }

    pub fn finished(&mut self) {
        self.running = false;
        self.start_next();
    }

    fn start_next(&mut self) {
        if self.running {
            return;
        }
        let Some(item) = self.backlog.pop_front() else {
            return;
        };
        self.running = true;
        let validator = Arc::clone(&self.validator);
        let done_tx = self.done_tx.clone();
        tracing::trace!(task = %item.task_id, origin = ?item.origin, "Search started");
        let WorkItem {
            origin,
            task_id,
            payload,
        } = item;
        tokio::spawn(async move {
            let started = Instant::now();
            let search = tokio::task::spawn_blocking(move || {
                search_range(&payload, task_id.start, task_id.end, validator.as_ref())
            });
            let outcome = search.await.map_err(|e| {
                tracing::error!(task = %task_id, error = %e, "Search task failed");
                ExecutionError::Aborted(e.to_string())
            });
            let execution = Execution {
                origin,
                task_id,
                outcome,
                elapsed: started.elapsed(),
            };
            if done_tx.send(execution).await.is_err() {
                tracing::debug!("Event loop gone, dropping search result");
            }
        });
    }
}
