use std::time::Instant;

use mesh_protocol::{PeerAddress, TaskId};

/// A range handed to one worker and not yet answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub worker: PeerAddress,
    /// Times this task has been re-sent after expiring.
    pub tries: u32,
    pub created_at: Instant,
    /// Executed by this node itself; never times out.
    pub local: bool,
}

impl Task {
    pub fn new(id: TaskId, worker: PeerAddress, created_at: Instant) -> Self {
        Self {
            id,
            worker,
            tries: 0,
            created_at,
            local: false,
        }
    }

    pub fn has_exceeded_tries(&self, tries_limit: u32) -> bool {
        self.tries >= tries_limit
    }
}
