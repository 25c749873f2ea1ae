use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Listen address of a mesh node, `host:port`.
///
/// This is the identity of a peer everywhere in the mesh. It is carried
/// inside records rather than inferred from sockets, because a node's
/// outbound connections use ephemeral ports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn from_parts(host: &str, port: u16) -> Self {
        Self(format!("{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of one externally submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous slice `[start, end)` of a job's index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub job_id: JobId,
    pub start: u64,
    pub end: u64,
}

impl TaskId {
    pub fn new(job_id: JobId, start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { job_id, start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Split off the first `len` indices. Returns the head and, if anything
    /// is left over, the remainder.
    pub fn split_front(&self, len: u64) -> (TaskId, Option<TaskId>) {
        if len >= self.len() {
            return (*self, None);
        }
        let mid = self.start + len;
        (
            TaskId::new(self.job_id, self.start, mid),
            Some(TaskId::new(self.job_id, mid, self.end)),
        )
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{})", self.job_id, self.start, self.end)
    }
}

/// Cluster-wide counters gossiped by the flooding protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Jobs that ended with a solution.
    Solved,
    /// Jobs whose whole space was searched without a match.
    Invalid,
    /// Candidate grids checked.
    Validations,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Solved, Metric::Invalid, Metric::Validations];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solved => "solved",
            Self::Invalid => "invalid",
            Self::Validations => "validations",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
