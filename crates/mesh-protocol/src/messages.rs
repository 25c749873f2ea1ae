use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sudoku::Sudoku;
use crate::types::{Metric, PeerAddress, TaskId};

/// Every record exchanged between nodes. The `command` field on the wire
/// selects the variant; anything else fails to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Record {
    JoinRequest(JoinRequest),
    JoinReply(JoinReply),
    FloodingHello(FloodingHello),
    FloodingConfirmation(FloodingConfirmation),
    SolveRequest(SolveRequest),
    SolveReply(SolveReply),
}

impl Record {
    /// Wire names of all commands, in declaration order.
    pub const COMMANDS: [&'static str; 6] = [
        "JOIN_REQUEST",
        "JOIN_REPLY",
        "FLOODING_HELLO",
        "FLOODING_CONFIRMATION",
        "SOLVE_REQUEST",
        "SOLVE_REPLY",
    ];

    pub fn command(&self) -> &'static str {
        match self {
            Self::JoinRequest(_) => Self::COMMANDS[0],
            Self::JoinReply(_) => Self::COMMANDS[1],
            Self::FloodingHello(_) => Self::COMMANDS[2],
            Self::FloodingConfirmation(_) => Self::COMMANDS[3],
            Self::SolveRequest(_) => Self::COMMANDS[4],
            Self::SolveReply(_) => Self::COMMANDS[5],
        }
    }

    /// Listen address the sender asked us to reply to, if the record carries one.
    pub fn reply_address(&self) -> Option<&PeerAddress> {
        match self {
            Self::JoinRequest(r) => Some(&r.reply_address),
            Self::JoinReply(_) => None,
            Self::FloodingHello(r) => Some(&r.reply_address),
            Self::FloodingConfirmation(r) => Some(&r.reply_address),
            Self::SolveRequest(r) => Some(&r.reply_address),
            Self::SolveReply(r) => Some(&r.reply_address),
        }
    }
}

// ── Membership ──

/// Sent to an anchor node to enter the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub reply_address: PeerAddress,
}

/// The anchor's alive peers; the joiner greets each of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReply {
    pub alive_nodes: Vec<PeerAddress>,
}

// ── Flooding ──

/// The confirmed value of a metric and the sender's own unconfirmed
/// contribution for the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricReport {
    pub baseline: u64,
    pub internal: u64,
}

/// Per-worker validations as seen by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub address: PeerAddress,
    pub validations: u64,
    pub internal_validations: u64,
}

/// Heartbeat and gossip payload broadcast every flooding tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloodingHello {
    pub reply_address: PeerAddress,
    pub alive_nodes: Vec<PeerAddress>,
    pub stats: BTreeMap<Metric, MetricReport>,
    #[serde(default)]
    pub worker_stats: Vec<WorkerReport>,
}

/// Agreed per-worker validations at the close of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTotal {
    pub address: PeerAddress,
    pub validations: u64,
}

/// Broadcast by a node that has heard from every alive peer this round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloodingConfirmation {
    pub reply_address: PeerAddress,
    pub stats: BTreeMap<Metric, u64>,
    #[serde(default)]
    pub worker_stats: Vec<WorkerTotal>,
}

// ── Work ──

/// Search `task_id`'s range of `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveRequest {
    pub reply_address: PeerAddress,
    pub task_id: TaskId,
    pub payload: Sudoku,
}

/// Outcome of a [`SolveRequest`]; `solution` is `None` when the range held no match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveReply {
    pub reply_address: PeerAddress,
    pub task_id: TaskId,
    pub solution: Option<Sudoku>,
}
