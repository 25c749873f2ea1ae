//! Mesh Node - a Sudoku brute-force mesh member
//!
//! Wires the protocol, link, state and scheduler crates into one event
//! loop ([`Node`]), runs searches on the blocking pool ([`Executor`]) behind
//! a throttled validator, and exposes jobs and stats over HTTP
//! ([`HttpGateway`]).

pub mod config;
pub mod executor;
pub mod gateway;
pub mod node;
pub mod validator;

pub use config::{ConfigError, NodeConfig};
pub use executor::{Execution, ExecutionError, Executor, Origin, WorkItem};
pub use gateway::HttpGateway;
pub use node::{JobClient, JobRequest, JobResult, Node, NodeError, NodeHandle};
pub use validator::HandicapValidator;
