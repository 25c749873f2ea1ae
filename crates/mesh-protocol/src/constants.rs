/// Width of the big-endian length prefix in front of every record.
pub const LENGTH_PREFIX_BYTES: usize = 2;
/// Largest serialized record that fits behind the length prefix.
pub const MAX_RECORD_BYTES: usize = u16::MAX as usize;

pub const DEFAULT_P2P_PORT: u16 = 7000;
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Period of the flooding (heartbeat + stats gossip) tick.
pub const DEFAULT_FLOODING_INTERVAL_MS: u64 = 1000;
/// A peer is declared dead after this many flooding intervals without a record.
pub const FLOODING_TIMEOUT_FACTOR: u32 = 6;

/// Retries granted to a timed-out task before it is handed to another worker.
pub const DEFAULT_TRIES_LIMIT: u32 = 3;
/// A task expires once it has been outstanding this many times the worker's EMA.
pub const TASK_TIMEOUT_MULTIPLIER: f64 = 100.0;
/// Smoothing factor of the per-worker task response EMA.
pub const TASK_EMA_ALPHA: f64 = 0.5;
