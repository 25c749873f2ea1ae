use std::time::Instant;

/// Slice sizing for work this node runs itself.
///
/// There is no network turnaround to smooth here, so the size is derived
/// from local throughput: after each slice, `items / elapsed * target`,
/// where `target` is the turnaround peers currently achieve.
#[derive(Debug, Clone)]
pub struct LocalSlot {
    task_size: u64,
    max_growth: f64,
    running: Option<(Instant, u64)>,
}

impl LocalSlot {
    pub fn new(initial_task_size: u64, max_growth: f64) -> Self {
        Self {
            task_size: initial_task_size.max(1),
            max_growth: max_growth.max(1.0),
            running: None,
        }
    }

    pub fn task_size(&self) -> u64 {
        self.task_size
    }

    pub fn started(&mut self, now: Instant, size: u64) {
        self.running = Some((now, size));
    }

    /// The running slice produced no result; keep the current size.
    pub fn abandoned(&mut self) {
        self.running = None;
    }

    /// Re-size after a local slice finishes. `target_latency` is in seconds.
    pub fn finished(&mut self, now: Instant, target_latency: f64) {
        let Some((started, size)) = self.running.take() else {
            return;
        };
        let elapsed = now.saturating_duration_since(started).as_secs_f64();
        let wanted = if elapsed > 0.0 {
            size as f64 / elapsed * target_latency
        } else {
            f64::INFINITY
        };
        let lo = self.task_size as f64 / self.max_growth;
        let hi = self.task_size as f64 * self.max_growth;
        let next = wanted.clamp(lo, hi).ceil();
        self.task_size = (next as u64).max(1);
    }
}
