use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use mesh_protocol::{Sudoku, SUDOKU_SIZE};
use mesh_scheduler::{valid_group, Validator};

/// Sudoku checker that slows down under load.
///
/// Every row, column and square check is one call. Once more than
/// `threshold` calls fall inside `interval`, each further call sleeps
/// `base_delay * (calls - threshold + 1)`. With a zero base delay it
/// behaves like plain rules checking.
#[derive(Debug)]
pub struct HandicapValidator {
    base_delay: Duration,
    interval: Duration,
    threshold: usize,
    recent: Mutex<VecDeque<Instant>>,
}

impl HandicapValidator {
    pub fn new(base_delay: Duration, interval: Duration, threshold: usize) -> Self {
        Self {
            base_delay,
            interval,
            threshold,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a call at `now` and return how long it must be delayed.
    pub fn penalty(&self, now: Instant) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let mut recent = match self.recent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while let Some(&oldest) = recent.front() {
            if now.saturating_duration_since(oldest) >= self.interval {
                recent.pop_front();
            } else {
                break;
            }
        }
        recent.push_back(now);

        let calls = recent.len();
        if calls > self.threshold {
            self.base_delay * (calls - self.threshold + 1) as u32
        } else {
            Duration::ZERO
        }
    }

    fn throttled(&self, cells: &[u8; SUDOKU_SIZE]) -> bool {
        let delay = self.penalty(Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        valid_group(cells)
    }
}

impl Validator for HandicapValidator {
    fn check(&self, candidate: &Sudoku) -> bool {
        (0..SUDOKU_SIZE).all(|r| self.throttled(&candidate.row(r)))
            && (0..SUDOKU_SIZE).all(|c| self.throttled(&candidate.column(c)))
            && (0..3).all(|i| (0..3).all(|j| self.throttled(&candidate.square(i * 3, j * 3))))
    }
}
