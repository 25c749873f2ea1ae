use mesh_protocol::{JobId, Sudoku, TaskId};

use crate::error::JobError;

/// Cursor over the not-yet-handed-out part of a job's index space.
#[derive(Debug, Clone)]
pub struct JobSplitter {
    job_id: JobId,
    payload: Sudoku,
    space: u64,
    /// Remaining `[cursor, space)`.
    cursor: u64,
    solution: Option<Sudoku>,
}

impl JobSplitter {
    pub fn new(job_id: JobId, payload: Sudoku) -> Result<Self, JobError> {
        let space = payload
            .search_space()
            .ok_or_else(|| JobError::SearchSpaceTooLarge {
                empty_cells: payload.empty_cells().len(),
            })?;
        Ok(Self {
            job_id,
            payload,
            space,
            cursor: 0,
            solution: None,
        })
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn payload(&self) -> &Sudoku {
        &self.payload
    }

    /// Size of the whole index space.
    pub fn space(&self) -> u64 {
        self.space
    }

    /// The part of the space not yet handed out, as a range.
    pub fn remaining_range(&self) -> Option<TaskId> {
        (self.cursor < self.space).then(|| TaskId::new(self.job_id, self.cursor, self.space))
    }

    pub fn remaining(&self) -> u64 {
        self.space - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.space
    }

    /// Carve up to `size` indices off the front of the cursor.
    pub fn next_slice(&mut self, size: u64) -> Option<TaskId> {
        if self.is_exhausted() || size == 0 {
            return None;
        }
        let end = self.cursor.saturating_add(size).min(self.space);
        let slice = TaskId::new(self.job_id, self.cursor, end);
        self.cursor = end;
        Some(slice)
    }

    pub fn record_solution(&mut self, solution: Sudoku) {
        if self.solution.is_none() {
            self.solution = Some(solution);
        }
    }

    pub fn solution(&self) -> Option<&Sudoku> {
        self.solution.as_ref()
    }
}
