//! Brute-force search over a range of a job's index space.

use mesh_protocol::{Sudoku, SUDOKU_SIZE};

/// Decides whether a fully filled candidate grid is a solution.
///
/// Implementations may be slow or deliberately throttled; the scheduler
/// only assumes that a call eventually returns.
pub trait Validator: Send + Sync {
    fn check(&self, candidate: &Sudoku) -> bool;
}

/// Whether nine cells hold each digit 1-9 exactly once.
pub fn valid_group(cells: &[u8; SUDOKU_SIZE]) -> bool {
    let mut seen = 0u16;
    for &cell in cells {
        if !(1..=9).contains(&cell) {
            return false;
        }
        seen |= 1 << cell;
    }
    seen == 0b11_1111_1110
}

/// Plain Sudoku rules, no throttling.
#[derive(Debug, Clone, Copy, Default)]
pub struct SudokuRules;

impl Validator for SudokuRules {
    fn check(&self, candidate: &Sudoku) -> bool {
        (0..SUDOKU_SIZE).all(|r| valid_group(&candidate.row(r)))
            && (0..SUDOKU_SIZE).all(|c| valid_group(&candidate.column(c)))
            && (0..3).all(|i| (0..3).all(|j| valid_group(&candidate.square(i * 3, j * 3))))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub solution: Option<Sudoku>,
    /// Candidates handed to the validator.
    pub validations: u64,
}

/// Check candidates `start..end` in order, stopping at the first valid one.
pub fn search_range(
    payload: &Sudoku,
    start: u64,
    end: u64,
    validator: &dyn Validator,
) -> SearchOutcome {
    let empty_cells = payload.empty_cells();
    let mut validations = 0;
    for index in start..end {
        let candidate = payload.candidate(&empty_cells, index);
        validations += 1;
        if validator.check(&candidate) {
            return SearchOutcome {
                solution: Some(candidate),
                validations,
            };
        }
    }
    SearchOutcome {
        solution: None,
        validations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOLVED: [[u8; 9]; 9] = [
        [8, 2, 7, 1, 5, 4, 3, 9, 6],
        [9, 6, 5, 3, 2, 7, 1, 4, 8],
        [3, 4, 1, 6, 8, 9, 7, 5, 2],
        [5, 9, 3, 4, 6, 8, 2, 7, 1],
        [4, 7, 2, 5, 1, 3, 6, 8, 9],
        [6, 1, 8, 9, 7, 2, 4, 3, 5],
        [7, 8, 6, 2, 3, 5, 9, 1, 4],
        [1, 5, 4, 7, 9, 6, 8, 2, 3],
        [2, 3, 9, 8, 4, 1, 5, 6, 7],
    ];

    #[test]
    fn test_rules_accept_solved_grid() {
        assert!(SudokuRules.check(&Sudoku::new(SOLVED).unwrap()));
    }

    #[test]
    fn test_rules_reject_swapped_cells() {
        let mut grid = SOLVED;
        grid[0].swap(0, 1);
        assert!(!SudokuRules.check(&Sudoku::new(grid).unwrap()));
    }

    #[test]
    fn test_sum_45_is_not_enough() {
        assert!(!valid_group(&[5, 5, 5, 5, 5, 5, 5, 5, 5]));
        assert!(valid_group(&[9, 8, 7, 6, 5, 4, 3, 2, 1]));
    }

    #[test]
    fn test_search_stops_at_first_match() {
        let mut grid = SOLVED;
        grid[0][0] = 0; // 8
        grid[8][8] = 0; // 7
        let payload = Sudoku::new(grid).unwrap();
        // index = (8 - 1) * 9 + (7 - 1)
        let out = search_range(&payload, 0, 81, &SudokuRules);
        assert_eq!(out.solution, Some(Sudoku::new(SOLVED).unwrap()));
        assert_eq!(out.validations, 7 * 9 + 6 + 1);
    }

    #[test]
    fn test_search_outside_match_finds_nothing() {
        let mut grid = SOLVED;
        grid[0][0] = 0;
        let payload = Sudoku::new(grid).unwrap();
        let out = search_range(&payload, 0, 7, &SudokuRules);
        assert!(out.solution.is_none());
        assert_eq!(out.validations, 7);
    }
}
