//! Sudoku job payload.
//!
//! A job is a partially filled 9x9 grid. Its index space enumerates every
//! way of filling the empty cells with digits 1-9: index `i` writes the
//! base-9 digits of `i` (plus one) into the empty cells in row-major order,
//! least significant digit last.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

pub const SUDOKU_SIZE: usize = 9;

pub type Grid = [[u8; SUDOKU_SIZE]; SUDOKU_SIZE];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Grid", into = "Grid")]
pub struct Sudoku {
    grid: Grid,
}

impl Sudoku {
    /// Build a grid, rejecting cells outside `0..=9` (`0` marks an empty cell).
    pub fn new(grid: Grid) -> Result<Self, ProtocolError> {
        for (r, row) in grid.iter().enumerate() {
            for (c, &cell) in row.iter().enumerate() {
                if cell > 9 {
                    return Err(ProtocolError::InvalidPayload(format!(
                        "cell ({r}, {c}) holds {cell}, expected 0-9"
                    )));
                }
            }
        }
        Ok(Self { grid })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Coordinates of the empty cells in row-major order.
    pub fn empty_cells(&self) -> Vec<(usize, usize)> {
        let mut cells = Vec::new();
        for r in 0..SUDOKU_SIZE {
            for c in 0..SUDOKU_SIZE {
                if self.grid[r][c] == 0 {
                    cells.push((r, c));
                }
            }
        }
        cells
    }

    /// Size of the index space, `9^k` for `k` empty cells.
    ///
    /// A full grid has nothing to search and reports `0`. Returns `None`
    /// when the space does not fit in a `u64`.
    pub fn search_space(&self) -> Option<u64> {
        let k = self.empty_cells().len();
        if k == 0 {
            return Some(0);
        }
        9u64.checked_pow(k as u32)
    }

    /// The candidate grid for `index`, given the grid's empty cells.
    pub fn candidate(&self, empty_cells: &[(usize, usize)], index: u64) -> Sudoku {
        let mut grid = self.grid;
        let mut rest = index;
        for &(r, c) in empty_cells.iter().rev() {
            grid[r][c] = (rest % 9) as u8 + 1;
            rest /= 9;
        }
        Sudoku { grid }
    }

    pub fn row(&self, row: usize) -> [u8; SUDOKU_SIZE] {
        self.grid[row]
    }

    pub fn column(&self, col: usize) -> [u8; SUDOKU_SIZE] {
        let mut out = [0; SUDOKU_SIZE];
        for (r, cell) in out.iter_mut().enumerate() {
            *cell = self.grid[r][col];
        }
        out
    }

    /// The 3x3 square whose top-left cell is `(row, col)`.
    pub fn square(&self, row: usize, col: usize) -> [u8; SUDOKU_SIZE] {
        let mut out = [0; SUDOKU_SIZE];
        for i in 0..3 {
            for j in 0..3 {
                out[i * 3 + j] = self.grid[row + i][col + j];
            }
        }
        out
    }
}

impl TryFrom<Grid> for Sudoku {
    type Error = ProtocolError;

    fn try_from(grid: Grid) -> Result<Self, Self::Error> {
        Sudoku::new(grid)
    }
}

impl From<Sudoku> for Grid {
    fn from(s: Sudoku) -> Self {
        s.grid
    }
}

impl fmt::Display for Sudoku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "| - - - - - - - - - - - |")?;
        for (i, row) in self.grid.iter().enumerate() {
            write!(f, "| ")?;
            for (j, cell) in row.iter().enumerate() {
                write!(f, "{cell}")?;
                f.write_str(if j % 3 == 2 { " | " } else { " " })?;
            }
            writeln!(f)?;
            if i % 3 == 2 {
                writeln!(f, "| - - - - - - - - - - - |")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOLVED: Grid = [
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
    fn test_full_grid_has_empty_search_space() {
        let s = Sudoku::new(SOLVED).unwrap();
        assert_eq!(s.search_space(), Some(0));
        assert!(s.empty_cells().is_empty());
    }

    #[test]
    fn test_search_space_is_power_of_nine() {
        let mut grid = SOLVED;
        grid[0][0] = 0;
        grid[4][4] = 0;
        let s = Sudoku::new(grid).unwrap();
        assert_eq!(s.search_space(), Some(81));
    }

    #[test]
    fn test_search_space_overflow() {
        let s = Sudoku::new([[0; 9]; 9]).unwrap();
        assert_eq!(s.search_space(), None);
    }

    #[test]
    fn test_candidate_fills_last_cell_with_lowest_digit() {
        let mut grid = SOLVED;
        grid[0][0] = 0;
        grid[8][8] = 0;
        let s = Sudoku::new(grid).unwrap();
        let empties = s.empty_cells();

        let first = s.candidate(&empties, 0);
        assert_eq!(first.grid()[0][0], 1);
        assert_eq!(first.grid()[8][8], 1);

        // 8 * 9 + 6 -> digits (9, 7)
        let c = s.candidate(&empties, 78);
        assert_eq!(c.grid()[0][0], 9);
        assert_eq!(c.grid()[8][8], 7);
    }

    #[test]
    fn test_rejects_out_of_range_cells() {
        let mut grid = SOLVED;
        grid[3][3] = 12;
        assert!(Sudoku::new(grid).is_err());
    }

    #[test]
    fn test_deserialize_validates_cells() {
        let mut grid = SOLVED;
        grid[0][1] = 10;
        let json = serde_json::to_string(&grid).unwrap();
        assert!(serde_json::from_str::<Sudoku>(&json).is_err());
    }

    #[test]
    fn test_square_and_column_views() {
        let s = Sudoku::new(SOLVED).unwrap();
        assert_eq!(s.column(0), [8, 9, 3, 5, 4, 6, 7, 1, 2]);
        assert_eq!(s.square(0, 0), [8, 2, 7, 9, 6, 5, 3, 4, 1]);
    }
}
