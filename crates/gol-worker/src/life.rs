//! Game of Life step on a toroidal grid
//!
//! The rule is the standard B3/S23: a live cell with two or three live
//! neighbours survives, a dead cell with exactly three becomes alive, every
//! other cell is dead in the next generation. Both axes wrap.

use gol_protocol::{Grid, RowRange, ALIVE, DEAD};

/// Number of live cells among the eight neighbours of `(x, y)`.
pub fn live_neighbours(grid: &Grid, x: usize, y: usize) -> u8 {
    let width = grid.width();
    let height = grid.height();

    let left = (x + width - 1) % width;
    let right = (x + 1) % width;
    let up = (y + height - 1) % height;
    let down = (y + 1) % height;

    [
        (left, up),
        (x, up),
        (right, up),
        (left, y),
        (right, y),
        (left, down),
        (x, down),
        (right, down),
    ]
    .iter()
    .filter(|&&(nx, ny)| grid.is_alive(nx, ny))
    .count() as u8
}

pub fn next_state(alive: bool, neighbours: u8) -> bool {
    matches!((alive, neighbours), (true, 2) | (true, 3) | (false, 3))
}

/// Compute the next generation for `range` only.
///
/// `before_cell` runs before every cell evaluation; the worker uses it as
/// its pause checkpoint. The returned buffer is row-major and holds exactly
/// `range.len() * grid.width()` cells.
pub fn step_rows<F>(grid: &Grid, range: RowRange, mut before_cell: F) -> Vec<u8>
where
    F: FnMut(),
{
    let width = grid.width();
    let mut out = Vec::with_capacity(range.len() * width);

    for y in range.start..range.end {
        for x in 0..width {
            before_cell();
            let alive = next_state(grid.is_alive(x, y), live_neighbours(grid, x, y));
            out.push(if alive { ALIVE } else { DEAD });
        }
    }

    out
}

/// Whole-grid step, used as the sequential reference.
pub fn step(grid: &Grid) -> Grid {
    let mut next = grid.clone();
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let alive = next_state(grid.is_alive(x, y), live_neighbours(grid, x, y));
            next.set(x, y, if alive { ALIVE } else { DEAD });
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use gol_protocol::Cell;

    fn cells(points: &[(usize, usize)]) -> Vec<Cell> {
        points.iter().map(|&(x, y)| Cell { x, y }).collect()
    }

    #[test]
    fn test_rule_table() {
        assert!(!next_state(true, 1));
        assert!(next_state(true, 2));
        assert!(next_state(true, 3));
        assert!(!next_state(true, 4));
        assert!(next_state(false, 3));
        assert!(!next_state(false, 2));
        assert!(!next_state(false, 6));
    }

    #[test]
    fn test_blinker_oscillates() {
        let horizontal = Grid::with_alive(5, 5, &cells(&[(1, 2), (2, 2), (3, 2)]));
        let vertical = Grid::with_alive(5, 5, &cells(&[(2, 1), (2, 2), (2, 3)]));

        assert_eq!(step(&horizontal), vertical);
        assert_eq!(step(&vertical), horizontal);
    }

    #[test]
    fn test_block_is_still_life() {
        let block = Grid::with_alive(4, 4, &cells(&[(1, 1), (2, 1), (1, 2), (2, 2)]));
        assert_eq!(step(&block), block);
    }

    #[test]
    fn test_neighbours_wrap_both_axes() {
        // corners of a torus are all adjacent to each other
        let grid = Grid::with_alive(4, 4, &cells(&[(3, 3), (0, 3), (3, 0)]));
        assert_eq!(live_neighbours(&grid, 0, 0), 3);

        let next = step(&grid);
        assert!(next.is_alive(0, 0));
    }

    #[test]
    fn test_step_rows_only_covers_range() {
        let blinker = Grid::with_alive(5, 5, &cells(&[(1, 2), (2, 2), (3, 2)]));
        let full = step(&blinker);

        let mut evaluated = 0;
        let rows = step_rows(&blinker, RowRange::new(1, 3), || evaluated += 1);

        assert_eq!(evaluated, 10);
        assert_eq!(rows.len(), 10);
        assert_eq!(&rows[..5], full.row(1));
        assert_eq!(&rows[5..], full.row(2));
    }
}
