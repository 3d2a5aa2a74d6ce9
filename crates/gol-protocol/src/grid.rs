//! Grid - 世界网格
//!
//! 行优先存储的细胞矩阵，细胞值为 [`ALIVE`] (255) 或 [`DEAD`] (0)。
//! 网格在两个方向上都是环面（toroidal）：最右列与最左列相邻，最底行与最顶行相邻。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 存活细胞
pub const ALIVE: u8 = 255;

/// 死亡细胞
pub const DEAD: u8 = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("Grid dimensions must be non-zero (got {width}x{height})")]
    EmptyGrid { width: usize, height: usize },

    #[error("Cell buffer has {actual} cells, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Row {row} has width {actual}, expected {expected}")]
    RaggedRow { row: usize, expected: usize, actual: usize },

    #[error("Row range {start}..{end} is invalid for height {height}")]
    InvalidRange { start: usize, end: usize, height: usize },

    #[error("Grid of {width}x{height} cells does not fit in memory")]
    TooLarge { width: usize, height: usize },
}

/// `width * height`，溢出时视为尺寸错误
fn cell_count(width: usize, height: usize) -> Result<usize, GridError> {
    width
        .checked_mul(height)
        .ok_or(GridError::TooLarge { width, height })
}

/// 细胞坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
}

/// 半开行区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRange {
    pub start: usize,
    pub end: usize,
}

impl RowRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 世界网格
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

impl Grid {
    /// 全部为死亡细胞的网格
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![DEAD; width * height],
        }
    }

    /// 从行优先的细胞缓冲区构建
    pub fn from_cells(width: usize, height: usize, cells: Vec<u8>) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::EmptyGrid { width, height });
        }
        let expected = cell_count(width, height)?;
        if cells.len() != expected {
            return Err(GridError::SizeMismatch {
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self { width, height, cells })
    }

    /// 从二维行列表构建
    pub fn from_rows(rows: Vec<Vec<u8>>) -> Result<Self, GridError> {
        let height = rows.len();
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut cells = Vec::with_capacity(width * height);
        for (y, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(GridError::RaggedRow {
                    row: y,
                    expected: width,
                    actual: row.len(),
                });
            }
            cells.extend(row);
        }
        Self::from_cells(width, height, cells)
    }

    /// 用存活坐标列表构建
    pub fn with_alive(width: usize, height: usize, alive: &[Cell]) -> Self {
        let mut grid = Self::new(width, height);
        for cell in alive {
            grid.set(cell.x, cell.y, ALIVE);
        }
        grid
    }

    /// 反序列化得到的网格不经过构造函数，使用前需要重新校验
    pub fn validate(&self) -> Result<(), GridError> {
        if self.width == 0 || self.height == 0 {
            return Err(GridError::EmptyGrid {
                width: self.width,
                height: self.height,
            });
        }
        let expected = cell_count(self.width, self.height)?;
        if self.cells.len() != expected {
            return Err(GridError::SizeMismatch {
                expected,
                actual: self.cells.len(),
            });
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<u8> {
        self.cells
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.cells[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.cells[y * self.width + x] = value;
    }

    pub fn is_alive(&self, x: usize, y: usize) -> bool {
        self.get(x, y) == ALIVE
    }

    /// 单行切片
    pub fn row(&self, y: usize) -> &[u8] {
        &self.cells[y * self.width..(y + 1) * self.width]
    }

    /// 校验行区间是否落在网格内且非空
    pub fn check_range(&self, range: RowRange) -> Result<(), GridError> {
        if range.start >= range.end || range.end > self.height {
            return Err(GridError::InvalidRange {
                start: range.start,
                end: range.end,
                height: self.height,
            });
        }
        Ok(())
    }

    /// 行区间对应的连续细胞切片
    pub fn rows(&self, range: RowRange) -> &[u8] {
        &self.cells[range.start * self.width..range.end * self.width]
    }

    /// 将部分网格写回到其起始行
    pub fn write_partial(&mut self, partial: &PartialGrid) -> Result<(), GridError> {
        if partial.width != self.width {
            return Err(GridError::RaggedRow {
                row: partial.row_start,
                expected: self.width,
                actual: partial.width,
            });
        }
        // 最后一行不完整的分区不能按行数截断后写入
        let expected = partial.num_rows() * self.width;
        if partial.cells.len() != expected {
            return Err(GridError::SizeMismatch {
                expected,
                actual: partial.cells.len(),
            });
        }
        self.check_range(partial.range())?;
        let offset = partial.row_start * self.width;
        self.cells[offset..offset + partial.cells.len()].copy_from_slice(&partial.cells);
        Ok(())
    }

    /// 存活细胞数
    pub fn alive_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c == ALIVE).count()
    }

    /// 所有存活细胞坐标（行优先顺序）
    pub fn alive_cells(&self) -> Vec<Cell> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == ALIVE)
            .map(|(i, _)| Cell {
                x: i % self.width,
                y: i / self.width,
            })
            .collect()
    }
}

/// Worker 返回的部分网格：只包含被分配的行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialGrid {
    pub row_start: usize,
    pub width: usize,
    pub cells: Vec<u8>,
}

impl PartialGrid {
    pub fn num_rows(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.cells.len() / self.width
        }
    }

    pub fn range(&self) -> RowRange {
        RowRange::new(self.row_start, self.row_start.saturating_add(self.num_rows()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_and_access() {
        let grid = Grid::from_rows(vec![
            vec![0, 255, 0],
            vec![255, 255, 0],
        ])
        .unwrap();

        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);
        assert!(grid.is_alive(1, 0));
        assert!(!grid.is_alive(2, 1));
        assert_eq!(grid.row(1), &[255, 255, 0]);
        assert_eq!(grid.alive_count(), 3);
        assert_eq!(
            grid.alive_cells(),
            vec![Cell { x: 1, y: 0 }, Cell { x: 0, y: 1 }, Cell { x: 1, y: 1 }]
        );
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(matches!(
            Grid::from_rows(vec![vec![0, 0], vec![0]]),
            Err(GridError::RaggedRow { row: 1, .. })
        ));
        assert!(matches!(
            Grid::from_cells(2, 2, vec![0; 3]),
            Err(GridError::SizeMismatch { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            Grid::from_rows(vec![]),
            Err(GridError::EmptyGrid { .. })
        ));
    }

    #[test]
    fn test_write_partial() {
        let mut grid = Grid::new(2, 4);
        let partial = PartialGrid {
            row_start: 2,
            width: 2,
            cells: vec![ALIVE, DEAD, DEAD, ALIVE],
        };
        grid.write_partial(&partial).unwrap();

        assert_eq!(grid.row(0), &[DEAD, DEAD]);
        assert_eq!(grid.row(2), &[ALIVE, DEAD]);
        assert_eq!(grid.row(3), &[DEAD, ALIVE]);
        assert_eq!(partial.range(), RowRange::new(2, 4));
    }

    #[test]
    fn test_write_partial_out_of_bounds() {
        let mut grid = Grid::new(2, 2);
        let partial = PartialGrid {
            row_start: 1,
            width: 2,
            cells: vec![ALIVE; 4],
        };
        assert!(matches!(
            grid.write_partial(&partial),
            Err(GridError::InvalidRange { start: 1, end: 3, height: 2 })
        ));
    }

    #[test]
    fn test_write_partial_rejects_trailing_cells() {
        let mut grid = Grid::new(2, 1);
        let partial = PartialGrid {
            row_start: 0,
            width: 2,
            cells: vec![ALIVE; 3],
        };
        assert!(matches!(
            grid.write_partial(&partial),
            Err(GridError::SizeMismatch { expected: 2, actual: 3 })
        ));
        assert_eq!(grid.alive_count(), 0);
    }

    #[test]
    fn test_write_partial_far_start_row() {
        let mut grid = Grid::new(2, 2);
        let partial = PartialGrid {
            row_start: usize::MAX,
            width: 2,
            cells: vec![ALIVE; 2],
        };
        assert!(matches!(
            grid.write_partial(&partial),
            Err(GridError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_validate_overflowing_dimensions() {
        let grid: Grid = bincode::deserialize(
            &bincode::serialize(&(usize::MAX, 2usize, vec![ALIVE; 2])).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            grid.validate(),
            Err(GridError::TooLarge { width: usize::MAX, height: 2 })
        ));
        assert!(matches!(
            Grid::from_cells(usize::MAX, 2, vec![]),
            Err(GridError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_check_range() {
        let grid = Grid::new(3, 3);
        assert!(grid.check_range(RowRange::new(0, 3)).is_ok());
        assert!(grid.check_range(RowRange::new(2, 2)).is_err());
        assert!(grid.check_range(RowRange::new(1, 4)).is_err());
    }
}
