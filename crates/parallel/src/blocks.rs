//! Block iteration over pixel windows

use suitability_core::PixelWindow;

/// A block of a larger window, in raster pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Position of this block in iteration order
    pub index: usize,
    pub window: PixelWindow,
}

/// Iterator over non-overlapping blocks covering a window, row-major.
///
/// Edge blocks are truncated to the window.
pub struct BlockIterator {
    outer: PixelWindow,
    block_rows: usize,
    block_cols: usize,
    current_row: usize,
    current_col: usize,
    index: usize,
}

impl BlockIterator {
    pub fn new(outer: PixelWindow, block_rows: usize, block_cols: usize) -> Self {
        Self {
            outer,
            block_rows: block_rows.max(1),
            block_cols: block_cols.max(1),
            current_row: 0,
            current_col: 0,
            index: 0,
        }
    }

    /// Full-width strips of `block_rows` rows
    pub fn strips(outer: PixelWindow, block_rows: usize) -> Self {
        Self::new(outer, block_rows, outer.cols)
    }
}

impl Iterator for BlockIterator {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.outer.is_empty() || self.current_row >= self.outer.rows {
            return None;
        }

        let rows = self.block_rows.min(self.outer.rows - self.current_row);
        let cols = self.block_cols.min(self.outer.cols - self.current_col);
        let block = Block {
            index: self.index,
            window: PixelWindow::new(
                self.outer.col_off + self.current_col,
                self.outer.row_off + self.current_row,
                cols,
                rows,
            ),
        };

        self.index += 1;
        self.current_col += self.block_cols;
        if self.current_col >= self.outer.cols {
            self.current_col = 0;
            self.current_row += self.block_rows;
        }

        Some(block)
    }
}
