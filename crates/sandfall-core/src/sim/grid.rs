use std::num::NonZeroU32;

/// Index of a grain in the engine's grain list
///
/// Stored off by one so `Option<GrainId>` packs into four bytes per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrainId(NonZeroU32);

impl GrainId {
    pub fn new(index: usize) -> Self {
        let raw = u32::try_from(index + 1).unwrap_or(u32::MAX);
        Self(NonZeroU32::new(raw).unwrap_or(NonZeroU32::MAX))
    }

    pub fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Dense column-major occupancy grid for settled grains
///
/// Each cell holds at most one grain id, which is what keeps two settled
/// grains from sharing a cell.
#[derive(Debug, Clone, Default)]
pub struct OccupancyGrid {
    cols: usize,
    rows: usize,
    cells: Vec<Option<GrainId>>,
}

impl OccupancyGrid {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows,
            cells: vec![None; cols * rows],
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    fn get_index(&self, col: usize, row: usize) -> usize {
        col * self.rows + row
    }

    pub fn in_bounds(&self, col: i32, row: i32) -> bool {
        col >= 0 && row >= 0 && (col as usize) < self.cols && (row as usize) < self.rows
    }

    pub fn get(&self, col: i32, row: i32) -> Option<GrainId> {
        if !self.in_bounds(col, row) {
            return None;
        }
        self.cells[self.get_index(col as usize, row as usize)]
    }

    /// In bounds and unoccupied
    pub fn is_empty(&self, col: i32, row: i32) -> bool {
        self.in_bounds(col, row) && self.get(col, row).is_none()
    }

    /// Place `id` if the cell is free. Returns false when occupied or out of bounds.
    pub fn try_place(&mut self, col: i32, row: i32, id: GrainId) -> bool {
        if !self.is_empty(col, row) {
            return false;
        }
        let idx = self.get_index(col as usize, row as usize);
        self.cells[idx] = Some(id);
        true
    }

    /// Empty the cell if it holds `id`
    pub fn release(&mut self, col: i32, row: i32, id: GrainId) {
        if self.get(col, row) == Some(id) {
            let idx = self.get_index(col as usize, row as usize);
            self.cells[idx] = None;
        }
    }

    pub fn clear(&mut self) {
        self.cells.fill(None);
    }

    /// Restructure to new dimensions, keeping the overlapping region
    pub fn resize(&mut self, cols: usize, rows: usize) {
        if cols == self.cols && rows == self.rows {
            return;
        }
        let mut cells = vec![None; cols * rows];
        let keep_rows = rows.min(self.rows);
        for col in 0..cols.min(self.cols) {
            let src = col * self.rows;
            let dst = col * rows;
            cells[dst..dst + keep_rows].copy_from_slice(&self.cells[src..src + keep_rows]);
        }
        self.cols = cols;
        self.rows = rows;
        self.cells = cells;
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// (col, row, id) for every occupied cell, column by column
    pub fn occupied(&self) -> impl Iterator<Item = (usize, usize, GrainId)> + '_ {
        let rows = self.rows.max(1);
        self.cells
            .iter()
            .enumerate()
            .filter_map(move |(i, cell)| cell.map(|id| (i / rows, i % rows, id)))
    }

    /// Nearest free cell for a grain whose own cell is taken
    ///
    /// Searches the same row outward (left before right at each distance), then
    /// each row above, trying the starting column first and then alternating
    /// outward. Deterministic for a given grid.
    pub fn find_open_cell(&self, col: i32, row: i32) -> Option<(i32, i32)> {
        self.find_open_cell_within(col, row, self.cols.saturating_sub(1))
    }

    /// [`OccupancyGrid::find_open_cell`] limited to `reach` columns either side
    pub fn find_open_cell_within(&self, col: i32, row: i32, reach: usize) -> Option<(i32, i32)> {
        let reach = reach.min(self.cols) as i32;

        for dist in 1..=reach {
            if self.is_empty(col - dist, row) {
                return Some((col - dist, row));
            }
            if self.is_empty(col + dist, row) {
                return Some((col + dist, row));
            }
        }

        for r in (0..row.min(self.rows as i32)).rev() {
            for dist in 0..=reach {
                if self.is_empty(col - dist, r) {
                    return Some((col - dist, r));
                }
                if dist > 0 && self.is_empty(col + dist, r) {
                    return Some((col + dist, r));
                }
            }
        }

        None
    }
}
