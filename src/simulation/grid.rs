//! Occupancy grid built from obstacle rectangles
//!
//! The workspace is quantized into square cells. Each obstacle rectangle is
//! rasterized into the set of cells it overlaps; anything outside the
//! workspace counts as occupied. The grid is immutable once built and is
//! rebuilt whenever the obstacle layout changes.

use petgraph::unionfind::UnionFind;
use std::collections::HashSet;

use super::types::{Position, Rect};

/// Integer cell coordinate
pub type Cell = (i32, i32);

#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    cell_size: f32,
    cols: i32,
    rows: i32,
    blocked: HashSet<Cell>,
    /// Connected-region label per cell (row-major); blocked cells keep
    /// their own singleton label
    regions: Vec<usize>,
    /// Bumped by the owner on every rebuild so cached paths can be invalidated
    version: u64,
}

impl OccupancyGrid {
    /// Rasterize `obstacles` into a grid covering `width` x `height`
    pub fn build<'a>(
        width: f32,
        height: f32,
        cell_size: f32,
        obstacles: impl IntoIterator<Item = &'a Rect>,
        version: u64,
    ) -> Self {
        let cols = (width / cell_size).ceil().max(1.0) as i32;
        let rows = (height / cell_size).ceil().max(1.0) as i32;

        let mut blocked = HashSet::new();
        for rect in obstacles {
            let (min_col, min_row) = (
                (rect.min_x / cell_size).floor() as i32,
                (rect.min_y / cell_size).floor() as i32,
            );
            // A rectangle edge that lands exactly on a cell boundary does not
            // spill into the next cell
            let (max_col, max_row) = (
                ((rect.max_x / cell_size).ceil() as i32 - 1).max(min_col),
                ((rect.max_y / cell_size).ceil() as i32 - 1).max(min_row),
            );
            for col in min_col.max(0)..=max_col.min(cols - 1) {
                for row in min_row.max(0)..=max_row.min(rows - 1) {
                    blocked.insert((col, row));
                }
            }
        }

        let regions = label_regions(cols, rows, &blocked);

        Self {
            cell_size,
            cols,
            rows,
            blocked,
            regions,
            version,
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn cols(&self) -> i32 {
        self.cols
    }

    pub fn rows(&self) -> i32 {
        self.rows
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn cell_of(&self, point: &Position) -> Cell {
        (
            (point.x / self.cell_size).floor() as i32,
            (point.y / self.cell_size).floor() as i32,
        )
    }

    pub fn cell_center(&self, cell: Cell) -> Position {
        Position::new(
            (cell.0 as f32 + 0.5) * self.cell_size,
            (cell.1 as f32 + 0.5) * self.cell_size,
        )
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.0 >= 0 && cell.1 >= 0 && cell.0 < self.cols && cell.1 < self.rows
    }

    /// O(1) occupancy query; out-of-bounds cells are occupied
    pub fn is_cell_blocked(&self, cell: Cell) -> bool {
        !self.in_bounds(cell) || self.blocked.contains(&cell)
    }

    pub fn is_occupied(&self, point: &Position) -> bool {
        self.is_cell_blocked(self.cell_of(point))
    }

    /// Whether two free cells belong to the same connected region
    pub fn same_region(&self, a: Cell, b: Cell) -> bool {
        match (self.index(a), self.index(b)) {
            (Some(ia), Some(ib)) => self.regions[ia] == self.regions[ib],
            _ => false,
        }
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        self.in_bounds(cell)
            .then(|| cell.1 as usize * self.cols as usize + cell.0 as usize)
    }

    /// Free neighbors of a cell with the cost of stepping to each.
    /// Diagonal steps are only allowed when both orthogonal cells are free,
    /// so paths never cut an obstacle corner.
    pub fn neighbors(&self, cell: Cell) -> impl Iterator<Item = (Cell, f32)> + '_ {
        const STEPS: [(i32, i32); 8] = [
            (1, 0),
            (-1, 0),
            (0, 1),
            (0, -1),
            (1, 1),
            (1, -1),
            (-1, 1),
            (-1, -1),
        ];
        STEPS.iter().filter_map(move |&(dx, dy)| {
            let next = (cell.0 + dx, cell.1 + dy);
            if self.is_cell_blocked(next) {
                return None;
            }
            if dx != 0 && dy != 0 {
                if self.is_cell_blocked((cell.0 + dx, cell.1))
                    || self.is_cell_blocked((cell.0, cell.1 + dy))
                {
                    return None;
                }
                Some((next, std::f32::consts::SQRT_2))
            } else {
                Some((next, 1.0))
            }
        })
    }

    /// Whether the straight segment between two points stays clear, sampled
    /// at a quarter of the cell size
    pub fn segment_clear(&self, from: &Position, to: &Position) -> bool {
        let length = from.distance(to);
        let samples = ((length / (self.cell_size * 0.25)).ceil() as usize).max(1);
        (0..=samples).all(|i| {
            let point = from.lerp(to, i as f32 / samples as f32);
            !self.is_occupied(&point)
        })
    }
}

/// Label 4-connected free regions. With the no-corner-cutting rule every
/// diagonal step has a free orthogonal detour, so 4-connectivity gives the
/// same regions as the pathfinder's 8-connected moves.
fn label_regions(cols: i32, rows: i32, blocked: &HashSet<Cell>) -> Vec<usize> {
    let total = cols as usize * rows as usize;
    let mut sets = UnionFind::<usize>::new(total);
    let free = |col: i32, row: i32| !blocked.contains(&(col, row));

    for row in 0..rows {
        for col in 0..cols {
            if !free(col, row) {
                continue;
            }
            let here = row as usize * cols as usize + col as usize;
            if col + 1 < cols && free(col + 1, row) {
                sets.union(here, here + 1);
            }
            if row + 1 < rows && free(col, row + 1) {
                sets.union(here, here + cols as usize);
            }
        }
    }

    sets.into_labeling()
}
