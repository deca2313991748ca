//! Grid A* pathfinding
//!
//! 8-connected search over the occupancy grid with an octile heuristic.
//! Open-set ties are broken by lowest total cost, then by fewest steps.
//! The search is bounded by an expansion budget, and goals in a different
//! connected region are rejected before any expansion.

use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::error::PathError;
use super::grid::{Cell, OccupancyGrid};
use super::types::Position;

/// A planned route in world coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    /// Waypoints to visit in order, excluding the start position. The last
    /// waypoint is the exact goal point.
    pub waypoints: Vec<Position>,
    /// Length of the polyline from start through every waypoint
    pub length: f32,
    /// Number of nodes expanded by the search
    pub expansions: usize,
    /// Grid version the path was planned against
    pub grid_version: u64,
}

/// Octile distance between two cells, in cell units
pub fn octile(a: Cell, b: Cell) -> f32 {
    let dx = (a.0 - b.0).abs() as f32;
    let dy = (a.1 - b.1).abs() as f32;
    let (short, long) = if dx < dy { (dx, dy) } else { (dy, dx) };
    long + (std::f32::consts::SQRT_2 - 1.0) * short
}

/// Find a collision-free route from `start` to `goal`
pub fn find_path(
    start: Position,
    goal: Position,
    grid: &OccupancyGrid,
    max_expansions: usize,
) -> Result<Path, PathError> {
    let start_cell = grid.cell_of(&start);
    let goal_cell = grid.cell_of(&goal);

    if !grid.in_bounds(start_cell) {
        return Err(PathError::StartOutOfBounds {
            x: start.x,
            y: start.y,
        });
    }
    if grid.is_cell_blocked(goal_cell) {
        return Err(PathError::GoalBlocked {
            x: goal.x,
            y: goal.y,
        });
    }

    if start_cell == goal_cell {
        return Ok(Path {
            waypoints: vec![goal],
            length: start.distance(&goal),
            expansions: 0,
            grid_version: grid.version(),
        });
    }

    // A robot may be standing on a freshly blocked start cell; searching
    // from it is still allowed, but the region shortcut only applies when
    // the start is free
    if !grid.is_cell_blocked(start_cell) && !grid.same_region(start_cell, goal_cell) {
        return Err(PathError::Unreachable);
    }

    let cells = search(start_cell, goal_cell, grid, max_expansions)?;
    Ok(build_path(start, goal, &cells.0, cells.1, grid))
}

/// Open-set entry: (f, steps, cell), min-ordered through `Reverse`
type OpenEntry = Reverse<(OrderedFloat<f32>, u32, Cell)>;

const COST_EPSILON: f32 = 1e-4;

fn search(
    start: Cell,
    goal: Cell,
    grid: &OccupancyGrid,
    max_expansions: usize,
) -> Result<(Vec<Cell>, usize), PathError> {
    let mut open: BinaryHeap<OpenEntry> = BinaryHeap::new();
    // cell -> (g cost, steps, parent)
    let mut best: HashMap<Cell, (f32, u32, Option<Cell>)> = HashMap::new();
    let mut closed: HashSet<Cell> = HashSet::new();
    let mut expansions = 0usize;

    best.insert(start, (0.0, 0, None));
    open.push(Reverse((OrderedFloat(octile(start, goal)), 0, start)));

    while let Some(Reverse((_, _, cell))) = open.pop() {
        if !closed.insert(cell) {
            continue;
        }
        if cell == goal {
            return Ok((reconstruct(&best, goal), expansions));
        }

        expansions += 1;
        if expansions > max_expansions {
            return Err(PathError::ExpansionLimit(max_expansions));
        }

        let Some(&(g, steps, _)) = best.get(&cell) else {
            continue;
        };
        for (next, cost) in grid.neighbors(cell) {
            if closed.contains(&next) {
                continue;
            }
            let next_g = g + cost;
            let next_steps = steps + 1;
            let improved = match best.get(&next) {
                Some(&(known_g, known_steps, _)) => {
                    next_g < known_g - COST_EPSILON
                        || ((next_g - known_g).abs() <= COST_EPSILON && next_steps < known_steps)
                }
                None => true,
            };
            if improved {
                best.insert(next, (next_g, next_steps, Some(cell)));
                let f = next_g + octile(next, goal);
                open.push(Reverse((OrderedFloat(f), next_steps, next)));
            }
        }
    }

    Err(PathError::Unreachable)
}

fn reconstruct(best: &HashMap<Cell, (f32, u32, Option<Cell>)>, goal: Cell) -> Vec<Cell> {
    let mut cells = vec![goal];
    let mut current = goal;
    while let Some(&(_, _, Some(parent))) = best.get(&current) {
        cells.push(parent);
        current = parent;
    }
    cells.reverse();
    cells
}

/// Turn a cell chain into world waypoints: drop the start cell, prune
/// collinear cells, and end exactly on the goal point
fn build_path(
    start: Position,
    goal: Position,
    cells: &[Cell],
    expansions: usize,
    grid: &OccupancyGrid,
) -> Path {
    let mut waypoints = Vec::with_capacity(cells.len());
    // cells[0] is the start cell, the last one the goal cell
    let interior = &cells[1..cells.len().saturating_sub(1)];
    for (i, &cell) in interior.iter().enumerate() {
        let prev = cells[i];
        let next = cells[i + 2];
        let dir_in = (cell.0 - prev.0, cell.1 - prev.1);
        let dir_out = (next.0 - cell.0, next.1 - cell.1);
        if dir_in != dir_out {
            waypoints.push(grid.cell_center(cell));
        }
    }
    waypoints.push(goal);

    let mut length = 0.0;
    let mut from = start;
    for waypoint in &waypoints {
        length += from.distance(waypoint);
        from = *waypoint;
    }

    Path {
        waypoints,
        length,
        expansions,
        grid_version: grid.version(),
    }
}
