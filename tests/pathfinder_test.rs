//! A* pathfinding over the occupancy grid

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use ordered_float::OrderedFloat;
use proptest::prelude::*;
use site_sim::simulation::{find_path, Cell, OccupancyGrid, PathError, Position, Rect};

fn unit_cells(cells: &[Cell]) -> Vec<Rect> {
    cells
        .iter()
        .map(|&(col, row)| Rect::new(col as f32, row as f32, col as f32 + 1.0, row as f32 + 1.0))
        .collect()
}

fn grid_with(cells: &[Cell]) -> OccupancyGrid {
    let rects = unit_cells(cells);
    OccupancyGrid::build(10.0, 10.0, 1.0, rects.iter(), 0)
}

/// Plain Dijkstra over the grid's own move set
fn shortest_cost(grid: &OccupancyGrid, start: Cell, goal: Cell) -> Option<f32> {
    let mut dist: HashMap<Cell, f32> = HashMap::new();
    let mut heap = BinaryHeap::new();
    dist.insert(start, 0.0);
    heap.push(Reverse((OrderedFloat(0.0f32), start)));

    while let Some(Reverse((OrderedFloat(cost), cell))) = heap.pop() {
        if cell == goal {
            return Some(cost);
        }
        if cost > dist[&cell] {
            continue;
        }
        for (next, step) in grid.neighbors(cell) {
            let next_cost = cost + step;
            if dist.get(&next).map_or(true, |&known| next_cost < known) {
                dist.insert(next, next_cost);
                heap.push(Reverse((OrderedFloat(next_cost), next)));
            }
        }
    }
    None
}

#[test]
fn test_open_grid_straight_line() {
    let grid = grid_with(&[]);
    let path = find_path(Position::new(0.5, 0.5), Position::new(7.5, 0.5), &grid, 1000).unwrap();
    // Collinear cells collapse into the goal
    assert_eq!(path.waypoints, vec![Position::new(7.5, 0.5)]);
    assert!((path.length - 7.0).abs() < 1e-4);
}

#[test]
fn test_same_cell_goal() {
    let grid = grid_with(&[]);
    let path = find_path(Position::new(2.2, 2.2), Position::new(2.8, 2.4), &grid, 1000).unwrap();
    assert_eq!(path.waypoints, vec![Position::new(2.8, 2.4)]);
    assert_eq!(path.expansions, 0);
}

#[test]
fn test_routes_around_wall() {
    // Wall at column 5 with a gap at the top row
    let wall: Vec<Cell> = (0..9).map(|row| (5, row)).collect();
    let grid = grid_with(&wall);
    let path = find_path(Position::new(1.5, 1.5), Position::new(8.5, 1.5), &grid, 1000).unwrap();

    let mut from = Position::new(1.5, 1.5);
    for waypoint in &path.waypoints {
        assert!(grid.segment_clear(&from, waypoint));
        from = *waypoint;
    }
    assert!(path.waypoints.iter().any(|p| p.y > 9.0));
    assert!(path.length > 7.0);
}

#[test]
fn test_sealed_goal_is_unreachable() {
    let wall: Vec<Cell> = (0..10).map(|row| (5, row)).collect();
    let grid = grid_with(&wall);
    let result = find_path(Position::new(1.5, 1.5), Position::new(8.5, 1.5), &grid, 1000);
    assert_eq!(result, Err(PathError::Unreachable));
}

#[test]
fn test_blocked_goal_and_outside_start() {
    let grid = grid_with(&[(4, 4)]);
    assert!(matches!(
        find_path(Position::new(1.5, 1.5), Position::new(4.5, 4.5), &grid, 1000),
        Err(PathError::GoalBlocked { .. })
    ));
    assert!(matches!(
        find_path(Position::new(1.5, 1.5), Position::new(11.0, 4.5), &grid, 1000),
        Err(PathError::GoalBlocked { .. })
    ));
    assert!(matches!(
        find_path(Position::new(-1.0, 1.5), Position::new(2.5, 2.5), &grid, 1000),
        Err(PathError::StartOutOfBounds { .. })
    ));
}

#[test]
fn test_expansion_budget() {
    let grid = grid_with(&[]);
    assert_eq!(
        find_path(Position::new(0.5, 0.5), Position::new(9.5, 9.5), &grid, 1),
        Err(PathError::ExpansionLimit(1))
    );
}

#[test]
fn test_no_corner_cutting() {
    // Two blocks touching at a corner; the diagonal between them is closed
    let grid = grid_with(&[(1, 0), (0, 1)]);
    let result = find_path(Position::new(0.5, 0.5), Position::new(1.5, 1.5), &grid, 1000);
    assert_eq!(result, Err(PathError::Unreachable));
}

#[test]
fn test_same_query_same_path() {
    let grid = grid_with(&[(3, 2), (3, 3), (3, 4), (6, 6)]);
    let a = find_path(Position::new(0.5, 3.5), Position::new(9.5, 3.5), &grid, 1000).unwrap();
    let b = find_path(Position::new(0.5, 3.5), Position::new(9.5, 3.5), &grid, 1000).unwrap();
    assert_eq!(a, b);
}

fn scenario() -> impl Strategy<Value = (Vec<Cell>, Cell, Cell)> {
    (
        prop::collection::vec((0..10i32, 0..10i32), 0..35),
        (0..10i32, 0..10i32),
        (0..10i32, 0..10i32),
    )
}

proptest! {
    #[test]
    fn test_paths_are_shortest_and_clear((blocked, start, goal) in scenario()) {
        let grid = grid_with(&blocked);
        prop_assume!(!grid.is_cell_blocked(start) && !grid.is_cell_blocked(goal));

        let from = grid.cell_center(start);
        let to = grid.cell_center(goal);
        let reference = shortest_cost(&grid, start, goal);

        match find_path(from, to, &grid, 10_000) {
            Ok(path) => {
                let optimum = reference.expect("reference search found no route");
                prop_assert!((path.length - optimum).abs() <= 1e-3 * optimum.max(1.0));
                prop_assert_eq!(path.waypoints.last().copied(), Some(to));

                let mut here = from;
                for waypoint in &path.waypoints {
                    prop_assert!(grid.segment_clear(&here, waypoint));
                    here = *waypoint;
                }
            }
            Err(PathError::Unreachable) => {
                prop_assert!(reference.is_none());
                prop_assert!(!grid.same_region(start, goal));
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}
