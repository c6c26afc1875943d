//! A* over the maze.
//!
//! 4-neighbour expansion in the fixed order N, E, S, W with unit step cost and
//! a Manhattan heuristic. Frontier nodes with equal f-score pop in insertion
//! order, so identical mazes always produce identical paths.

use crate::grid::{Cell, Maze, WorldDims};
use crate::object::Waypoint;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, PartialEq, Eq)]
struct OpenNode {
    f: usize,
    g: usize,
    tie: u64,
    cell: Cell,
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the smallest (f, tie) first.
        (other.f, other.tie).cmp(&(self.f, self.tie))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn neighbors(maze: &Maze, cell: Cell) -> impl Iterator<Item = Cell> + '_ {
    let north = cell.row.checked_sub(1).map(|row| Cell::new(row, cell.col));
    let east = Some(Cell::new(cell.row, cell.col + 1));
    let south = Some(Cell::new(cell.row + 1, cell.col));
    let west = cell.col.checked_sub(1).map(|col| Cell::new(cell.row, col));

    [north, east, south, west]
        .into_iter()
        .flatten()
        .filter(move |n| maze.is_walkable(*n))
}

/// Shortest 4-connected path from `start` to `goal`, both ends included.
///
/// Returns `None` when either end is outside the maze, the goal is blocked,
/// or no route exists. A blocked start is allowed so an object standing on an
/// obstacle can still walk off it.
pub fn find_path(maze: &Maze, start: Cell, goal: Cell) -> Option<Vec<Cell>> {
    if !maze.in_bounds(start) || !maze.is_walkable(goal) {
        return None;
    }
    if start == goal {
        return Some(vec![start]);
    }

    let idx = |c: Cell| c.row * maze.cols() + c.col;
    let len = maze.rows() * maze.cols();
    let mut g_score = vec![usize::MAX; len];
    let mut came_from: Vec<Option<Cell>> = vec![None; len];
    let mut open = BinaryHeap::new();
    let mut tie = 0u64;

    g_score[idx(start)] = 0;
    open.push(OpenNode {
        f: start.manhattan(goal),
        g: 0,
        tie,
        cell: start,
    });

    while let Some(node) = open.pop() {
        if node.cell == goal {
            let mut path = vec![goal];
            let mut current = goal;
            while let Some(prev) = came_from[idx(current)] {
                path.push(prev);
                current = prev;
            }
            path.reverse();
            return Some(path);
        }

        if node.g != g_score[idx(node.cell)] {
            // stale entry
            continue;
        }

        for next in neighbors(maze, node.cell) {
            let tentative = node.g + 1;
            if tentative >= g_score[idx(next)] {
                continue;
            }
            g_score[idx(next)] = tentative;
            came_from[idx(next)] = Some(node.cell);
            tie += 1;
            open.push(OpenNode {
                f: tentative + next.manhattan(goal),
                g: tentative,
                tie,
                cell: next,
            });
        }
    }

    None
}

/// Converts maze cells to world-space waypoints at each cell's top-left corner.
pub fn cells_to_waypoints(dims: &WorldDims, cells: &[Cell]) -> Vec<Waypoint> {
    cells
        .iter()
        .map(|cell| {
            let (x, y) = dims.maze_to_world(*cell);
            Waypoint::new(x, y)
        })
        .collect()
}
