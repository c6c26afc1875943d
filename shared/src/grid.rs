//! Coordinate conversion between world space, the object grid and the maze,
//! plus obstacle rasterization into the maze.
//!
//! World space uses a top-left convention: an object at `(x, y)` covers the
//! square `[x, x + cell_size) x [y, y + cell_size)`. Grid coordinates are
//! `(col, row)` pairs, maze coordinates are [`Cell`]s addressed by row first.

use crate::{CELL_SIZE, MAZE_CELL_SIZE, WORLD_HEIGHT, WORLD_WIDTH};

/// A maze coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

impl Cell {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub fn manhattan(&self, other: Cell) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }
}

/// World geometry shared by every component that converts coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldDims {
    pub width: f32,
    pub height: f32,
    pub cell_size: f32,
    pub maze_cell_size: f32,
}

impl Default for WorldDims {
    fn default() -> Self {
        Self {
            width: WORLD_WIDTH,
            height: WORLD_HEIGHT,
            cell_size: CELL_SIZE,
            maze_cell_size: MAZE_CELL_SIZE,
        }
    }
}

impl WorldDims {
    pub fn grid_cols(&self) -> usize {
        (self.width / self.cell_size).floor() as usize
    }

    pub fn grid_rows(&self) -> usize {
        (self.height / self.cell_size).floor() as usize
    }

    pub fn maze_cols(&self) -> usize {
        (self.width / self.maze_cell_size).floor() as usize
    }

    pub fn maze_rows(&self) -> usize {
        (self.height / self.maze_cell_size).floor() as usize
    }

    /// Object grid `(col, row)` holding the world point, or `None` outside the grid.
    pub fn world_to_grid(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        let col = to_index(x, self.cell_size, self.grid_cols())?;
        let row = to_index(y, self.cell_size, self.grid_rows())?;
        Some((col, row))
    }

    pub fn grid_to_world(&self, col: usize, row: usize) -> (f32, f32) {
        (col as f32 * self.cell_size, row as f32 * self.cell_size)
    }

    pub fn world_to_maze(&self, x: f32, y: f32) -> Option<Cell> {
        let col = to_index(x, self.maze_cell_size, self.maze_cols())?;
        let row = to_index(y, self.maze_cell_size, self.maze_rows())?;
        Some(Cell { row, col })
    }

    /// Top-left world corner of a maze cell.
    pub fn maze_to_world(&self, cell: Cell) -> (f32, f32) {
        (
            cell.col as f32 * self.maze_cell_size,
            cell.row as f32 * self.maze_cell_size,
        )
    }

    /// Clamps a world point so an object placed there stays inside the world.
    pub fn clamp_to_world(&self, x: f32, y: f32) -> (f32, f32) {
        let max_x = (self.width - self.cell_size).max(0.0);
        let max_y = (self.height - self.cell_size).max(0.0);
        (x.clamp(0.0, max_x), y.clamp(0.0, max_y))
    }

    /// Maze cells covered by an object footprint at `(x, y)`, clipped to the maze.
    ///
    /// When the maze is finer than the object grid one footprint covers several
    /// maze cells; a footprint that straddles cell borders covers one extra row/column.
    pub fn footprint_cells(&self, x: f32, y: f32) -> Vec<Cell> {
        let m = self.maze_cell_size;
        let first_col = (x / m).floor() as i64;
        let first_row = (y / m).floor() as i64;
        let last_col = ((x + self.cell_size) / m).ceil() as i64 - 1;
        let last_row = ((y + self.cell_size) / m).ceil() as i64 - 1;

        let max_col = self.maze_cols() as i64 - 1;
        let max_row = self.maze_rows() as i64 - 1;

        let mut cells = Vec::new();
        for row in first_row.max(0)..=last_row.min(max_row) {
            for col in first_col.max(0)..=last_col.min(max_col) {
                cells.push(Cell {
                    row: row as usize,
                    col: col as usize,
                });
            }
        }
        cells
    }
}

fn to_index(value: f32, size: f32, count: usize) -> Option<usize> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let idx = (value / size).floor() as usize;
    (idx < count).then_some(idx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Walkable,
    Blocked,
}

/// Walkability grid at maze resolution, consumed by the pathfinder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Maze {
    rows: usize,
    cols: usize,
    tiles: Vec<Tile>,
}

impl Maze {
    /// An all-walkable maze.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            tiles: vec![Tile::Walkable; rows * cols],
        }
    }

    pub fn for_dims(dims: &WorldDims) -> Self {
        Self::new(dims.maze_rows(), dims.maze_cols())
    }

    /// Rasterizes obstacle footprints at the given world positions.
    pub fn from_obstacles<I>(dims: &WorldDims, positions: I) -> Self
    where
        I: IntoIterator<Item = (f32, f32)>,
    {
        let mut maze = Self::for_dims(dims);
        for (x, y) in positions {
            maze.block_footprint(dims, x, y);
        }
        maze
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.row < self.rows && cell.col < self.cols
    }

    pub fn get(&self, cell: Cell) -> Option<Tile> {
        self.in_bounds(cell)
            .then(|| self.tiles[cell.row * self.cols + cell.col])
    }

    /// Out-of-bounds cells are never walkable.
    pub fn is_walkable(&self, cell: Cell) -> bool {
        self.get(cell) == Some(Tile::Walkable)
    }

    pub fn set(&mut self, cell: Cell, tile: Tile) {
        if self.in_bounds(cell) {
            self.tiles[cell.row * self.cols + cell.col] = tile;
        }
    }

    pub fn block_footprint(&mut self, dims: &WorldDims, x: f32, y: f32) {
        for cell in dims.footprint_cells(x, y) {
            self.set(cell, Tile::Blocked);
        }
    }

    pub fn blocked_count(&self) -> usize {
        self.tiles.iter().filter(|t| **t == Tile::Blocked).count()
    }
}
