//! Walkability and occupancy grid.
//!
//! The grid is a row-major array of cells per floor. Walkability and movement
//! cost are static map data; occupancy is the only cross-agent mutable state
//! in the simulation and is written exclusively by the movement systems.
//! Pathfinding reads walkability only, never occupancy.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// A cell address on the grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
    pub floor: u8,
}

impl GridCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y, floor: 0 }
    }

    pub const fn on_floor(x: i32, y: i32, floor: u8) -> Self {
        Self { x, y, floor }
    }

    /// Neighbouring coordinate on the same floor.
    #[inline]
    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            floor: self.floor,
        }
    }

    pub fn manhattan(&self, other: &GridCoord) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    pub fn chebyshev(&self, other: &GridCoord) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }

    /// True when `other` is one of the eight neighbours on the same floor.
    pub fn is_adjacent(&self, other: &GridCoord) -> bool {
        self.floor == other.floor && *self != *other && self.chebyshev(other) == 1
    }

    /// True when the step to `other` changes both axes.
    pub fn is_diagonal_to(&self, other: &GridCoord) -> bool {
        self.x != other.x && self.y != other.y
    }
}

impl std::fmt::Display for GridCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, f{})", self.x, self.y, self.floor)
    }
}

/// A single cell in the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    pub walkable: bool,
    /// Multiplier applied to the base step cost when entering this cell.
    pub movement_cost: f32,
    pub occupant: Option<Entity>,
}

impl Default for GridCell {
    fn default() -> Self {
        Self {
            walkable: true,
            movement_cost: 1.0,
            occupant: None,
        }
    }
}

impl GridCell {
    /// Walkable and unoccupied.
    pub fn is_free(&self) -> bool {
        self.walkable && self.occupant.is_none()
    }
}

/// Result of trying to claim a cell for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The cell now belongs to the requesting entity (or already did).
    Reserved,
    /// Another entity holds the cell.
    Occupied(Entity),
    /// Static obstacle, nobody to wait for.
    Blocked,
    OutOfBounds,
}

/// Grid-based walkability and occupancy map.
#[derive(Resource, Debug, Clone)]
pub struct Grid {
    width: u32,
    height: u32,
    floors: u8,
    /// Cells, floor-major then row-major.
    cells: Vec<GridCell>,
    /// Lowest movement cost ever assigned, capped at 1.0.
    min_movement_cost: f32,
}

impl Grid {
    /// Create an open grid. Dimensions of zero are bumped to one.
    pub fn new(width: u32, height: u32, floors: u8) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let floors = floors.max(1);
        let total = width as usize * height as usize * floors as usize;
        Self {
            width,
            height,
            floors,
            cells: vec![GridCell::default(); total],
            min_movement_cost: 1.0,
        }
    }

    /// Build a single-floor grid from rows of text: `#` is blocked, anything
    /// else is walkable. Row 0 is `y == 0`.
    pub fn from_ascii(rows: &[&str]) -> Self {
        let height = rows.len() as u32;
        let width = rows.iter().map(|r| r.chars().count()).max().unwrap_or(0) as u32;
        let mut grid = Self::new(width, height, 1);
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                if ch == '#' {
                    grid.set_walkable(GridCoord::new(x as i32, y as i32), false);
                }
            }
        }
        grid
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn floors(&self) -> u8 {
        self.floors
    }

    /// Total number of cells across all floors.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn in_bounds(&self, coord: GridCoord) -> bool {
        coord.x >= 0
            && coord.y >= 0
            && (coord.x as u32) < self.width
            && (coord.y as u32) < self.height
            && coord.floor < self.floors
    }

    /// Flat cell index, or `None` when out of bounds.
    #[inline]
    pub fn index_of(&self, coord: GridCoord) -> Option<usize> {
        if !self.in_bounds(coord) {
            return None;
        }
        let per_floor = self.width as usize * self.height as usize;
        Some(
            coord.floor as usize * per_floor
                + coord.y as usize * self.width as usize
                + coord.x as usize,
        )
    }

    /// Inverse of [`Grid::index_of`].
    #[inline]
    pub fn coord_of(&self, index: usize) -> GridCoord {
        let per_floor = self.width as usize * self.height as usize;
        let floor = index / per_floor;
        let rest = index % per_floor;
        GridCoord {
            x: (rest % self.width as usize) as i32,
            y: (rest / self.width as usize) as i32,
            floor: floor as u8,
        }
    }

    pub fn cell(&self, coord: GridCoord) -> Option<&GridCell> {
        self.index_of(coord).map(|i| &self.cells[i])
    }

    #[inline]
    pub fn cell_at(&self, index: usize) -> &GridCell {
        &self.cells[index]
    }

    /// Out-of-bounds cells are never walkable.
    #[inline]
    pub fn is_walkable(&self, coord: GridCoord) -> bool {
        self.cell(coord).is_some_and(|c| c.walkable)
    }

    pub fn set_walkable(&mut self, coord: GridCoord, walkable: bool) {
        if let Some(i) = self.index_of(coord) {
            self.cells[i].walkable = walkable;
        }
    }

    /// Block or open every cell in an inclusive rectangle on one floor.
    pub fn fill_rect(&mut self, from: GridCoord, to: GridCoord, walkable: bool) {
        let (x0, x1) = (from.x.min(to.x), from.x.max(to.x));
        let (y0, y1) = (from.y.min(to.y), from.y.max(to.y));
        for y in y0..=y1 {
            for x in x0..=x1 {
                self.set_walkable(GridCoord::on_floor(x, y, from.floor), walkable);
            }
        }
    }

    /// Set the entry cost multiplier of a cell. Negative or non-finite costs
    /// are ignored.
    pub fn set_movement_cost(&mut self, coord: GridCoord, cost: f32) -> bool {
        if !cost.is_finite() || cost < 0.0 {
            tracing::warn!("Rejected movement cost {} at {}", cost, coord);
            return false;
        }
        let Some(i) = self.index_of(coord) else {
            return false;
        };
        self.cells[i].movement_cost = cost;
        self.min_movement_cost = self.min_movement_cost.min(cost);
        true
    }

    /// Factor applied to distance heuristics so they never overestimate on
    /// grids that contain cells cheaper than 1.0.
    #[inline]
    pub fn heuristic_scale(&self) -> f32 {
        self.min_movement_cost
    }

    pub fn occupant(&self, coord: GridCoord) -> Option<Entity> {
        self.cell(coord).and_then(|c| c.occupant)
    }

    /// Claim a cell for `entity`. A cell already held by `entity` counts as
    /// reserved.
    pub fn try_reserve(&mut self, coord: GridCoord, entity: Entity) -> Reservation {
        let Some(i) = self.index_of(coord) else {
            return Reservation::OutOfBounds;
        };
        let cell = &mut self.cells[i];
        match cell.occupant {
            Some(other) if other != entity => Reservation::Occupied(other),
            Some(_) => Reservation::Reserved,
            None if !cell.walkable => Reservation::Blocked,
            None => {
                cell.occupant = Some(entity);
                Reservation::Reserved
            }
        }
    }

    /// Release a cell held by `entity`. Returns false if it was held by
    /// someone else or nobody.
    pub fn release(&mut self, coord: GridCoord, entity: Entity) -> bool {
        let Some(i) = self.index_of(coord) else {
            return false;
        };
        let cell = &mut self.cells[i];
        if cell.occupant == Some(entity) {
            cell.occupant = None;
            true
        } else {
            false
        }
    }

    /// Number of occupied cells (for debugging/metrics).
    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|c| c.occupant.is_some()).count()
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new(64, 64, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_roundtrip_across_floors() {
        let grid = Grid::new(7, 5, 3);
        let c = GridCoord::on_floor(6, 4, 2);
        let i = grid.index_of(c).unwrap();
        assert_eq!(i, grid.cell_count() - 1);
        assert_eq!(grid.coord_of(i), c);
        assert!(grid.index_of(GridCoord::on_floor(0, 0, 3)).is_none());
        assert!(grid.index_of(GridCoord::new(-1, 0)).is_none());
    }

    #[test]
    fn test_from_ascii() {
        let grid = Grid::from_ascii(&["..#", "...", "#.."]);
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 3);
        assert!(!grid.is_walkable(GridCoord::new(2, 0)));
        assert!(!grid.is_walkable(GridCoord::new(0, 2)));
        assert!(grid.is_walkable(GridCoord::new(1, 1)));
    }

    #[test]
    fn test_reserve_and_release() {
        let mut grid = Grid::new(4, 4, 1);
        let a = Entity::from_raw(1);
        let b = Entity::from_raw(2);
        let c = GridCoord::new(1, 1);

        assert_eq!(grid.try_reserve(c, a), Reservation::Reserved);
        assert_eq!(grid.try_reserve(c, a), Reservation::Reserved);
        assert_eq!(grid.try_reserve(c, b), Reservation::Occupied(a));

        // Only the holder can release.
        assert!(!grid.release(c, b));
        assert!(grid.release(c, a));
        assert_eq!(grid.occupant(c), None);
    }

    #[test]
    fn test_reserve_blocked_and_out_of_bounds() {
        let mut grid = Grid::new(4, 4, 1);
        let a = Entity::from_raw(1);
        grid.set_walkable(GridCoord::new(2, 2), false);
        assert_eq!(grid.try_reserve(GridCoord::new(2, 2), a), Reservation::Blocked);
        assert_eq!(grid.try_reserve(GridCoord::new(9, 0), a), Reservation::OutOfBounds);
    }

    #[test]
    fn test_movement_cost_tracks_heuristic_scale() {
        let mut grid = Grid::new(4, 4, 1);
        assert_eq!(grid.heuristic_scale(), 1.0);
        assert!(grid.set_movement_cost(GridCoord::new(0, 0), 3.0));
        assert_eq!(grid.heuristic_scale(), 1.0);
        assert!(grid.set_movement_cost(GridCoord::new(1, 0), 0.5));
        assert_eq!(grid.heuristic_scale(), 0.5);
        assert!(!grid.set_movement_cost(GridCoord::new(1, 0), -1.0));
    }

    #[test]
    fn test_fill_rect() {
        let mut grid = Grid::new(10, 10, 1);
        grid.fill_rect(GridCoord::new(5, 0), GridCoord::new(5, 9), false);
        for y in 0..10 {
            assert!(!grid.is_walkable(GridCoord::new(5, y)));
        }
        assert!(grid.is_walkable(GridCoord::new(4, 0)));
    }
}
