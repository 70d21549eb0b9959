//! Fixed-capacity waypoint buffer attached to every agent.

use super::PathFailReason;
use crate::grid::GridCoord;
use bevy_ecs::prelude::*;

/// Waypoints of the path an agent is following.
///
/// Slot 0 holds the cell the path was planned from; the cursor starts at 1
/// so the origin is never handed out as a step. The buffer is complete when
/// the cursor reaches the stored count.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct PathBuffer {
    waypoints: Vec<GridCoord>,
    current_index: usize,
    goal: Option<GridCoord>,
    max_waypoints: usize,
}

impl PathBuffer {
    pub fn new(max_waypoints: usize) -> Self {
        Self {
            waypoints: Vec::with_capacity(max_waypoints + 1),
            current_index: 0,
            goal: None,
            max_waypoints,
        }
    }

    /// Load a path (start cell first). Never truncates: a path with more
    /// steps than the buffer holds is rejected and the buffer left empty.
    pub fn load(&mut self, path: &[GridCoord], goal: GridCoord) -> Result<(), PathFailReason> {
        self.clear();
        if path.is_empty() {
            return Ok(());
        }
        if path.len() - 1 > self.max_waypoints {
            return Err(PathFailReason::BufferTooSmall);
        }
        self.waypoints.extend_from_slice(path);
        self.current_index = 1;
        self.goal = Some(goal);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.waypoints.clear();
        self.current_index = 0;
        self.goal = None;
    }

    /// Next step to take, if any.
    pub fn next_waypoint(&self) -> Option<GridCoord> {
        self.waypoints.get(self.current_index).copied()
    }

    /// Move the cursor past the current waypoint.
    pub fn advance(&mut self) {
        if self.current_index < self.waypoints.len() {
            self.current_index += 1;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_index == self.waypoints.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Stored entries, origin included.
    pub fn waypoint_count(&self) -> usize {
        self.waypoints.len()
    }

    /// Steps in the loaded path (origin excluded).
    pub fn path_length(&self) -> usize {
        self.waypoints.len().saturating_sub(1)
    }

    pub fn remaining(&self) -> usize {
        self.waypoints.len() - self.current_index
    }

    pub fn max_waypoints(&self) -> usize {
        self.max_waypoints
    }

    /// Requested goal of the loaded path.
    pub fn goal(&self) -> Option<GridCoord> {
        self.goal
    }

    /// The steps of the path, origin excluded.
    pub fn steps(&self) -> &[GridCoord] {
        self.waypoints.get(1..).unwrap_or(&[])
    }

    /// Final cell of the loaded path.
    pub fn destination(&self) -> Option<GridCoord> {
        self.waypoints.last().copied()
    }
}

impl Default for PathBuffer {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: i32) -> Vec<GridCoord> {
        (0..=n).map(|x| GridCoord::new(x, 0)).collect()
    }

    #[test]
    fn test_load_skips_origin() {
        let mut buf = PathBuffer::new(8);
        buf.load(&line(3), GridCoord::new(3, 0)).unwrap();
        assert_eq!(buf.current_index(), 1);
        assert_eq!(buf.path_length(), 3);
        assert_eq!(buf.next_waypoint(), Some(GridCoord::new(1, 0)));
        assert_eq!(buf.steps().len(), 3);
        assert!(!buf.is_complete());
    }

    #[test]
    fn test_advance_to_completion() {
        let mut buf = PathBuffer::new(8);
        buf.load(&line(2), GridCoord::new(2, 0)).unwrap();
        buf.advance();
        buf.advance();
        assert!(buf.is_complete());
        assert_eq!(buf.next_waypoint(), None);
        buf.advance();
        assert_eq!(buf.current_index(), buf.waypoint_count());
    }

    #[test]
    fn test_zero_length_path_is_complete() {
        let mut buf = PathBuffer::new(8);
        buf.load(&[GridCoord::new(4, 4)], GridCoord::new(4, 4)).unwrap();
        assert_eq!(buf.path_length(), 0);
        assert!(buf.is_complete());
    }

    #[test]
    fn test_rejects_instead_of_truncating() {
        let mut buf = PathBuffer::new(2);
        assert_eq!(
            buf.load(&line(3), GridCoord::new(3, 0)),
            Err(PathFailReason::BufferTooSmall)
        );
        assert_eq!(buf.waypoint_count(), 0);
        assert!(buf.load(&line(2), GridCoord::new(2, 0)).is_ok());
    }
}
