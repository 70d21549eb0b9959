//! A* search over 4- or 8-connected grid neighbours.

use super::context::{PathfindingContext, NO_PARENT};
use super::{PathBuffer, PathFailReason, PathFlags, PathOutcome, PathQuery, PathResult, SearchLimits};
use crate::grid::{Grid, GridCoord};
use std::f32::consts::SQRT_2;

const CARDINAL_DIRS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

const OCTILE_DIRS: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

/// Manhattan distance when cardinal-only, octile distance otherwise.
#[inline]
pub fn heuristic(a: GridCoord, b: GridCoord, cardinal_only: bool) -> f32 {
    let dx = a.x.abs_diff(b.x) as f32;
    let dy = a.y.abs_diff(b.y) as f32;
    if cardinal_only {
        dx + dy
    } else {
        dx.max(dy) + (SQRT_2 - 1.0) * dx.min(dy)
    }
}

/// Run A* from `query.start` to `query.goal`.
///
/// On success the path (start cell first) is left in `ctx.path()`. Ties
/// between equal `F` costs resolve in insertion order, so identical grid
/// state and query always produce the identical path.
///
/// # Panics
/// If `ctx` was sized for a grid with a different cell count.
pub fn find_path(
    ctx: &mut PathfindingContext,
    grid: &Grid,
    query: &PathQuery,
    limits: &SearchLimits,
) -> PathResult {
    assert_eq!(
        ctx.cell_capacity(),
        grid.cell_count(),
        "pathfinding context sized for a different grid"
    );

    let (Some(start_idx), Some(goal_idx)) = (grid.index_of(query.start), grid.index_of(query.goal))
    else {
        return Err(PathFailReason::InvalidRequest);
    };
    if query.start.floor != query.goal.floor {
        return Err(PathFailReason::InvalidRequest);
    }

    ctx.begin_search();

    if start_idx == goal_idx {
        ctx.path_mut().push(query.start);
        return Ok(PathOutcome {
            steps: 0,
            end: query.start,
            partial: false,
            nodes_expanded: 0,
        });
    }

    if !grid.cell_at(start_idx).walkable {
        return Err(PathFailReason::StartBlocked);
    }
    let allow_partial = query.flags.contains(PathFlags::ALLOW_PARTIAL);
    if !grid.cell_at(goal_idx).walkable && !allow_partial {
        return Err(PathFailReason::GoalBlocked);
    }

    let cardinal_only = query.flags.contains(PathFlags::CARDINAL_ONLY);
    let dirs: &[(i32, i32)] = if cardinal_only { &CARDINAL_DIRS } else { &OCTILE_DIRS };
    let scale = grid.heuristic_scale();

    let start_h = heuristic(query.start, query.goal, cardinal_only);
    ctx.open_node(start_idx, 0.0, start_h * scale, NO_PARENT);

    // Closest discovered cell by raw heuristic distance; first found wins ties.
    let mut closest = (start_idx, start_h);
    let mut expanded = 0usize;
    let mut timed_out = false;

    while let Some(entry) = ctx.pop_open() {
        let index = entry.index as usize;
        let node = *ctx.node(index);
        if node.closed || entry.g > node.g {
            continue;
        }
        if index == goal_idx {
            return reconstruct(ctx, grid, goal_idx, limits, false, expanded);
        }
        if expanded >= limits.max_nodes {
            timed_out = true;
            break;
        }
        expanded += 1;
        ctx.close(index);

        let here = grid.coord_of(index);
        for &(dx, dy) in dirs {
            let next = here.offset(dx, dy);
            let Some(next_idx) = grid.index_of(next) else {
                continue;
            };
            let cell = grid.cell_at(next_idx);
            if !cell.walkable {
                continue;
            }

            let diagonal = dx != 0 && dy != 0;
            if diagonal
                && limits.prevent_corner_cutting
                && (!grid.is_walkable(here.offset(dx, 0)) || !grid.is_walkable(here.offset(0, dy)))
            {
                continue;
            }

            let base = if diagonal { SQRT_2 } else { 1.0 };
            let g = node.g + base * cell.movement_cost;

            if ctx.in_search(next_idx) {
                let known = *ctx.node(next_idx);
                if known.closed || g >= known.g {
                    continue;
                }
                ctx.open_node(next_idx, g, known.h, index as u32);
            } else {
                let h = heuristic(next, query.goal, cardinal_only);
                ctx.open_node(next_idx, g, h * scale, index as u32);
                if h < closest.1 {
                    closest = (next_idx, h);
                }
            }
        }
    }

    if allow_partial && closest.0 != start_idx {
        return reconstruct(ctx, grid, closest.0, limits, true, expanded);
    }

    if timed_out {
        Err(PathFailReason::Timeout)
    } else {
        Err(PathFailReason::NoPathExists)
    }
}

/// Walk parent links back from `end_idx` and leave the path, start first, in
/// the context.
fn reconstruct(
    ctx: &mut PathfindingContext,
    grid: &Grid,
    end_idx: usize,
    limits: &SearchLimits,
    partial: bool,
    nodes_expanded: usize,
) -> PathResult {
    ctx.path_mut().clear();
    let mut index = end_idx as u32;
    loop {
        let node = *ctx.node(index as usize);
        ctx.path_mut().push(grid.coord_of(index as usize));
        if ctx.path().len() > limits.max_waypoints + 1 {
            ctx.path_mut().clear();
            return Err(PathFailReason::BufferTooSmall);
        }
        if node.parent == NO_PARENT {
            break;
        }
        index = node.parent;
    }
    ctx.path_mut().reverse();

    Ok(PathOutcome {
        steps: ctx.path().len() - 1,
        end: grid.coord_of(end_idx),
        partial,
        nodes_expanded,
    })
}

/// Run a search and load the result into an agent's buffer. The buffer is
/// cleared on failure.
pub fn find_path_into(
    ctx: &mut PathfindingContext,
    grid: &Grid,
    query: &PathQuery,
    limits: &SearchLimits,
    buffer: &mut PathBuffer,
) -> PathResult {
    match find_path(ctx, grid, query, limits) {
        Ok(outcome) => {
            buffer.load(ctx.path(), query.goal)?;
            Ok(outcome)
        }
        Err(reason) => {
            buffer.clear();
            Err(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(grid: &Grid, start: GridCoord, goal: GridCoord, flags: PathFlags) -> (PathResult, Vec<GridCoord>) {
        let mut ctx = PathfindingContext::new(grid.cell_count());
        let result = find_path(&mut ctx, grid, &PathQuery::new(start, goal, flags), &SearchLimits::default());
        (result, ctx.path().to_vec())
    }

    fn assert_valid_path(grid: &Grid, path: &[GridCoord]) {
        for pair in path.windows(2) {
            assert!(pair[0].is_adjacent(&pair[1]), "{} -> {} not adjacent", pair[0], pair[1]);
            assert!(grid.is_walkable(pair[1]));
        }
    }

    #[test]
    fn test_same_start_and_goal() {
        let grid = Grid::new(10, 10, 1);
        let c = GridCoord::new(3, 3);
        let (result, path) = search(&grid, c, c, PathFlags::empty());
        let outcome = result.unwrap();
        assert_eq!(outcome.steps, 0);
        assert_eq!(path, vec![c]);
    }

    #[test]
    fn test_open_grid_lengths_match_distance_metric() {
        let grid = Grid::new(50, 50, 1);
        let pairs = [
            (GridCoord::new(0, 0), GridCoord::new(49, 49)),
            (GridCoord::new(5, 5), GridCoord::new(8, 5)),
            (GridCoord::new(10, 3), GridCoord::new(2, 40)),
            (GridCoord::new(25, 25), GridCoord::new(24, 0)),
        ];
        for (start, goal) in pairs {
            let (result, path) = search(&grid, start, goal, PathFlags::empty());
            assert_eq!(result.unwrap().steps as u32, start.chebyshev(&goal));
            assert_valid_path(&grid, &path);

            let (result, path) = search(&grid, start, goal, PathFlags::CARDINAL_ONLY);
            assert_eq!(result.unwrap().steps as u32, start.manhattan(&goal));
            assert!(path.windows(2).all(|p| !p[0].is_diagonal_to(&p[1])));
        }
    }

    #[test]
    fn test_wall_column_means_no_path() {
        let mut grid = Grid::new(50, 50, 1);
        grid.fill_rect(GridCoord::new(5, 0), GridCoord::new(5, 49), false);
        let start = GridCoord::new(2, 5);
        let goal = GridCoord::new(8, 5);

        let (result, _) = search(&grid, start, goal, PathFlags::empty());
        assert_eq!(result, Err(PathFailReason::NoPathExists));

        let (result, path) = search(&grid, start, goal, PathFlags::ALLOW_PARTIAL);
        let outcome = result.unwrap();
        assert!(outcome.partial);
        assert!(outcome.steps > 0);
        assert_eq!(outcome.end, GridCoord::new(4, 5));
        assert_eq!(path.last(), Some(&GridCoord::new(4, 5)));
        assert_valid_path(&grid, &path);
    }

    #[test]
    fn test_early_exit_failures() {
        let mut grid = Grid::new(10, 10, 2);
        grid.set_walkable(GridCoord::new(0, 0), false);
        grid.set_walkable(GridCoord::new(9, 9), false);

        let (r, _) = search(&grid, GridCoord::new(-1, 0), GridCoord::new(3, 3), PathFlags::empty());
        assert_eq!(r, Err(PathFailReason::InvalidRequest));
        let (r, _) = search(&grid, GridCoord::new(1, 1), GridCoord::on_floor(3, 3, 1), PathFlags::empty());
        assert_eq!(r, Err(PathFailReason::InvalidRequest));
        let (r, _) = search(&grid, GridCoord::new(0, 0), GridCoord::new(3, 3), PathFlags::empty());
        assert_eq!(r, Err(PathFailReason::StartBlocked));
        let (r, _) = search(&grid, GridCoord::new(1, 1), GridCoord::new(9, 9), PathFlags::empty());
        assert_eq!(r, Err(PathFailReason::GoalBlocked));
    }

    #[test]
    fn test_blocked_goal_with_partial_stops_adjacent() {
        let mut grid = Grid::new(10, 10, 1);
        grid.set_walkable(GridCoord::new(7, 2), false);
        let (result, path) = search(&grid, GridCoord::new(1, 2), GridCoord::new(7, 2), PathFlags::ALLOW_PARTIAL);
        let outcome = result.unwrap();
        assert!(outcome.partial);
        assert_eq!(outcome.end, GridCoord::new(6, 2));
        assert_eq!(path.last(), Some(&GridCoord::new(6, 2)));
    }

    #[test]
    fn test_node_budget_timeout() {
        let grid = Grid::new(100, 100, 1);
        let mut ctx = PathfindingContext::new(grid.cell_count());
        let limits = SearchLimits {
            max_nodes: 10,
            ..Default::default()
        };
        let query = PathQuery::new(GridCoord::new(0, 0), GridCoord::new(99, 0), PathFlags::CARDINAL_ONLY);
        assert_eq!(find_path(&mut ctx, &grid, &query, &limits), Err(PathFailReason::Timeout));

        let partial = PathQuery {
            flags: PathFlags::CARDINAL_ONLY | PathFlags::ALLOW_PARTIAL,
            ..query
        };
        let outcome = find_path(&mut ctx, &grid, &partial, &limits).unwrap();
        assert!(outcome.partial);
        assert_eq!(outcome.nodes_expanded, 10);
        assert!(outcome.end.x > 0);
    }

    #[test]
    fn test_buffer_too_small() {
        let grid = Grid::new(20, 1, 1);
        let mut ctx = PathfindingContext::new(grid.cell_count());
        let limits = SearchLimits {
            max_waypoints: 3,
            ..Default::default()
        };
        let query = PathQuery::new(GridCoord::new(0, 0), GridCoord::new(10, 0), PathFlags::empty());
        assert_eq!(find_path(&mut ctx, &grid, &query, &limits), Err(PathFailReason::BufferTooSmall));

        let short = PathQuery::new(GridCoord::new(0, 0), GridCoord::new(3, 0), PathFlags::empty());
        assert_eq!(find_path(&mut ctx, &grid, &short, &limits).unwrap().steps, 3);
    }

    #[test]
    fn test_corner_cutting_prevention() {
        let grid = Grid::from_ascii(&["..", "#."]);
        let start = GridCoord::new(0, 0);
        let goal = GridCoord::new(1, 1);
        let mut ctx = PathfindingContext::new(grid.cell_count());

        let strict = SearchLimits::default();
        let outcome = find_path(&mut ctx, &grid, &PathQuery::new(start, goal, PathFlags::empty()), &strict).unwrap();
        assert_eq!(outcome.steps, 2);
        assert_eq!(ctx.path()[1], GridCoord::new(1, 0));

        let loose = SearchLimits {
            prevent_corner_cutting: false,
            ..Default::default()
        };
        let outcome = find_path(&mut ctx, &grid, &PathQuery::new(start, goal, PathFlags::empty()), &loose).unwrap();
        assert_eq!(outcome.steps, 1);
    }

    #[test]
    fn test_routes_through_gap() {
        let grid = Grid::from_ascii(&[
            "....#....",
            "....#....",
            ".........",
            "....#....",
            "....#....",
        ]);
        let (result, path) = search(&grid, GridCoord::new(0, 0), GridCoord::new(8, 0), PathFlags::empty());
        assert!(result.is_ok());
        assert!(path.contains(&GridCoord::new(4, 2)));
        assert_valid_path(&grid, &path);
    }

    #[test]
    fn test_avoids_expensive_cells() {
        let mut grid = Grid::new(5, 3, 1);
        grid.set_movement_cost(GridCoord::new(2, 1), 10.0);
        let (result, path) = search(&grid, GridCoord::new(0, 1), GridCoord::new(4, 1), PathFlags::CARDINAL_ONLY);
        assert_eq!(result.unwrap().steps, 6);
        assert!(!path.contains(&GridCoord::new(2, 1)));
    }

    #[test]
    fn test_context_reuse_is_deterministic() {
        let grid = Grid::from_ascii(&[
            "..........",
            "..####....",
            "..#..#....",
            "..#..####.",
            "..........",
        ]);
        let mut ctx = PathfindingContext::new(grid.cell_count());
        let query = PathQuery::new(GridCoord::new(0, 0), GridCoord::new(9, 4), PathFlags::empty());
        let limits = SearchLimits::default();

        find_path(&mut ctx, &grid, &query, &limits).unwrap();
        let first = ctx.path().to_vec();
        // An unrelated search in between must not leak state.
        let other = PathQuery::new(GridCoord::new(9, 0), GridCoord::new(0, 4), PathFlags::CARDINAL_ONLY);
        find_path(&mut ctx, &grid, &other, &limits).unwrap();
        find_path(&mut ctx, &grid, &query, &limits).unwrap();
        assert_eq!(ctx.path(), first.as_slice());
    }

    #[test]
    fn test_find_path_into_buffer() {
        let grid = Grid::new(10, 10, 1);
        let mut ctx = PathfindingContext::new(grid.cell_count());
        let mut buffer = PathBuffer::new(16);
        let query = PathQuery::new(GridCoord::new(0, 0), GridCoord::new(3, 3), PathFlags::empty());
        find_path_into(&mut ctx, &grid, &query, &SearchLimits::default(), &mut buffer).unwrap();
        assert_eq!(buffer.current_index(), 1);
        assert_eq!(buffer.path_length(), 3);
        assert_eq!(buffer.destination(), Some(GridCoord::new(3, 3)));

        let blocked = PathQuery::new(GridCoord::new(0, 0), GridCoord::new(30, 3), PathFlags::empty());
        assert!(find_path_into(&mut ctx, &grid, &blocked, &SearchLimits::default(), &mut buffer).is_err());
        assert_eq!(buffer.waypoint_count(), 0);
    }

    #[test]
    fn test_heuristics() {
        let a = GridCoord::new(0, 0);
        let b = GridCoord::new(3, 4);
        assert_eq!(heuristic(a, b, true), 7.0);
        assert!((heuristic(a, b, false) - (4.0 + (SQRT_2 - 1.0) * 3.0)).abs() < 1e-5);
    }
}
