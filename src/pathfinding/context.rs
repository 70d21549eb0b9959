//! Pooled per-search scratch state.

use crate::grid::GridCoord;
use bevy_ecs::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub(crate) const NO_PARENT: u32 = u32::MAX;

/// Scratch slot for one grid cell.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PathNode {
    pub g: f32,
    pub h: f32,
    pub parent: u32,
    /// Search that last touched this slot.
    pub generation: u32,
    pub closed: bool,
}

impl Default for PathNode {
    fn default() -> Self {
        Self {
            g: f32::INFINITY,
            h: 0.0,
            parent: NO_PARENT,
            generation: 0,
            closed: false,
        }
    }
}

/// Open-set entry. Lower `f` pops first; equal `f` pops in insertion order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenEntry {
    pub f: f32,
    pub g: f32,
    pub seq: u64,
    pub index: u32,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert both keys.
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Node arena, open heap and path scratch for one search at a time.
///
/// The node arena is sized to the grid's cell count once and never cleared
/// between searches: [`PathfindingContext::begin_search`] bumps the
/// generation counter and stale slots are recognised by their stamp.
#[derive(Debug)]
pub struct PathfindingContext {
    nodes: Vec<PathNode>,
    open: BinaryHeap<OpenEntry>,
    path: Vec<GridCoord>,
    generation: u32,
    next_seq: u64,
}

impl PathfindingContext {
    pub fn new(cell_count: usize) -> Self {
        Self {
            nodes: vec![PathNode::default(); cell_count],
            open: BinaryHeap::with_capacity(256),
            path: Vec::with_capacity(64),
            generation: 0,
            next_seq: 0,
        }
    }

    pub fn cell_capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The path written by the last successful search, start cell first.
    pub fn path(&self) -> &[GridCoord] {
        &self.path
    }

    /// Start a new search: invalidates every slot in O(1).
    pub(crate) fn begin_search(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            // Counter wrapped; stamps from 4 billion searches ago would alias.
            for node in &mut self.nodes {
                node.generation = 0;
            }
            self.generation = 1;
        }
        self.open.clear();
        self.path.clear();
        self.next_seq = 0;
    }

    #[inline]
    pub(crate) fn in_search(&self, index: usize) -> bool {
        self.nodes[index].generation == self.generation
    }

    #[inline]
    pub(crate) fn node(&self, index: usize) -> &PathNode {
        &self.nodes[index]
    }

    #[inline]
    pub(crate) fn close(&mut self, index: usize) {
        self.nodes[index].closed = true;
    }

    /// Record a better route to `index` and queue it.
    pub(crate) fn open_node(&mut self, index: usize, g: f32, h: f32, parent: u32) {
        let node = &mut self.nodes[index];
        if node.generation != self.generation {
            *node = PathNode {
                g,
                h,
                parent,
                generation: self.generation,
                closed: false,
            };
        } else {
            node.g = g;
            node.parent = parent;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.open.push(OpenEntry {
            f: g + h,
            g,
            seq,
            index: index as u32,
        });
    }

    #[inline]
    pub(crate) fn pop_open(&mut self) -> Option<OpenEntry> {
        self.open.pop()
    }

    pub(crate) fn path_mut(&mut self) -> &mut Vec<GridCoord> {
        &mut self.path
    }
}

/// Fixed set of scratch contexts rented out for the duration of a search.
///
/// The pool size bounds how many searches can be in flight in one tick.
#[derive(Resource, Debug)]
pub struct PathfinderPool {
    available: Vec<PathfindingContext>,
    size: usize,
    cell_count: usize,
}

impl PathfinderPool {
    pub fn new(size: usize, cell_count: usize) -> Self {
        let available = (0..size).map(|_| PathfindingContext::new(cell_count)).collect();
        Self {
            available,
            size,
            cell_count,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.available.len()
    }

    /// Take a context out of the pool.
    pub fn rent(&mut self) -> Option<PathfindingContext> {
        self.available.pop()
    }

    /// Return a rented context. Contexts sized for a different grid are
    /// dropped and replaced.
    pub fn give_back(&mut self, ctx: PathfindingContext) {
        if self.available.len() >= self.size {
            return;
        }
        if ctx.cell_capacity() == self.cell_count {
            self.available.push(ctx);
        } else {
            self.available.push(PathfindingContext::new(self.cell_count));
        }
    }
}
