//! Mesh topology primitives
//!
//! Distances and reachability on a non-wrapping mesh whose chips have six
//! links: the four cardinal directions plus the north-east/south-west
//! diagonal. The hexagonal metric applies, not the Manhattan one.

use crate::machine::{ChipCoord, Direction, Machine};
use std::collections::{HashSet, VecDeque};

/// Length of a shortest path covering the offset `(dx, dy)`
///
/// On this mesh a step can change x, y or both by one in the same sense, so
/// the distance is the spread of `(dx, dy, 0)`.
pub fn shortest_distance(dx: i64, dy: i64) -> u64 {
    let max = dx.max(dy).max(0);
    let min = dx.min(dy).min(0);
    (max - min) as u64
}

/// Length of a shortest path between two chips, ignoring dead links
pub fn shortest_path_length(source: ChipCoord, destination: ChipCoord) -> u64 {
    let dx = destination.x as i64 - source.x as i64;
    let dy = destination.y as i64 - source.y as i64;
    shortest_distance(dx, dy)
}

/// Number of straight segments needed to get from `source` to `destination`
pub fn least_turns(source: ChipCoord, destination: ChipCoord) -> u32 {
    if source == destination {
        return 0;
    }
    match straight_line(source, destination) {
        Some(_) => 1,
        None => 2,
    }
}

/// Direction and hop count of the straight line joining two distinct chips,
/// if they share a row, a column or a north-east diagonal
fn straight_line(source: ChipCoord, destination: ChipCoord) -> Option<(Direction, u64)> {
    let dx = destination.x as i64 - source.x as i64;
    let dy = destination.y as i64 - source.y as i64;

    if dx == 0 {
        let dir = if dy > 0 {
            Direction::North
        } else {
            Direction::South
        };
        Some((dir, dy.unsigned_abs()))
    } else if dy == 0 {
        let dir = if dx > 0 {
            Direction::East
        } else {
            Direction::West
        };
        Some((dir, dx.unsigned_abs()))
    } else if dx == dy {
        let dir = if dx > 0 {
            Direction::NorthEast
        } else {
            Direction::SouthWest
        };
        Some((dir, dx.unsigned_abs()))
    } else {
        None
    }
}

/// Whether `destination` can be reached from `source` by following live
/// links in a single direction
pub fn is_directly_reachable(source: ChipCoord, destination: ChipCoord, machine: &Machine) -> bool {
    if source == destination {
        return true;
    }
    let Some((direction, steps)) = straight_line(source, destination) else {
        return false;
    };

    let mut current = source;
    for _ in 0..steps {
        match machine.link_destination(current.x, current.y, direction) {
            Some(next) => current = next,
            None => return false,
        }
    }
    current == destination
}

/// Breadth-first walk over live links starting from one chip
///
/// Every reachable chip is visited once. Chips rejected by the availability
/// filter are still expanded, so the frontier grows through them, but they
/// are not yielded.
pub struct RadialChips<'a, F> {
    machine: &'a Machine,
    available: F,
    visited: HashSet<ChipCoord>,
    search: VecDeque<ChipCoord>,
}

impl<'a, F> RadialChips<'a, F>
where
    F: FnMut(ChipCoord) -> bool,
{
    /// Walk outward from `start`, yielding chips accepted by `available`
    pub fn new(machine: &'a Machine, start: ChipCoord, available: F) -> Self {
        let mut visited = HashSet::new();
        let mut search = VecDeque::new();
        if machine.has_chip(start) {
            visited.insert(start);
            search.push_back(start);
        }
        Self {
            machine,
            available,
            visited,
            search,
        }
    }
}

impl<'a, F> Iterator for RadialChips<'a, F>
where
    F: FnMut(ChipCoord) -> bool,
{
    type Item = ChipCoord;

    fn next(&mut self) -> Option<ChipCoord> {
        while let Some(coord) = self.search.pop_front() {
            if let Some(chip) = self.machine.chip(coord) {
                for (_, next) in chip.links() {
                    if self.machine.has_chip(next) && self.visited.insert(next) {
                        self.search.push_back(next);
                    }
                }
            }
            if (self.available)(coord) {
                return Some(coord);
            }
        }
        None
    }
}

/// Every chip reachable from `start`, in radial order
pub fn radial_chips(machine: &Machine, start: ChipCoord) -> RadialChips<'_, fn(ChipCoord) -> bool> {
    RadialChips::new(machine, start, any_chip as fn(ChipCoord) -> bool)
}

fn any_chip(_: ChipCoord) -> bool {
    true
}
