//! Machine model for mesh-connected multi-chip machines
//!
//! The machine is an arena of chips keyed by their coordinates. Links are
//! stored as destination coordinates rather than references, so the chip
//! graph has no ownership cycles and can be queried freely by the placer and
//! the routers.

mod builder;

pub use builder::{MachineBuilder, VirtualChipSpec};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Number of link slots on every chip router
pub const MAX_LINKS_PER_ROUTER: usize = 6;

/// Highest number of processors any chip can carry
pub const MAX_CORES_PER_CHIP: u32 = 18;

/// Coordinates of a chip in the mesh
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ChipCoord {
    pub x: u32,
    pub y: u32,
}

impl ChipCoord {
    /// Create a new chip coordinate
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Coordinate displaced by `(dx, dy)`, or `None` if it leaves the
    /// non-negative quadrant
    pub fn offset(self, dx: i64, dy: i64) -> Option<Self> {
        let x = u32::try_from(self.x as i64 + dx).ok()?;
        let y = u32::try_from(self.y as i64 + dy).ok()?;
        Some(Self { x, y })
    }
}

impl From<(u32, u32)> for ChipCoord {
    fn from((x, y): (u32, u32)) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for ChipCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Link direction, numbered by the physical router link id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    East = 0,
    NorthEast = 1,
    North = 2,
    West = 3,
    SouthWest = 4,
    South = 5,
}

impl Direction {
    /// All directions in link id order
    pub const ALL: [Direction; MAX_LINKS_PER_ROUTER] = [
        Direction::East,
        Direction::NorthEast,
        Direction::North,
        Direction::West,
        Direction::SouthWest,
        Direction::South,
    ];

    /// Router link id of this direction
    pub fn id(self) -> usize {
        self as usize
    }

    /// Direction for a router link id
    pub fn from_id(id: usize) -> Option<Self> {
        Self::ALL.get(id).copied()
    }

    /// Coordinate change when following a link in this direction
    pub fn delta(self) -> (i64, i64) {
        match self {
            Direction::East => (1, 0),
            Direction::NorthEast => (1, 1),
            Direction::North => (0, 1),
            Direction::West => (-1, 0),
            Direction::SouthWest => (-1, -1),
            Direction::South => (0, -1),
        }
    }

    /// The direction pointing back along the same link
    pub fn opposite(self) -> Self {
        Self::ALL[(self.id() + MAX_LINKS_PER_ROUTER / 2) % MAX_LINKS_PER_ROUTER]
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::East => "east",
            Direction::NorthEast => "north-east",
            Direction::North => "north",
            Direction::West => "west",
            Direction::SouthWest => "south-west",
            Direction::South => "south",
        };
        f.write_str(name)
    }
}

/// A single chip of the machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chip {
    /// Chip coordinates
    pub coord: ChipCoord,
    /// Live outgoing links, indexed by link id
    links: [Option<ChipCoord>; MAX_LINKS_PER_ROUTER],
    /// Total processors, monitors included
    pub n_processors: u32,
    /// Processors reserved for system monitors (the lowest ids)
    pub n_monitors: u32,
    /// SDRAM size in bytes
    pub sdram: u64,
    /// Multicast routing table capacity
    pub router_entries: u32,
    /// Tag identifiers available on this chip
    pub tag_ids: Vec<u32>,
    /// Off-board chip standing in for an external device
    pub is_virtual: bool,
    /// IP address of ethernet-connected chips
    pub ip_address: Option<String>,
    /// Root chip of the region this chip belongs to
    pub nearest_ethernet: Option<ChipCoord>,
}

impl Chip {
    /// Destination of the link in `direction`, if the link is alive
    pub fn link(&self, direction: Direction) -> Option<ChipCoord> {
        self.links[direction.id()]
    }

    /// All live links in link id order
    pub fn links(&self) -> impl Iterator<Item = (Direction, ChipCoord)> + '_ {
        Direction::ALL
            .iter()
            .filter_map(|&dir| self.link(dir).map(|dest| (dir, dest)))
    }

    /// Processors that can run user vertices
    pub fn user_processors(&self) -> std::ops::Range<u32> {
        self.n_monitors.min(self.n_processors)..self.n_processors
    }

    /// Number of processors that can run user vertices
    pub fn n_user_processors(&self) -> u32 {
        self.n_processors.saturating_sub(self.n_monitors)
    }

    /// Whether this chip is the root of a region
    pub fn is_ethernet(&self) -> bool {
        self.ip_address.is_some()
    }
}

/// A mesh machine: chips keyed by coordinate plus the boot chip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    width: u32,
    height: u32,
    chips: BTreeMap<ChipCoord, Chip>,
    boot: ChipCoord,
}

impl Machine {
    /// Start describing a `width` x `height` machine
    pub fn builder(width: u32, height: u32) -> MachineBuilder {
        MachineBuilder::new(width, height)
    }

    /// Grid width in chips
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in chips
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Chip at the given coordinates
    pub fn chip_at(&self, x: u32, y: u32) -> Option<&Chip> {
        self.chips.get(&ChipCoord::new(x, y))
    }

    /// Chip at the given coordinate
    pub fn chip(&self, coord: ChipCoord) -> Option<&Chip> {
        self.chips.get(&coord)
    }

    /// Whether a chip exists at the given coordinate
    pub fn has_chip(&self, coord: ChipCoord) -> bool {
        self.chips.contains_key(&coord)
    }

    /// All chips in coordinate order
    pub fn chips(&self) -> impl Iterator<Item = &Chip> {
        self.chips.values()
    }

    /// Number of chips, virtual ones included
    pub fn n_chips(&self) -> usize {
        self.chips.len()
    }

    /// Whether a live link leaves `(x, y)` in `direction`
    pub fn link_exists(&self, x: u32, y: u32, direction: Direction) -> bool {
        self.link_destination(x, y, direction).is_some()
    }

    /// Destination of the live link leaving `(x, y)` in `direction`
    pub fn link_destination(&self, x: u32, y: u32, direction: Direction) -> Option<ChipCoord> {
        self.chip_at(x, y).and_then(|chip| chip.link(direction))
    }

    /// Coordinate one hop from `(x, y)` in `direction`, ignoring whether the
    /// link or the chip exists
    pub fn xy_over_link(&self, x: u32, y: u32, direction: Direction) -> Option<ChipCoord> {
        let (dx, dy) = direction.delta();
        ChipCoord::new(x, y).offset(dx, dy)
    }

    /// The chip the machine is booted through
    pub fn boot_chip(&self) -> ChipCoord {
        self.boot
    }

    /// Region roots in coordinate order
    pub fn ethernet_chips(&self) -> impl Iterator<Item = &Chip> {
        self.chips.values().filter(|chip| chip.is_ethernet())
    }

    /// Every chip whose region root is `root`, the root included
    pub fn region_members(&self, root: ChipCoord) -> BTreeSet<ChipCoord> {
        self.chips
            .values()
            .filter(|chip| chip.nearest_ethernet == Some(root))
            .map(|chip| chip.coord)
            .collect()
    }
}
