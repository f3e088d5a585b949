//! Construction of mesh machines
//!
//! Builds a non-wrapping rectangular mesh split into boards. The lower-left
//! chip of every board is ethernet connected and roots the board's region.
//! Chips and individual links can be marked dead, and virtual chips can be
//! hung off spare links on the edge of the mesh.

use super::{Chip, ChipCoord, Direction, Machine, MAX_CORES_PER_CHIP, MAX_LINKS_PER_ROUTER};
use crate::error::{MeshMapError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An off-board chip attached to a real chip through one of its links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualChipSpec {
    /// Coordinates given to the virtual chip
    pub coord: ChipCoord,
    /// Real chip the device is plugged into
    pub attached_to: ChipCoord,
    /// Link on the real chip used by the device
    pub direction: Direction,
}

/// Builder for [`Machine`]
#[derive(Debug, Clone)]
pub struct MachineBuilder {
    width: u32,
    height: u32,
    board_width: u32,
    board_height: u32,
    cores_per_chip: u32,
    monitors_per_chip: u32,
    sdram_per_chip: u64,
    router_entries: u32,
    tags_per_ethernet: u32,
    boot: ChipCoord,
    down_chips: BTreeSet<ChipCoord>,
    dead_links: BTreeSet<(ChipCoord, Direction)>,
    virtual_chips: Vec<VirtualChipSpec>,
}

impl MachineBuilder {
    /// Create a builder for a `width` x `height` mesh made of a single board
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            board_width: width.max(1),
            board_height: height.max(1),
            cores_per_chip: MAX_CORES_PER_CHIP,
            monitors_per_chip: 1,
            sdram_per_chip: 128 * 1024 * 1024,
            router_entries: 1024,
            tags_per_ethernet: 7,
            boot: ChipCoord::new(0, 0),
            down_chips: BTreeSet::new(),
            dead_links: BTreeSet::new(),
            virtual_chips: Vec::new(),
        }
    }

    /// Size of each board (and therefore of each region)
    pub fn board_size(mut self, width: u32, height: u32) -> Self {
        self.board_width = width;
        self.board_height = height;
        self
    }

    /// Processors per chip, monitors included
    pub fn cores_per_chip(mut self, cores: u32) -> Self {
        self.cores_per_chip = cores;
        self
    }

    /// Processors per chip reserved for monitors
    pub fn monitors_per_chip(mut self, monitors: u32) -> Self {
        self.monitors_per_chip = monitors;
        self
    }

    /// SDRAM bytes per chip
    pub fn sdram_per_chip(mut self, sdram: u64) -> Self {
        self.sdram_per_chip = sdram;
        self
    }

    /// Multicast routing table capacity per chip
    pub fn router_entries(mut self, entries: u32) -> Self {
        self.router_entries = entries;
        self
    }

    /// Tag identifiers carried by every ethernet chip
    pub fn tags_per_ethernet(mut self, tags: u32) -> Self {
        self.tags_per_ethernet = tags;
        self
    }

    /// Chip the machine boots through
    pub fn boot_chip(mut self, x: u32, y: u32) -> Self {
        self.boot = ChipCoord::new(x, y);
        self
    }

    /// Remove a chip from the machine
    pub fn down_chip(mut self, x: u32, y: u32) -> Self {
        self.down_chips.insert(ChipCoord::new(x, y));
        self
    }

    /// Kill the link leaving `(x, y)` in `direction`; the reverse link is
    /// unaffected
    pub fn dead_link(mut self, x: u32, y: u32, direction: Direction) -> Self {
        self.dead_links.insert((ChipCoord::new(x, y), direction));
        self
    }

    /// Attach an off-board virtual chip
    pub fn virtual_chip(mut self, spec: VirtualChipSpec) -> Self {
        self.virtual_chips.push(spec);
        self
    }

    /// Build the machine
    pub fn build(self) -> Result<Machine> {
        if self.width == 0 || self.height == 0 {
            return Err(MeshMapError::Configuration(format!(
                "Machine must have at least one chip, got {}x{}",
                self.width, self.height
            )));
        }
        if self.board_width == 0 || self.board_height == 0 {
            return Err(MeshMapError::Configuration(format!(
                "Invalid board size {}x{}",
                self.board_width, self.board_height
            )));
        }
        if self.cores_per_chip > MAX_CORES_PER_CHIP {
            return Err(MeshMapError::Configuration(format!(
                "{} cores per chip exceeds the maximum of {}",
                self.cores_per_chip, MAX_CORES_PER_CHIP
            )));
        }

        let exists = |coord: ChipCoord| {
            coord.x < self.width && coord.y < self.height && !self.down_chips.contains(&coord)
        };

        let mut chips = BTreeMap::new();
        for x in 0..self.width {
            for y in 0..self.height {
                let coord = ChipCoord::new(x, y);
                if !exists(coord) {
                    continue;
                }

                let root = ChipCoord::new(
                    x / self.board_width * self.board_width,
                    y / self.board_height * self.board_height,
                );
                let is_root = root == coord;

                let mut links = [None; MAX_LINKS_PER_ROUTER];
                for dir in Direction::ALL {
                    let (dx, dy) = dir.delta();
                    if self.dead_links.contains(&(coord, dir)) {
                        continue;
                    }
                    links[dir.id()] = coord.offset(dx, dy).filter(|&dest| exists(dest));
                }

                chips.insert(
                    coord,
                    Chip {
                        coord,
                        links,
                        n_processors: self.cores_per_chip,
                        n_monitors: self.monitors_per_chip,
                        sdram: self.sdram_per_chip,
                        router_entries: self.router_entries,
                        tag_ids: if is_root {
                            (1..=self.tags_per_ethernet).collect()
                        } else {
                            Vec::new()
                        },
                        is_virtual: false,
                        ip_address: is_root.then(|| {
                            format!(
                                "10.11.{}.{}",
                                x / self.board_width,
                                y / self.board_height
                            )
                        }),
                        nearest_ethernet: exists(root).then_some(root),
                    },
                );
            }
        }

        for spec in &self.virtual_chips {
            if chips.contains_key(&spec.coord) {
                return Err(MeshMapError::already_exists("chip", spec.coord));
            }
            let attached = chips.get_mut(&spec.attached_to).ok_or_else(|| {
                MeshMapError::Configuration(format!(
                    "Virtual chip {} attached to missing chip {}",
                    spec.coord, spec.attached_to
                ))
            })?;
            if attached.links[spec.direction.id()].is_some() {
                return Err(MeshMapError::Configuration(format!(
                    "Link {} of chip {} is already in use",
                    spec.direction, spec.attached_to
                )));
            }
            attached.links[spec.direction.id()] = Some(spec.coord);

            let mut links = [None; MAX_LINKS_PER_ROUTER];
            links[spec.direction.opposite().id()] = Some(spec.attached_to);
            chips.insert(
                spec.coord,
                Chip {
                    coord: spec.coord,
                    links,
                    n_processors: 0,
                    n_monitors: 0,
                    sdram: 0,
                    router_entries: self.router_entries,
                    tag_ids: Vec::new(),
                    is_virtual: true,
                    ip_address: None,
                    nearest_ethernet: None,
                },
            );
        }

        match chips.get(&self.boot) {
            Some(chip) if !chip.is_virtual => {}
            _ => {
                return Err(MeshMapError::Configuration(format!(
                    "Boot chip {} does not exist",
                    self.boot
                )))
            }
        }

        log::debug!(
            "Built {}x{} machine with {} chips",
            self.width,
            self.height,
            chips.len()
        );

        Ok(Machine {
            width: self.width,
            height: self.height,
            chips,
            boot: self.boot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_down_chip_removes_links_to_it() {
        let machine = Machine::builder(3, 3).down_chip(1, 1).build().unwrap();
        assert!(machine.chip_at(1, 1).is_none());
        assert!(!machine.link_exists(0, 0, Direction::NorthEast));
        assert!(!machine.link_exists(2, 2, Direction::SouthWest));
        assert!(machine.link_exists(0, 0, Direction::East));
    }

    #[test]
    fn test_dead_link_is_one_way() {
        let machine = Machine::builder(2, 1)
            .dead_link(1, 0, Direction::West)
            .build()
            .unwrap();
        assert!(!machine.link_exists(1, 0, Direction::West));
        assert!(machine.link_exists(0, 0, Direction::East));
    }

    #[test]
    fn test_virtual_chip_is_linked_both_ways() {
        let machine = Machine::builder(2, 2)
            .virtual_chip(VirtualChipSpec {
                coord: ChipCoord::new(5, 5),
                attached_to: ChipCoord::new(1, 1),
                direction: Direction::East,
            })
            .build()
            .unwrap();

        let chip = machine.chip_at(5, 5).unwrap();
        assert!(chip.is_virtual);
        assert_eq!(chip.n_user_processors(), 0);
        assert_eq!(chip.link(Direction::West), Some(ChipCoord::new(1, 1)));
        assert_eq!(
            machine.link_destination(1, 1, Direction::East),
            Some(ChipCoord::new(5, 5))
        );
        assert!(!machine
            .region_members(ChipCoord::new(0, 0))
            .contains(&ChipCoord::new(5, 5)));
    }

    #[test]
    fn test_virtual_chip_needs_free_link() {
        let err = Machine::builder(2, 2)
            .virtual_chip(VirtualChipSpec {
                coord: ChipCoord::new(5, 5),
                attached_to: ChipCoord::new(0, 0),
                direction: Direction::East,
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, MeshMapError::Configuration(_)));
    }

    #[test]
    fn test_missing_boot_chip_rejected() {
        let err = Machine::builder(2, 2).down_chip(0, 0).build().unwrap_err();
        assert!(matches!(err, MeshMapError::Configuration(_)));
    }

    #[test]
    fn test_ethernet_chips_carry_tags() {
        let machine = Machine::builder(4, 2).board_size(2, 2).build().unwrap();
        let root = machine.chip_at(2, 0).unwrap();
        assert!(root.is_ethernet());
        assert_eq!(root.tag_ids, (1..=7).collect::<Vec<_>>());
        assert!(machine.chip_at(3, 1).unwrap().tag_ids.is_empty());
        assert_eq!(
            machine.chip_at(3, 1).unwrap().nearest_ethernet,
            Some(ChipCoord::new(2, 0))
        );
    }
}
