//! Fixed route generation
//!
//! Every chip of a region gets a single-link route that eventually lands on
//! the region's ethernet chip, where the packets are delivered to a chosen
//! processor.

use super::FixedRouteEntry;
use crate::error::{MeshMapError, Result};
use crate::graph::MachineGraph;
use crate::machine::{Chip, ChipCoord, Direction, Machine, MAX_CORES_PER_CHIP};
use crate::placer::Placements;
use std::collections::{BTreeMap, BTreeSet};

/// Link ids tried for each chip, in order: south-west, west, south, north,
/// east, north-east
pub const FIXED_ROUTE_LINK_ORDER: [usize; 6] = [4, 3, 5, 2, 0, 1];

/// Fixed route entries grouped by region root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedRouteTables {
    regions: BTreeMap<ChipCoord, BTreeMap<ChipCoord, FixedRouteEntry>>,
    root_of: BTreeMap<ChipCoord, ChipCoord>,
}

impl FixedRouteTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the entry of `chip` in the region rooted at `root`
    ///
    /// A chip has at most one fixed route across the whole machine.
    pub fn add_entry(&mut self, root: ChipCoord, chip: ChipCoord, entry: FixedRouteEntry) -> Result<()> {
        if self.root_of.contains_key(&chip) {
            return Err(MeshMapError::already_exists("fixed route entry", chip));
        }
        self.root_of.insert(chip, root);
        self.regions.entry(root).or_default().insert(chip, entry);
        Ok(())
    }

    /// Fixed route of a chip, wherever it is
    pub fn entry_for(&self, chip: ChipCoord) -> Option<&FixedRouteEntry> {
        let root = self.root_of.get(&chip)?;
        self.regions.get(root)?.get(&chip)
    }

    /// Entries of one region, by chip
    pub fn region(&self, root: ChipCoord) -> Option<&BTreeMap<ChipCoord, FixedRouteEntry>> {
        self.regions.get(&root)
    }

    /// Region roots and their entries, in coordinate order
    pub fn regions(&self) -> impl Iterator<Item = (&ChipCoord, &BTreeMap<ChipCoord, FixedRouteEntry>)> {
        self.regions.iter()
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.root_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root_of.is_empty()
    }
}

/// Builds fixed routes towards a vertex kind on every ethernet chip
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRouteBuilder;

impl FixedRouteBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Route every region of `machine` to the `destination_kind` vertex
    /// placed on its ethernet chip
    pub fn build(
        &self,
        machine: &Machine,
        placements: &Placements,
        graph: &MachineGraph,
        destination_kind: &str,
    ) -> Result<FixedRouteTables> {
        let mut tables = FixedRouteTables::new();
        for root in machine.ethernet_chips() {
            Self::route_region(machine, root, &mut tables)?;
            let processor = Self::locate_destination(root.coord, placements, graph, destination_kind)?;
            tables.add_entry(root.coord, root.coord, FixedRouteEntry::to_processor(processor))?;
        }
        log::info!(
            "Generated {} fixed route entries over {} regions",
            tables.len(),
            tables.regions.len()
        );
        Ok(tables)
    }

    /// Grow a tree of single-link hops from the root outward
    fn route_region(machine: &Machine, root: &Chip, tables: &mut FixedRouteTables) -> Result<()> {
        let mut to_route = machine.region_members(root.coord);
        to_route.remove(&root.coord);
        let mut routed = BTreeSet::from([root.coord]);

        let mut pass = 0;
        while !to_route.is_empty() {
            pass += 1;
            let mut found = Vec::new();
            for &chip in &to_route {
                let hop = FIXED_ROUTE_LINK_ORDER
                    .iter()
                    .filter_map(|&id| Direction::from_id(id))
                    .find(|&dir| {
                        machine
                            .link_destination(chip.x, chip.y, dir)
                            .is_some_and(|dest| routed.contains(&dest))
                    });
                if let Some(dir) = hop {
                    tables.add_entry(root.coord, chip, FixedRouteEntry::via_link(dir))?;
                    found.push(chip);
                }
            }

            if found.is_empty() {
                return Err(MeshMapError::Routing(format!(
                    "Unable to do fixed point routing on {} at {}: {} chips unreachable",
                    root.ip_address.as_deref().unwrap_or("unknown address"),
                    root.coord,
                    to_route.len()
                )));
            }
            log::debug!(
                "Region {} pass {}: routed {} chips",
                root.coord,
                pass,
                found.len()
            );
            for chip in found {
                to_route.remove(&chip);
                routed.insert(chip);
            }
        }
        Ok(())
    }

    /// First processor on the root running a vertex of the wanted kind
    fn locate_destination(
        root: ChipCoord,
        placements: &Placements,
        graph: &MachineGraph,
        destination_kind: &str,
    ) -> Result<u32> {
        (0..MAX_CORES_PER_CHIP)
            .find(|&core| {
                placements
                    .vertex_on_processor(root.x, root.y, core)
                    .and_then(|id| graph.vertex(id))
                    .is_some_and(|vertex| vertex.kind == destination_kind)
            })
            .ok_or_else(|| {
                MeshMapError::Configuration(format!(
                    "No destination vertex of kind {} found on ethernet chip {}",
                    destination_kind, root
                ))
            })
    }
}
