//! Router Tables
//!
//! Multicast routing tables as loaded into each chip's router, plus the
//! operations that produce or shrink them:
//! - Fixed routes funnelling every chip of a region to its ethernet chip
//! - Malloc-style merging of key-adjacent multicast entries

mod compressor;
mod fixed_route;

pub use compressor::{MallocBasedRouteMerger, MAX_ENTRIES};
pub use fixed_route::{FixedRouteBuilder, FixedRouteTables, FIXED_ROUTE_LINK_ORDER};

use crate::error::{MeshMapError, Result};
use crate::machine::{ChipCoord, Direction};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One multicast routing table entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MulticastRoutingEntry {
    /// Routing key
    pub key: u32,
    /// Mask applied to packet keys before comparing with `key`
    pub mask: u32,
    /// Links packets leave by
    #[serde(default)]
    pub links: BTreeSet<Direction>,
    /// Local processors packets are delivered to
    #[serde(default)]
    pub processors: BTreeSet<u32>,
    /// Whether default routing would send the packet the same way
    #[serde(default)]
    pub defaultable: bool,
}

impl MulticastRoutingEntry {
    /// Create a new entry
    pub fn new(
        key: u32,
        mask: u32,
        links: impl IntoIterator<Item = Direction>,
        processors: impl IntoIterator<Item = u32>,
        defaultable: bool,
    ) -> Self {
        Self {
            key,
            mask,
            links: links.into_iter().collect(),
            processors: processors.into_iter().collect(),
            defaultable,
        }
    }

    /// Whether both entries send packets to the same places
    pub fn same_route(&self, other: &MulticastRoutingEntry) -> bool {
        self.links == other.links && self.processors == other.processors
    }

    /// Highest key matched, assuming the mask has no holes
    pub fn last_key(&self) -> u64 {
        self.key as u64 + (!self.mask) as u64
    }

    /// Whether a packet with `key` hits this entry
    pub fn matches(&self, key: u32) -> bool {
        key & self.mask == self.key
    }
}

/// Routing table of a single chip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MulticastRoutingTable {
    /// Chip the table belongs to
    pub chip: ChipCoord,
    entries: Vec<MulticastRoutingEntry>,
}

impl MulticastRoutingTable {
    /// Create an empty table
    pub fn new(chip: ChipCoord) -> Self {
        Self {
            chip,
            entries: Vec::new(),
        }
    }

    /// Create a table holding `entries`, each under a distinct key and mask
    pub fn with_entries(
        chip: ChipCoord,
        entries: impl IntoIterator<Item = MulticastRoutingEntry>,
    ) -> Result<Self> {
        let mut table = Self::new(chip);
        for entry in entries {
            table.add_entry(entry)?;
        }
        Ok(table)
    }

    /// Add an entry; a second entry with the same key and mask is an error
    pub fn add_entry(&mut self, entry: MulticastRoutingEntry) -> Result<()> {
        if self
            .entries
            .iter()
            .any(|existing| existing.key == entry.key && existing.mask == entry.mask)
        {
            return Err(MeshMapError::already_exists(
                "routing entry",
                format!("{:#010x}/{:#010x} on chip {}", entry.key, entry.mask, self.chip),
            ));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Entries in insertion order
    pub fn entries(&self) -> &[MulticastRoutingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that occupy space in the hardware table
    pub fn n_non_defaultable(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.defaultable).count()
    }
}

/// Routing tables for a whole machine, one per chip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MulticastRoutingTables {
    tables: IndexMap<ChipCoord, MulticastRoutingTable>,
}

impl MulticastRoutingTables {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chip's table; a second table for the same chip is an error
    pub fn add_table(&mut self, table: MulticastRoutingTable) -> Result<()> {
        if self.tables.contains_key(&table.chip) {
            return Err(MeshMapError::already_exists("routing table for chip", table.chip));
        }
        self.tables.insert(table.chip, table);
        Ok(())
    }

    /// Get the table of a chip
    pub fn table(&self, chip: ChipCoord) -> Option<&MulticastRoutingTable> {
        self.tables.get(&chip)
    }

    /// Tables in the order they were added
    pub fn iter(&self) -> impl Iterator<Item = &MulticastRoutingTable> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Fixed route of one chip: where fixed-route packets go next
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FixedRouteEntry {
    pub links: BTreeSet<Direction>,
    pub processors: BTreeSet<u32>,
}

impl FixedRouteEntry {
    /// Entry forwarding over a single link
    pub fn via_link(link: Direction) -> Self {
        Self {
            links: BTreeSet::from([link]),
            processors: BTreeSet::new(),
        }
    }

    /// Entry delivering to a single local processor
    pub fn to_processor(processor: u32) -> Self {
        Self {
            links: BTreeSet::new(),
            processors: BTreeSet::from([processor]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_matching_and_span() {
        let entry = MulticastRoutingEntry::new(0x100, 0xFFFF_FF00, [Direction::East], [], false);
        assert!(entry.matches(0x1AB));
        assert!(!entry.matches(0x200));
        assert_eq!(entry.last_key(), 0x1FF);

        let everything = MulticastRoutingEntry::new(0, 0, [], [1], false);
        assert_eq!(everything.last_key(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_same_route_ignores_key() {
        let a = MulticastRoutingEntry::new(1, 0xFFFF_FFFF, [Direction::North], [2, 3], false);
        let b = MulticastRoutingEntry::new(9, 0xFFFF_FFF0, [Direction::North], [3, 2], true);
        let c = MulticastRoutingEntry::new(1, 0xFFFF_FFFF, [Direction::South], [2, 3], false);
        assert!(a.same_route(&b));
        assert!(!a.same_route(&c));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut tables = MulticastRoutingTables::new();
        tables
            .add_table(MulticastRoutingTable::new(ChipCoord::new(1, 2)))
            .unwrap();
        let err = tables
            .add_table(MulticastRoutingTable::new(ChipCoord::new(1, 2)))
            .unwrap_err();
        assert!(matches!(err, MeshMapError::AlreadyExists { .. }));
        assert_eq!(tables.len(), 1);
    }

    #[test]
    fn test_non_defaultable_count() {
        let mut table = MulticastRoutingTable::new(ChipCoord::new(0, 0));
        table
            .add_entry(MulticastRoutingEntry::new(0, 0xFFFF_FFFF, [Direction::East], [], true))
            .unwrap();
        table
            .add_entry(MulticastRoutingEntry::new(1, 0xFFFF_FFFF, [Direction::East], [], false))
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.n_non_defaultable(), 1);
    }

    #[test]
    fn test_duplicate_key_and_mask_rejected() {
        let mut table = MulticastRoutingTable::new(ChipCoord::new(2, 1));
        table
            .add_entry(MulticastRoutingEntry::new(8, 0xFFFF_FFFF, [Direction::East], [], false))
            .unwrap();
        // Same key under a different mask is a different entry
        table
            .add_entry(MulticastRoutingEntry::new(8, 0xFFFF_FFF8, [Direction::East], [], false))
            .unwrap();

        let err = table
            .add_entry(MulticastRoutingEntry::new(8, 0xFFFF_FFFF, [Direction::North], [], false))
            .unwrap_err();
        assert!(matches!(err, MeshMapError::AlreadyExists { .. }));
        assert!(err.to_string().contains("0x00000008"));
        assert_eq!(table.len(), 2);

        let err = MulticastRoutingTable::with_entries(
            ChipCoord::new(0, 0),
            vec![
                MulticastRoutingEntry::new(4, 0xFFFF_FFFC, [Direction::East], [], false),
                MulticastRoutingEntry::new(4, 0xFFFF_FFFC, [Direction::West], [], false),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, MeshMapError::AlreadyExists { .. }));
    }
}
