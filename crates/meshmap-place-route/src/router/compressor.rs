//! Malloc-style routing table compression
//!
//! Entries are sorted by key and runs of neighbours with the same route are
//! replaced by one entry covering the smallest aligned power-of-two block of
//! keys that holds them, provided the block does not swallow keys belonging
//! to anything else. Only masks without holes are supported.

use super::{MulticastRoutingEntry, MulticastRoutingTable, MulticastRoutingTables};
use crate::error::{MeshMapError, Result};

/// Hardware limit on non-defaultable entries per chip
pub const MAX_ENTRIES: usize = 1023;

const ALL_KEYS: u64 = 0xFFFF_FFFF;

/// Whether `mask` is a run of ones followed by a run of zeros
fn mask_has_no_holes(mask: u32) -> bool {
    let zeros = !mask;
    zeros & zeros.wrapping_add(1) == 0
}

/// Merges adjacent routing entries with identical routes
#[derive(Debug, Clone, Copy, Default)]
pub struct MallocBasedRouteMerger;

impl MallocBasedRouteMerger {
    pub fn new() -> Self {
        Self
    }

    /// Compress every table
    ///
    /// All masks of all tables are checked before anything is compressed.
    pub fn compress_tables(&self, tables: &MulticastRoutingTables) -> Result<MulticastRoutingTables> {
        for table in tables.iter() {
            Self::check_masks(table)?;
        }

        let mut compressed = MulticastRoutingTables::new();
        for table in tables.iter() {
            compressed.add_table(self.compress_checked(table)?)?;
        }
        Ok(compressed)
    }

    /// Compress a single table
    pub fn compress(&self, table: &MulticastRoutingTable) -> Result<MulticastRoutingTable> {
        Self::check_masks(table)?;
        self.compress_checked(table)
    }

    fn check_masks(table: &MulticastRoutingTable) -> Result<()> {
        match table
            .entries()
            .iter()
            .find(|entry| !mask_has_no_holes(entry.mask))
        {
            Some(entry) => Err(MeshMapError::Routing(format!(
                "Only masks without holes are allowed in tables for the malloc based merger (disallowed mask={:#x} on chip {})",
                entry.mask, table.chip
            ))),
            None => Ok(()),
        }
    }

    fn compress_checked(&self, table: &MulticastRoutingTable) -> Result<MulticastRoutingTable> {
        let merged = Self::merge_routes(table)?;
        let n_entries = merged.n_non_defaultable();
        log::info!(
            "Chip {}: reduced from {} to {} entries",
            table.chip,
            table.len(),
            n_entries
        );
        if n_entries > MAX_ENTRIES {
            return Err(MeshMapError::Routing(format!(
                "Cannot make table of chip {} small enough: {} entries",
                table.chip, n_entries
            )));
        }
        Ok(merged)
    }

    fn merge_routes(table: &MulticastRoutingTable) -> Result<MulticastRoutingTable> {
        let mut entries: Vec<&MulticastRoutingEntry> = table.entries().iter().collect();
        entries.sort_by_key(|entry| entry.key);

        let mut merged = MulticastRoutingTable::new(table.chip);
        let mut last_key_added: u64 = 0;
        let mut pos = 0;
        while pos < entries.len() {
            let first = entries[pos];

            // Extend while the route matches and the common key prefix stays
            // clear of what has been emitted
            let mut base_key = first.key;
            let mut next_pos = pos + 1;
            while next_pos < entries.len()
                && entries[next_pos].same_route(first)
                && (base_key & entries[next_pos].key) as u64 > last_key_added
            {
                base_key &= entries[next_pos].key;
                next_pos += 1;
            }
            next_pos -= 1;

            let block = if next_pos != pos {
                Self::merge_block(&entries, pos, next_pos, base_key, last_key_added)
            } else {
                None
            };

            match block {
                Some((key, mask)) => {
                    merged.add_entry(MulticastRoutingEntry {
                        key,
                        mask,
                        links: first.links.clone(),
                        processors: first.processors.clone(),
                        defaultable: false,
                    })?;
                    last_key_added = key as u64 + !mask as u64;
                    pos = next_pos;
                }
                None => {
                    merged.add_entry(first.clone())?;
                    last_key_added = first.last_key();
                }
            }
            pos += 1;
        }
        Ok(merged)
    }

    /// Key and mask of the block covering `entries[pos..=next_pos]`, if that
    /// block overlaps neither emitted entries nor the entry after the run
    fn merge_block(
        entries: &[&MulticastRoutingEntry],
        pos: usize,
        next_pos: usize,
        base_key: u32,
        last_key_added: u64,
    ) -> Option<(u32, u32)> {
        let last_key = entries[next_pos].last_key();
        let span = last_key.saturating_sub(base_key as u64);
        let n_keys = (1u64 << (u64::BITS - span.leading_zeros())) - 1;
        let mask = !n_keys & ALL_KEYS;
        let base = base_key as u64 & mask;

        let covers_run = base + n_keys >= last_key;
        let after_emitted = base > last_key_added;
        let clear_of_next = match entries.get(next_pos + 1) {
            Some(next) => (entries[pos].key as u64) + n_keys < next.key as u64,
            None => true,
        };

        (covers_run && after_emitted && clear_of_next).then_some((base as u32, mask as u32))
    }
}
