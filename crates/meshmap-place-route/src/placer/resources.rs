//! Per-chip resource bookkeeping during placement

use crate::error::{MeshMapError, Result};
use crate::graph::{Constraint, ConstraintKind, ResourceRequirement, Vertex};
use crate::machine::{Chip, ChipCoord, Machine};
use crate::mesh::radial_chips;
use std::collections::{BTreeSet, HashMap};

/// Where a vertex landed and what it was given
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub chip: ChipCoord,
    pub core: u32,
    pub tags: Vec<u32>,
}

/// Remaining capacity of one chip
#[derive(Debug, Clone)]
struct ChipUsage {
    free_cores: BTreeSet<u32>,
    sdram: u64,
    router_entries: u32,
    free_tags: BTreeSet<u32>,
}

impl ChipUsage {
    fn fresh(chip: &Chip) -> Self {
        Self {
            free_cores: chip.user_processors().collect(),
            sdram: chip.sdram,
            router_entries: chip.router_entries,
            free_tags: chip.tag_ids.iter().copied().collect(),
        }
    }
}

/// Tracks what is left on every chip as vertices are placed
///
/// Allocations are atomic: a call either reserves everything it asked for on
/// a single chip or leaves the tracker untouched.
pub struct ResourceTracker<'m> {
    machine: &'m Machine,
    usage: HashMap<ChipCoord, ChipUsage>,
    default_order: Vec<ChipCoord>,
}

impl<'m> ResourceTracker<'m> {
    /// Create a tracker whose default chip order is radial from the boot chip
    pub fn new(machine: &'m Machine) -> Self {
        let default_order = radial_chips(machine, machine.boot_chip()).collect();
        Self::with_chip_order(machine, default_order)
    }

    /// Create a tracker trying chips in the given order when none are supplied
    pub fn with_chip_order(machine: &'m Machine, default_order: Vec<ChipCoord>) -> Self {
        Self {
            machine,
            usage: HashMap::new(),
            default_order,
        }
    }

    /// Fail if any vertex carries a placement constraint outside `allowed`
    ///
    /// Key allocator constraints say nothing about where a vertex goes and
    /// are left for key allocation, so they are never rejected here.
    /// `SameAtomsAs` is not exempt: nothing after placement consumes it, so
    /// a placer that does not list it could only drop it silently.
    pub fn check_constraints(vertices: &[Vertex], allowed: &[ConstraintKind]) -> Result<()> {
        for vertex in vertices {
            for constraint in &vertex.constraints {
                let kind = constraint.kind();
                if kind.is_key_allocator() || allowed.contains(&kind) {
                    continue;
                }
                return Err(MeshMapError::Configuration(format!(
                    "Constraint {} on vertex {} is not supported by this placer",
                    kind, vertex.label
                )));
            }
        }
        Ok(())
    }

    fn remaining(&self, coord: ChipCoord) -> Option<ChipUsage> {
        if let Some(usage) = self.usage.get(&coord) {
            return Some(usage.clone());
        }
        self.machine
            .chip(coord)
            .filter(|chip| !chip.is_virtual)
            .map(ChipUsage::fresh)
    }

    /// Whether the chip exists and still has a free core
    pub fn is_chip_available(&self, coord: ChipCoord) -> bool {
        match self.usage.get(&coord) {
            Some(usage) => !usage.free_cores.is_empty(),
            None => self
                .machine
                .chip(coord)
                .is_some_and(|chip| !chip.is_virtual && chip.n_user_processors() > 0),
        }
    }

    /// Number of chips with at least one allocation
    pub fn chips_used(&self) -> usize {
        self.usage.len()
    }

    /// Reserve one core plus `requirement` on the first suitable chip
    pub fn allocate_constrained_resources(
        &mut self,
        requirement: &ResourceRequirement,
        constraints: &[Constraint],
        chips: Option<&[ChipCoord]>,
    ) -> Result<Allocation> {
        self.allocate_constrained_group_resources(&[(requirement, constraints)], chips)?
            .pop()
            .ok_or_else(|| MeshMapError::Place("Allocation returned no core".to_string()))
    }

    /// Reserve one core per group member, all on the same chip
    ///
    /// Allocations are returned in the order of `group`.
    pub fn allocate_constrained_group_resources(
        &mut self,
        group: &[(&ResourceRequirement, &[Constraint])],
        chips: Option<&[ChipCoord]>,
    ) -> Result<Vec<Allocation>> {
        if group.is_empty() {
            return Ok(Vec::new());
        }

        let fixed_chip = Self::fixed_chip(group)?;
        let fixed_cores = Self::fixed_cores(group)?;
        let total = group
            .iter()
            .try_fold(ResourceRequirement::default(), |acc, (req, _)| acc.extend(req))?;

        let fixed_candidates;
        let candidates: &[ChipCoord] = match fixed_chip {
            Some(coord) => {
                if !self.machine.has_chip(coord) {
                    return Err(MeshMapError::Place(format!(
                        "Fixed chip {} does not exist",
                        coord
                    )));
                }
                fixed_candidates = [coord];
                &fixed_candidates
            }
            None => chips.unwrap_or(&self.default_order),
        };

        for &coord in candidates {
            let Some((usage, granted)) = self.plan(coord, group, &fixed_cores, &total) else {
                continue;
            };
            self.usage.insert(coord, usage);
            return Ok(granted
                .into_iter()
                .map(|(core, tags)| Allocation {
                    chip: coord,
                    core,
                    tags,
                })
                .collect());
        }

        let wanted = format!(
            "{} cores, {} bytes SDRAM, {} tags and {} routing entries",
            group.len(),
            total.sdram,
            total.tags,
            total.router_entries
        );
        Err(MeshMapError::Place(match fixed_chip {
            Some(coord) => format!("Chip {} cannot provide {}", coord, wanted),
            None => format!("No chip with {} available", wanted),
        }))
    }

    /// The chip every FixedChip constraint of the group agrees on
    fn fixed_chip(group: &[(&ResourceRequirement, &[Constraint])]) -> Result<Option<ChipCoord>> {
        let mut chip = None;
        for (_, constraints) in group {
            for constraint in constraints.iter() {
                if let Constraint::FixedChip { x, y, .. } = constraint {
                    let coord = ChipCoord::new(*x, *y);
                    match chip {
                        None => chip = Some(coord),
                        Some(existing) if existing != coord => {
                            return Err(MeshMapError::Place(format!(
                                "Non-matching chip constraints {} and {}",
                                existing, coord
                            )));
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        Ok(chip)
    }

    /// The core each member asks for, if any
    fn fixed_cores(group: &[(&ResourceRequirement, &[Constraint])]) -> Result<Vec<Option<u32>>> {
        let mut seen = BTreeSet::new();
        let mut cores = Vec::with_capacity(group.len());
        for (_, constraints) in group {
            let mut core = None;
            for constraint in constraints.iter() {
                if let Constraint::FixedChip { core: Some(p), .. } = constraint {
                    match core {
                        Some(existing) if existing != *p => {
                            return Err(MeshMapError::Place(format!(
                                "Non-matching core constraints {} and {}",
                                existing, p
                            )));
                        }
                        _ => core = Some(*p),
                    }
                }
            }
            if let Some(p) = core {
                if !seen.insert(p) {
                    return Err(MeshMapError::Place(format!(
                        "Core {} requested by more than one vertex",
                        p
                    )));
                }
            }
            cores.push(core);
        }
        Ok(cores)
    }

    /// Work out the allocation on one chip without committing it
    fn plan(
        &self,
        coord: ChipCoord,
        group: &[(&ResourceRequirement, &[Constraint])],
        fixed_cores: &[Option<u32>],
        total: &ResourceRequirement,
    ) -> Option<(ChipUsage, Vec<(u32, Vec<u32>)>)> {
        let mut usage = self.remaining(coord)?;
        if usage.free_cores.len() < group.len()
            || usage.sdram < total.sdram
            || usage.router_entries < total.router_entries
            || usage.free_tags.len() < total.tags as usize
        {
            return None;
        }

        // Fixed cores first so the floating members cannot take them
        for core in fixed_cores.iter().flatten() {
            if !usage.free_cores.remove(core) {
                return None;
            }
        }

        let mut granted = Vec::with_capacity(group.len());
        for ((requirement, _), fixed) in group.iter().zip(fixed_cores) {
            let core = match fixed {
                Some(core) => *core,
                None => usage.free_cores.pop_first()?,
            };
            let tags: Vec<u32> = usage
                .free_tags
                .iter()
                .take(requirement.tags as usize)
                .copied()
                .collect();
            for tag in &tags {
                usage.free_tags.remove(tag);
            }
            granted.push((core, tags));
        }

        usage.sdram -= total.sdram;
        usage.router_entries -= total.router_entries;
        Some((usage, granted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MachineGraph, ResourceRequirement};

    fn small_machine() -> Machine {
        Machine::builder(2, 2)
            .cores_per_chip(3)
            .sdram_per_chip(1000)
            .build()
            .unwrap()
    }

    #[test]
    fn test_single_allocation_uses_lowest_user_core() {
        let machine = small_machine();
        let mut tracker = ResourceTracker::new(&machine);
        let alloc = tracker
            .allocate_constrained_resources(&ResourceRequirement::with_sdram(100), &[], None)
            .unwrap();
        assert_eq!(alloc.chip, ChipCoord::new(0, 0));
        assert_eq!(alloc.core, 1);
        assert!(alloc.tags.is_empty());
    }

    #[test]
    fn test_full_chip_moves_to_next_candidate() {
        let machine = small_machine();
        let mut tracker = ResourceTracker::new(&machine);
        let req = ResourceRequirement::default();
        let order = [ChipCoord::new(1, 1), ChipCoord::new(0, 1)];

        let first = tracker
            .allocate_constrained_resources(&req, &[], Some(&order))
            .unwrap();
        let second = tracker
            .allocate_constrained_resources(&req, &[], Some(&order))
            .unwrap();
        let third = tracker
            .allocate_constrained_resources(&req, &[], Some(&order))
            .unwrap();

        assert_eq!((first.chip, first.core), (ChipCoord::new(1, 1), 1));
        assert_eq!((second.chip, second.core), (ChipCoord::new(1, 1), 2));
        assert_eq!((third.chip, third.core), (ChipCoord::new(0, 1), 1));
        assert!(!tracker.is_chip_available(ChipCoord::new(1, 1)));
        assert!(tracker.is_chip_available(ChipCoord::new(0, 1)));
    }

    #[test]
    fn test_sdram_shortage_skips_chip() {
        let machine = small_machine();
        let mut tracker = ResourceTracker::new(&machine);
        let big = ResourceRequirement::with_sdram(700);
        let a = tracker
            .allocate_constrained_resources(&big, &[], None)
            .unwrap();
        let b = tracker
            .allocate_constrained_resources(&big, &[], None)
            .unwrap();
        assert_ne!(a.chip, b.chip);
    }

    #[test]
    fn test_failed_group_leaves_tracker_untouched() {
        let machine = small_machine();
        let mut tracker = ResourceTracker::new(&machine);
        let req = ResourceRequirement::default();
        let none: &[Constraint] = &[];
        let only = [ChipCoord::new(0, 0)];

        // Three members need three user cores; chips only have two
        let err = tracker
            .allocate_constrained_group_resources(&[(&req, none), (&req, none), (&req, none)], Some(&only))
            .unwrap_err();
        assert!(matches!(err, MeshMapError::Place(_)));
        assert_eq!(tracker.chips_used(), 0);

        let pair = tracker
            .allocate_constrained_group_resources(&[(&req, none), (&req, none)], Some(&only))
            .unwrap();
        assert_eq!(pair.len(), 2);
        assert!(pair.iter().all(|a| a.chip == ChipCoord::new(0, 0)));
    }

    #[test]
    fn test_group_requirement_overflow() {
        let machine = small_machine();
        let mut tracker = ResourceTracker::new(&machine);
        let all_tags = ResourceRequirement {
            tags: u32::MAX,
            ..ResourceRequirement::default()
        };
        let one_tag = ResourceRequirement {
            tags: 1,
            ..ResourceRequirement::default()
        };
        let none: &[Constraint] = &[];

        let err = tracker
            .allocate_constrained_group_resources(&[(&all_tags, none), (&one_tag, none)], None)
            .unwrap_err();
        assert!(matches!(err, MeshMapError::Place(_)));
        assert!(err.to_string().contains("overflows"));
        assert_eq!(tracker.chips_used(), 0);
    }

    #[test]
    fn test_fixed_chip_and_core() {
        let machine = small_machine();
        let mut tracker = ResourceTracker::new(&machine);
        let req = ResourceRequirement::default();
        let fixed: &[Constraint] = &[Constraint::FixedChip {
            x: 1,
            y: 0,
            core: Some(2),
        }];
        let floating: &[Constraint] = &[];

        let allocs = tracker
            .allocate_constrained_group_resources(&[(&req, floating), (&req, fixed)], None)
            .unwrap();
        assert_eq!(allocs[0].chip, ChipCoord::new(1, 0));
        assert_eq!(allocs[0].core, 1);
        assert_eq!(allocs[1].core, 2);

        // The same core again cannot be had
        let err = tracker
            .allocate_constrained_resources(&req, fixed, None)
            .unwrap_err();
        assert!(matches!(err, MeshMapError::Place(_)));
    }

    #[test]
    fn test_conflicting_fixed_chips() {
        let machine = small_machine();
        let mut tracker = ResourceTracker::new(&machine);
        let req = ResourceRequirement::default();
        let a: &[Constraint] = &[Constraint::FixedChip { x: 0, y: 0, core: None }];
        let b: &[Constraint] = &[Constraint::FixedChip { x: 1, y: 1, core: None }];
        let err = tracker
            .allocate_constrained_group_resources(&[(&req, a), (&req, b)], None)
            .unwrap_err();
        assert!(err.to_string().contains("Non-matching"));
    }

    #[test]
    fn test_tags_come_from_ethernet_chip() {
        let machine = Machine::builder(2, 1).tags_per_ethernet(2).build().unwrap();
        let mut tracker = ResourceTracker::new(&machine);
        let req = ResourceRequirement {
            tags: 1,
            ..Default::default()
        };
        let a = tracker
            .allocate_constrained_resources(&req, &[], None)
            .unwrap();
        let b = tracker
            .allocate_constrained_resources(&req, &[], None)
            .unwrap();
        assert_eq!(a.tags, vec![1]);
        assert_eq!(b.tags, vec![2]);
        let err = tracker
            .allocate_constrained_resources(&req, &[], None)
            .unwrap_err();
        assert!(matches!(err, MeshMapError::Place(_)));
    }

    #[test]
    fn test_check_constraints() {
        let mut graph = MachineGraph::new();
        let a = graph.add_vertex("a", "worker", ResourceRequirement::default());
        let b = graph.add_vertex("b", "worker", ResourceRequirement::default());
        graph
            .add_constraint(
                a,
                Constraint::FixedKeyAndMask {
                    keys_and_masks: Vec::new(),
                    key_list: None,
                },
            )
            .unwrap();
        let allowed = [ConstraintKind::SameChipAs];
        assert!(ResourceTracker::check_constraints(graph.vertices(), &allowed).is_ok());

        graph.add_constraint(b, Constraint::SameAtomsAs(a)).unwrap();
        let err = ResourceTracker::check_constraints(graph.vertices(), &allowed).unwrap_err();
        assert!(matches!(err, MeshMapError::Configuration(_)));
        assert!(err.to_string().contains("SameAtomsAs"));
    }

    #[test]
    fn test_virtual_chips_never_available() {
        use crate::machine::{Direction, VirtualChipSpec};
        let machine = Machine::builder(1, 1)
            .virtual_chip(VirtualChipSpec {
                coord: ChipCoord::new(4, 4),
                attached_to: ChipCoord::new(0, 0),
                direction: Direction::East,
            })
            .build()
            .unwrap();
        let tracker = ResourceTracker::new(&machine);
        assert!(tracker.is_chip_available(ChipCoord::new(0, 0)));
        assert!(!tracker.is_chip_available(ChipCoord::new(4, 4)));
        assert!(!tracker.is_chip_available(ChipCoord::new(9, 9)));
    }
}
