//! Vertex Placement
//!
//! Places every vertex of a machine graph on one core of a chip:
//! - Vertices linked by SameChipAs constraints are placed together
//! - Most constrained groups go first
//! - Each group takes the first chip with room, searching outward from its
//!   radial start chip (the boot chip by default)

mod groups;
mod resources;

pub use groups::{sort_vertices_by_known_constraints, VertexGroups};
pub use resources::{Allocation, ResourceTracker};

use crate::error::{MeshMapError, Result};
use crate::graph::{Constraint, ConstraintKind, MachineGraph, ResourceRequirement, Vertex, VertexId};
use crate::machine::{ChipCoord, Machine};
use crate::mesh::RadialChips;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Constraint kinds the radial placer understands
pub const ALLOWED_CONSTRAINTS: [ConstraintKind; 3] = [
    ConstraintKind::FixedChip,
    ConstraintKind::SameChipAs,
    ConstraintKind::RadialStart,
];

/// Location of a placed vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    /// Placed vertex
    pub vertex: VertexId,
    /// Chip the vertex runs on
    pub chip: ChipCoord,
    /// Processor on that chip
    pub core: u32,
}

/// Placements indexed by vertex and by processor
#[derive(Debug, Clone, Default)]
pub struct Placements {
    by_vertex: IndexMap<VertexId, Placement>,
    by_processor: HashMap<(ChipCoord, u32), VertexId>,
}

impl Placements {
    /// Create an empty set of placements
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a placement
    ///
    /// Placing a vertex twice, or two vertices on one processor, is an error.
    pub fn add_placement(&mut self, placement: Placement) -> Result<()> {
        if self.by_vertex.contains_key(&placement.vertex) {
            return Err(MeshMapError::already_exists("placement of vertex", placement.vertex));
        }
        let processor = (placement.chip, placement.core);
        if self.by_processor.contains_key(&processor) {
            return Err(MeshMapError::already_exists(
                "processor",
                format!("{}:{}", placement.chip, placement.core),
            ));
        }
        self.by_processor.insert(processor, placement.vertex);
        self.by_vertex.insert(placement.vertex, placement);
        Ok(())
    }

    /// Get the placement of a vertex
    pub fn placement_of(&self, vertex: VertexId) -> Option<&Placement> {
        self.by_vertex.get(&vertex)
    }

    /// Check if a processor runs a vertex
    pub fn is_processor_occupied(&self, x: u32, y: u32, core: u32) -> bool {
        self.by_processor
            .contains_key(&(ChipCoord::new(x, y), core))
    }

    /// Get the vertex running on a processor
    pub fn vertex_on_processor(&self, x: u32, y: u32, core: u32) -> Option<VertexId> {
        self.by_processor
            .get(&(ChipCoord::new(x, y), core))
            .copied()
    }

    /// Placements in the order they were made
    pub fn iter(&self) -> impl Iterator<Item = &Placement> {
        self.by_vertex.values()
    }

    /// Number of placed vertices
    pub fn len(&self) -> usize {
        self.by_vertex.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_vertex.is_empty()
    }
}

/// Greedy placer filling chips outward from a start chip
#[derive(Debug, Clone, Copy, Default)]
pub struct RadialPlacer;

impl RadialPlacer {
    /// Create a new placer
    pub fn new() -> Self {
        Self
    }

    /// Place every vertex of `graph` on `machine`
    pub fn place(&self, graph: &MachineGraph, machine: &Machine) -> Result<Placements> {
        ResourceTracker::check_constraints(graph.vertices(), &ALLOWED_CONSTRAINTS)?;

        let groups = VertexGroups::build(graph)?;
        let order = sort_vertices_by_known_constraints(graph);
        let mut tracker = ResourceTracker::new(machine);
        let mut placements = Placements::new();

        for id in order {
            if placements.placement_of(id).is_some() {
                continue;
            }

            let members: Vec<&Vertex> = groups
                .group_of(id)
                .iter()
                .filter_map(|&member| graph.vertex(member))
                .collect();
            let start = Self::start_chip(&members, machine)?;

            // Collected up front: the tracker is borrowed by the filter
            let chips: Vec<ChipCoord> =
                RadialChips::new(machine, start, |coord| tracker.is_chip_available(coord)).collect();

            let request: Vec<(&ResourceRequirement, &[Constraint])> = members
                .iter()
                .map(|vertex| (&vertex.resources, vertex.constraints.as_slice()))
                .collect();
            let allocations = tracker.allocate_constrained_group_resources(&request, Some(&chips))?;

            for (vertex, allocation) in members.iter().zip(allocations) {
                log::debug!(
                    "Placed {} on {} core {}",
                    vertex.label,
                    allocation.chip,
                    allocation.core
                );
                placements.add_placement(Placement {
                    vertex: vertex.id,
                    chip: allocation.chip,
                    core: allocation.core,
                })?;
            }
        }

        log::info!(
            "Placed {} vertices in {} groups on {} chips",
            placements.len(),
            groups.n_groups(),
            tracker.chips_used()
        );
        Ok(placements)
    }

    /// Chip to search outward from, agreed by every member of a group
    fn start_chip(members: &[&Vertex], machine: &Machine) -> Result<ChipCoord> {
        let mut start: Option<ChipCoord> = None;
        for vertex in members {
            for constraint in &vertex.constraints {
                let Constraint::RadialStart { x, y } = constraint else {
                    continue;
                };
                let coord = ChipCoord::new(*x, *y);
                match start {
                    Some(existing) if existing != coord => {
                        return Err(MeshMapError::Place(format!(
                            "Non-matching constraints: radial start {} and {} in the group of {}",
                            existing, coord, vertex.label
                        )));
                    }
                    _ => start = Some(coord),
                }
            }
        }

        match start {
            Some(coord) if !machine.has_chip(coord) => Err(MeshMapError::Place(format!(
                "Radial start chip {} does not exist",
                coord
            ))),
            Some(coord) => Ok(coord),
            None => Ok(machine.boot_chip()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(n: usize, sdram: u64) -> (MachineGraph, Vec<VertexId>) {
        let mut graph = MachineGraph::new();
        let ids = (0..n)
            .map(|i| graph.add_vertex(format!("v{}", i), "worker", ResourceRequirement::with_sdram(sdram)))
            .collect();
        (graph, ids)
    }

    #[test]
    fn test_duplicate_placements_rejected() {
        let mut placements = Placements::new();
        let chip = ChipCoord::new(0, 0);
        placements
            .add_placement(Placement {
                vertex: VertexId(0),
                chip,
                core: 1,
            })
            .unwrap();

        let same_vertex = placements.add_placement(Placement {
            vertex: VertexId(0),
            chip,
            core: 2,
        });
        assert!(matches!(same_vertex, Err(MeshMapError::AlreadyExists { .. })));

        let same_core = placements.add_placement(Placement {
            vertex: VertexId(1),
            chip,
            core: 1,
        });
        assert!(matches!(same_core, Err(MeshMapError::AlreadyExists { .. })));

        assert_eq!(placements.len(), 1);
        assert!(placements.is_processor_occupied(0, 0, 1));
        assert_eq!(placements.vertex_on_processor(0, 0, 1), Some(VertexId(0)));
        assert_eq!(placements.vertex_on_processor(0, 0, 2), None);
    }

    #[test]
    fn test_fills_boot_chip_first() {
        let machine = Machine::builder(3, 3).cores_per_chip(4).build().unwrap();
        let (graph, v) = graph_with(4, 0);
        let placements = RadialPlacer::new().place(&graph, &machine).unwrap();

        assert_eq!(placements.len(), 4);
        for id in &v[..3] {
            assert_eq!(placements.placement_of(*id).unwrap().chip, ChipCoord::new(0, 0));
        }
        // The fourth spills to a neighbour of the boot chip
        let spill = placements.placement_of(v[3]).unwrap().chip;
        assert_ne!(spill, ChipCoord::new(0, 0));
        assert_eq!(crate::mesh::shortest_path_length(ChipCoord::new(0, 0), spill), 1);
    }

    #[test]
    fn test_same_chip_groups_share_a_chip() {
        let machine = Machine::builder(2, 2).cores_per_chip(4).build().unwrap();
        let (mut graph, v) = graph_with(5, 0);
        graph.add_constraint(v[3], Constraint::SameChipAs(v[4])).unwrap();
        graph.add_constraint(v[2], Constraint::SameChipAs(v[3])).unwrap();

        let placements = RadialPlacer::new().place(&graph, &machine).unwrap();
        let chip = placements.placement_of(v[2]).unwrap().chip;
        assert_eq!(placements.placement_of(v[3]).unwrap().chip, chip);
        assert_eq!(placements.placement_of(v[4]).unwrap().chip, chip);
    }

    #[test]
    fn test_radial_start_and_fixed_chip() {
        let machine = Machine::builder(4, 4).build().unwrap();
        let (mut graph, v) = graph_with(2, 0);
        graph
            .add_constraint(v[0], Constraint::RadialStart { x: 3, y: 2 })
            .unwrap();
        graph
            .add_constraint(
                v[1],
                Constraint::FixedChip {
                    x: 1,
                    y: 3,
                    core: Some(5),
                },
            )
            .unwrap();

        let placements = RadialPlacer::new().place(&graph, &machine).unwrap();
        assert_eq!(placements.placement_of(v[0]).unwrap().chip, ChipCoord::new(3, 2));
        let fixed = placements.placement_of(v[1]).unwrap();
        assert_eq!((fixed.chip, fixed.core), (ChipCoord::new(1, 3), 5));
    }

    #[test]
    fn test_non_matching_radial_starts() {
        let machine = Machine::builder(4, 4).build().unwrap();
        let (mut graph, v) = graph_with(2, 0);
        graph.add_constraint(v[1], Constraint::SameChipAs(v[0])).unwrap();
        graph
            .add_constraint(v[0], Constraint::RadialStart { x: 1, y: 1 })
            .unwrap();
        graph
            .add_constraint(v[1], Constraint::RadialStart { x: 2, y: 2 })
            .unwrap();

        let err = RadialPlacer::new().place(&graph, &machine).unwrap_err();
        assert!(matches!(err, MeshMapError::Place(_)));
        assert!(err.to_string().contains("Non-matching constraints"));
    }

    #[test]
    fn test_unsupported_constraint_rejected() {
        let machine = Machine::builder(2, 2).build().unwrap();
        let (mut graph, v) = graph_with(2, 0);
        graph.add_constraint(v[1], Constraint::SameAtomsAs(v[0])).unwrap();
        let err = RadialPlacer::new().place(&graph, &machine).unwrap_err();
        assert!(matches!(err, MeshMapError::Configuration(_)));
    }

    #[test]
    fn test_out_of_space_fails_whole_run() {
        let machine = Machine::builder(1, 2).cores_per_chip(3).build().unwrap();
        let (graph, _) = graph_with(5, 0);
        let err = RadialPlacer::new().place(&graph, &machine).unwrap_err();
        assert!(matches!(err, MeshMapError::Place(_)));
    }

    #[test]
    fn test_group_tags_overflow_is_a_place_error() {
        let machine = Machine::builder(2, 2).build().unwrap();
        let mut graph = MachineGraph::new();
        let a = graph.add_vertex(
            "a",
            "worker",
            ResourceRequirement {
                tags: u32::MAX,
                ..ResourceRequirement::default()
            },
        );
        let b = graph.add_vertex(
            "b",
            "worker",
            ResourceRequirement {
                tags: 1,
                ..ResourceRequirement::default()
            },
        );
        graph.add_constraint(b, Constraint::SameChipAs(a)).unwrap();

        let err = RadialPlacer::new().place(&graph, &machine).unwrap_err();
        assert!(matches!(err, MeshMapError::Place(_)));
    }

    #[test]
    fn test_sdram_limits_vertices_per_chip() {
        let machine = Machine::builder(2, 1).sdram_per_chip(1000).build().unwrap();
        let (graph, v) = graph_with(2, 600);
        let placements = RadialPlacer::new().place(&graph, &machine).unwrap();
        assert_ne!(
            placements.placement_of(v[0]).unwrap().chip,
            placements.placement_of(v[1]).unwrap().chip
        );
    }
}
