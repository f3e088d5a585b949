//! Co-location groups and placement order

use crate::error::{MeshMapError, Result};
use crate::graph::{Constraint, MachineGraph, Vertex, VertexId};

/// Union-find over vertex indices
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, mut item: usize) -> usize {
        while self.parent[item] != item {
            // Path halving
            self.parent[item] = self.parent[self.parent[item]];
            item = self.parent[item];
        }
        item
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }
}

/// Vertices that must share a chip, built once before placement
#[derive(Debug, Clone)]
pub struct VertexGroups {
    group_of: Vec<usize>,
    members: Vec<Vec<VertexId>>,
}

impl VertexGroups {
    /// Group vertices linked, directly or transitively, by
    /// [`Constraint::SameChipAs`]
    pub fn build(graph: &MachineGraph) -> Result<Self> {
        let n = graph.n_vertices();
        let mut sets = DisjointSet::new(n);

        for vertex in graph.vertices() {
            for constraint in &vertex.constraints {
                if let Constraint::SameChipAs(other) = constraint {
                    if other.index() >= n {
                        return Err(MeshMapError::Configuration(format!(
                            "Vertex {} must share a chip with unknown vertex {}",
                            vertex.label, other
                        )));
                    }
                    sets.union(vertex.id.index(), other.index());
                }
            }
        }

        // Number groups by their first member so the result is deterministic
        let mut root_group = vec![usize::MAX; n];
        let mut group_of = Vec::with_capacity(n);
        let mut members: Vec<Vec<VertexId>> = Vec::new();
        for vertex in graph.vertices() {
            let root = sets.find(vertex.id.index());
            if root_group[root] == usize::MAX {
                root_group[root] = members.len();
                members.push(Vec::new());
            }
            let group = root_group[root];
            group_of.push(group);
            members[group].push(vertex.id);
        }

        Ok(Self { group_of, members })
    }

    /// All members of the group containing `vertex`, in graph order
    pub fn group_of(&self, vertex: VertexId) -> &[VertexId] {
        self.group_of
            .get(vertex.index())
            .map(|&group| self.members[group].as_slice())
            .unwrap_or(&[])
    }

    pub fn n_groups(&self) -> usize {
        self.members.len()
    }
}

/// How hard a vertex is to place; lower ranks go first
fn constraint_rank(vertex: &Vertex) -> u8 {
    vertex
        .constraints
        .iter()
        .filter_map(|constraint| match constraint {
            Constraint::FixedChip { core: Some(_), .. } => Some(0),
            Constraint::FixedChip { core: None, .. } => Some(1),
            Constraint::SameChipAs(_) => Some(2),
            Constraint::RadialStart { .. } => Some(3),
            _ => None,
        })
        .min()
        .unwrap_or(4)
}

/// Vertices ordered most constrained first, graph order within a rank
pub fn sort_vertices_by_known_constraints(graph: &MachineGraph) -> Vec<VertexId> {
    let mut vertices: Vec<&Vertex> = graph.vertices().iter().collect();
    vertices.sort_by_key(|vertex| constraint_rank(vertex));
    vertices.into_iter().map(|vertex| vertex.id).collect()
}
