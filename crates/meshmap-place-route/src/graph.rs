//! Machine graph: vertices, their resource needs and their constraints

use crate::error::{MeshMapError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a vertex, dense from zero in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(pub u32);

impl VertexId {
    /// Position of the vertex in the graph
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Resources a vertex consumes on its chip, besides its one core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRequirement {
    /// SDRAM bytes
    #[serde(default)]
    pub sdram: u64,
    /// Number of tags
    #[serde(default)]
    pub tags: u32,
    /// Multicast routing table entries
    #[serde(default)]
    pub router_entries: u32,
}

impl ResourceRequirement {
    /// Requirement for the given SDRAM only
    pub fn with_sdram(sdram: u64) -> Self {
        Self {
            sdram,
            ..Self::default()
        }
    }

    /// Combined requirement of this and `other`
    pub fn extend(&self, other: &ResourceRequirement) -> Result<Self> {
        let overflow = || MeshMapError::Place("Group requirement overflows".to_string());
        Ok(Self {
            sdram: self.sdram.checked_add(other.sdram).ok_or_else(overflow)?,
            tags: self.tags.checked_add(other.tags).ok_or_else(overflow)?,
            router_entries: self
                .router_entries
                .checked_add(other.router_entries)
                .ok_or_else(overflow)?,
        })
    }
}

/// Keys listed by [`Constraint::fixed_keys`] when no count is asked for
pub const MAX_LISTED_KEYS: usize = 1 << 16;

/// A routing key with the mask selecting its significant bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyAndMask {
    key: u32,
    mask: u32,
}

impl KeyAndMask {
    /// Create a key and mask; the key may not set bits the mask ignores
    pub fn new(key: u32, mask: u32) -> Result<Self> {
        if key & !mask != 0 {
            return Err(MeshMapError::Configuration(format!(
                "Key {:#010x} has bits outside mask {:#010x}",
                key, mask
            )));
        }
        Ok(Self { key, mask })
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Number of keys matched
    pub fn n_keys(&self) -> u64 {
        1u64 << self.mask.count_zeros()
    }

    /// Every key matched, in ascending order
    ///
    /// Lazy; a mask of zero matches all 2^32 keys.
    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        let free_bits: Vec<u32> = (0..32).filter(|bit| self.mask & (1 << bit) == 0).collect();
        (0..self.n_keys()).map(move |index| {
            free_bits
                .iter()
                .enumerate()
                .filter(|(i, _)| index & (1 << i) != 0)
                .fold(self.key, |key, (_, bit)| key | (1 << bit))
        })
    }
}

/// Strategy turning fixed keys and masks into the list of keys to use
pub trait KeyListFn: Send + Sync {
    /// Produce keys from `keys_and_masks`, at most `n_keys` if given
    fn keys(&self, keys_and_masks: &[KeyAndMask], n_keys: Option<usize>) -> Vec<u32>;
}

impl<F> KeyListFn for F
where
    F: Fn(&[KeyAndMask], Option<usize>) -> Vec<u32> + Send + Sync,
{
    fn keys(&self, keys_and_masks: &[KeyAndMask], n_keys: Option<usize>) -> Vec<u32> {
        self(keys_and_masks, n_keys)
    }
}

/// Shared handle on an injected [`KeyListFn`]
#[derive(Clone)]
pub struct KeyListStrategy(pub Arc<dyn KeyListFn>);

impl KeyListStrategy {
    pub fn new(strategy: impl KeyListFn + 'static) -> Self {
        Self(Arc::new(strategy))
    }
}

impl fmt::Debug for KeyListStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyListStrategy(..)")
    }
}

impl PartialEq for KeyListStrategy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Constraint attached to a vertex
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Place on this chip, and on this core if given
    FixedChip { x: u32, y: u32, core: Option<u32> },
    /// Place on the same chip as another vertex
    SameChipAs(VertexId),
    /// Search for a chip outward from this one
    RadialStart { x: u32, y: u32 },
    /// Partition identically to another vertex
    SameAtomsAs(VertexId),
    /// Use these keys for the vertex's outgoing traffic
    FixedKeyAndMask {
        keys_and_masks: Vec<KeyAndMask>,
        key_list: Option<KeyListStrategy>,
    },
}

/// The kind of a [`Constraint`], without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstraintKind {
    FixedChip,
    SameChipAs,
    RadialStart,
    SameAtomsAs,
    FixedKeyAndMask,
}

impl ConstraintKind {
    /// Key allocator constraints only matter once routing keys are assigned
    pub fn is_key_allocator(self) -> bool {
        matches!(self, ConstraintKind::FixedKeyAndMask)
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::FixedChip => "FixedChip",
            ConstraintKind::SameChipAs => "SameChipAs",
            ConstraintKind::RadialStart => "RadialStart",
            ConstraintKind::SameAtomsAs => "SameAtomsAs",
            ConstraintKind::FixedKeyAndMask => "FixedKeyAndMask",
        };
        f.write_str(name)
    }
}

impl Constraint {
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::FixedChip { .. } => ConstraintKind::FixedChip,
            Constraint::SameChipAs(_) => ConstraintKind::SameChipAs,
            Constraint::RadialStart { .. } => ConstraintKind::RadialStart,
            Constraint::SameAtomsAs(_) => ConstraintKind::SameAtomsAs,
            Constraint::FixedKeyAndMask { .. } => ConstraintKind::FixedKeyAndMask,
        }
    }

    /// Keys fixed by a [`Constraint::FixedKeyAndMask`]
    ///
    /// Uses the injected strategy when there is one, otherwise walks the keys
    /// and masks in order. Without `n_keys` the walk stops after
    /// [`MAX_LISTED_KEYS`]; pass `n_keys` to go further under wide masks.
    pub fn fixed_keys(&self, n_keys: Option<usize>) -> Option<Vec<u32>> {
        let Constraint::FixedKeyAndMask {
            keys_and_masks,
            key_list,
        } = self
        else {
            return None;
        };
        let keys = match key_list {
            Some(strategy) => strategy.0.keys(keys_and_masks, n_keys),
            None => {
                let all = keys_and_masks.iter().flat_map(|km| km.keys());
                all.take(n_keys.unwrap_or(MAX_LISTED_KEYS)).collect()
            }
        };
        Some(keys)
    }
}

/// A unit of computation to be placed on one core
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub id: VertexId,
    /// Human readable name
    pub label: String,
    /// What the vertex is, e.g. "packet_gatherer"
    pub kind: String,
    pub resources: ResourceRequirement,
    pub constraints: Vec<Constraint>,
}

/// The graph of vertices to place
#[derive(Debug, Clone, Default)]
pub struct MachineGraph {
    vertices: Vec<Vertex>,
}

impl MachineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex and return its id
    pub fn add_vertex(
        &mut self,
        label: impl Into<String>,
        kind: impl Into<String>,
        resources: ResourceRequirement,
    ) -> VertexId {
        let id = VertexId(self.vertices.len() as u32);
        self.vertices.push(Vertex {
            id,
            label: label.into(),
            kind: kind.into(),
            resources,
            constraints: Vec::new(),
        });
        id
    }

    /// Attach a constraint to an existing vertex
    pub fn add_constraint(&mut self, vertex: VertexId, constraint: Constraint) -> Result<()> {
        let vertex = self.vertices.get_mut(vertex.index()).ok_or_else(|| {
            MeshMapError::Configuration(format!("Unknown vertex {}", vertex))
        })?;
        vertex.constraints.push(constraint);
        Ok(())
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id.index())
    }

    /// Vertices in insertion order
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_and_mask_rejects_stray_bits() {
        assert!(KeyAndMask::new(0x100, 0xFFFF_FF00).is_ok());
        let err = KeyAndMask::new(0x101, 0xFFFF_FF00).unwrap_err();
        assert!(matches!(err, MeshMapError::Configuration(_)));
    }

    #[test]
    fn test_key_and_mask_enumerates_keys() {
        let km = KeyAndMask::new(0x10, 0xFFFF_FFF4).unwrap();
        assert_eq!(km.n_keys(), 8);
        let keys: Vec<_> = km.keys().collect();
        assert_eq!(keys, vec![0x10, 0x11, 0x12, 0x13, 0x18, 0x19, 0x1A, 0x1B]);
    }

    #[test]
    fn test_fixed_keys_default_walk() {
        let constraint = Constraint::FixedKeyAndMask {
            keys_and_masks: vec![
                KeyAndMask::new(0x20, 0xFFFF_FFFE).unwrap(),
                KeyAndMask::new(0x40, 0xFFFF_FFFF).unwrap(),
            ],
            key_list: None,
        };
        assert_eq!(constraint.fixed_keys(None), Some(vec![0x20, 0x21, 0x40]));
        assert_eq!(constraint.fixed_keys(Some(2)), Some(vec![0x20, 0x21]));
        assert_eq!(Constraint::SameChipAs(VertexId(0)).fixed_keys(None), None);
    }

    #[test]
    fn test_fixed_keys_wide_mask_is_capped() {
        let constraint = Constraint::FixedKeyAndMask {
            keys_and_masks: vec![KeyAndMask::new(0, 0).unwrap()],
            key_list: None,
        };
        let keys = constraint.fixed_keys(None).unwrap();
        assert_eq!(keys.len(), MAX_LISTED_KEYS);
        assert_eq!(keys[..3], [0, 1, 2]);
        assert_eq!(constraint.fixed_keys(Some(5)).unwrap().len(), 5);
    }

    #[test]
    fn test_fixed_keys_injected_strategy() {
        let strategy = KeyListStrategy::new(|kms: &[KeyAndMask], _n: Option<usize>| {
            kms.iter().map(|km| km.key() + 1).collect()
        });
        let constraint = Constraint::FixedKeyAndMask {
            keys_and_masks: vec![KeyAndMask::new(0x30, 0xFFFF_FFF0).unwrap()],
            key_list: Some(strategy.clone()),
        };
        assert_eq!(constraint.fixed_keys(None), Some(vec![0x31]));
        assert_eq!(constraint.kind(), ConstraintKind::FixedKeyAndMask);
        assert!(constraint.kind().is_key_allocator());
        assert_eq!(
            constraint,
            Constraint::FixedKeyAndMask {
                keys_and_masks: vec![KeyAndMask::new(0x30, 0xFFFF_FFF0).unwrap()],
                key_list: Some(strategy),
            }
        );
    }

    #[test]
    fn test_graph_constraints() {
        let mut graph = MachineGraph::new();
        let a = graph.add_vertex("a", "worker", ResourceRequirement::with_sdram(100));
        let b = graph.add_vertex("b", "worker", ResourceRequirement::default());
        graph.add_constraint(b, Constraint::SameChipAs(a)).unwrap();
        assert_eq!(graph.n_vertices(), 2);
        assert_eq!(graph.vertex(b).unwrap().constraints.len(), 1);
        assert!(graph
            .add_constraint(VertexId(7), Constraint::SameChipAs(a))
            .is_err());
    }

    #[test]
    fn test_requirement_extend() {
        let a = ResourceRequirement {
            sdram: 10,
            tags: 1,
            router_entries: 3,
        };
        let b = ResourceRequirement::with_sdram(5);
        assert_eq!(
            a.extend(&b).unwrap(),
            ResourceRequirement {
                sdram: 15,
                tags: 1,
                router_entries: 3
            }
        );

        let wide = ResourceRequirement {
            tags: u32::MAX,
            ..ResourceRequirement::default()
        };
        assert!(matches!(wide.extend(&a), Err(MeshMapError::Place(_))));
        assert!(ResourceRequirement::with_sdram(u64::MAX)
            .extend(&b)
            .is_err());
    }
}
