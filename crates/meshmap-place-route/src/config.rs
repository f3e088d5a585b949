//! Job file parsing
//!
//! A job file is TOML describing the machine, the graph to place and any
//! routing tables to compress:
//!
//! ```toml
//! [machine]
//! width = 8
//! height = 8
//! board_width = 4
//! board_height = 4
//! dead_links = [{ x = 1, y = 0, link = "west" }]
//!
//! [[vertices]]
//! label = "gatherer"
//! kind = "gatherer"
//! sdram = 1048576
//! constraints = [{ type = "fixed_chip", x = 0, y = 0 }]
//!
//! [[routing_tables]]
//! x = 0
//! y = 0
//! entries = [{ key = 4, mask = 0xFFFFFFFE, links = ["east"] }]
//! ```

use crate::error::{MeshMapError, Result};
use crate::graph::{Constraint, KeyAndMask, MachineGraph, ResourceRequirement, VertexId};
use crate::machine::{ChipCoord, Direction, Machine, VirtualChipSpec};
use crate::router::{MulticastRoutingEntry, MulticastRoutingTable, MulticastRoutingTables};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Complete job description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Machine to map onto
    pub machine: MachineConfig,

    /// Vertices to place
    #[serde(default)]
    pub vertices: Vec<VertexConfig>,

    /// Routing tables to compress
    #[serde(default)]
    pub routing_tables: Vec<RoutingTableConfig>,
}

/// Machine shape and per-chip resources
///
/// Anything left out takes the machine builder's default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    pub width: u32,
    pub height: u32,

    #[serde(default)]
    pub board_width: Option<u32>,
    #[serde(default)]
    pub board_height: Option<u32>,

    #[serde(default)]
    pub cores_per_chip: Option<u32>,
    #[serde(default)]
    pub monitors_per_chip: Option<u32>,
    #[serde(default)]
    pub sdram_per_chip: Option<u64>,
    #[serde(default)]
    pub router_entries: Option<u32>,
    #[serde(default)]
    pub tags_per_ethernet: Option<u32>,

    /// Boot chip as `[x, y]`
    #[serde(default)]
    pub boot: Option<[u32; 2]>,

    /// Missing chips as `[x, y]` pairs
    #[serde(default)]
    pub down_chips: Vec<[u32; 2]>,

    #[serde(default)]
    pub dead_links: Vec<DeadLinkConfig>,

    #[serde(default)]
    pub virtual_chips: Vec<VirtualChipSpec>,
}

/// A single dead outgoing link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLinkConfig {
    pub x: u32,
    pub y: u32,
    pub link: Direction,
}

/// A vertex and what it needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexConfig {
    /// Unique name, also used by constraints to refer to the vertex
    pub label: String,

    /// What the vertex is
    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(flatten)]
    pub resources: ResourceRequirement,

    #[serde(default)]
    pub constraints: Vec<ConstraintConfig>,
}

fn default_kind() -> String {
    "vertex".to_string()
}

/// Constraint as written in a job file; vertices are named by label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintConfig {
    FixedChip {
        x: u32,
        y: u32,
        #[serde(default)]
        core: Option<u32>,
    },
    SameChipAs {
        vertex: String,
    },
    RadialStart {
        x: u32,
        y: u32,
    },
    SameAtomsAs {
        vertex: String,
    },
    FixedKeyAndMask {
        keys_and_masks: Vec<KeyMaskConfig>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaskConfig {
    pub key: u32,
    pub mask: u32,
}

/// Routing table of one chip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTableConfig {
    pub x: u32,
    pub y: u32,
    #[serde(default)]
    pub entries: Vec<MulticastRoutingEntry>,
}

/// Parse a job from a file path
pub fn from_path(path: impl AsRef<Path>) -> Result<JobConfig> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    from_str(&contents)
}

/// Parse a job from a string
pub fn from_str(s: &str) -> Result<JobConfig> {
    toml::from_str(s).map_err(|e| MeshMapError::ConfigParse(e.to_string()))
}

impl JobConfig {
    /// Build the machine described by `[machine]`
    pub fn build_machine(&self) -> Result<Machine> {
        let m = &self.machine;
        let mut builder = Machine::builder(m.width, m.height);

        if m.board_width.is_some() || m.board_height.is_some() {
            builder = builder.board_size(
                m.board_width.unwrap_or(m.width),
                m.board_height.unwrap_or(m.height),
            );
        }
        if let Some(cores) = m.cores_per_chip {
            builder = builder.cores_per_chip(cores);
        }
        if let Some(monitors) = m.monitors_per_chip {
            builder = builder.monitors_per_chip(monitors);
        }
        if let Some(sdram) = m.sdram_per_chip {
            builder = builder.sdram_per_chip(sdram);
        }
        if let Some(entries) = m.router_entries {
            builder = builder.router_entries(entries);
        }
        if let Some(tags) = m.tags_per_ethernet {
            builder = builder.tags_per_ethernet(tags);
        }
        if let Some([x, y]) = m.boot {
            builder = builder.boot_chip(x, y);
        }
        for &[x, y] in &m.down_chips {
            builder = builder.down_chip(x, y);
        }
        for link in &m.dead_links {
            builder = builder.dead_link(link.x, link.y, link.link);
        }
        for spec in &m.virtual_chips {
            builder = builder.virtual_chip(spec.clone());
        }

        builder.build()
    }

    /// Build the graph described by `[[vertices]]`
    ///
    /// Vertex ids follow file order. Labels must be unique.
    pub fn build_graph(&self) -> Result<MachineGraph> {
        let mut graph = MachineGraph::new();
        let mut by_label: HashMap<&str, VertexId> = HashMap::new();

        for vertex in &self.vertices {
            if by_label.contains_key(vertex.label.as_str()) {
                return Err(MeshMapError::already_exists("vertex", &vertex.label));
            }
            let id = graph.add_vertex(&vertex.label, &vertex.kind, vertex.resources);
            by_label.insert(&vertex.label, id);
        }

        let lookup = |label: &str| {
            by_label.get(label).copied().ok_or_else(|| {
                MeshMapError::Configuration(format!("Constraint refers to unknown vertex {}", label))
            })
        };

        for vertex in &self.vertices {
            let id = lookup(vertex.label.as_str())?;
            for constraint in &vertex.constraints {
                let constraint = match constraint {
                    ConstraintConfig::FixedChip { x, y, core } => Constraint::FixedChip {
                        x: *x,
                        y: *y,
                        core: *core,
                    },
                    ConstraintConfig::SameChipAs { vertex } => Constraint::SameChipAs(lookup(vertex.as_str())?),
                    ConstraintConfig::RadialStart { x, y } => Constraint::RadialStart { x: *x, y: *y },
                    ConstraintConfig::SameAtomsAs { vertex } => {
                        Constraint::SameAtomsAs(lookup(vertex.as_str())?)
                    }
                    ConstraintConfig::FixedKeyAndMask { keys_and_masks } => {
                        Constraint::FixedKeyAndMask {
                            keys_and_masks: keys_and_masks
                                .iter()
                                .map(|km| KeyAndMask::new(km.key, km.mask))
                                .collect::<Result<_>>()?,
                            key_list: None,
                        }
                    }
                };
                graph.add_constraint(id, constraint)?;
            }
        }

        Ok(graph)
    }

    /// Routing tables described by `[[routing_tables]]`
    pub fn routing_tables(&self) -> Result<MulticastRoutingTables> {
        let mut tables = MulticastRoutingTables::new();
        for table in &self.routing_tables {
            tables.add_table(MulticastRoutingTable::with_entries(
                ChipCoord::new(table.x, table.y),
                table.entries.iter().cloned(),
            )?)?;
        }
        Ok(tables)
    }
}
