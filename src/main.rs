use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meshmap_place_route::config::{self, JobConfig};
use meshmap_place_route::machine::{ChipCoord, Direction};
use meshmap_place_route::mesh::{is_directly_reachable, least_turns, shortest_path_length};
use meshmap_place_route::router::MulticastRoutingEntry;
use meshmap_place_route::{FixedRouteBuilder, MallocBasedRouteMerger, RadialPlacer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// meshmap - map graphs onto mesh-connected multi-chip machines
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Place the vertices of a job onto its machine
    Place {
        /// Job file
        job: PathBuf,
    },

    /// Place a job, then build fixed routes to a vertex kind on every
    /// ethernet chip
    FixedRoute {
        /// Job file
        job: PathBuf,

        /// Kind of the vertex receiving the fixed-route traffic
        #[arg(short, long)]
        destination: String,
    },

    /// Compress the routing tables of a job
    Compress {
        /// Job file
        job: PathBuf,
    },

    /// Distance and reachability between two chips
    Distance {
        sx: u32,
        sy: u32,
        dx: u32,
        dy: u32,

        /// Job file whose machine is used for the reachability check
        #[arg(short, long)]
        job: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct PlacementRow {
    vertex: String,
    kind: String,
    x: u32,
    y: u32,
    core: u32,
}

#[derive(Serialize)]
struct FixedRouteRow {
    root: ChipCoord,
    chip: ChipCoord,
    links: Vec<Direction>,
    processors: Vec<u32>,
}

#[derive(Serialize)]
struct CompressedTable {
    x: u32,
    y: u32,
    original: usize,
    compressed: usize,
    entries: Vec<MulticastRoutingEntry>,
}

#[derive(Serialize)]
struct DistanceReport {
    source: ChipCoord,
    destination: ChipCoord,
    distance: u64,
    turns: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    directly_reachable: Option<bool>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Place { job } => {
            place(&job, cli.json)?;
        }

        Commands::FixedRoute { job, destination } => {
            fixed_route(&job, &destination, cli.json)?;
        }

        Commands::Compress { job } => {
            compress(&job, cli.json)?;
        }

        Commands::Distance { sx, sy, dx, dy, job } => {
            distance(
                ChipCoord::new(sx, sy),
                ChipCoord::new(dx, dy),
                job.as_deref(),
                cli.json,
            )?;
        }
    }

    Ok(())
}

fn load_job(path: &Path) -> Result<JobConfig> {
    info!("Loading job from {:?}", path);
    config::from_path(path).with_context(|| format!("Failed to load job file {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn place(path: &Path, json: bool) -> Result<()> {
    let job = load_job(path)?;
    let machine = job.build_machine().context("Invalid machine description")?;
    let graph = job.build_graph().context("Invalid vertex description")?;

    info!(
        "Placing {} vertices on {} chips",
        graph.n_vertices(),
        machine.n_chips()
    );
    let placements = RadialPlacer::new()
        .place(&graph, &machine)
        .context("Placement failed")?;

    let rows: Vec<PlacementRow> = placements
        .iter()
        .filter_map(|p| {
            let vertex = graph.vertex(p.vertex)?;
            Some(PlacementRow {
                vertex: vertex.label.clone(),
                kind: vertex.kind.clone(),
                x: p.chip.x,
                y: p.chip.y,
                core: p.core,
            })
        })
        .collect();

    if json {
        return print_json(&rows);
    }
    for row in &rows {
        println!("{} ({}) -> ({}, {}) core {}", row.vertex, row.kind, row.x, row.y, row.core);
    }
    println!("Placed {} vertices", rows.len());
    Ok(())
}

fn fixed_route(path: &Path, destination: &str, json: bool) -> Result<()> {
    let job = load_job(path)?;
    let machine = job.build_machine().context("Invalid machine description")?;
    let graph = job.build_graph().context("Invalid vertex description")?;

    let placements = RadialPlacer::new()
        .place(&graph, &machine)
        .context("Placement failed")?;
    let tables = FixedRouteBuilder::new()
        .build(&machine, &placements, &graph, destination)
        .context("Fixed routing failed")?;

    let rows: Vec<FixedRouteRow> = tables
        .regions()
        .flat_map(|(root, entries)| {
            entries.iter().map(move |(chip, entry)| FixedRouteRow {
                root: *root,
                chip: *chip,
                links: entry.links.iter().copied().collect(),
                processors: entry.processors.iter().copied().collect(),
            })
        })
        .collect();

    if json {
        return print_json(&rows);
    }
    for row in &rows {
        let links: Vec<String> = row.links.iter().map(|l| l.to_string()).collect();
        println!(
            "{} -> links [{}] processors {:?} (region {})",
            row.chip,
            links.join(", "),
            row.processors,
            row.root
        );
    }
    println!("Generated {} fixed route entries", rows.len());
    Ok(())
}

fn compress(path: &Path, json: bool) -> Result<()> {
    let job = load_job(path)?;
    let tables = job.routing_tables().context("Invalid routing tables")?;

    let compressed = MallocBasedRouteMerger::new()
        .compress_tables(&tables)
        .context("Compression failed")?;

    let report: Vec<CompressedTable> = compressed
        .iter()
        .map(|table| CompressedTable {
            x: table.chip.x,
            y: table.chip.y,
            original: tables.table(table.chip).map_or(0, |t| t.len()),
            compressed: table.len(),
            entries: table.entries().to_vec(),
        })
        .collect();

    if json {
        return print_json(&report);
    }
    for table in &report {
        println!(
            "({}, {}): {} -> {} entries",
            table.x, table.y, table.original, table.compressed
        );
        for entry in &table.entries {
            let links: Vec<String> = entry.links.iter().map(|l| l.to_string()).collect();
            println!(
                "  {:#010x}/{:#010x} links [{}] processors {:?}{}",
                entry.key,
                entry.mask,
                links.join(", "),
                entry.processors,
                if entry.defaultable { " (defaultable)" } else { "" }
            );
        }
    }
    Ok(())
}

fn distance(source: ChipCoord, destination: ChipCoord, job: Option<&Path>, json: bool) -> Result<()> {
    let directly_reachable = match job {
        Some(path) => {
            let machine = load_job(path)?
                .build_machine()
                .context("Invalid machine description")?;
            Some(is_directly_reachable(source, destination, &machine))
        }
        None => None,
    };

    let report = DistanceReport {
        source,
        destination,
        distance: shortest_path_length(source, destination),
        turns: least_turns(source, destination),
        directly_reachable,
    };

    if json {
        return print_json(&report);
    }
    println!(
        "{} -> {}: {} hops, {} turns",
        report.source, report.destination, report.distance, report.turns
    );
    if let Some(reachable) = report.directly_reachable {
        println!("Directly reachable: {}", if reachable { "yes" } else { "no" });
    }
    Ok(())
}
