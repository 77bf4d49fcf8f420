use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use butterfly_io::{hierarchy, DirTileStore};
use butterfly_routing::shortcut::{find_shortcuts, verify_level};
use butterfly_routing::{contract, Config, GraphReader};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_reader(config: &Config) -> Result<GraphReader> {
    if config.reader.tile_dir.is_none() {
        bail!("no tile directory: pass --tiles or set reader.tile_dir in the config file");
    }
    GraphReader::from_config(&config.reader).context("opening tile directory")
}

fn check_level(level: u8) -> Result<()> {
    if hierarchy::level(level).is_none() {
        bail!("level {level} is not in the hierarchy (0..={})", hierarchy::LEVELS.len() - 1);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<bool> {
    let config = cli.resolve_config()?;

    match cli.command {
        Commands::Contract { level, .. } => {
            check_level(level)?;
            let Some(dir) = config.reader.tile_dir.as_ref() else {
                bail!("no tile directory: pass --tiles or set reader.tile_dir in the config file");
            };
            let store = DirTileStore::new(dir);
            let start = Instant::now();
            let stats = contract(&store, level, &config.contract)
                .with_context(|| format!("contracting level {level} in {}", dir.display()))?;
            info!(elapsed_s = start.elapsed().as_secs_f64(), "contraction finished");
            println!(
                "Level {level}: {} tiles, {} nodes, {} edges",
                stats.tiles, stats.nodes, stats.original_edges
            );
            println!(
                "  {} chains -> {} shortcuts covering {} edges ({} loops skipped, {} old shortcuts removed)",
                stats.chains,
                stats.shortcuts,
                stats.contracted_edges,
                stats.loops_skipped,
                stats.removed_shortcuts
            );
        }
        Commands::Recover { id } => {
            let reader = open_reader(&config)?;
            let shortcut = reader.directed_edge(id)?;
            let edges = reader
                .recover_shortcut(id)
                .with_context(|| format!("recovering shortcut {id}"))?;
            println!(
                "{id}: {} m, {} kph (truck {} kph), {} edges",
                shortcut.length_m,
                shortcut.speed,
                shortcut.effective_truck_speed(),
                edges.len()
            );
            for edge_id in edges {
                let edge = reader.directed_edge(edge_id)?;
                println!(
                    "  {edge_id} -> {}: {} m, {} kph, {}",
                    edge.end_node,
                    edge.length_m,
                    edge.speed,
                    edge.road_class.name()
                );
            }
        }
        Commands::Shortcuts { level, mode, expand } => {
            check_level(level)?;
            let reader = open_reader(&config)?;
            let shortcuts = find_shortcuts(&reader, level, mode.mask())?;
            for &id in &shortcuts {
                let edge = reader.directed_edge(id)?;
                println!("{id} -> {} {} m {} kph", edge.end_node, edge.length_m, edge.speed);
                if expand {
                    let edges = reader.recover_shortcut(id)?;
                    let listed: Vec<String> = edges.iter().map(|e| e.to_string()).collect();
                    println!("  {}", listed.join(" "));
                }
            }
            println!("{} shortcuts on level {level}", shortcuts.len());
        }
        Commands::Info { tile } => {
            let reader = open_reader(&config)?;
            let t = reader
                .get_tile(tile)
                .with_context(|| format!("loading tile {}", tile.tile_base()))?;
            let header = t.header();
            let b = header.bounds;
            println!("Tile {} (version {})", t.id(), header.version);
            println!(
                "  bounds: {:.4},{:.4} .. {:.4},{:.4}",
                b.min_lat, b.min_lon, b.max_lat, b.max_lon
            );
            println!("  nodes: {}", header.node_count);
            println!("  edges: {}", header.edge_count);
            println!("  shortcuts: {}", header.shortcut_count);
            let mapped = if t.is_mapped() { " (mapped)" } else { "" };
            println!("  size: {} bytes{mapped}", t.size_bytes());
        }
        Commands::Verify { level } => {
            check_level(level)?;
            let reader = open_reader(&config)?;
            let report = verify_level(&reader, level)?;
            println!(
                "Level {level}: {} tiles, {} shortcuts, {} constituent edges",
                report.tiles, report.shortcuts, report.constituents
            );
            for (id, reason) in &report.failures {
                println!("  FAIL {id}: {reason}");
            }
            for id in &report.speed_violations {
                println!("  SPEED {id}: aggregate not below its constituents");
            }
            let stats = reader.stats();
            info!(
                hits = stats.hits,
                misses = stats.misses,
                evictions = stats.evictions,
                "cache"
            );
            return Ok(report.is_ok());
        }
    }
    Ok(true)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}
