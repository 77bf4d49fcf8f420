//! End-to-end runs of the butterfly-tiles binary over a small tile tree

use std::path::Path;
use std::process::{Command, Output};

use butterfly_common::GraphId;
use butterfly_io::{hierarchy, DirTileStore, DirectedEdge, Node, RoadClass, TileBuilder, TileSink};
use tempfile::TempDir;

/// Three nodes on a tertiary road in one level-2 tile, 0 <-> 1 <-> 2
fn write_line(root: &Path) -> GraphId {
    let local = hierarchy::level(2).unwrap();
    let tile = local.tile_id(48.85, 2.35).unwrap();
    let road = |to| DirectedEdge::new(tile.with_index(to), 400, 50, RoadClass::Tertiary);

    let mut b = TileBuilder::new(tile, local.tile_bounds(tile.tile_index()));
    b.add_node(Node::new(48.851, 2.351), &[road(1)]).unwrap();
    b.add_node(Node::new(48.852, 2.351).with_turn_delay_ds(20), &[road(0), road(2)])
        .unwrap();
    b.add_node(Node::new(48.853, 2.351), &[road(1)]).unwrap();

    DirTileStore::new(root).write(tile, &b.encode().unwrap()).unwrap();
    tile
}

fn run(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_butterfly-tiles"))
        .arg("--tiles")
        .arg(root)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to spawn butterfly-tiles")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_contract_then_inspect() {
    let dir = TempDir::new().unwrap();
    let tile = write_line(dir.path());

    let out = run(dir.path(), &["contract", "--level", "2"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains("2 shortcuts"), "{}", stdout(&out));

    let out = run(dir.path(), &["verify", "--level", "2"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("2 shortcuts, 4 constituent edges"));

    let out = run(dir.path(), &["shortcuts", "--level", "2", "--expand"]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("2 shortcuts on level 2"), "{text}");
    let first_edge = tile.with_index(0).to_string();
    assert!(text.contains(&first_edge), "{text}");

    // Shortcuts follow the four original edges
    let shortcut = tile.with_index(4).to_string();
    let out = run(dir.path(), &["recover", &shortcut]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("2 edges"));

    let out = run(dir.path(), &["info", &tile.to_string()]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("nodes: 3"), "{text}");
    assert!(text.contains("edges: 6"), "{text}");
}

#[test]
fn test_recover_plain_edge_fails() {
    let dir = TempDir::new().unwrap();
    let tile = write_line(dir.path());

    let out = run(dir.path(), &["recover", &tile.with_index(1).to_string()]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not a shortcut"));
}

#[test]
fn test_missing_tile_directory() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");
    let out = run(&missing, &["verify", "--level", "2"]);
    assert_eq!(out.status.code(), Some(2));
}
