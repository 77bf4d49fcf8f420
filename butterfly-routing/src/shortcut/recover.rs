//! Shortcut recovery: expand a shortcut into the original edges it replaced
//!
//! Recovery is a table lookup in the shortcut's own tile followed by a walk
//! over the stored edges to confirm they still form the chain the shortcut
//! claims to cover.

use std::sync::Arc;

use butterfly_common::{Error, GraphId, Result};
use butterfly_io::{DirectedEdge, GraphTile};
use tracing::trace;

use crate::reader::GraphReader;

impl GraphReader {
    /// Ordered original edges replaced by `shortcut`
    pub fn recover_shortcut(&self, shortcut: GraphId) -> Result<Vec<GraphId>> {
        recover(self, shortcut)
    }
}

/// See [`GraphReader::recover_shortcut`]
pub fn recover(reader: &GraphReader, shortcut: GraphId) -> Result<Vec<GraphId>> {
    let tile = reader.get_tile(shortcut)?;
    let edge = tile.directed_edge(shortcut.index())?;
    if !edge.is_shortcut() {
        return Err(Error::InvalidArgument(format!(
            "edge {shortcut} is not a shortcut"
        )));
    }
    let entry = tile
        .shortcut_entry(shortcut)
        .ok_or_else(|| Error::format(format!("shortcut {shortcut} has no table entry")))?;
    if entry.edges.len() < 2 {
        return Err(Error::format(format!(
            "shortcut {shortcut} lists {} edges",
            entry.edges.len()
        )));
    }

    let mut at = tile.id().with_index(tile.edge_start_node(shortcut.index())?);
    for &id in &entry.edges {
        if id == shortcut {
            return Err(Error::format(format!("shortcut {shortcut} contains itself")));
        }
        let (start, original) = constituent(reader, &tile, shortcut, id)?;
        if original.is_shortcut() {
            return Err(Error::format(format!(
                "shortcut {shortcut} is built from shortcut {id}"
            )));
        }
        if start != at {
            return Err(Error::format(format!(
                "shortcut {shortcut} breaks at {id}: starts at {start}, expected {at}"
            )));
        }
        at = original.end_node;
    }
    if at != edge.end_node {
        return Err(Error::format(format!(
            "shortcut {shortcut} ends at {}, its edges end at {at}",
            edge.end_node
        )));
    }

    trace!(shortcut = %shortcut, edges = entry.edges.len(), "recovered shortcut");
    Ok(entry.edges)
}

/// Start node and record of one listed edge. Problems locating it are the
/// shortcut's fault, so they surface as format errors.
fn constituent(
    reader: &GraphReader,
    home: &Arc<GraphTile>,
    shortcut: GraphId,
    id: GraphId,
) -> Result<(GraphId, DirectedEdge)> {
    let dangling = |e: Error| match e {
        Error::NotFound(_) | Error::InvalidArgument(_) => Error::format(format!(
            "shortcut {shortcut} references missing edge {id}: {e}"
        )),
        other => other,
    };

    let tile = if id.is_valid() && id.same_tile(home.id()) {
        Arc::clone(home)
    } else {
        reader.get_tile(id).map_err(dangling)?
    };
    let edge = tile.directed_edge(id.index()).map_err(dangling)?;
    let start = tile.id().with_index(tile.edge_start_node(id.index())?);
    Ok((start, edge))
}

/// Shortcuts leaving nodes at `level` that any mode in `access_mask` may use
///
/// Walks every tile of the level, trimming the cache whenever it goes over
/// budget, so a whole level can be scanned under a small budget.
pub fn find_shortcuts(reader: &GraphReader, level: u8, access_mask: u16) -> Result<Vec<GraphId>> {
    let mut found = Vec::new();
    for tile_id in reader.tile_set(level)? {
        let tile = reader.get_tile(tile_id)?;
        for n in 0..tile.node_count() {
            for (id, edge) in tile.node_shortcuts(n)? {
                if edge.allows(access_mask) {
                    found.push(id);
                }
            }
        }
        drop(tile);
        if reader.is_over_committed() {
            reader.trim();
        }
    }
    Ok(found)
}

/// Result of checking every shortcut on a level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub tiles: usize,
    pub shortcuts: usize,
    pub constituents: usize,
    /// Shortcuts faster than one of their constituents despite a delay
    pub speed_violations: Vec<GraphId>,
    /// Shortcuts that failed recovery, with the reason
    pub failures: Vec<(GraphId, String)>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.speed_violations.is_empty() && self.failures.is_empty()
    }
}

/// Free-flow time and speed comparison for one speed class of a chain
#[derive(Debug, Default)]
struct ClassCheck {
    free_flow_ds: f64,
    not_slower: bool,
}

impl ClassCheck {
    fn add(&mut self, length_m: u32, speed: u8, aggregate: u8) {
        self.free_flow_ds += f64::from(length_m) * 36.0 / f64::from(speed.max(1));
        self.not_slower |= speed <= aggregate;
    }

    /// Stored time above free flow means the chain carries a delay, and then
    /// the aggregate must be below every constituent
    fn violated(&self, stored_ds: u32) -> bool {
        f64::from(stored_ds) > self.free_flow_ds + 0.5 && self.not_slower
    }
}

/// Recover every shortcut on `level` and check its aggregate speed in both
/// speed classes
pub fn verify_level(reader: &GraphReader, level: u8) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();
    for tile_id in reader.tile_set(level)? {
        report.tiles += 1;
        let tile = reader.get_tile(tile_id)?;
        let shortcuts: Vec<GraphId> = tile.shortcut_entries().map(|e| e.shortcut).collect();

        for id in shortcuts {
            report.shortcuts += 1;
            let edges = match recover(reader, id) {
                Ok(edges) => edges,
                Err(e) => {
                    report.failures.push((id, e.to_string()));
                    continue;
                }
            };
            report.constituents += edges.len();

            let shortcut = tile.directed_edge(id.index())?;
            let entry = tile
                .shortcut_entry(id)
                .ok_or_else(|| Error::format(format!("shortcut {id} lost its entry")))?;
            let mut base = ClassCheck::default();
            let mut truck = ClassCheck::default();
            for &e in &edges {
                let original = reader.directed_edge(e)?;
                base.add(original.length_m, original.speed, shortcut.speed);
                truck.add(
                    original.length_m,
                    original.effective_truck_speed(),
                    shortcut.effective_truck_speed(),
                );
            }
            if base.violated(entry.time_ds) || truck.violated(entry.truck_time_ds) {
                report.speed_violations.push(id);
            }
        }
        drop(tile);
        if reader.is_over_committed() {
            reader.trim();
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContractConfig, ReaderConfig};
    use crate::shortcut::contract;
    use butterfly_io::{
        MemTileStore, Node, RoadClass, ShortcutEntry, TileBounds, TileBuilder, TileSink,
    };

    fn tile_id() -> GraphId {
        GraphId::new(2, 500, 0)
    }

    /// 0 <-> 1 <-> 2, edges 0:0->1, 1:1->0, 2:1->2, 3:2->1
    fn line() -> TileBuilder {
        let t = tile_id();
        let road = |to| DirectedEdge::new(t.with_index(to), 400, 60, RoadClass::Tertiary);
        let mut b = TileBuilder::new(t, TileBounds::new(0.0, 0.0, 0.25, 0.25));
        b.add_node(Node::new(0.01, 0.01), &[road(1)]).unwrap();
        b.add_node(Node::new(0.02, 0.01).with_turn_delay_ds(15), &[road(0), road(2)])
            .unwrap();
        b.add_node(Node::new(0.03, 0.01), &[road(1)]).unwrap();
        b
    }

    fn reader_over(store: MemTileStore) -> GraphReader {
        GraphReader::new(store, &ReaderConfig::default()).unwrap()
    }

    /// Store holding `line()` with one hand-made shortcut from node 0
    fn with_entry(end: u32, edges: Vec<GraphId>) -> GraphReader {
        let sc = DirectedEdge::new(tile_id().with_index(end), 800, 55, RoadClass::Tertiary);
        with_shortcut(sc, 495, 495, edges)
    }

    fn with_shortcut(
        sc: DirectedEdge,
        time_ds: u32,
        truck_time_ds: u32,
        edges: Vec<GraphId>,
    ) -> GraphReader {
        let t = tile_id();
        let mut b = line();
        let entry = ShortcutEntry {
            shortcut: GraphId::INVALID,
            time_ds,
            truck_time_ds,
            edges,
        };
        b.add_shortcuts(0, vec![(sc, entry)]).unwrap();
        let store = MemTileStore::new();
        store.write(t, &b.encode().unwrap()).unwrap();
        reader_over(store)
    }

    #[test]
    fn test_recover_after_contract() {
        let store = MemTileStore::new();
        store.write(tile_id(), &line().encode().unwrap()).unwrap();
        contract(&store, 2, &ContractConfig::default()).unwrap();

        let reader = reader_over(store);
        let t = tile_id();
        // Shortcuts follow the four original edges
        assert_eq!(reader.recover_shortcut(t.with_index(4)).unwrap(), vec![t.with_index(0), t.with_index(2)]);
        assert_eq!(reader.recover_shortcut(t.with_index(5)).unwrap(), vec![t.with_index(3), t.with_index(1)]);

        let report = verify_level(&reader, 2).unwrap();
        assert!(report.is_ok(), "{report:?}");
        assert_eq!((report.shortcuts, report.constituents), (2, 4));
        assert_eq!(find_shortcuts(&reader, 2, butterfly_io::access::AUTO).unwrap().len(), 2);
    }

    #[test]
    fn test_recover_rejects_plain_edge() {
        let reader = with_entry(2, vec![tile_id().with_index(0), tile_id().with_index(2)]);
        assert!(matches!(
            reader.recover_shortcut(tile_id().with_index(1)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            reader.recover_shortcut(tile_id().with_index(99)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_recover_missing_tile() {
        let reader = reader_over(MemTileStore::new());
        assert!(reader.recover_shortcut(tile_id()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_recover_rejects_bad_entries() {
        let t = tile_id();
        let cases = [
            // too short
            (2, vec![t.with_index(0)]),
            // disconnected
            (2, vec![t.with_index(0), t.with_index(3)]),
            // wrong end node
            (1, vec![t.with_index(0), t.with_index(2)]),
            // contains itself
            (2, vec![t.with_index(0), t.with_index(4)]),
            // dangling edge in a missing tile
            (2, vec![t.with_index(0), GraphId::new(2, 501, 0)]),
        ];
        for (end, edges) in cases {
            let reader = with_entry(end, edges.clone());
            let err = reader.recover_shortcut(t.with_index(4)).unwrap_err();
            assert!(err.is_format(), "{edges:?}: {err}");
        }
    }

    /// 0 -> 2 over edges 0 and 2: 800 m at 60 kph is 480 ds free flow
    fn over_line(speed: u8, truck_speed: u8, time_ds: u32, truck_time_ds: u32) -> GraphReader {
        let t = tile_id();
        let sc = DirectedEdge::new(t.with_index(2), 800, speed, RoadClass::Tertiary)
            .with_truck_speed(truck_speed);
        with_shortcut(sc, time_ds, truck_time_ds, vec![t.with_index(0), t.with_index(2)])
    }

    #[test]
    fn test_verify_accepts_slower_aggregates() {
        let report = verify_level(&over_line(55, 55, 495, 495), 2).unwrap();
        assert!(report.is_ok(), "{report:?}");
        assert_eq!((report.shortcuts, report.constituents), (1, 2));
    }

    #[test]
    fn test_verify_flags_fast_base_aggregate() {
        let report = verify_level(&over_line(60, 55, 600, 600), 2).unwrap();
        assert_eq!(report.speed_violations, vec![tile_id().with_index(4)]);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_verify_flags_fast_truck_aggregate() {
        let report = verify_level(&over_line(55, 90, 600, 600), 2).unwrap();
        assert_eq!(report.speed_violations, vec![tile_id().with_index(4)]);
        assert!(!report.is_ok());
    }

    #[test]
    fn test_verify_ignores_undelayed_class() {
        // Truck time at free flow: matching the constituents is fine
        let report = verify_level(&over_line(55, 60, 600, 480), 2).unwrap();
        assert!(report.is_ok(), "{report:?}");
    }
}
