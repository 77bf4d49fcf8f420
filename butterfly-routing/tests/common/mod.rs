//! Small road-network builder shared by the integration tests
//!
//! Nodes are placed by coordinate; the tile follows from the level grid.
//! Roads are added as pairs of opposing directed edges, then `build` lays
//! everything out into tiles and remembers which id each edge got.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use butterfly_common::GraphId;
use butterfly_io::{
    access, hierarchy, DirectedEdge, MemTileStore, Node, RoadClass, TileBuilder, TileSink,
};

pub struct Fixture {
    level: u8,
    nodes: Vec<(u8, u32, Node)>,
    out: Vec<Vec<(usize, DirectedEdge)>>,
}

pub struct Built {
    pub store: MemTileStore,
    pub ids: Vec<GraphId>,
    edges: HashMap<(usize, usize), GraphId>,
}

impl Built {
    pub fn node(&self, n: usize) -> GraphId {
        self.ids[n]
    }

    /// Edge from `a` to `b`
    pub fn edge(&self, a: usize, b: usize) -> GraphId {
        self.edges[&(a, b)]
    }

    pub fn tiles(&self) -> Vec<GraphId> {
        let mut tiles: Vec<GraphId> = self.ids.iter().map(|id| id.tile_base()).collect();
        tiles.sort();
        tiles.dedup();
        tiles
    }
}

pub fn road(length_m: u32, speed: u8, class: RoadClass) -> DirectedEdge {
    DirectedEdge::new(GraphId::INVALID, length_m, speed, class)
}

impl Fixture {
    pub fn new(level: u8) -> Self {
        Self {
            level,
            nodes: Vec::new(),
            out: Vec::new(),
        }
    }

    pub fn node(&mut self, lat: f64, lon: f64) -> usize {
        self.node_on(self.level, lat, lon, 0)
    }

    pub fn node_with_delay(&mut self, lat: f64, lon: f64, delay_ds: u16) -> usize {
        self.node_on(self.level, lat, lon, delay_ds)
    }

    pub fn node_on(&mut self, level: u8, lat: f64, lon: f64, delay_ds: u16) -> usize {
        let tile = hierarchy::level(level)
            .and_then(|l| l.tile_index(lat, lon))
            .expect("coordinate inside the level grid");
        self.nodes
            .push((level, tile, Node::new(lat, lon).with_turn_delay_ds(delay_ds)));
        self.out.push(Vec::new());
        self.nodes.len() - 1
    }

    /// Road usable both ways, same attributes in each direction
    pub fn two_way(&mut self, a: usize, b: usize, template: DirectedEdge) -> &mut Self {
        let both = template.with_access(access::ALL, access::ALL);
        self.out[a].push((b, both));
        self.out[b].push((a, both));
        self
    }

    /// Road usable from `a` to `b` only
    pub fn one_way(&mut self, a: usize, b: usize, template: DirectedEdge) -> &mut Self {
        self.out[a].push((b, template.with_access(access::ALL, access::NONE)));
        self.out[b].push((a, template.with_access(access::NONE, access::ALL)));
        self
    }

    /// Chain of two-way roads through `path`
    pub fn path(&mut self, path: &[usize], template: DirectedEdge) -> &mut Self {
        for pair in path.windows(2) {
            self.two_way(pair[0], pair[1], template);
        }
        self
    }

    pub fn build(&self) -> Built {
        // Node ids: insertion order within each tile
        let mut per_tile: BTreeMap<(u8, u32), Vec<usize>> = BTreeMap::new();
        let mut ids = vec![GraphId::INVALID; self.nodes.len()];
        for (n, (level, tile, _)) in self.nodes.iter().enumerate() {
            let members = per_tile.entry((*level, *tile)).or_default();
            ids[n] = GraphId::new(*level, *tile, members.len() as u32);
            members.push(n);
        }

        let store = MemTileStore::new();
        let mut edges = HashMap::new();
        for ((level, tile), members) in &per_tile {
            let base = GraphId::new(*level, *tile, 0);
            let bounds = hierarchy::level(*level).unwrap().tile_bounds(*tile);
            let mut builder = TileBuilder::new(base, bounds);
            for &n in members {
                let first = builder.edges.len() as u32;
                let out: Vec<DirectedEdge> = self.out[n]
                    .iter()
                    .enumerate()
                    .map(|(k, (to, e))| {
                        edges.insert((n, *to), base.with_index(first + k as u32));
                        DirectedEdge {
                            end_node: ids[*to],
                            ..*e
                        }
                    })
                    .collect();
                builder.add_node(self.nodes[n].2, &out).unwrap();
            }
            store.write(base, &builder.encode().unwrap()).unwrap();
        }

        Built { store, ids, edges }
    }
}
