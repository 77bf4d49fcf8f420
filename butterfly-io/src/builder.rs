//! Owned, mutable tile used while building
//!
//! Nodes are appended together with their original outbound edges, so each
//! node's edges stay contiguous. Shortcut edges go after every original edge
//! and are grouped by start node; adding or stripping shortcuts never moves
//! an original edge, so original-edge ids stay stable across contraction.

use butterfly_common::graph_id::MAX_ENTITY_INDEX;
use butterfly_common::{Error, GraphId, Result};

use crate::crc;
use crate::format::{
    DirectedEdge, Node, ShortcutEntry, TileBounds, TileHeader, EDGE_SIZE, HEADER_SIZE, NODE_SIZE,
    VERSION,
};
use crate::tile::GraphTile;

#[derive(Debug, Clone)]
pub struct TileBuilder {
    pub tile_id: GraphId,
    pub bounds: TileBounds,
    pub nodes: Vec<Node>,
    pub edges: Vec<DirectedEdge>,
    /// Sorted by shortcut edge index
    pub shortcuts: Vec<ShortcutEntry>,
}

fn check_capacity(what: &str, len: usize) -> Result<()> {
    if len > MAX_ENTITY_INDEX as usize {
        return Err(Error::ResourceExhausted(format!(
            "{what} count {len} exceeds the {MAX_ENTITY_INDEX} slots addressable in one tile"
        )));
    }
    Ok(())
}

impl TileBuilder {
    pub fn new(tile_id: GraphId, bounds: TileBounds) -> Self {
        Self {
            tile_id: tile_id.tile_base(),
            bounds,
            nodes: Vec::new(),
            edges: Vec::new(),
            shortcuts: Vec::new(),
        }
    }

    /// Copy a decoded tile back into builder form
    pub fn from_tile(tile: &GraphTile) -> Result<Self> {
        let header = tile.header();
        let nodes = (0..header.node_count)
            .map(|i| tile.node(i))
            .collect::<Result<Vec<_>>>()?;
        let edges = (0..header.edge_count)
            .map(|i| tile.directed_edge(i))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tile_id: header.tile_id,
            bounds: header.bounds,
            nodes,
            edges,
            shortcuts: tile.shortcut_entries().collect(),
        })
    }

    /// Id the next added node will get
    pub fn next_node_id(&self) -> GraphId {
        self.tile_id.with_index(self.nodes.len() as u32)
    }

    /// Append a node with its original outbound edges
    pub fn add_node(&mut self, node: Node, edges: &[DirectedEdge]) -> Result<GraphId> {
        if !self.shortcuts.is_empty() || self.edges.iter().any(|e| e.is_shortcut()) {
            return Err(Error::InvalidArgument(format!(
                "tile {} already holds shortcuts; strip them before adding nodes",
                self.tile_id
            )));
        }
        if edges.iter().any(|e| e.is_shortcut()) {
            return Err(Error::InvalidArgument(
                "original edges cannot be flagged as shortcuts".to_string(),
            ));
        }
        let edge_count = u16::try_from(edges.len()).map_err(|_| {
            Error::ResourceExhausted(format!("node has {} edges, max {}", edges.len(), u16::MAX))
        })?;
        check_capacity("node", self.nodes.len() + 1)?;
        check_capacity("edge", self.edges.len() + edges.len())?;

        let id = self.next_node_id();
        self.nodes.push(Node {
            edge_index: self.edges.len() as u32,
            edge_count,
            shortcut_index: 0,
            shortcut_count: 0,
            ..node
        });
        self.edges.extend_from_slice(edges);
        Ok(id)
    }

    /// Number of original (non-shortcut) edges
    pub fn original_edge_count(&self) -> usize {
        self.edges.iter().take_while(|e| !e.is_shortcut()).count()
    }

    /// Remove every shortcut edge and table entry
    pub fn strip_shortcuts(&mut self) -> Result<usize> {
        let originals = self.original_edge_count();
        if self.edges[originals..].iter().any(|e| !e.is_shortcut()) {
            return Err(Error::format(format!(
                "tile {} has original edges after its shortcut block",
                self.tile_id
            )));
        }

        let removed = self.edges.len() - originals;
        self.edges.truncate(originals);
        self.shortcuts.clear();
        for node in &mut self.nodes {
            node.shortcut_index = 0;
            node.shortcut_count = 0;
        }
        Ok(removed)
    }

    /// Append all shortcuts leaving `node_index`. Each shortcut is its
    /// edge record plus the table entry; the entry's `shortcut` field is
    /// filled in here. Returns the new shortcut ids.
    pub fn add_shortcuts(
        &mut self,
        node_index: u32,
        shortcuts: Vec<(DirectedEdge, ShortcutEntry)>,
    ) -> Result<Vec<GraphId>> {
        if shortcuts.is_empty() {
            return Ok(Vec::new());
        }

        let tile_id = self.tile_id;
        let node = self.nodes.get(node_index as usize).ok_or_else(|| {
            Error::InvalidArgument(format!("node {node_index} not in tile {tile_id}"))
        })?;
        if node.shortcut_count > 0 {
            return Err(Error::InvalidArgument(format!(
                "node {node_index} in tile {tile_id} already has shortcuts"
            )));
        }
        let count = u16::try_from(shortcuts.len()).map_err(|_| {
            Error::ResourceExhausted(format!("{} shortcuts from one node", shortcuts.len()))
        })?;
        check_capacity("edge", self.edges.len() + shortcuts.len())?;

        let first = self.edges.len() as u32;
        let mut ids = Vec::with_capacity(shortcuts.len());
        for (i, (mut edge, mut entry)) in shortcuts.into_iter().enumerate() {
            let id = tile_id.with_index(first + i as u32);
            edge.set_shortcut(true);
            entry.shortcut = id;
            self.edges.push(edge);
            self.shortcuts.push(entry);
            ids.push(id);
        }

        let node = &mut self.nodes[node_index as usize];
        node.shortcut_index = first;
        node.shortcut_count = count;
        Ok(ids)
    }

    /// Serialize to the tile binary layout
    pub fn encode(&self) -> Result<Vec<u8>> {
        check_capacity("node", self.nodes.len())?;
        check_capacity("edge", self.edges.len())?;

        let node_offset = HEADER_SIZE;
        let edge_offset = node_offset + self.nodes.len() * NODE_SIZE;
        let shortcut_offset = edge_offset + self.edges.len() * EDGE_SIZE;
        let table_len: usize = self.shortcuts.iter().map(|s| s.encoded_len()).sum();
        let total = shortcut_offset + table_len;
        let total_size = u32::try_from(total).map_err(|_| {
            Error::ResourceExhausted(format!("tile {} would be {total} bytes", self.tile_id))
        })?;

        let header = TileHeader {
            version: VERSION,
            tile_id: self.tile_id,
            bounds: self.bounds,
            node_count: self.nodes.len() as u32,
            edge_count: self.edges.len() as u32,
            shortcut_count: self.shortcuts.len() as u32,
            node_offset: node_offset as u32,
            edge_offset: edge_offset as u32,
            shortcut_offset: shortcut_offset as u32,
            total_size,
            body_crc64: 0,
        };

        let mut bytes = header.to_bytes();
        bytes.reserve(total - HEADER_SIZE);
        for node in &self.nodes {
            node.write_to(&mut bytes);
        }
        for edge in &self.edges {
            edge.write_to(&mut bytes);
        }
        let mut sorted: Vec<&ShortcutEntry> = self.shortcuts.iter().collect();
        sorted.sort_by_key(|s| s.shortcut);
        for entry in sorted {
            entry.write_to(&mut bytes);
        }
        crc::seal(&mut bytes);
        Ok(bytes)
    }
}
