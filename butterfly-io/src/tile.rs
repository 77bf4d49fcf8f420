//! Read-only view over one decoded tile
//!
//! `GraphTile::decode` validates the layout once; accessors then read
//! records straight out of the byte buffer, which may be owned or
//! memory-mapped.

use std::fmt;
use std::ops::Deref;

use butterfly_common::graph_id::MAX_ENTITY_INDEX;
use butterfly_common::{Error, GraphId, Result};
use memmap2::Mmap;

use crate::crc;
use crate::format::{
    read_u32, read_u64, DirectedEdge, Node, ShortcutEntry, TileHeader, EDGE_SIZE, HEADER_SIZE,
    NODE_SIZE, SHORTCUT_ENTRY_HEADER_SIZE, SHORTCUT_ID_SIZE,
};

/// Raw tile bytes as handed over by a backing store
pub enum TileBuffer {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for TileBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            TileBuffer::Owned(bytes) => bytes,
            TileBuffer::Mapped(map) => map,
        }
    }
}

impl From<Vec<u8>> for TileBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        TileBuffer::Owned(bytes)
    }
}

impl fmt::Debug for TileBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TileBuffer::Owned(_) => "owned",
            TileBuffer::Mapped(_) => "mapped",
        };
        write!(f, "TileBuffer({kind}, {} bytes)", self.len())
    }
}

/// Location of one shortcut table entry inside the buffer
#[derive(Debug, Clone, Copy)]
struct EntryRef {
    edge_index: u32,
    offset: usize,
    count: u32,
}

/// Block of shortcut edges leaving one node
#[derive(Debug, Clone, Copy)]
struct ShortcutRun {
    first: u32,
    count: u32,
    node: u32,
}

/// Decoded tile
#[derive(Debug)]
pub struct GraphTile {
    buf: TileBuffer,
    header: TileHeader,
    /// Sorted by `edge_index`
    entries: Vec<EntryRef>,
    /// Sorted by `first`; together they cover the shortcut block
    runs: Vec<ShortcutRun>,
}

/// `offset + count * record` with overflow and bounds checks
fn section_end(name: &str, offset: u32, count: u32, record: usize, limit: usize) -> Result<usize> {
    let end = (count as usize)
        .checked_mul(record)
        .and_then(|len| len.checked_add(offset as usize))
        .ok_or_else(|| Error::format(format!("{name} section size overflows")))?;
    if (offset as usize) < HEADER_SIZE || end > limit {
        return Err(Error::format(format!(
            "{name} section [{offset}, {end}) exceeds tile size {limit}"
        )));
    }
    Ok(end)
}

impl GraphTile {
    /// Validate and wrap a tile buffer
    pub fn decode(buf: impl Into<TileBuffer>) -> Result<Self> {
        let buf = buf.into();
        let header = TileHeader::from_bytes(&buf)?;

        let tile_id = header.tile_id;
        if !tile_id.is_valid() || tile_id.tile_base() != tile_id {
            return Err(Error::format(format!(
                "header tile id {tile_id} is not a tile base id"
            )));
        }

        let total = header.total_size as usize;
        if total > buf.len() {
            return Err(Error::format(format!(
                "tile {tile_id} declares {total} bytes but buffer holds {}",
                buf.len()
            )));
        }
        if total < HEADER_SIZE {
            return Err(Error::format(format!(
                "tile {tile_id} declares total size {total} smaller than its header"
            )));
        }

        for (what, count) in [("node", header.node_count), ("edge", header.edge_count)] {
            if count > MAX_ENTITY_INDEX {
                return Err(Error::format(format!(
                    "tile {tile_id} declares {count} {what}s, more than one tile can address"
                )));
            }
        }
        if header.shortcut_count > header.edge_count {
            return Err(Error::format(format!(
                "tile {tile_id} declares {} shortcuts but only {} edges",
                header.shortcut_count, header.edge_count
            )));
        }

        section_end("node", header.node_offset, header.node_count, NODE_SIZE, total)?;
        section_end("edge", header.edge_offset, header.edge_count, EDGE_SIZE, total)?;
        if (header.shortcut_offset as usize) < HEADER_SIZE || header.shortcut_offset as usize > total {
            return Err(Error::format(format!(
                "shortcut table offset {} outside tile of {total} bytes",
                header.shortcut_offset
            )));
        }

        let crc = crc::body_checksum(&buf[..total]);
        if crc != header.body_crc64 {
            return Err(Error::format(format!(
                "tile {tile_id} checksum mismatch: header 0x{:016x}, body 0x{crc:016x}",
                header.body_crc64
            )));
        }

        let runs = Self::index_nodes(&buf[..total], &header)?;
        let entries = Self::index_shortcuts(&buf[..total], &header)?;

        Ok(Self {
            buf,
            header,
            entries,
            runs,
        })
    }

    /// Check every node's edge ranges against the edge array and collect
    /// the shortcut runs.
    ///
    /// Original ranges must ascend by node and stay below the shortcut
    /// block. Shortcut runs may belong to nodes in any order but must tile
    /// the shortcut block exactly.
    fn index_nodes(buf: &[u8], header: &TileHeader) -> Result<Vec<ShortcutRun>> {
        let tile_id = header.tile_id;
        let originals = header.edge_count - header.shortcut_count;

        let mut runs = Vec::new();
        let mut prev_end = 0u32;
        for n in 0..header.node_count {
            let at = header.node_offset as usize + n as usize * NODE_SIZE;
            let node = Node::from_bytes(&buf[at..at + NODE_SIZE]);

            match node.edge_index.checked_add(u32::from(node.edge_count)) {
                Some(end) if node.edge_index >= prev_end && end <= originals => prev_end = end,
                _ => {
                    return Err(Error::format(format!(
                        "node {n} in tile {tile_id} claims edges {}+{} outside [{prev_end}, {originals})",
                        node.edge_index, node.edge_count
                    )))
                }
            }
            if node.shortcut_count > 0 {
                runs.push(ShortcutRun {
                    first: node.shortcut_index,
                    count: u32::from(node.shortcut_count),
                    node: n,
                });
            }
        }

        runs.sort_unstable_by_key(|r| r.first);
        let mut next = originals;
        for run in &runs {
            let end = run.first.checked_add(run.count);
            if run.first != next || end.map_or(true, |end| end > header.edge_count) {
                return Err(Error::format(format!(
                    "node {} in tile {tile_id} claims shortcuts {}+{}, expected the run to start at {next}",
                    run.node, run.first, run.count
                )));
            }
            next = run.first + run.count;
        }
        if next != header.edge_count {
            return Err(Error::format(format!(
                "tile {tile_id} shortcut edges [{next}, {}) belong to no node",
                header.edge_count
            )));
        }

        Ok(runs)
    }

    /// Walk the variable-length shortcut table once and remember where
    /// each entry starts
    fn index_shortcuts(buf: &[u8], header: &TileHeader) -> Result<Vec<EntryRef>> {
        let mut entries = Vec::with_capacity(header.shortcut_count as usize);
        let mut offset = header.shortcut_offset as usize;

        for n in 0..header.shortcut_count {
            if offset + SHORTCUT_ENTRY_HEADER_SIZE > buf.len() {
                return Err(Error::format(format!(
                    "shortcut entry {n} header runs past end of tile"
                )));
            }

            let id = GraphId::from_raw(read_u64(buf, offset));
            let count = read_u32(buf, offset + 16);
            let ids_len = (count as usize)
                .checked_mul(SHORTCUT_ID_SIZE)
                .ok_or_else(|| Error::format("shortcut entry size overflows"))?;
            let next = offset + SHORTCUT_ENTRY_HEADER_SIZE + ids_len;
            if next > buf.len() {
                return Err(Error::format(format!(
                    "shortcut entry {n} ({count} edges) runs past end of tile"
                )));
            }

            let originals = header.edge_count - header.shortcut_count;
            if id.tile_base() != header.tile_id
                || id.index() < originals
                || id.index() >= header.edge_count
            {
                return Err(Error::format(format!(
                    "shortcut entry {n} names edge {id} outside the shortcut block of tile {}",
                    header.tile_id
                )));
            }
            if let Some(prev) = entries.last().map(|e: &EntryRef| e.edge_index) {
                if id.index() <= prev {
                    return Err(Error::format(format!(
                        "shortcut table not sorted at entry {n}"
                    )));
                }
            }

            entries.push(EntryRef {
                edge_index: id.index(),
                offset,
                count,
            });
            offset = next;
        }

        Ok(entries)
    }

    pub fn header(&self) -> &TileHeader {
        &self.header
    }

    /// Tile base id
    pub fn id(&self) -> GraphId {
        self.header.tile_id
    }

    pub fn node_count(&self) -> u32 {
        self.header.node_count
    }

    pub fn directed_edge_count(&self) -> u32 {
        self.header.edge_count
    }

    /// Edges before the shortcut block
    pub fn original_edge_count(&self) -> u32 {
        self.header.edge_count - self.header.shortcut_count
    }

    /// Bytes held by this tile, used for cache budgeting
    pub fn size_bytes(&self) -> usize {
        self.buf.len()
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.buf, TileBuffer::Mapped(_))
    }

    /// Directed edge by slot index
    pub fn directed_edge(&self, index: u32) -> Result<DirectedEdge> {
        if index >= self.header.edge_count {
            return Err(Error::InvalidArgument(format!(
                "edge index {index} out of range for tile {} ({} edges)",
                self.id(),
                self.header.edge_count
            )));
        }
        let at = self.header.edge_offset as usize + index as usize * EDGE_SIZE;
        DirectedEdge::from_bytes(&self.buf[at..at + EDGE_SIZE])
    }

    /// Node by slot index
    pub fn node(&self, index: u32) -> Result<Node> {
        if index >= self.header.node_count {
            return Err(Error::InvalidArgument(format!(
                "node index {index} out of range for tile {} ({} nodes)",
                self.id(),
                self.header.node_count
            )));
        }
        let at = self.header.node_offset as usize + index as usize * NODE_SIZE;
        Ok(Node::from_bytes(&self.buf[at..at + NODE_SIZE]))
    }

    /// Original outbound edges of a node
    pub fn node_edges(&self, node_index: u32) -> Result<Vec<(GraphId, DirectedEdge)>> {
        let node = self.node(node_index)?;
        node.edge_range()
            .map(|i| Ok((self.id().with_index(i), self.directed_edge(i)?)))
            .collect()
    }

    /// Outbound shortcut edges of a node
    pub fn node_shortcuts(&self, node_index: u32) -> Result<Vec<(GraphId, DirectedEdge)>> {
        let node = self.node(node_index)?;
        node.shortcut_range()
            .map(|i| Ok((self.id().with_index(i), self.directed_edge(i)?)))
            .collect()
    }

    /// Node whose outbound range (original or shortcut) holds `edge_index`
    pub fn edge_start_node(&self, edge_index: u32) -> Result<u32> {
        if edge_index >= self.header.edge_count {
            return Err(Error::InvalidArgument(format!(
                "edge index {edge_index} out of range for tile {}",
                self.id()
            )));
        }

        if edge_index >= self.original_edge_count() {
            // Runs cover the shortcut block without gaps
            let at = self.runs.partition_point(|r| r.first <= edge_index);
            return match at.checked_sub(1).map(|i| self.runs[i]) {
                Some(run) if edge_index < run.first + run.count => Ok(run.node),
                _ => Err(Error::format(format!(
                    "edge {edge_index} in tile {} belongs to no node",
                    self.id()
                ))),
            };
        }

        // Original edge ranges ascend by node
        let (mut lo, mut hi) = (0u32, self.header.node_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let node = self.node(mid)?;
            if node.edge_range().contains(&edge_index) {
                return Ok(mid);
            }
            if edge_index < node.edge_index {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        Err(Error::format(format!(
            "edge {edge_index} in tile {} belongs to no node",
            self.id()
        )))
    }

    fn read_entry(&self, entry: &EntryRef) -> ShortcutEntry {
        let b = &self.buf[..];
        let at = entry.offset;
        let ids_at = at + SHORTCUT_ENTRY_HEADER_SIZE;
        ShortcutEntry {
            shortcut: GraphId::from_raw(read_u64(b, at)),
            time_ds: read_u32(b, at + 8),
            truck_time_ds: read_u32(b, at + 12),
            edges: (0..entry.count as usize)
                .map(|i| GraphId::from_raw(read_u64(b, ids_at + i * SHORTCUT_ID_SIZE)))
                .collect(),
        }
    }

    /// Original edges replaced by a shortcut; `None` when the id is from
    /// another tile, out of range, or has no table entry
    pub fn shortcut_entry(&self, shortcut: GraphId) -> Option<ShortcutEntry> {
        if !shortcut.same_tile(self.id()) || shortcut.index() >= self.header.edge_count {
            return None;
        }
        self.entries
            .binary_search_by_key(&shortcut.index(), |e| e.edge_index)
            .ok()
            .map(|i| self.read_entry(&self.entries[i]))
    }

    pub fn shortcut_entries(&self) -> impl Iterator<Item = ShortcutEntry> + '_ {
        self.entries.iter().map(move |e| self.read_entry(e))
    }
}
