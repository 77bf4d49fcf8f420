//! Tile binary layout
//!
//! All integers are little-endian. A tile file is:
//!
//! ```text
//! Header (80 bytes):
//!   magic:            u32 = 0x4C544742  // "BGTL"
//!   version:          u16 = 1
//!   reserved:         u16
//!   tile_id:          u64               // GraphId with entity index 0
//!   min_lat, min_lon: i32               // 1e-7 degrees
//!   max_lat, max_lon: i32
//!   node_count:       u32
//!   edge_count:       u32
//!   shortcut_count:   u32               // shortcut table entries
//!   node_offset:      u32               // byte offsets from file start
//!   edge_offset:      u32
//!   shortcut_offset:  u32
//!   total_size:       u32
//!   reserved:         u32
//!   body_crc64:       u64               // CRC-64 of bytes [80, total_size)
//!   padding:          [u8; 8]
//!
//! Node records (24 bytes each), directed edge records (24 bytes each),
//! then the shortcut table:
//!   per entry: shortcut id u64, time_ds u32, truck_time_ds u32,
//!              count u32, reserved u32, count x u64 constituent ids
//! ```

use butterfly_common::{Error, GraphId, Result};

pub const MAGIC: u32 = 0x4C544742; // "BGTL"
pub const VERSION: u16 = 1;

pub const HEADER_SIZE: usize = 80;
/// Position of `body_crc64` inside the header
pub const BODY_CRC_OFFSET: usize = 64;
pub const NODE_SIZE: usize = 24;
pub const EDGE_SIZE: usize = 24;
pub const SHORTCUT_ENTRY_HEADER_SIZE: usize = 24;
pub const SHORTCUT_ID_SIZE: usize = 8;

/// Fixed-point scale for coordinates
pub const COORD_SCALE: f64 = 10_000_000.0;

const FLAG_SHORTCUT: u8 = 0x01;

/// Access bitmask values, checked by callers against edge masks
pub mod access {
    pub const AUTO: u16 = 1 << 0;
    pub const TRUCK: u16 = 1 << 1;
    pub const BICYCLE: u16 = 1 << 2;
    pub const PEDESTRIAN: u16 = 1 << 3;
    pub const BUS: u16 = 1 << 4;
    pub const ALL: u16 = AUTO | TRUCK | BICYCLE | PEDESTRIAN | BUS;
    pub const NONE: u16 = 0;
}

pub(crate) fn read_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

pub(crate) fn read_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

pub(crate) fn read_i32(b: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

pub(crate) fn read_u64(b: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn to_fixed(deg: f64) -> i32 {
    (deg * COORD_SCALE).round() as i32
}

fn from_fixed(v: i32) -> f64 {
    v as f64 / COORD_SCALE
}

/// Road importance, most important first
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoadClass {
    Motorway = 0,
    Trunk = 1,
    Primary = 2,
    Secondary = 3,
    Tertiary = 4,
    Unclassified = 5,
    Residential = 6,
    Service = 7,
}

impl RoadClass {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => RoadClass::Motorway,
            1 => RoadClass::Trunk,
            2 => RoadClass::Primary,
            3 => RoadClass::Secondary,
            4 => RoadClass::Tertiary,
            5 => RoadClass::Unclassified,
            6 => RoadClass::Residential,
            7 => RoadClass::Service,
            _ => return Err(Error::format(format!("invalid road class {v}"))),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RoadClass::Motorway => "motorway",
            RoadClass::Trunk => "trunk",
            RoadClass::Primary => "primary",
            RoadClass::Secondary => "secondary",
            RoadClass::Tertiary => "tertiary",
            RoadClass::Unclassified => "unclassified",
            RoadClass::Residential => "residential",
            RoadClass::Service => "service",
        }
    }

    /// True if `self` is at least as important as `other`
    pub fn at_least(&self, other: RoadClass) -> bool {
        *self <= other
    }
}

/// Geographic bounds of a tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl TileBounds {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// Decoded tile header
#[derive(Debug, Clone, PartialEq)]
pub struct TileHeader {
    pub version: u16,
    pub tile_id: GraphId,
    pub bounds: TileBounds,
    pub node_count: u32,
    pub edge_count: u32,
    pub shortcut_count: u32,
    pub node_offset: u32,
    pub edge_offset: u32,
    pub shortcut_offset: u32,
    pub total_size: u32,
    pub body_crc64: u64,
}

impl TileHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&self.tile_id.raw().to_le_bytes());
        bytes.extend_from_slice(&to_fixed(self.bounds.min_lat).to_le_bytes());
        bytes.extend_from_slice(&to_fixed(self.bounds.min_lon).to_le_bytes());
        bytes.extend_from_slice(&to_fixed(self.bounds.max_lat).to_le_bytes());
        bytes.extend_from_slice(&to_fixed(self.bounds.max_lon).to_le_bytes());
        bytes.extend_from_slice(&self.node_count.to_le_bytes());
        bytes.extend_from_slice(&self.edge_count.to_le_bytes());
        bytes.extend_from_slice(&self.shortcut_count.to_le_bytes());
        bytes.extend_from_slice(&self.node_offset.to_le_bytes());
        bytes.extend_from_slice(&self.edge_offset.to_le_bytes());
        bytes.extend_from_slice(&self.shortcut_offset.to_le_bytes());
        bytes.extend_from_slice(&self.total_size.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&self.body_crc64.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        debug_assert_eq!(bytes.len(), HEADER_SIZE);
        bytes
    }

    /// Parse the fixed header. Only checks magic and version; offsets are
    /// validated against the buffer by the tile decoder.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::format(format!(
                "buffer of {} bytes is shorter than the {HEADER_SIZE}-byte header",
                bytes.len()
            )));
        }

        let magic = read_u32(bytes, 0);
        if magic != MAGIC {
            return Err(Error::format(format!(
                "invalid magic: expected 0x{MAGIC:08X}, got 0x{magic:08X}"
            )));
        }

        let version = read_u16(bytes, 4);
        if version != VERSION {
            return Err(Error::format(format!(
                "unsupported tile version {version} (expected {VERSION})"
            )));
        }

        Ok(Self {
            version,
            tile_id: GraphId::from_raw(read_u64(bytes, 8)),
            bounds: TileBounds {
                min_lat: from_fixed(read_i32(bytes, 16)),
                min_lon: from_fixed(read_i32(bytes, 20)),
                max_lat: from_fixed(read_i32(bytes, 24)),
                max_lon: from_fixed(read_i32(bytes, 28)),
            },
            node_count: read_u32(bytes, 32),
            edge_count: read_u32(bytes, 36),
            shortcut_count: read_u32(bytes, 40),
            node_offset: read_u32(bytes, 44),
            edge_offset: read_u32(bytes, 48),
            shortcut_offset: read_u32(bytes, 52),
            total_size: read_u32(bytes, 56),
            body_crc64: read_u64(bytes, BODY_CRC_OFFSET),
        })
    }
}

/// Graph node: position plus the ranges of its outbound edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Node {
    pub lat_e7: i32,
    pub lon_e7: i32,
    /// First original outbound edge in the tile's edge array
    pub edge_index: u32,
    pub edge_count: u16,
    /// Delay for passing through this node, deciseconds
    pub turn_delay_ds: u16,
    /// First outbound shortcut edge (valid when `shortcut_count > 0`)
    pub shortcut_index: u32,
    pub shortcut_count: u16,
    pub access: u16,
}

impl Node {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat_e7: to_fixed(lat),
            lon_e7: to_fixed(lon),
            access: access::ALL,
            ..Default::default()
        }
    }

    pub fn with_turn_delay_ds(mut self, delay_ds: u16) -> Self {
        self.turn_delay_ds = delay_ds;
        self
    }

    pub fn lat(&self) -> f64 {
        from_fixed(self.lat_e7)
    }

    pub fn lon(&self) -> f64 {
        from_fixed(self.lon_e7)
    }

    pub fn turn_delay_secs(&self) -> f64 {
        f64::from(self.turn_delay_ds) / 10.0
    }

    /// Original outbound edge indexes
    pub fn edge_range(&self) -> std::ops::Range<u32> {
        self.edge_index..self.edge_index + u32::from(self.edge_count)
    }

    /// Shortcut outbound edge indexes
    pub fn shortcut_range(&self) -> std::ops::Range<u32> {
        self.shortcut_index..self.shortcut_index + u32::from(self.shortcut_count)
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.lat_e7.to_le_bytes());
        out.extend_from_slice(&self.lon_e7.to_le_bytes());
        out.extend_from_slice(&self.edge_index.to_le_bytes());
        out.extend_from_slice(&self.edge_count.to_le_bytes());
        out.extend_from_slice(&self.turn_delay_ds.to_le_bytes());
        out.extend_from_slice(&self.shortcut_index.to_le_bytes());
        out.extend_from_slice(&self.shortcut_count.to_le_bytes());
        out.extend_from_slice(&self.access.to_le_bytes());
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        Self {
            lat_e7: read_i32(b, 0),
            lon_e7: read_i32(b, 4),
            edge_index: read_u32(b, 8),
            edge_count: read_u16(b, 12),
            turn_delay_ds: read_u16(b, 14),
            shortcut_index: read_u32(b, 16),
            shortcut_count: read_u16(b, 20),
            access: read_u16(b, 22),
        }
    }
}

/// One traversable directed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectedEdge {
    pub end_node: GraphId,
    pub length_m: u32,
    /// Base speed, kph
    pub speed: u8,
    /// Heavy-vehicle speed, kph; 0 means "same as `speed`"
    pub truck_speed: u8,
    pub road_class: RoadClass,
    pub flags: u8,
    pub forward_access: u16,
    pub reverse_access: u16,
}

impl DirectedEdge {
    pub fn new(end_node: GraphId, length_m: u32, speed: u8, road_class: RoadClass) -> Self {
        Self {
            end_node,
            length_m,
            speed,
            truck_speed: 0,
            road_class,
            flags: 0,
            forward_access: access::ALL,
            reverse_access: access::ALL,
        }
    }

    pub fn with_truck_speed(mut self, kph: u8) -> Self {
        self.truck_speed = kph;
        self
    }

    pub fn with_access(mut self, forward: u16, reverse: u16) -> Self {
        self.forward_access = forward;
        self.reverse_access = reverse;
        self
    }

    pub fn is_shortcut(&self) -> bool {
        self.flags & FLAG_SHORTCUT != 0
    }

    pub fn set_shortcut(&mut self, shortcut: bool) {
        if shortcut {
            self.flags |= FLAG_SHORTCUT;
        } else {
            self.flags &= !FLAG_SHORTCUT;
        }
    }

    /// Truck speed with the fallback applied
    pub fn effective_truck_speed(&self) -> u8 {
        if self.truck_speed == 0 {
            self.speed
        } else {
            self.truck_speed
        }
    }

    /// True if any mode in `mask` may traverse this edge in its direction
    pub fn allows(&self, mask: u16) -> bool {
        self.forward_access & mask != 0
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.end_node.raw().to_le_bytes());
        out.extend_from_slice(&self.length_m.to_le_bytes());
        out.push(self.speed);
        out.push(self.truck_speed);
        out.push(self.road_class as u8);
        out.push(self.flags);
        out.extend_from_slice(&self.forward_access.to_le_bytes());
        out.extend_from_slice(&self.reverse_access.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        Ok(Self {
            end_node: GraphId::from_raw(read_u64(b, 0)),
            length_m: read_u32(b, 8),
            speed: b[12],
            truck_speed: b[13],
            road_class: RoadClass::from_u8(b[14])?,
            flags: b[15],
            forward_access: read_u16(b, 16),
            reverse_access: read_u16(b, 18),
        })
    }
}

/// Shortcut table entry: which original edges a shortcut replaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutEntry {
    pub shortcut: GraphId,
    /// Total traversal time at base speed incl. turn delays, deciseconds
    pub time_ds: u32,
    /// Same for the truck speed class
    pub truck_time_ds: u32,
    /// Constituent edges in traversal order
    pub edges: Vec<GraphId>,
}

impl ShortcutEntry {
    pub fn encoded_len(&self) -> usize {
        SHORTCUT_ENTRY_HEADER_SIZE + self.edges.len() * SHORTCUT_ID_SIZE
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.shortcut.raw().to_le_bytes());
        out.extend_from_slice(&self.time_ds.to_le_bytes());
        out.extend_from_slice(&self.truck_time_ds.to_le_bytes());
        out.extend_from_slice(&(self.edges.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        for id in &self.edges {
            out.extend_from_slice(&id.raw().to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_fixed() {
        let header = TileHeader {
            version: VERSION,
            tile_id: GraphId::new(2, 36_799, 0),
            bounds: TileBounds::new(50.0, 4.0, 50.25, 4.25),
            node_count: 3,
            edge_count: 4,
            shortcut_count: 1,
            node_offset: HEADER_SIZE as u32,
            edge_offset: (HEADER_SIZE + 3 * NODE_SIZE) as u32,
            shortcut_offset: (HEADER_SIZE + 3 * NODE_SIZE + 4 * EDGE_SIZE) as u32,
            total_size: 500,
            body_crc64: 0xDEAD_BEEF,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], b"BGTL");
        assert_eq!(TileHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_unknown_version() {
        let mut bytes = TileHeader {
            version: VERSION,
            tile_id: GraphId::new(0, 1, 0),
            bounds: TileBounds::new(0.0, 0.0, 4.0, 4.0),
            node_count: 0,
            edge_count: 0,
            shortcut_count: 0,
            node_offset: HEADER_SIZE as u32,
            edge_offset: HEADER_SIZE as u32,
            shortcut_offset: HEADER_SIZE as u32,
            total_size: HEADER_SIZE as u32,
            body_crc64: 0,
        }
        .to_bytes();
        bytes[4] = 9;
        let err = TileHeader::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported tile version 9"));
    }

    #[test]
    fn test_edge_record_size_and_flags() {
        let mut edge = DirectedEdge::new(GraphId::new(0, 3, 9), 1_250, 100, RoadClass::Motorway)
            .with_truck_speed(90)
            .with_access(access::AUTO | access::TRUCK, access::NONE);
        edge.set_shortcut(true);

        let mut bytes = Vec::new();
        edge.write_to(&mut bytes);
        assert_eq!(bytes.len(), EDGE_SIZE);

        let back = DirectedEdge::from_bytes(&bytes).unwrap();
        assert!(back.is_shortcut());
        assert_eq!(back, edge);
        assert!(back.allows(access::AUTO));
        assert!(!back.allows(access::PEDESTRIAN));
    }

    #[test]
    fn test_edge_rejects_bad_road_class() {
        let edge = DirectedEdge::new(GraphId::new(0, 0, 0), 10, 50, RoadClass::Service);
        let mut bytes = Vec::new();
        edge.write_to(&mut bytes);
        bytes[14] = 42;
        assert!(DirectedEdge::from_bytes(&bytes).unwrap_err().is_format());
    }

    #[test]
    fn test_truck_speed_falls_back() {
        let edge = DirectedEdge::new(GraphId::new(0, 0, 0), 10, 80, RoadClass::Primary);
        assert_eq!(edge.effective_truck_speed(), 80);
        assert_eq!(edge.with_truck_speed(60).effective_truck_speed(), 60);
    }

    #[test]
    fn test_node_record_size() {
        let node = Node::new(50.8503, 4.3517).with_turn_delay_ds(54);
        let mut bytes = Vec::new();
        node.write_to(&mut bytes);
        assert_eq!(bytes.len(), NODE_SIZE);
        let back = Node::from_bytes(&bytes);
        assert_eq!(back, node);
        assert!((back.lat() - 50.8503).abs() < 1e-7);
        assert!((back.turn_delay_secs() - 5.4).abs() < 1e-9);
    }

    #[test]
    fn test_road_class_ordering() {
        assert!(RoadClass::Motorway.at_least(RoadClass::Primary));
        assert!(RoadClass::Primary.at_least(RoadClass::Primary));
        assert!(!RoadClass::Service.at_least(RoadClass::Motorway));
    }
}
