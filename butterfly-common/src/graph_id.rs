//! Bit-packed graph identifier
//!
//! Layout of the 64-bit value (only the low 46 bits are used):
//!
//! ```text
//!   bits  0..3   level        (3 bits,  0..=7)
//!   bits  3..25  tile index   (22 bits, 0..=4_194_303)
//!   bits 25..46  entity index (21 bits, 0..=2_097_151)
//! ```
//!
//! The same value is written verbatim into tile files, so every
//! cross-entity reference on disk is a `GraphId` rather than a pointer.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

const LEVEL_BITS: u32 = 3;
const TILE_BITS: u32 = 22;
const INDEX_BITS: u32 = 21;

const LEVEL_MASK: u64 = (1 << LEVEL_BITS) - 1;
const TILE_MASK: u64 = (1 << TILE_BITS) - 1;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

const TILE_SHIFT: u32 = LEVEL_BITS;
const INDEX_SHIFT: u32 = LEVEL_BITS + TILE_BITS;

/// Largest representable hierarchy level
pub const MAX_LEVEL: u8 = LEVEL_MASK as u8;
/// Largest representable tile index
pub const MAX_TILE_INDEX: u32 = TILE_MASK as u32;
/// Largest representable entity index within a tile
pub const MAX_ENTITY_INDEX: u32 = INDEX_MASK as u32;

/// Identifier of a tile, or of a node/edge slot inside a tile
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    /// All 46 bits set. `new(MAX_LEVEL, MAX_TILE_INDEX, MAX_ENTITY_INDEX)`
    /// packs to the same value, so that slot is reserved: a tile holds at
    /// most `MAX_ENTITY_INDEX` nodes or edges and never hands out the last
    /// index.
    pub const INVALID: GraphId = GraphId((1 << (LEVEL_BITS + TILE_BITS + INDEX_BITS)) - 1);

    /// Pack (level, tile_index, entity_index).
    ///
    /// Fields wider than their bit budget are a programming error.
    pub fn new(level: u8, tile_index: u32, index: u32) -> Self {
        debug_assert!(u64::from(level) <= LEVEL_MASK, "level {level} out of range");
        debug_assert!(u64::from(tile_index) <= TILE_MASK, "tile index {tile_index} out of range");
        debug_assert!(u64::from(index) <= INDEX_MASK, "entity index {index} out of range");

        GraphId(
            (u64::from(level) & LEVEL_MASK)
                | ((u64::from(tile_index) & TILE_MASK) << TILE_SHIFT)
                | ((u64::from(index) & INDEX_MASK) << INDEX_SHIFT),
        )
    }

    /// Rebuild from the raw on-disk value
    pub const fn from_raw(value: u64) -> Self {
        GraphId(value)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn level(self) -> u8 {
        (self.0 & LEVEL_MASK) as u8
    }

    pub fn tile_index(self) -> u32 {
        ((self.0 >> TILE_SHIFT) & TILE_MASK) as u32
    }

    pub fn index(self) -> u32 {
        ((self.0 >> INDEX_SHIFT) & INDEX_MASK) as u32
    }

    /// Decompose into (level, tile_index, entity_index)
    pub fn parts(self) -> (u8, u32, u32) {
        (self.level(), self.tile_index(), self.index())
    }

    /// Same tile, entity index cleared. Used as the cache key.
    pub fn tile_base(self) -> Self {
        GraphId(self.0 & ((LEVEL_MASK) | (TILE_MASK << TILE_SHIFT)))
    }

    /// Same tile, different entity slot
    pub fn with_index(self, index: u32) -> Self {
        GraphId::new(self.level(), self.tile_index(), index)
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID && self.0 >> (LEVEL_BITS + TILE_BITS + INDEX_BITS) == 0
    }

    /// True if both ids address the same tile
    pub fn same_tile(self, other: GraphId) -> bool {
        self.tile_base() == other.tile_base()
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            return write!(f, "invalid");
        }
        write!(f, "{}/{}/{}", self.level(), self.tile_index(), self.index())
    }
}

impl fmt::Debug for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GraphId({self})")
    }
}

impl FromStr for GraphId {
    type Err = Error;

    /// Parse `level/tile/index`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.len() != 3 {
            return Err(Error::InvalidArgument(format!(
                "graph id must look like 'level/tile/index', got '{s}'"
            )));
        }

        let field = |name: &str, raw: &str, max: u64| -> Result<u64, Error> {
            let value: u64 = raw
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("{name} '{raw}' is not a number")))?;
            if value > max {
                return Err(Error::InvalidArgument(format!(
                    "{name} {value} exceeds maximum {max}"
                )));
            }
            Ok(value)
        };

        let level = field("level", parts[0], LEVEL_MASK)?;
        let tile = field("tile index", parts[1], TILE_MASK)?;
        let index = field("entity index", parts[2], INDEX_MASK)?;

        Ok(GraphId::new(level as u8, tile as u32, index as u32))
    }
}
