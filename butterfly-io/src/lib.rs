//! Tile storage for the butterfly routing graph
//!
//! - [`format`]: bit-exact record layout (header, nodes, directed edges,
//!   shortcut table)
//! - [`tile`]: [`GraphTile`], a validated read-only view over tile bytes
//! - [`builder`]: [`TileBuilder`], the owned form used while building
//! - [`hierarchy`]: level grids and tile bounds
//! - [`store`]: backing stores the cache reads from

pub mod builder;
pub mod crc;
pub mod format;
pub mod hierarchy;
pub mod store;
pub mod tile;

pub use builder::TileBuilder;
pub use format::{access, DirectedEdge, Node, RoadClass, ShortcutEntry, TileBounds, TileHeader};
pub use hierarchy::{TileLevel, LEVELS};
pub use store::{DirTileStore, MemTileStore, TileSink, TileSource};
pub use tile::{GraphTile, TileBuffer};
