//! Tile cache and shortcut hierarchy for the butterfly routing graph
//!
//! [`GraphReader`] serves [`GraphTile`](butterfly_io::GraphTile)s from a
//! backing store under a byte budget. The [`shortcut`] module contracts
//! chains of edges into shortcuts when a level is built and expands them
//! back into original edges at query time.

pub mod config;
pub mod reader;
pub mod shortcut;

pub use config::{Config, ContractConfig, ReaderConfig};
pub use reader::{CacheStats, GraphReader, TileSet, TrimStats};
pub use shortcut::{contract, contract_with, ContractStats, NodeTurnDelay, TurnDelay, TurnDelayFn};
