//! Error taxonomy shared by the tile store, cache, and shortcut code
//!
//! `Error` is `Clone` because a single tile load result is handed to every
//! caller that was waiting on the same tile; I/O errors are kept behind an
//! `Arc` for that reason.

use std::io;
use std::sync::Arc;

use thiserror::Error as ThisError;

use crate::graph_id::GraphId;

/// Main error type for tile graph operations
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// The backing store has no data for this tile
    #[error("tile {0} not found")]
    NotFound(GraphId),

    /// Corrupt, truncated, or version-mismatched tile bytes, or
    /// inconsistent build output
    #[error("format error: {0}")]
    Format(String),

    /// Caller passed an id that does not fit the data (wrong kind of edge,
    /// slot out of range)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A configured limit cannot hold the working set
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Invalid configuration file or values
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other I/O failure from the backing store
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl Error {
    /// Convenience constructor used by decoders
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    /// Map an I/O error for a specific tile, turning a missing file into
    /// `NotFound`
    pub fn from_tile_io(tile: GraphId, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Error::NotFound(tile.tile_base())
        } else {
            Error::Io(Arc::new(err))
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

/// Convenience result type for tile graph operations
pub type Result<T> = std::result::Result<T, Error>;
