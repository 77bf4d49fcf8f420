//! Common types for the butterfly tile graph
//!
//! Holds the pieces every other crate in the workspace agrees on: the
//! bit-packed [`GraphId`] used for on-disk addressing, and the shared
//! [`Error`] taxonomy.

pub mod error;
pub mod graph_id;

pub use error::{Error, Result};
pub use graph_id::GraphId;

#[cfg(test)]
mod tests {
    use crate::{Error, GraphId};

    #[test]
    fn not_found_mentions_tile() {
        let err = Error::NotFound(GraphId::new(1, 42, 0));
        assert_eq!(err.to_string(), "tile 1/42/0 not found");
    }
}
