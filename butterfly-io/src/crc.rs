//! CRC-64 over tile bodies
//!
//! The checksum covers every byte after the fixed header and is stored in
//! the header at [`BODY_CRC_OFFSET`].

use crc::{Crc, CRC_64_GO_ISO};

use crate::format::{BODY_CRC_OFFSET, HEADER_SIZE};

const TILE_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// Checksum of everything after the header of an encoded tile
pub fn body_checksum(tile: &[u8]) -> u64 {
    TILE_CRC.checksum(tile.get(HEADER_SIZE..).unwrap_or_default())
}

/// Write the body checksum into the header of an encoded tile. Buffers
/// shorter than a header are left untouched.
pub fn seal(tile: &mut [u8]) {
    if tile.len() < HEADER_SIZE {
        return;
    }
    let sum = body_checksum(tile);
    tile[BODY_CRC_OFFSET..BODY_CRC_OFFSET + 8].copy_from_slice(&sum.to_le_bytes());
}
