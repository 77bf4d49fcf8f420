//! Backing stores: where tile bytes live
//!
//! The cache only needs [`TileSource`]: read one tile, list the tiles of a
//! level. The contraction pass also needs [`TileSink`] to write tiles back.
//! [`DirTileStore`] is the on-disk layout; [`MemTileStore`] keeps tiles in
//! memory for tests and tools.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use butterfly_common::{Error, GraphId, Result};
use memmap2::Mmap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::hierarchy;
use crate::tile::TileBuffer;

pub const TILE_EXTENSION: &str = "gph";

/// Read side of a backing store
pub trait TileSource: Send + Sync {
    /// Raw bytes of one tile (entity bits of `tile` are ignored).
    /// Missing tiles are `Error::NotFound`.
    fn read(&self, tile: GraphId) -> Result<TileBuffer>;

    /// Tile indexes present at `level`, ascending
    fn enumerate(&self, level: u8) -> Result<Vec<u32>>;

    fn exists(&self, tile: GraphId) -> bool {
        self.read(tile).is_ok()
    }
}

/// Write side of a backing store
pub trait TileSink {
    fn write(&self, tile: GraphId, bytes: &[u8]) -> Result<()>;
}

impl<T: TileSource + ?Sized> TileSource for Arc<T> {
    fn read(&self, tile: GraphId) -> Result<TileBuffer> {
        (**self).read(tile)
    }

    fn enumerate(&self, level: u8) -> Result<Vec<u32>> {
        (**self).enumerate(level)
    }

    fn exists(&self, tile: GraphId) -> bool {
        (**self).exists(tile)
    }
}

impl<T: TileSink + ?Sized> TileSink for Arc<T> {
    fn write(&self, tile: GraphId, bytes: &[u8]) -> Result<()> {
        (**self).write(tile, bytes)
    }
}

/// Zero-padded digit width used for tile file names at a level
fn index_width(level: u8) -> Result<usize> {
    let info = hierarchy::level(level)
        .ok_or_else(|| Error::InvalidArgument(format!("level {level} is not in the hierarchy")))?;
    let digits = info.max_tile_index().to_string().len();
    Ok(digits.div_ceil(3) * 3)
}

/// Relative path of a tile: `<level>/<ddd>/.../<ddd>.gph`
///
/// The tile index is zero-padded to a multiple of three digits sized for
/// the level's largest index, then split into three-digit components.
pub fn tile_path(tile: GraphId) -> Result<PathBuf> {
    let level = tile.level();
    let width = index_width(level)?;
    let max = hierarchy::level(level).map(|l| l.max_tile_index()).unwrap_or(0);
    if tile.tile_index() > max {
        return Err(Error::InvalidArgument(format!(
            "tile index {} exceeds level {level} maximum {max}",
            tile.tile_index()
        )));
    }

    let padded = format!("{:0width$}", tile.tile_index(), width = width);
    let mut path = PathBuf::from(level.to_string());
    let chunks: Vec<&str> = padded
        .as_bytes()
        .chunks(3)
        .map(|c| std::str::from_utf8(c).unwrap_or("000"))
        .collect();
    for (i, chunk) in chunks.iter().enumerate() {
        if i + 1 == chunks.len() {
            path.push(format!("{chunk}.{TILE_EXTENSION}"));
        } else {
            path.push(chunk);
        }
    }
    Ok(path)
}

/// Tiles stored as files under a root directory
#[derive(Debug, Clone)]
pub struct DirTileStore {
    root: PathBuf,
    use_mmap: bool,
}

impl DirTileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            use_mmap: false,
        }
    }

    /// Serve reads through read-only memory maps instead of copies
    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, tile: GraphId) -> Result<PathBuf> {
        Ok(self.root.join(tile_path(tile)?))
    }

    /// Collect tile indexes below `dir`; `prefix` holds the digits of the
    /// directories walked so far
    fn scan(dir: &Path, prefix: &str, width: usize, out: &mut Vec<u32>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                if name.len() == 3 && name.bytes().all(|b| b.is_ascii_digit()) {
                    Self::scan(&entry.path(), &format!("{prefix}{name}"), width, out)?;
                }
            } else if let Some(stem) = name.strip_suffix(&format!(".{TILE_EXTENSION}")) {
                let digits = format!("{prefix}{stem}");
                if digits.len() == width && digits.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(index) = digits.parse::<u32>() {
                        out.push(index);
                    }
                }
            }
        }
        Ok(())
    }
}

impl TileSource for DirTileStore {
    fn read(&self, tile: GraphId) -> Result<TileBuffer> {
        let path = self.path_for(tile)?;

        if self.use_mmap {
            let file = File::open(&path).map_err(|e| Error::from_tile_io(tile, e))?;
            let len = file.metadata().map_err(|e| Error::from_tile_io(tile, e))?.len();
            if len == 0 {
                return Ok(TileBuffer::Owned(Vec::new()));
            }
            // SAFETY: tile files are immutable once written; the contraction
            // pass replaces them by rename, never in place.
            let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::from_tile_io(tile, e))?;
            return Ok(TileBuffer::Mapped(map));
        }

        fs::read(&path)
            .map(TileBuffer::Owned)
            .map_err(|e| Error::from_tile_io(tile, e))
    }

    fn enumerate(&self, level: u8) -> Result<Vec<u32>> {
        let width = index_width(level)?;
        let dir = self.root.join(level.to_string());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        Self::scan(&dir, "", width, &mut out)?;
        out.sort_unstable();
        Ok(out)
    }

    fn exists(&self, tile: GraphId) -> bool {
        self.path_for(tile).map(|p| p.is_file()).unwrap_or(false)
    }
}

impl TileSink for DirTileStore {
    fn write(&self, tile: GraphId, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(tile)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write-then-rename so readers never see a half-written tile
        let tmp = path.with_extension(format!("{TILE_EXTENSION}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Tiles held in memory
#[derive(Debug, Default)]
pub struct MemTileStore {
    tiles: RwLock<FxHashMap<GraphId, Arc<[u8]>>>,
}

impl MemTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.read().is_empty()
    }

    pub fn remove(&self, tile: GraphId) -> bool {
        self.tiles.write().remove(&tile.tile_base()).is_some()
    }
}

impl TileSource for MemTileStore {
    fn read(&self, tile: GraphId) -> Result<TileBuffer> {
        self.tiles
            .read()
            .get(&tile.tile_base())
            .map(|bytes| TileBuffer::Owned(bytes.to_vec()))
            .ok_or(Error::NotFound(tile.tile_base()))
    }

    fn enumerate(&self, level: u8) -> Result<Vec<u32>> {
        let mut out: Vec<u32> = self
            .tiles
            .read()
            .keys()
            .filter(|id| id.level() == level)
            .map(|id| id.tile_index())
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    fn exists(&self, tile: GraphId) -> bool {
        self.tiles.read().contains_key(&tile.tile_base())
    }
}

impl TileSink for MemTileStore {
    fn write(&self, tile: GraphId, bytes: &[u8]) -> Result<()> {
        self.tiles.write().insert(tile.tile_base(), Arc::from(bytes));
        Ok(())
    }
}
