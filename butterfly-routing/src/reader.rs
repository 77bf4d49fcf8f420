//! GraphReader: byte-budgeted tile cache over a backing store
//!
//! Tiles are handed out as `Arc<GraphTile>`. A tile stays valid for as long
//! as the caller holds its `Arc`, even after [`GraphReader::trim`] drops it
//! from the resident set; trimming never evicts a tile someone still holds.
//!
//! Concurrent misses on the same tile share one load: the first caller
//! registers a pending slot and reads the tile outside the cache lock, later
//! callers wait on that slot and get the same result (tile or error).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use butterfly_common::{Error, GraphId, Result};
use butterfly_io::{DirTileStore, DirectedEdge, GraphTile, Node, TileSource};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::config::ReaderConfig;

type LoadSlot = Arc<OnceLock<Result<Arc<GraphTile>>>>;

#[derive(Debug)]
struct CacheEntry {
    tile: Arc<GraphTile>,
    size: usize,
    /// Clock value of the last access
    last_used: u64,
    /// Insertion order, breaks `last_used` ties
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    resident: FxHashMap<GraphId, CacheEntry>,
    loading: FxHashMap<GraphId, LoadSlot>,
    resident_bytes: usize,
    clock: u64,
    next_seq: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Counters since the reader was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Reads issued to the backing store
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub resident_tiles: usize,
    pub resident_bytes: usize,
    pub budget_bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Outcome of one [`GraphReader::trim`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimStats {
    pub evicted_tiles: usize,
    pub evicted_bytes: usize,
    /// Resident tiles skipped because a caller still holds them
    pub pinned_tiles: usize,
    pub resident_bytes: usize,
}

pub struct GraphReader {
    source: Arc<dyn TileSource>,
    budget: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for GraphReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphReader")
            .field("budget", &self.budget)
            .field("resident_bytes", &self.resident_bytes())
            .finish_non_exhaustive()
    }
}

impl GraphReader {
    pub fn new(source: impl TileSource + 'static, config: &ReaderConfig) -> Result<Self> {
        Self::with_source(Arc::new(source), config)
    }

    pub fn with_source(source: Arc<dyn TileSource>, config: &ReaderConfig) -> Result<Self> {
        config.validate()?;
        debug!(budget = config.cache_budget_bytes, "creating graph reader");
        Ok(Self {
            source,
            budget: config.cache_budget_bytes,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Reader over the on-disk tree named by `config.tile_dir`
    pub fn from_config(config: &ReaderConfig) -> Result<Self> {
        let dir = config
            .tile_dir
            .as_ref()
            .ok_or_else(|| Error::Config("tile_dir is not set".to_string()))?;
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "tile_dir {} is not a directory",
                dir.display()
            )));
        }
        Self::new(DirTileStore::new(dir).with_mmap(config.use_mmap), config)
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.source
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Tile containing `id`; the entity bits are ignored
    pub fn get_tile(&self, id: GraphId) -> Result<Arc<GraphTile>> {
        if !id.is_valid() {
            return Err(Error::InvalidArgument(format!("invalid graph id {id:?}")));
        }
        let key = id.tile_base();

        let slot = {
            let mut state = self.state.lock();
            let now = state.tick();
            if let Some(entry) = state.resident.get_mut(&key) {
                entry.last_used = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&entry.tile));
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            Arc::clone(
                state
                    .loading
                    .entry(key)
                    .or_insert_with(|| Arc::new(OnceLock::new())),
            )
        };

        // Only one caller runs the closure; the rest block until it is set
        let result = slot.get_or_init(|| self.load(key)).clone();

        let mut state = self.state.lock();
        let still_pending = state
            .loading
            .get(&key)
            .is_some_and(|pending| Arc::ptr_eq(pending, &slot));
        if still_pending {
            state.loading.remove(&key);
            if let Ok(tile) = &result {
                self.insert(&mut state, key, Arc::clone(tile));
            }
        }
        result
    }

    fn load(&self, key: GraphId) -> Result<Arc<GraphTile>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let loaded = self
            .source
            .read(key)
            .and_then(GraphTile::decode)
            .and_then(|tile| {
                if tile.id() != key {
                    return Err(Error::format(format!(
                        "file for tile {key} holds tile {}",
                        tile.id()
                    )));
                }
                Ok(tile)
            });

        match loaded {
            Ok(tile) => {
                trace!(tile = %key, bytes = tile.size_bytes(), "loaded tile");
                Ok(Arc::new(tile))
            }
            Err(e) => {
                self.load_failures.fetch_add(1, Ordering::Relaxed);
                if !e.is_not_found() {
                    warn!(tile = %key, error = %e, "failed to load tile");
                }
                Err(e)
            }
        }
    }

    fn insert(&self, state: &mut CacheState, key: GraphId, tile: Arc<GraphTile>) {
        let size = tile.size_bytes();
        if size > self.budget {
            warn!(
                tile = %key,
                bytes = size,
                budget = self.budget,
                "tile alone exceeds the cache budget"
            );
        }
        let last_used = state.tick();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.resident_bytes += size;
        state.resident.insert(
            key,
            CacheEntry {
                tile,
                size,
                last_used,
                seq,
            },
        );
    }

    /// Resident bytes exceed the budget
    pub fn is_over_committed(&self) -> bool {
        self.state.lock().resident_bytes > self.budget
    }

    /// Evict least-recently-used tiles nobody holds until resident bytes
    /// are within budget. Ties in recency go to the earliest inserted.
    pub fn trim(&self) -> TrimStats {
        let mut state = self.state.lock();
        let mut stats = TrimStats {
            resident_bytes: state.resident_bytes,
            ..TrimStats::default()
        };
        if state.resident_bytes <= self.budget {
            return stats;
        }

        let mut candidates: Vec<(u64, u64, GraphId)> = Vec::with_capacity(state.resident.len());
        for (key, entry) in &state.resident {
            // The map's reference is the only one: no caller holds the tile
            if Arc::strong_count(&entry.tile) == 1 {
                candidates.push((entry.last_used, entry.seq, *key));
            } else {
                stats.pinned_tiles += 1;
            }
        }
        candidates.sort_unstable();

        for (_, _, key) in candidates {
            if state.resident_bytes <= self.budget {
                break;
            }
            if let Some(entry) = state.resident.remove(&key) {
                state.resident_bytes -= entry.size;
                stats.evicted_tiles += 1;
                stats.evicted_bytes += entry.size;
                trace!(tile = %key, bytes = entry.size, "evicted tile");
            }
        }
        self.evictions
            .fetch_add(stats.evicted_tiles as u64, Ordering::Relaxed);
        stats.resident_bytes = state.resident_bytes;

        if state.resident_bytes > self.budget {
            warn!(
                resident = state.resident_bytes,
                budget = self.budget,
                pinned = stats.pinned_tiles,
                "cache still over budget after trim; remaining tiles are in use"
            );
        } else {
            debug!(
                evicted = stats.evicted_tiles,
                freed = stats.evicted_bytes,
                resident = state.resident_bytes,
                "trimmed tile cache"
            );
        }
        stats
    }

    /// Drop every resident tile nobody holds, regardless of budget
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.resident.len();
        let mut freed = 0;
        state.resident.retain(|_, entry| {
            let keep = Arc::strong_count(&entry.tile) > 1;
            if !keep {
                freed += entry.size;
            }
            keep
        });
        state.resident_bytes -= freed;
        let dropped = before - state.resident.len();
        self.evictions.fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }

    pub fn resident_bytes(&self) -> usize {
        self.state.lock().resident_bytes
    }

    pub fn resident_count(&self) -> usize {
        self.state.lock().resident.len()
    }

    pub fn is_resident(&self, id: GraphId) -> bool {
        self.state.lock().resident.contains_key(&id.tile_base())
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident_tiles: state.resident.len(),
            resident_bytes: state.resident_bytes,
            budget_bytes: self.budget,
        }
    }

    /// Whether the tile is resident or present in the backing store
    pub fn tile_exists(&self, id: GraphId) -> bool {
        id.is_valid() && (self.is_resident(id) || self.source.exists(id.tile_base()))
    }

    /// Tiles present at `level`, ascending by index
    pub fn tile_set(&self, level: u8) -> Result<TileSet> {
        if butterfly_io::hierarchy::level(level).is_none() {
            return Err(Error::InvalidArgument(format!(
                "level {level} is not in the hierarchy"
            )));
        }
        let indexes = self.source.enumerate(level)?;
        Ok(TileSet {
            level,
            indexes: indexes.into_iter(),
        })
    }

    pub fn directed_edge(&self, id: GraphId) -> Result<DirectedEdge> {
        self.get_tile(id)?.directed_edge(id.index())
    }

    pub fn node(&self, id: GraphId) -> Result<Node> {
        self.get_tile(id)?.node(id.index())
    }

    pub fn edge_end_node(&self, edge: GraphId) -> Result<GraphId> {
        Ok(self.directed_edge(edge)?.end_node)
    }

    pub fn edge_start_node(&self, edge: GraphId) -> Result<GraphId> {
        let tile = self.get_tile(edge)?;
        Ok(tile.id().with_index(tile.edge_start_node(edge.index())?))
    }
}

/// Tile ids present at one level
#[derive(Debug, Clone)]
pub struct TileSet {
    level: u8,
    indexes: std::vec::IntoIter<u32>,
}

impl Iterator for TileSet {
    type Item = GraphId;

    fn next(&mut self) -> Option<GraphId> {
        self.indexes
            .next()
            .map(|index| GraphId::new(self.level, index, 0))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indexes.size_hint()
    }
}

impl ExactSizeIterator for TileSet {}
