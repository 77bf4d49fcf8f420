//! Tile cache behaviour under concurrent access

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use butterfly_common::{GraphId, Result};
use butterfly_io::{MemTileStore, RoadClass, TileBuffer, TileSource};
use butterfly_routing::{GraphReader, ReaderConfig};
use common::{road, Fixture};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Counts reads and holds each one open briefly so callers pile up
struct SlowSource {
    inner: MemTileStore,
    reads: AtomicUsize,
    delay: Duration,
}

impl SlowSource {
    fn new(inner: MemTileStore, delay: Duration) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            delay,
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl TileSource for SlowSource {
    fn read(&self, tile: GraphId) -> Result<TileBuffer> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.inner.read(tile)
    }

    fn enumerate(&self, level: u8) -> Result<Vec<u32>> {
        self.inner.enumerate(level)
    }
}

/// One small road per level-2 tile along a row of `tiles` tiles
fn row_of_tiles(tiles: usize) -> (MemTileStore, Vec<GraphId>) {
    let mut f = Fixture::new(2);
    for t in 0..tiles {
        let lon = 0.1 + 0.25 * t as f64;
        let a = f.node(0.1, lon);
        let b = f.node(0.11, lon);
        f.two_way(a, b, road(100, 30, RoadClass::Residential));
    }
    let built = f.build();
    let tiles = built.tiles();
    (built.store, tiles)
}

#[test]
fn test_concurrent_misses_share_one_load() {
    let (store, tiles) = row_of_tiles(1);
    let source = Arc::new(SlowSource::new(store, Duration::from_millis(50)));
    let reader = Arc::new(GraphReader::new(Arc::clone(&source), &ReaderConfig::default()).unwrap());

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let reader = Arc::clone(&reader);
            let barrier = Arc::clone(&barrier);
            let tile = tiles[0];
            thread::spawn(move || {
                barrier.wait();
                reader.get_tile(tile).unwrap()
            })
        })
        .collect();
    let loaded: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(source.reads(), 1);
    assert!(loaded.iter().all(|t| Arc::ptr_eq(t, &loaded[0])));
    assert_eq!(reader.resident_count(), 1);
    assert_eq!(reader.stats().loads, 1);
}

#[test]
fn test_concurrent_misses_share_errors() {
    let source = Arc::new(SlowSource::new(MemTileStore::new(), Duration::from_millis(20)));
    let reader = Arc::new(GraphReader::new(Arc::clone(&source), &ReaderConfig::default()).unwrap());

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let reader = Arc::clone(&reader);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                reader.get_tile(GraphId::new(2, 4_242, 0))
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().unwrap_err().is_not_found());
    }
    assert!(source.reads() >= 1);
    assert!(source.reads() <= threads);
    assert_eq!(reader.resident_count(), 0);
}

#[test]
fn test_distinct_tiles_load_in_parallel() {
    let (store, tiles) = row_of_tiles(4);
    let source = Arc::new(SlowSource::new(store, Duration::from_millis(10)));
    let reader = Arc::new(GraphReader::new(Arc::clone(&source), &ReaderConfig::default()).unwrap());

    let handles: Vec<_> = tiles
        .iter()
        .map(|&tile| {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.get_tile(tile).unwrap().id())
        })
        .collect();
    let mut ids: Vec<GraphId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();

    assert_eq!(ids, tiles);
    assert_eq!(source.reads(), 4);
    assert_eq!(reader.resident_count(), 4);
}

#[test]
fn test_budget_holds_after_trim_under_load() {
    let (store, tiles) = row_of_tiles(12);
    let tile_size = store.read(tiles[0]).unwrap().len();
    let budget = 3 * tile_size;
    let reader = Arc::new(GraphReader::new(store, &ReaderConfig::with_budget(budget)).unwrap());
    let tiles = Arc::new(tiles);

    let handles: Vec<_> = (0..6u64)
        .map(|seed| {
            let reader = Arc::clone(&reader);
            let tiles = Arc::clone(&tiles);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..300 {
                    let tile = tiles[rng.gen_range(0..tiles.len())];
                    let held = reader.get_tile(tile).unwrap();
                    assert_eq!(held.id(), tile);
                    drop(held);
                    if reader.is_over_committed() {
                        reader.trim();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = reader.trim();
    assert!(stats.resident_bytes <= budget);
    assert!(!reader.is_over_committed());
    assert!(reader.stats().evictions > 0);
}

#[test]
fn test_held_tiles_outlive_eviction() {
    let (store, tiles) = row_of_tiles(3);
    let tile_size = store.read(tiles[0]).unwrap().len();
    let reader = GraphReader::new(store, &ReaderConfig::with_budget(tile_size)).unwrap();

    let first = reader.get_tile(tiles[0]).unwrap();
    for &tile in &tiles[1..] {
        drop(reader.get_tile(tile).unwrap());
    }
    let stats = reader.trim();
    assert_eq!(stats.evicted_tiles, 2);
    assert_eq!(stats.pinned_tiles, 1);
    assert!(reader.is_resident(tiles[0]));

    // Let go of the last reference: the tile becomes evictable
    drop(first);
    drop(reader.get_tile(tiles[1]).unwrap());
    let stats = reader.trim();
    assert_eq!(stats.evicted_tiles, 1);
    assert!(!reader.is_resident(tiles[0]));
    assert!(reader.is_resident(tiles[1]));
}

#[test]
fn test_eviction_follows_recency_not_insertion() {
    let (store, tiles) = row_of_tiles(4);
    let tile_size = store.read(tiles[0]).unwrap().len();
    let reader = GraphReader::new(store, &ReaderConfig::with_budget(2 * tile_size)).unwrap();

    for &tile in &tiles {
        drop(reader.get_tile(tile).unwrap());
    }
    // Oldest inserted, most recently used
    drop(reader.get_tile(tiles[0]).unwrap());
    reader.trim();

    assert!(reader.is_resident(tiles[0]));
    assert!(!reader.is_resident(tiles[1]));
    assert!(!reader.is_resident(tiles[2]));
    assert!(reader.is_resident(tiles[3]));
}
