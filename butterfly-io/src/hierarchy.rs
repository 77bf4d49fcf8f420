//! Tile hierarchy: fixed world grids per level
//!
//! Level 0 carries the highway network on 4° tiles, level 1 arterial roads
//! on 1° tiles, level 2 everything else on 0.25° tiles. Tile indexes count
//! row-major from (-90, -180).

use butterfly_common::GraphId;

use crate::format::{RoadClass, TileBounds};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileLevel {
    pub level: u8,
    pub name: &'static str,
    /// Tile edge length in degrees
    pub tile_size: f64,
    /// Least important road class routed on this level
    pub min_importance: RoadClass,
}

pub const LEVELS: [TileLevel; 3] = [
    TileLevel {
        level: 0,
        name: "highway",
        tile_size: 4.0,
        min_importance: RoadClass::Primary,
    },
    TileLevel {
        level: 1,
        name: "arterial",
        tile_size: 1.0,
        min_importance: RoadClass::Tertiary,
    },
    TileLevel {
        level: 2,
        name: "local",
        tile_size: 0.25,
        min_importance: RoadClass::Service,
    },
];

/// Level description, `None` for levels outside the hierarchy
pub fn level(level: u8) -> Option<&'static TileLevel> {
    LEVELS.iter().find(|l| l.level == level)
}

impl TileLevel {
    pub fn columns(&self) -> u32 {
        (360.0 / self.tile_size).round() as u32
    }

    pub fn rows(&self) -> u32 {
        (180.0 / self.tile_size).round() as u32
    }

    pub fn tile_count(&self) -> u32 {
        self.columns() * self.rows()
    }

    pub fn max_tile_index(&self) -> u32 {
        self.tile_count() - 1
    }

    /// Whether a road of `class` belongs on this level
    pub fn includes(&self, class: RoadClass) -> bool {
        class.at_least(self.min_importance)
    }

    /// Tile index containing a coordinate
    pub fn tile_index(&self, lat: f64, lon: f64) -> Option<u32> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        let col = (((lon + 180.0) / self.tile_size) as u32).min(self.columns() - 1);
        let row = (((lat + 90.0) / self.tile_size) as u32).min(self.rows() - 1);
        Some(row * self.columns() + col)
    }

    /// Tile base id containing a coordinate
    pub fn tile_id(&self, lat: f64, lon: f64) -> Option<GraphId> {
        self.tile_index(lat, lon)
            .map(|index| GraphId::new(self.level, index, 0))
    }

    pub fn tile_bounds(&self, tile_index: u32) -> TileBounds {
        let row = tile_index / self.columns();
        let col = tile_index % self.columns();
        let min_lat = -90.0 + row as f64 * self.tile_size;
        let min_lon = -180.0 + col as f64 * self.tile_size;
        TileBounds::new(min_lat, min_lon, min_lat + self.tile_size, min_lon + self.tile_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_grid_sizes() {
        assert_eq!(level(0).unwrap().tile_count(), 90 * 45);
        assert_eq!(level(1).unwrap().tile_count(), 360 * 180);
        assert_eq!(level(2).unwrap().max_tile_index(), 1_036_799);
        assert!(level(3).is_none());
    }

    #[test]
    fn test_brussels_tile() {
        let local = level(2).unwrap();
        let index = local.tile_index(50.8503, 4.3517).unwrap();
        let bounds = local.tile_bounds(index);
        assert!(bounds.contains(50.8503, 4.3517));
        assert!((bounds.max_lat - bounds.min_lat - 0.25).abs() < 1e-9);
        assert_eq!(local.tile_id(50.8503, 4.3517).unwrap().level(), 2);
    }

    #[test]
    fn test_antimeridian_and_pole_clamp() {
        let highway = level(0).unwrap();
        assert_eq!(highway.tile_index(90.0, 180.0), Some(highway.max_tile_index()));
        assert_eq!(highway.tile_index(-90.0, -180.0), Some(0));
        assert!(highway.tile_index(91.0, 0.0).is_none());
    }

    #[test]
    fn test_level_includes_road_classes() {
        let highway = level(0).unwrap();
        assert!(highway.includes(RoadClass::Motorway));
        assert!(!highway.includes(RoadClass::Service));
        assert!(level(2).unwrap().includes(RoadClass::Service));
    }
}
