//! Reader and contraction settings
//!
//! Both sections can be loaded from one TOML file:
//!
//! ```toml
//! [reader]
//! cache_budget_bytes = 536870912   # evict oldest-unused tiles once exceeded
//! tile_dir = "/data/tiles"
//! use_mmap = false
//!
//! [contract]
//! access_mask = 1                  # modes a shortcut must be traversable by
//! max_chain_edges = 64
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use butterfly_common::{Error, Result};
use butterfly_io::access;
use serde::{Deserialize, Serialize};

/// Default resident byte budget: 1 GiB
pub const DEFAULT_CACHE_BUDGET: usize = 1 << 30;

/// Tile cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Evict oldest-unused tiles once resident bytes exceed this
    pub cache_budget_bytes: usize,
    /// Root of the on-disk tile tree
    pub tile_dir: Option<PathBuf>,
    /// Memory-map tile files instead of reading them into owned buffers
    pub use_mmap: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            cache_budget_bytes: DEFAULT_CACHE_BUDGET,
            tile_dir: None,
            use_mmap: false,
        }
    }
}

impl ReaderConfig {
    pub fn with_budget(cache_budget_bytes: usize) -> Self {
        Self {
            cache_budget_bytes,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_budget_bytes == 0 {
            return Err(Error::ResourceExhausted(
                "cache_budget_bytes is 0; the cache could not hold a single tile".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shortcut contraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractConfig {
    /// Access bits an edge must allow in its own direction to be contracted
    pub access_mask: u16,
    /// Longer chains are split into several shortcuts
    pub max_chain_edges: usize,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            access_mask: access::AUTO,
            max_chain_edges: 64,
        }
    }
}

impl ContractConfig {
    pub fn validate(&self) -> Result<()> {
        if self.access_mask == 0 {
            return Err(Error::Config("access_mask must name at least one mode".to_string()));
        }
        if self.max_chain_edges < 2 {
            return Err(Error::Config(format!(
                "max_chain_edges must be at least 2, got {}",
                self.max_chain_edges
            )));
        }
        Ok(())
    }
}

/// Full configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reader: ReaderConfig,
    pub contract: ContractConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.reader.validate()?;
        config.contract.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
