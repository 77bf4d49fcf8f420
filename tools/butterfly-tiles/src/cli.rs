//! Command-line definitions

use std::path::PathBuf;

use butterfly_common::GraphId;
use butterfly_io::access;
use butterfly_routing::{Config, ContractConfig, ReaderConfig};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "butterfly-tiles")]
#[command(about = "Inspect tiled routing graphs and build their shortcut hierarchy", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Root of the tile tree
    #[arg(long, global = true)]
    pub tiles: Option<PathBuf>,

    /// TOML file with [reader] and [contract] sections
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tile cache budget in bytes
    #[arg(long, global = true)]
    pub cache_budget: Option<usize>,

    /// Memory-map tile files
    #[arg(long, global = true)]
    pub mmap: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rebuild the shortcuts of one level in place
    Contract {
        #[arg(long)]
        level: u8,
        /// Travel mode a shortcut must allow
        #[arg(long, value_enum)]
        mode: Option<Mode>,
        /// Split chains longer than this
        #[arg(long)]
        max_chain_edges: Option<usize>,
    },
    /// Expand a shortcut (level/tile/index) into its original edges
    Recover {
        id: GraphId,
    },
    /// List the shortcuts of a level
    Shortcuts {
        #[arg(long)]
        level: u8,
        #[arg(long, value_enum, default_value = "auto")]
        mode: Mode,
        /// Also print each shortcut's original edges
        #[arg(long)]
        expand: bool,
    },
    /// Print a tile's header and counts
    Info {
        /// Any id inside the tile (level/tile/index)
        tile: GraphId,
    },
    /// Recover every shortcut of a level and check its speed
    Verify {
        #[arg(long)]
        level: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Auto,
    Truck,
    Bicycle,
    Pedestrian,
    Bus,
    All,
}

impl Mode {
    pub fn mask(self) -> u16 {
        match self {
            Mode::Auto => access::AUTO,
            Mode::Truck => access::TRUCK,
            Mode::Bicycle => access::BICYCLE,
            Mode::Pedestrian => access::PEDESTRIAN,
            Mode::Bus => access::BUS,
            Mode::All => access::ALL,
        }
    }
}

impl Cli {
    /// File settings with command-line overrides applied
    pub fn resolve_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        self.apply_reader(&mut config.reader);
        if let Commands::Contract {
            mode,
            max_chain_edges,
            ..
        } = &self.command
        {
            apply_contract(&mut config.contract, *mode, *max_chain_edges);
        }
        config.reader.validate()?;
        config.contract.validate()?;
        Ok(config)
    }

    fn apply_reader(&self, reader: &mut ReaderConfig) {
        if let Some(dir) = &self.tiles {
            reader.tile_dir = Some(dir.clone());
        }
        if let Some(budget) = self.cache_budget {
            reader.cache_budget_bytes = budget;
        }
        if self.mmap {
            reader.use_mmap = true;
        }
    }
}

fn apply_contract(contract: &mut ContractConfig, mode: Option<Mode>, max_chain_edges: Option<usize>) {
    if let Some(mode) = mode {
        contract.access_mask = mode.mask();
    }
    if let Some(max) = max_chain_edges {
        contract.max_chain_edges = max;
    }
}
