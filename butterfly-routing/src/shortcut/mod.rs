//! Shortcut edges: contraction at build time, recovery at query time

pub mod builder;
pub mod recover;

pub use builder::{
    contract, contract_with, ContractStats, NodeTurnDelay, ShortcutBuilder, TurnDelay,
    TurnDelayFn,
};
pub use recover::{find_shortcuts, recover, verify_level, VerifyReport};
