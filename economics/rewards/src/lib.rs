pub mod chain;
pub mod config;
pub mod db;
pub mod evaluator;
pub mod ledger;
pub mod params;
pub mod pending;
pub mod sync;
pub mod types;

pub use chain::{dispatch, ChainEvent, ChainListener, EventOutcome};
pub use config::{ConfigError, LedgerConfig, WeightScheme};
pub use ledger::{LedgerStats, PreparedRollback, SmartRewards};
pub use params::{ChainParams, Network};
pub use sync::SyncState;
pub use types::*;
