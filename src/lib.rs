//! simple_bank - atomic ledger transfers on PostgreSQL
//!
//! Moves money between two accounts as one database transaction: a transfer
//! record, two matching ledger entries and both balance updates commit
//! together, and concurrent transfers over overlapping accounts never
//! deadlock.
//!
//! # Modules
//!
//! - [`store`] - Query gateway (accounts, entries, transfers; row locks)
//! - [`transfer`] - Transfer coordinator (lock ordering, commit/rollback)
//! - [`db`] - Connection pool and schema
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod store;
pub mod transfer;

// Convenient re-exports at crate root
pub use store::{Account, Entry, MemoryStore, PgStore, Store, StoreError, Transfer};
pub use transfer::{
    TransferCoordinator, TransferError, TransferTxParams, TransferTxResult, TransferTxState,
    TxTrace,
};
