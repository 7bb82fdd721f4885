//! Query Gateway
//!
//! Single-row reads and writes against accounts, entries and transfers.
//!
//! # Layers
//!
//! - [`Store`] opens a database transaction and hands back a [`StoreTx`].
//! - [`StoreTx`] is a transaction-scoped [`Queries`] handle that ends in
//!   exactly one `commit` or `rollback`. Dropping it uncommitted rolls back.
//! - Backends: [`PgStore`] (PostgreSQL) and [`MemoryStore`] (in-process,
//!   same locking and visibility rules, with failure injection).
//!
//! Row locks taken by [`Queries::get_account_for_update`] are held until the
//! owning transaction ends.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;

pub use error::StoreError;
pub use memory::{Fault, LockRequest, MemoryStore, MemoryTx};
pub use models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, Transfer, UpdateAccountParams,
};
pub use postgres::{PgStore, PgTx};

use async_trait::async_trait;

/// Transaction-scoped query interface
#[async_trait]
pub trait Queries: Send {
    /// Insert a transfer record
    async fn create_transfer(&mut self, arg: CreateTransferParams)
    -> Result<Transfer, StoreError>;

    /// Insert a ledger entry
    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError>;

    /// Read an account and take its exclusive row lock
    ///
    /// Blocks while another transaction holds the lock. Requesting a row
    /// already locked by this transaction returns immediately.
    async fn get_account_for_update(&mut self, account_id: i64) -> Result<Account, StoreError>;

    /// Overwrite an account balance, returning the updated row
    async fn update_account(&mut self, arg: UpdateAccountParams) -> Result<Account, StoreError>;
}

/// An open transaction
#[async_trait]
pub trait StoreTx: Queries + Sized {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Transaction factory shared by concurrent callers
#[async_trait]
pub trait Store: Send + Sync {
    type Tx: StoreTx;

    /// Open a new transaction
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}
