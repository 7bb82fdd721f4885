//! Transfer Transactions
//!
//! Moves money between two accounts as one indivisible database transaction:
//! a transfer record, a debit and a credit entry, and both balance updates
//! commit together or not at all.
//!
//! # Safety Invariants
//!
//! 1. **Conservation**: the two entries of a transfer sum to zero
//! 2. **Locked arithmetic**: new balances derive from rows read under lock in
//!    the same transaction, never from an earlier read
//! 3. **Lock order**: account rows are always locked lower ID first
//! 4. **All-or-nothing**: any failure rolls back every write

pub mod coordinator;
pub mod error;
pub mod state;
pub mod types;


pub use coordinator::TransferCoordinator;
pub use error::TransferError;
pub use state::TransferTxState;
pub use types::{TransferTxParams, TransferTxResult, TxTrace};
