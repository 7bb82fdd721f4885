//! Transfer transaction value types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::{Account, Entry, Transfer};

/// Input to a transfer transaction
///
/// `amount` is in currency minor units and is expected to be positive; the
/// caller validates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

impl TransferTxParams {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Account IDs in lock-acquisition order (lower ID first)
    #[inline]
    pub fn lock_order(&self) -> [i64; 2] {
        if self.from_account_id < self.to_account_id {
            [self.from_account_id, self.to_account_id]
        } else {
            [self.to_account_id, self.from_account_id]
        }
    }
}

/// Everything a committed transfer wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// Optional correlation label attached to a transfer's log span
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxTrace {
    pub name: Option<String>,
}

impl TxTrace {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl fmt::Display for TxTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => f.write_str("-"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_order_is_independent_of_direction() {
        assert_eq!(TransferTxParams::new(1, 2, 10).lock_order(), [1, 2]);
        assert_eq!(TransferTxParams::new(2, 1, 10).lock_order(), [1, 2]);
        assert_eq!(TransferTxParams::new(900, 35, 10).lock_order(), [35, 900]);
    }

    #[test]
    fn test_trace_display() {
        assert_eq!(TxTrace::named("tx 7").to_string(), "tx 7");
        assert_eq!(TxTrace::default().to_string(), "-");
    }

    #[test]
    fn test_params_json_field_names() {
        let params: TransferTxParams = serde_json::from_str(
            r#"{"from_account_id": 1, "to_account_id": 2, "amount": 10}"#,
        )
        .unwrap();
        assert_eq!(params, TransferTxParams::new(1, 2, 10));
    }
}
