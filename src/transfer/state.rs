//! Transfer transaction states

use std::fmt;

/// Progress of a single transfer transaction
///
/// ```text
/// STARTED → TRANSFER_CREATED → FROM_ENTRY_CREATED → TO_ENTRY_CREATED
///         → ACCOUNTS_LOCKED → BALANCES_UPDATED → COMMITTED
///
/// any non-terminal state ──error──▶ ROLLED_BACK
///                          └─rollback error──▶ FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferTxState {
    Started,
    TransferCreated,
    FromEntryCreated,
    ToEntryCreated,
    AccountsLocked,
    BalancesUpdated,
    /// Terminal: all writes visible
    Committed,
    /// Terminal: no writes visible
    RolledBack,
    /// Terminal: the rollback itself errored
    Failed,
}

impl TransferTxState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferTxState::Committed | TransferTxState::RolledBack | TransferTxState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferTxState::Started => "STARTED",
            TransferTxState::TransferCreated => "TRANSFER_CREATED",
            TransferTxState::FromEntryCreated => "FROM_ENTRY_CREATED",
            TransferTxState::ToEntryCreated => "TO_ENTRY_CREATED",
            TransferTxState::AccountsLocked => "ACCOUNTS_LOCKED",
            TransferTxState::BalancesUpdated => "BALANCES_UPDATED",
            TransferTxState::Committed => "COMMITTED",
            TransferTxState::RolledBack => "ROLLED_BACK",
            TransferTxState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransferTxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransferTxState::Committed.is_terminal());
        assert!(TransferTxState::RolledBack.is_terminal());
        assert!(TransferTxState::Failed.is_terminal());

        assert!(!TransferTxState::Started.is_terminal());
        assert!(!TransferTxState::TransferCreated.is_terminal());
        assert!(!TransferTxState::AccountsLocked.is_terminal());
        assert!(!TransferTxState::BalancesUpdated.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferTxState::Started.to_string(), "STARTED");
        assert_eq!(TransferTxState::AccountsLocked.to_string(), "ACCOUNTS_LOCKED");
        assert_eq!(TransferTxState::RolledBack.to_string(), "ROLLED_BACK");
    }
}
