//! Transfer transaction errors

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Source and destination account are the same: {0}")]
    SameAccount(i64),

    #[error("Balance of account {account_id} would overflow")]
    BalanceOverflow { account_id: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The transaction failed and aborting it failed too
    #[error("tx err: {cause}, rb err: {rollback}")]
    RollbackFailed {
        cause: Box<TransferError>,
        rollback: StoreError,
    },
}

impl TransferError {
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::SameAccount(_) => "SAME_ACCOUNT",
            TransferError::BalanceOverflow { .. } => "BALANCE_OVERFLOW",
            TransferError::Store(StoreError::NotFound { .. }) => "NOT_FOUND",
            TransferError::Store(StoreError::ForeignKeyViolation(_)) => "FOREIGN_KEY_VIOLATION",
            TransferError::Store(_) => "STORAGE_ERROR",
            TransferError::RollbackFailed { .. } => "ROLLBACK_FAILED",
        }
    }

    /// The error that aborted the transaction, looking through a failed
    /// rollback
    pub fn root_cause(&self) -> &TransferError {
        match self {
            TransferError::RollbackFailed { cause, .. } => cause.as_ref(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::SameAccount(1).code(), "SAME_ACCOUNT");
        assert_eq!(
            TransferError::from(StoreError::not_found("account", 3)).code(),
            "NOT_FOUND"
        );
        assert_eq!(
            TransferError::from(StoreError::Unavailable("down".into())).code(),
            "STORAGE_ERROR"
        );
    }

    #[test]
    fn test_rollback_failed_carries_both_errors() {
        let err = TransferError::RollbackFailed {
            cause: Box::new(StoreError::not_found("account", 9).into()),
            rollback: StoreError::Unavailable("connection reset".into()),
        };
        assert_eq!(
            err.to_string(),
            "tx err: account 9 not found, rb err: Storage unavailable: connection reset"
        );
        assert_eq!(err.root_cause().code(), "NOT_FOUND");
    }
}
