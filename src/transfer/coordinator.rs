//! Transfer Coordinator
//!
//! Runs one transfer as a single database transaction:
//!
//! 1. open a transaction
//! 2. insert the transfer record
//! 3. insert the debit entry (-amount) on the source account
//! 4. insert the credit entry (+amount) on the destination account
//! 5. lock both account rows, lower account ID first
//! 6. write the new balances computed from the locked rows
//! 7. commit, or roll back on the first error
//!
//! # Deadlock avoidance
//!
//! Every transfer requests its two row locks in ascending account-ID order,
//! whichever side is the source. Two transfers over the same pair in opposite
//! directions therefore queue on the same first lock instead of each holding
//! the lock the other needs.
//!
//! No retries happen here. Balances are allowed to go negative.

use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};

use super::error::TransferError;
use super::state::TransferTxState;
use super::types::{TransferTxParams, TransferTxResult, TxTrace};
use crate::store::{
    Account, CreateEntryParams, CreateTransferParams, Queries, Store, StoreTx,
    UpdateAccountParams,
};

pub struct TransferCoordinator<S> {
    store: Arc<S>,
}

impl<S> Clone for TransferCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> TransferCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Execute a transfer with no trace label
    pub async fn transfer(
        &self,
        params: TransferTxParams,
    ) -> Result<TransferTxResult, TransferError> {
        self.transfer_traced(params, TxTrace::default()).await
    }

    /// Execute a transfer inside a `transfer_tx` span labelled with `trace`
    pub async fn transfer_traced(
        &self,
        params: TransferTxParams,
        trace: TxTrace,
    ) -> Result<TransferTxResult, TransferError> {
        let span = info_span!(
            "transfer_tx",
            tx = %trace,
            from = params.from_account_id,
            to = params.to_account_id,
            amount = params.amount
        );
        self.run(params).instrument(span).await
    }

    async fn run(&self, params: TransferTxParams) -> Result<TransferTxResult, TransferError> {
        // Locking the same row twice is backend-dependent; refuse up front
        if params.from_account_id == params.to_account_id {
            return Err(TransferError::SameAccount(params.from_account_id));
        }

        let mut tx = self.store.begin().await?;
        debug!(">> START transaction");

        let mut state = TransferTxState::Started;
        match execute(&mut tx, &params, &mut state).await {
            Ok(result) => {
                if let Err(e) = tx.commit().await {
                    // The backend has already discarded the transaction
                    error!(
                        failed_at = %state,
                        outcome = %TransferTxState::Failed,
                        error = %e,
                        "Commit failed"
                    );
                    return Err(e.into());
                }
                debug!(from = %state, to = %TransferTxState::Committed, "Transition");
                info!(
                    transfer_id = result.transfer.id,
                    from_balance = result.from_account.balance,
                    to_balance = result.to_account.balance,
                    ">> END transaction"
                );
                Ok(result)
            }
            Err(cause) => match tx.rollback().await {
                Ok(()) => {
                    warn!(
                        failed_at = %state,
                        outcome = %TransferTxState::RolledBack,
                        error = %cause,
                        "Transfer rolled back"
                    );
                    Err(cause)
                }
                Err(rollback) => {
                    error!(
                        failed_at = %state,
                        outcome = %TransferTxState::Failed,
                        error = %cause,
                        rollback_error = %rollback,
                        "Rollback failed"
                    );
                    Err(TransferError::RollbackFailed {
                        cause: Box::new(cause),
                        rollback,
                    })
                }
            },
        }
    }
}

fn advance(state: &mut TransferTxState, next: TransferTxState) {
    debug!(from = %state, to = %next, "Transition");
    *state = next;
}

/// Steps 2-6 against an open transaction. `state` is left at the last step
/// that completed.
async fn execute<Q: Queries>(
    q: &mut Q,
    params: &TransferTxParams,
    state: &mut TransferTxState,
) -> Result<TransferTxResult, TransferError> {
    let transfer = q
        .create_transfer(CreateTransferParams {
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
        })
        .await?;
    advance(state, TransferTxState::TransferCreated);

    let from_entry = q
        .create_entry(CreateEntryParams {
            account_id: params.from_account_id,
            amount: -params.amount,
        })
        .await?;
    advance(state, TransferTxState::FromEntryCreated);

    let to_entry = q
        .create_entry(CreateEntryParams {
            account_id: params.to_account_id,
            amount: params.amount,
        })
        .await?;
    advance(state, TransferTxState::ToEntryCreated);

    let (from_locked, to_locked) = lock_pair(q, params).await?;
    advance(state, TransferTxState::AccountsLocked);

    let new_from_balance = from_locked
        .balance
        .checked_sub(params.amount)
        .ok_or(TransferError::BalanceOverflow {
            account_id: from_locked.id,
        })?;
    let new_to_balance = to_locked
        .balance
        .checked_add(params.amount)
        .ok_or(TransferError::BalanceOverflow {
            account_id: to_locked.id,
        })?;

    debug!(
        account_id = from_locked.id,
        "Updating balance of fromAccount: {} -> {}", from_locked.balance, new_from_balance
    );
    let from_account = q
        .update_account(UpdateAccountParams {
            id: from_locked.id,
            balance: new_from_balance,
        })
        .await?;

    debug!(
        account_id = to_locked.id,
        "Updating balance of toAccount: {} -> {}", to_locked.balance, new_to_balance
    );
    let to_account = q
        .update_account(UpdateAccountParams {
            id: to_locked.id,
            balance: new_to_balance,
        })
        .await?;
    advance(state, TransferTxState::BalancesUpdated);

    Ok(TransferTxResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Lock both accounts in ascending ID order; returns `(from, to)`.
async fn lock_pair<Q: Queries>(
    q: &mut Q,
    params: &TransferTxParams,
) -> Result<(Account, Account), TransferError> {
    let [first, second] = params.lock_order();

    debug!(account_id = first, "Locking account");
    let first_account = q.get_account_for_update(first).await?;
    debug!(account_id = second, "Locking account");
    let second_account = q.get_account_for_update(second).await?;

    if first == params.from_account_id {
        Ok((first_account, second_account))
    } else {
        Ok((second_account, first_account))
    }
}
