//! In-process query gateway
//!
//! Same transactional rules as the PostgreSQL backend:
//!
//! - each account row has an exclusive lock, taken by
//!   `get_account_for_update` / `update_account` and held until the owning
//!   transaction commits or rolls back; re-requesting a held row is a no-op
//! - writes are buffered in the transaction and published together at commit
//! - an account cannot be deleted while a transaction holds its lock or has
//!   staged an entry or transfer that references it
//! - IDs come from sequences, so a rolled-back insert still consumes its ID
//!
//! Failures can be injected at any gateway call with [`Fault`], and every lock
//! request is recorded as a [`LockRequest`].

use std::collections::HashMap;
use std::collections::hash_map::Entry as Slot;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::error::StoreError;
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, Transfer, UpdateAccountParams,
};
use super::{Queries, Store, StoreTx};

/// Injectable failure point
///
/// Account-scoped faults fire only for the given account ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Begin,
    CreateTransfer,
    CreateEntry(i64),
    LockAccount(i64),
    UpdateAccount(i64),
    Commit,
    Rollback,
}

/// One `get_account_for_update` call, in request order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    pub tx_id: u64,
    pub account_id: i64,
}

struct AccountRow {
    lock: Arc<tokio::sync::Mutex<()>>,
    committed: Mutex<Account>,
    /// Uncommitted entries and transfers pointing at this row
    staged_refs: AtomicUsize,
}

/// Staged reference to an account row, released when the transaction ends
struct RowRef(Arc<AccountRow>);

impl Drop for RowRef {
    fn drop(&mut self) {
        self.0.staged_refs.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Inner {
    accounts: Mutex<HashMap<i64, Arc<AccountRow>>>,
    entries: Mutex<Vec<Entry>>,
    transfers: Mutex<Vec<Transfer>>,
    /// Commits publish under the write half; reads take the read half.
    visibility: RwLock<()>,
    faults: Mutex<Vec<Fault>>,
    lock_log: Mutex<Vec<LockRequest>>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    tx_seq: AtomicU64,
}

fn acquire<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn check(&self, fault: Fault) -> Result<(), StoreError> {
        if acquire(&self.faults).contains(&fault) {
            debug!(?fault, "Injected storage failure");
            return Err(StoreError::Unavailable(format!(
                "injected failure at {:?}",
                fault
            )));
        }
        Ok(())
    }

    fn row(&self, id: i64) -> Option<Arc<AccountRow>> {
        acquire(&self.accounts).get(&id).cloned()
    }

    /// Foreign key check for a staged insert. Taken under the accounts map
    /// so a concurrent delete either sees the reference or wins first.
    fn reference_account(&self, table: &str, id: i64) -> Result<RowRef, StoreError> {
        let accounts = acquire(&self.accounts);
        let row = accounts.get(&id).ok_or_else(|| {
            StoreError::ForeignKeyViolation(format!(
                "insert into {} references missing account {}",
                table, id
            ))
        })?;
        row.staged_refs.fetch_add(1, Ordering::SeqCst);
        Ok(RowRef(row.clone()))
    }

    fn committed_refs(&self, id: i64) -> bool {
        acquire(&self.entries).iter().any(|e| e.account_id == id)
            || acquire(&self.transfers)
                .iter()
                .any(|t| t.from_account_id == id || t.to_account_id == id)
    }

    fn read_committed(&self, row: &AccountRow) -> Account {
        let _visible = self
            .visibility
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        acquire(&row.committed).clone()
    }
}

/// In-process store, cheap to clone (shared state)
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future call matching `fault` fail until cleared
    pub fn inject(&self, fault: Fault) {
        acquire(&self.inner.faults).push(fault);
    }

    pub fn clear_faults(&self) {
        acquire(&self.inner.faults).clear();
    }

    /// Lock requests observed so far, in the order they were issued
    pub fn lock_requests(&self) -> Vec<LockRequest> {
        acquire(&self.inner.lock_log).clone()
    }

    pub async fn create_account(&self, arg: CreateAccountParams) -> Result<Account, StoreError> {
        let id = self.inner.account_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let account = Account {
            id,
            owner: arg.owner,
            balance: arg.balance,
            currency: arg.currency,
            created_at: Utc::now(),
        };
        let row = AccountRow {
            lock: Arc::new(tokio::sync::Mutex::new(())),
            committed: Mutex::new(account.clone()),
            staged_refs: AtomicUsize::new(0),
        };
        acquire(&self.inner.accounts).insert(id, Arc::new(row));
        Ok(account)
    }

    pub async fn get_account(&self, id: i64) -> Result<Account, StoreError> {
        let row = self
            .inner
            .row(id)
            .ok_or_else(|| StoreError::not_found("account", id))?;
        Ok(self.inner.read_committed(&row))
    }

    pub async fn list_accounts(&self, arg: ListAccountsParams) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<Arc<AccountRow>> = acquire(&self.inner.accounts).values().cloned().collect();
        let mut accounts: Vec<Account> = rows
            .iter()
            .map(|row| self.inner.read_committed(row))
            .collect();
        accounts.sort_by_key(|a| a.id);

        Ok(accounts
            .into_iter()
            .skip(arg.offset.max(0) as usize)
            .take(arg.limit.max(0) as usize)
            .collect())
    }

    /// Waits for any transaction holding the row lock, then fails with a
    /// foreign key violation while committed or staged entries and transfers
    /// still reference the account.
    pub async fn delete_account(&self, id: i64) -> Result<(), StoreError> {
        let row = self
            .inner
            .row(id)
            .ok_or_else(|| StoreError::not_found("account", id))?;
        let _guard = row.lock.clone().lock_owned().await;

        let mut accounts = acquire(&self.inner.accounts);
        // Deleted by someone else while we waited
        if !accounts.get(&id).is_some_and(|current| Arc::ptr_eq(current, &row)) {
            return Err(StoreError::not_found("account", id));
        }
        if row.staged_refs.load(Ordering::SeqCst) > 0 || self.inner.committed_refs(id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "account {} is still referenced",
                id
            )));
        }
        accounts.remove(&id);
        Ok(())
    }

    pub async fn get_entry(&self, id: i64) -> Result<Entry, StoreError> {
        acquire(&self.inner.entries)
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("entry", id))
    }

    pub async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError> {
        let mut entries: Vec<Entry> = acquire(&self.inner.entries)
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    pub async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        acquire(&self.inner.transfers)
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("transfer", id))
    }

    pub async fn list_transfers(&self, account_id: i64) -> Result<Vec<Transfer>, StoreError> {
        let mut transfers: Vec<Transfer> = acquire(&self.inner.transfers)
            .iter()
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .cloned()
            .collect();
        transfers.sort_by_key(|t| t.id);
        Ok(transfers)
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        self.inner.check(Fault::Begin)?;
        let id = self.inner.tx_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemoryTx {
            id,
            inner: self.inner.clone(),
            locked: HashMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
            refs: Vec::new(),
        })
    }
}

struct LockedRow {
    row: Arc<AccountRow>,
    staged: Account,
    _guard: OwnedMutexGuard<()>,
}

/// Open in-process transaction; dropping it releases its locks and discards
/// its writes.
pub struct MemoryTx {
    id: u64,
    inner: Arc<Inner>,
    locked: HashMap<i64, LockedRow>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
    refs: Vec<RowRef>,
}

impl MemoryTx {
    /// Transaction ID as recorded in [`LockRequest::tx_id`]
    pub fn id(&self) -> u64 {
        self.id
    }

    async fn lock_row(&mut self, account_id: i64) -> Result<&mut LockedRow, StoreError> {
        match self.locked.entry(account_id) {
            Slot::Occupied(slot) => Ok(slot.into_mut()),
            Slot::Vacant(slot) => {
                let row = self
                    .inner
                    .row(account_id)
                    .ok_or_else(|| StoreError::not_found("account", account_id))?;
                let guard = row.lock.clone().lock_owned().await;
                // Read only after the lock is ours so we see the latest commit
                let staged = self.inner.read_committed(&row);
                Ok(slot.insert(LockedRow {
                    row,
                    staged,
                    _guard: guard,
                }))
            }
        }
    }
}

#[async_trait]
impl Queries for MemoryTx {
    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        self.inner.check(Fault::CreateTransfer)?;
        let from = self.inner.reference_account("transfers", arg.from_account_id)?;
        let to = self.inner.reference_account("transfers", arg.to_account_id)?;
        self.refs.extend([from, to]);

        let transfer = Transfer {
            id: self.inner.transfer_seq.fetch_add(1, Ordering::SeqCst) + 1,
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        self.inner.check(Fault::CreateEntry(arg.account_id))?;
        let account = self.inner.reference_account("entries", arg.account_id)?;
        self.refs.push(account);

        let entry = Entry {
            id: self.inner.entry_seq.fetch_add(1, Ordering::SeqCst) + 1,
            account_id: arg.account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_account_for_update(&mut self, account_id: i64) -> Result<Account, StoreError> {
        self.inner.check(Fault::LockAccount(account_id))?;
        acquire(&self.inner.lock_log).push(LockRequest {
            tx_id: self.id,
            account_id,
        });

        let locked = self.lock_row(account_id).await?;
        Ok(locked.staged.clone())
    }

    async fn update_account(&mut self, arg: UpdateAccountParams) -> Result<Account, StoreError> {
        self.inner.check(Fault::UpdateAccount(arg.id))?;

        let locked = self.lock_row(arg.id).await?;
        locked.staged.balance = arg.balance;
        Ok(locked.staged.clone())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self) -> Result<(), StoreError> {
        // A failed commit leaves nothing behind, like a server-side abort
        self.inner.check(Fault::Commit)?;

        let MemoryTx {
            id,
            inner,
            locked,
            transfers,
            entries,
            refs,
        } = self;

        {
            let _publish = inner
                .visibility
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for row in locked.values() {
                *acquire(&row.row.committed) = row.staged.clone();
            }
            acquire(&inner.entries).extend(entries);
            acquire(&inner.transfers).extend(transfers);
        }

        debug!(tx_id = id, rows = locked.len(), "Memory transaction committed");
        // Row locks are released here, after the writes are visible
        drop(refs);
        drop(locked);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        let result = self.inner.check(Fault::Rollback);
        if let Err(e) = &result {
            warn!(tx_id = self.id, error = %e, "Memory rollback failed");
        }
        // Locks and buffered writes go away either way
        drop(self);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn seeded(balances: &[i64]) -> (MemoryStore, Vec<Account>) {
        let store = MemoryStore::new();
        let mut accounts = Vec::new();
        for (i, balance) in balances.iter().enumerate() {
            let account = store
                .create_account(CreateAccountParams {
                    owner: format!("owner{}", i),
                    currency: "USD".to_string(),
                    balance: *balance,
                })
                .await
                .unwrap();
            accounts.push(account);
        }
        (store, accounts)
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let (store, accounts) = seeded(&[100]).await;
        let id = accounts[0].id;

        let mut tx = store.begin().await.unwrap();
        tx.create_entry(CreateEntryParams {
            account_id: id,
            amount: -5,
        })
        .await
        .unwrap();
        tx.update_account(UpdateAccountParams { id, balance: 95 })
            .await
            .unwrap();

        assert_eq!(store.get_account(id).await.unwrap().balance, 100);
        assert!(store.list_entries(id).await.unwrap().is_empty());

        tx.commit().await.unwrap();

        assert_eq!(store.get_account(id).await.unwrap().balance, 95);
        assert_eq!(store.list_entries(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let (store, accounts) = seeded(&[100, 200]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);

        let mut tx = store.begin().await.unwrap();
        tx.create_transfer(CreateTransferParams {
            from_account_id: a,
            to_account_id: b,
            amount: 1,
        })
        .await
        .unwrap();
        tx.update_account(UpdateAccountParams { id: a, balance: 0 })
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.get_account(a).await.unwrap().balance, 100);
        assert!(store.list_transfers(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_is_reentrant_within_transaction() {
        let (store, accounts) = seeded(&[100]).await;
        let id = accounts[0].id;

        let mut tx = store.begin().await.unwrap();
        tx.get_account_for_update(id).await.unwrap();
        tx.update_account(UpdateAccountParams { id, balance: 1 })
            .await
            .unwrap();
        // Sees its own staged write
        let again = tx.get_account_for_update(id).await.unwrap();
        assert_eq!(again.balance, 1);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_blocks_other_transaction_until_commit() {
        let (store, accounts) = seeded(&[100]).await;
        let id = accounts[0].id;

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(id).await.unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = waiter_store.begin().await.unwrap();
            let account = tx.get_account_for_update(id).await.unwrap();
            tx.commit().await.unwrap();
            account.balance
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "second locker must wait");

        holder
            .update_account(UpdateAccountParams { id, balance: 42 })
            .await
            .unwrap();
        holder.commit().await.unwrap();

        // Waiter observes the value committed by the holder
        assert_eq!(waiter.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let (store, accounts) = seeded(&[100]).await;
        let mut tx = store.begin().await.unwrap();

        let err = tx.get_account_for_update(999).await.unwrap_err();
        assert!(err.is_not_found());

        let err = tx
            .create_entry(CreateEntryParams {
                account_id: 999,
                amount: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation(_)));

        let err = tx
            .create_transfer(CreateTransferParams {
                from_account_id: accounts[0].id,
                to_account_id: 999,
                amount: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation(_)));
    }

    #[tokio::test]
    async fn test_injected_fault_and_clear() {
        let (store, accounts) = seeded(&[100]).await;
        let id = accounts[0].id;
        store.inject(Fault::LockAccount(id));

        let mut tx = store.begin().await.unwrap();
        let err = tx.get_account_for_update(id).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.clear_faults();
        assert!(tx.get_account_for_update(id).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_rollback_still_releases_locks() {
        let (store, accounts) = seeded(&[100]).await;
        let id = accounts[0].id;
        store.inject(Fault::Rollback);

        let mut tx = store.begin().await.unwrap();
        tx.get_account_for_update(id).await.unwrap();
        assert!(tx.rollback().await.is_err());

        let mut next = store.begin().await.unwrap();
        let locked =
            tokio::time::timeout(Duration::from_secs(1), next.get_account_for_update(id)).await;
        assert!(locked.is_ok(), "lock must be free after a failed rollback");
    }

    #[tokio::test]
    async fn test_crud_surface() {
        let (store, accounts) = seeded(&[10, 20, 30]).await;

        let page = store
            .list_accounts(ListAccountsParams::page(2, 2))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, accounts[2].id);

        store.delete_account(accounts[2].id).await.unwrap();
        assert!(
            store
                .get_account(accounts[2].id)
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            store
                .delete_account(accounts[2].id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_delete_referenced_account_rejected() {
        let (store, accounts) = seeded(&[10]).await;
        let id = accounts[0].id;

        let mut tx = store.begin().await.unwrap();
        let entry = tx
            .create_entry(CreateEntryParams {
                account_id: id,
                amount: 3,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_entry(entry.id).await.unwrap(), entry);
        assert!(matches!(
            store.delete_account(id).await.unwrap_err(),
            StoreError::ForeignKeyViolation(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_waits_for_lock_holder() {
        let (store, accounts) = seeded(&[100]).await;
        let id = accounts[0].id;

        let mut tx = store.begin().await.unwrap();
        tx.create_entry(CreateEntryParams {
            account_id: id,
            amount: -5,
        })
        .await
        .unwrap();
        tx.get_account_for_update(id).await.unwrap();
        tx.update_account(UpdateAccountParams { id, balance: 95 })
            .await
            .unwrap();

        let deleter_store = store.clone();
        let deleter = tokio::spawn(async move { deleter_store.delete_account(id).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!deleter.is_finished(), "delete must wait for the row lock");

        tx.commit().await.unwrap();

        assert!(matches!(
            deleter.await.unwrap().unwrap_err(),
            StoreError::ForeignKeyViolation(_)
        ));
        assert_eq!(store.get_account(id).await.unwrap().balance, 95);
        assert_eq!(store.list_entries(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_rejected_while_entry_staged() {
        let (store, accounts) = seeded(&[100, 200]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);

        let mut tx = store.begin().await.unwrap();
        tx.create_transfer(CreateTransferParams {
            from_account_id: a,
            to_account_id: b,
            amount: 1,
        })
        .await
        .unwrap();

        // No row lock is held, only the staged reference
        assert!(matches!(
            store.delete_account(b).await.unwrap_err(),
            StoreError::ForeignKeyViolation(_)
        ));

        tx.rollback().await.unwrap();
        store.delete_account(b).await.unwrap();
        assert!(store.get_account(b).await.unwrap_err().is_not_found());
    }
}
