//! PostgreSQL query gateway

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::error::StoreError;
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, Transfer, UpdateAccountParams,
};
use super::{Queries, Store, StoreTx};

/// PostgreSQL-backed store
///
/// Transactional work goes through [`PgTx`]; the inherent methods here are
/// single-row CRUD run directly on the pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_account(&self, arg: CreateAccountParams) -> Result<Account, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"INSERT INTO accounts (owner, balance, currency)
               VALUES ($1, $2, $3)
               RETURNING id, owner, balance, currency, created_at"#,
        )
        .bind(&arg.owner)
        .bind(arg.balance)
        .bind(&arg.currency)
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }

    pub async fn get_account(&self, id: i64) -> Result<Account, StoreError> {
        sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts WHERE id = $1 LIMIT 1"#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "account", id))
    }

    pub async fn list_accounts(&self, arg: ListAccountsParams) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts ORDER BY id LIMIT $1 OFFSET $2"#,
        )
        .bind(arg.limit)
        .bind(arg.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn delete_account(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("account", id));
        }
        Ok(())
    }

    pub async fn get_entry(&self, id: i64) -> Result<Entry, StoreError> {
        sqlx::query_as::<_, Entry>(
            r#"SELECT id, account_id, amount, created_at
               FROM entries WHERE id = $1 LIMIT 1"#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "entry", id))
    }

    /// All entries recorded against an account, oldest first
    pub async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query_as::<_, Entry>(
            r#"SELECT id, account_id, amount, created_at
               FROM entries WHERE account_id = $1 ORDER BY id"#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        sqlx::query_as::<_, Transfer>(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers WHERE id = $1 LIMIT 1"#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "transfer", id))
    }

    /// Transfers touching an account in either direction, oldest first
    pub async fn list_transfers(&self, account_id: i64) -> Result<Vec<Transfer>, StoreError> {
        let rows = sqlx::query_as::<_, Transfer>(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers
               WHERE from_account_id = $1 OR to_account_id = $1
               ORDER BY id"#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }
}

/// Open PostgreSQL transaction
///
/// Wraps `sqlx::Transaction`, which rolls back on drop.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Queries for PgTx {
    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let transfer = sqlx::query_as::<_, Transfer>(
            r#"INSERT INTO transfers (from_account_id, to_account_id, amount)
               VALUES ($1, $2, $3)
               RETURNING id, from_account_id, to_account_id, amount, created_at"#,
        )
        .bind(arg.from_account_id)
        .bind(arg.to_account_id)
        .bind(arg.amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(transfer)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        let entry = sqlx::query_as::<_, Entry>(
            r#"INSERT INTO entries (account_id, amount)
               VALUES ($1, $2)
               RETURNING id, account_id, amount, created_at"#,
        )
        .bind(arg.account_id)
        .bind(arg.amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(entry)
    }

    async fn get_account_for_update(&mut self, account_id: i64) -> Result<Account, StoreError> {
        // NO KEY UPDATE: exclusive against other balance writers, but does not
        // conflict with the KEY SHARE lock taken by entry/transfer inserts
        // through their foreign keys.
        sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts WHERE id = $1 LIMIT 1
               FOR NO KEY UPDATE"#,
        )
        .bind(account_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "account", account_id))
    }

    async fn update_account(&mut self, arg: UpdateAccountParams) -> Result<Account, StoreError> {
        sqlx::query_as::<_, Account>(
            r#"UPDATE accounts SET balance = $2 WHERE id = $1
               RETURNING id, owner, balance, currency, created_at"#,
        )
        .bind(arg.id)
        .bind(arg.balance)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "account", arg.id))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
