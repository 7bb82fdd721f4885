//! simple-bank - ledger transfer CLI
//!
//! ```text
//! simple-bank [--env dev] init-schema
//! simple-bank [--env dev] create-account --owner fola --currency USD [--balance 1000]
//! simple-bank [--env dev] account --id 1
//! simple-bank [--env dev] transfer --from 1 --to 2 --amount 10 [--trace tx-1]
//! ```
//!
//! Configuration comes from `config/<env>.yaml`; `DATABASE_URL` overrides the
//! PostgreSQL url.

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{error, info};

use simple_bank::config::AppConfig;
use simple_bank::db::Database;
use simple_bank::logging::init_logging;
use simple_bank::store::{CreateAccountParams, PgStore};
use simple_bank::transfer::{TransferCoordinator, TransferTxParams, TxTrace};

// ============================================================
// ARGUMENTS
// ============================================================

fn get_arg(args: &[String], names: &[&str]) -> Option<String> {
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn require_i64(args: &[String], name: &str) -> anyhow::Result<i64> {
    let raw = get_arg(args, &[name]).with_context(|| format!("missing {}", name))?;
    raw.parse()
        .with_context(|| format!("{} must be an integer, got '{}'", name, raw))
}

/// First argument that is neither a flag nor a flag's value
fn get_command(args: &[String]) -> Option<&str> {
    let mut i = 1;
    while i < args.len() {
        if args[i].starts_with("--") || args[i] == "-e" {
            i += 2;
            continue;
        }
        return Some(args[i].as_str());
    }
    None
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let env = get_arg(&args, &["--env", "-e"]).unwrap_or_else(|| "dev".to_string());

    let config = AppConfig::load(&env)?;
    let _guard = init_logging(&config);
    info!(env = %env, "simple-bank starting");

    let db = Database::connect(&config.postgres)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = Arc::new(PgStore::new(db.pool().clone()));

    match get_command(&args) {
        Some("init-schema") => {
            db.init_schema().await?;
            println!("schema ready");
        }
        Some("create-account") => {
            let owner = get_arg(&args, &["--owner"]).context("missing --owner")?;
            let currency = get_arg(&args, &["--currency"]).context("missing --currency")?;
            let balance = match get_arg(&args, &["--balance"]) {
                Some(raw) => raw.parse().context("--balance must be an integer")?,
                None => 0,
            };
            let account = store
                .create_account(CreateAccountParams {
                    owner,
                    currency,
                    balance,
                })
                .await?;
            print_json(&account)?;
        }
        Some("account") => {
            let id = require_i64(&args, "--id")?;
            print_json(&store.get_account(id).await?)?;
        }
        Some("transfer") => {
            let params = TransferTxParams::new(
                require_i64(&args, "--from")?,
                require_i64(&args, "--to")?,
                require_i64(&args, "--amount")?,
            );
            if params.amount <= 0 {
                bail!("--amount must be positive");
            }
            let trace = get_arg(&args, &["--trace"])
                .map(TxTrace::named)
                .unwrap_or_default();

            let coordinator = TransferCoordinator::new(store);
            match coordinator.transfer_traced(params, trace).await {
                Ok(result) => print_json(&result)?,
                Err(e) => {
                    error!(code = e.root_cause().code(), error = %e, "Transfer failed");
                    return Err(e.into());
                }
            }
        }
        Some(other) => bail!("unknown command '{}'", other),
        None => bail!("usage: simple-bank [--env ENV] <init-schema|create-account|account|transfer>"),
    }

    Ok(())
}
