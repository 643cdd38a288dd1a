use std::str::FromStr;

use clap::{Parser, Subcommand};
use common::db::run_migrations;
use common::decimal::{dec, parse_amount};
use common::error::Error;
use common::model::{ApplyTransactionRequest, HistoryPage, RawTransactionRequest};
use ledger_service::{LedgerConfig, LedgerService, PostgresLedgerRepository};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Ledger Service CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set the log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Database URL (defaults to DATABASE_URL)
    #[arg(short, long, global = true)]
    database_url: Option<String>,

    /// Commands
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the ledger storage and keep it open until Ctrl+C
    Start {
        /// Database pool size
        #[arg(short, long)]
        pool_size: Option<u32>,

        /// Enable transaction logging
        #[arg(short, long)]
        transaction_logging: bool,
    },
    /// Apply the bundled schema migrations
    Migrate,
    /// Open a new account
    CreateAccount {
        /// Customer name
        name: String,
        /// Opening balance
        #[arg(long, default_value = "0")]
        opening_balance: String,
    },
    /// Apply a credit or debit
    Apply {
        /// Account ID
        account_id: String,
        /// "credit" or "debit"
        kind: String,
        /// Positive decimal amount
        amount: String,
        /// Idempotency key for safe retries
        #[arg(short, long)]
        idempotency_key: Option<String>,
    },
    /// Print the current balance of an account
    Balance {
        /// Account ID
        account_id: String,
    },
    /// Print the transaction history of an account, most recent first
    History {
        /// Account ID
        account_id: String,
        /// Records to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Maximum records to print
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Run a sample session against in-memory storage
    Demo,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Parse command line arguments
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "ledger_service={level},common={level}",
            level = cli.log_level
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = LedgerConfig::from_env();
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let result = match cli.command {
        Commands::Start { pool_size, transaction_logging } => {
            if let Some(pool_size) = pool_size {
                config.db_pool_size = pool_size;
            }
            config.transaction_logging |= transaction_logging;
            start(&config).await
        }
        Commands::Migrate => migrate(&config).await,
        Commands::CreateAccount { name, opening_balance } => {
            with_service(&config, |service| async move {
                let opening_balance = parse_amount(&opening_balance)?;
                let account = service.create_account(&name, opening_balance).await?;
                print_json(&account)
            })
            .await
        }
        Commands::Apply { account_id, kind, amount, idempotency_key } => {
            with_service(&config, |service| async move {
                let request = ApplyTransactionRequest::try_from(RawTransactionRequest {
                    account_id,
                    kind,
                    amount,
                    idempotency_key,
                })?;
                let outcome = service.apply_transaction(request).await?;
                print_json(&outcome)
            })
            .await
        }
        Commands::Balance { account_id } => {
            with_service(&config, |service| async move {
                let account_id = parse_account_id(&account_id)?;
                let balance = service.get_balance(account_id).await?;
                print_json(&serde_json::json!({ "account_id": account_id, "balance": balance }))
            })
            .await
        }
        Commands::History { account_id, offset, limit } => {
            with_service(&config, |service| async move {
                let account_id = parse_account_id(&account_id)?;
                let history = service.get_history_page(account_id, HistoryPage { offset, limit }).await?;
                print_json(&history)
            })
            .await
        }
        Commands::Demo => demo().await,
    };

    if let Err(err) = &result {
        error!(kind = %err.kind(), "{}", err);
    }
    result.map_err(Into::into)
}

async fn start(config: &LedgerConfig) -> Result<(), Error> {
    info!(
        "Starting ledger service with database pool size: {}, transaction logging: {}",
        config.db_pool_size, config.transaction_logging
    );

    let service = LedgerService::with_config(config).await?;

    info!("Ledger service started. Press Ctrl+C to stop.");
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutting down ledger service..."),
        Err(err) => error!("Error waiting for Ctrl+C: {}", err),
    }

    service.shutdown().await;
    Ok(())
}

async fn migrate(config: &LedgerConfig) -> Result<(), Error> {
    let repo = PostgresLedgerRepository::with_config(config).await?;
    run_migrations(repo.pool()).await?;
    info!("Migrations applied");
    Ok(())
}

/// Open the PostgreSQL-backed service, run `f`, and close it again
async fn with_service<F, Fut>(config: &LedgerConfig, f: F) -> Result<(), Error>
where
    F: FnOnce(std::sync::Arc<LedgerService>) -> Fut,
    Fut: std::future::Future<Output = Result<(), Error>>,
{
    let service = std::sync::Arc::new(LedgerService::with_config(config).await?);
    let result = f(service.clone()).await;
    service.shutdown().await;
    result
}

async fn demo() -> Result<(), Error> {
    let service = LedgerService::new();

    let account = service.create_account("Demo customer", dec!(100.00)).await?;
    info!("Opened account {} with 100.00", account.id);

    let credit = service
        .apply_transaction(ApplyTransactionRequest::credit(account.id, dec!(50.00)))
        .await?;
    info!("Credit 50.00 -> balance {}", credit.balance);

    match service
        .apply_transaction(ApplyTransactionRequest::debit(account.id, dec!(200.00)))
        .await
    {
        Err(err) => info!("Debit 200.00 rejected: {}", err),
        Ok(outcome) => return Err(Error::Internal(format!("overdraft accepted: {:?}", outcome))),
    }

    let debit = ApplyTransactionRequest::debit(account.id, dec!(150.00)).with_idempotency_key("k1");
    let first = service.apply_transaction(debit.clone()).await?;
    let retry = service.apply_transaction(debit).await?;
    info!(
        "Debit 150.00 (k1) -> balance {}, retry -> balance {} (replayed: {})",
        first.balance, retry.balance, retry.replayed
    );

    print_json(&service.get_history(account.id).await?)
}

fn parse_account_id(raw: &str) -> Result<Uuid, Error> {
    Uuid::from_str(raw.trim())
        .map_err(|e| Error::InvalidRequest(format!("malformed account id {:?}: {}", raw, e)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
