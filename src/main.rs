use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use walletpay::application::engine::PaymentEngine;
use walletpay::application::wallets::WalletService;
use walletpay::config::{DebitPolicy, EngineConfig};
use walletpay::domain::ports::{PaymentStoreRef, WalletLedgerRef};
use walletpay::infrastructure::in_memory::InMemoryStore;
use walletpay::interfaces::csv::report_writer::ReportWriter;
use walletpay::interfaces::csv::request_reader::PaymentRequestReader;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DebitArg {
    /// Debit the wallet for completed and failed payments
    Always,
    /// Debit the wallet for completed payments only
    CompletedOnly,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Report {
    Wallets,
    Payments,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input payment requests CSV file (`user, tx, amount`)
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "WALLETPAY_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Opening balance for wallets provisioned on first use
    #[arg(long, env = "WALLETPAY_OPENING_BALANCE")]
    opening_balance: Option<Decimal>,

    /// How long a request waits for the transaction id lock
    #[arg(long, env = "WALLETPAY_LOCK_TIMEOUT_MS", default_value_t = 100)]
    lock_timeout_ms: u64,

    #[arg(long, env = "WALLETPAY_SETTLE_DELAY_MIN_MS", default_value_t = 1000)]
    settle_delay_min_ms: u64,

    #[arg(long, env = "WALLETPAY_SETTLE_DELAY_MAX_MS", default_value_t = 3000)]
    settle_delay_max_ms: u64,

    /// Probability that a settlement completes
    #[arg(
        long,
        env = "WALLETPAY_SUCCESS_RATE",
        default_value_t = 0.9,
        value_parser = parse_rate
    )]
    success_rate: f64,

    /// Maximum concurrent settlements
    #[arg(long, env = "WALLETPAY_WORKERS", default_value_t = 16)]
    workers: usize,

    /// Commit attempts per settlement before it is dead-lettered
    #[arg(long, env = "WALLETPAY_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    #[arg(long, env = "WALLETPAY_DEBIT_POLICY", value_enum, default_value = "always")]
    debit_policy: DebitArg,

    /// Report written to stdout once all settlements finish
    #[arg(long, value_enum, default_value = "wallets")]
    report: Report,
}

fn parse_rate(value: &str) -> std::result::Result<f64, String> {
    let rate: f64 = value.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{value} is not a probability between 0 and 1"))
    }
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        let debit_policy = match self.debit_policy {
            DebitArg::Always => DebitPolicy::Always,
            DebitArg::CompletedOnly => DebitPolicy::CompletedOnly,
        };
        EngineConfig::default()
            .with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
            .with_settle_delay(
                Duration::from_millis(self.settle_delay_min_ms),
                Duration::from_millis(self.settle_delay_max_ms),
            )
            .with_success_rate(self.success_rate)
            .with_settlement_workers(self.workers)
            .with_retries(self.max_attempts, Duration::from_millis(200))
            .with_debit_policy(debit_policy)
    }
}

fn in_memory_backend() -> (PaymentStoreRef, WalletLedgerRef) {
    let store = InMemoryStore::new();
    (Arc::new(store.clone()), Arc::new(store))
}

#[cfg(feature = "storage-rocksdb")]
fn persistent_backend(path: &Path) -> Result<(PaymentStoreRef, WalletLedgerRef)> {
    let store = walletpay::infrastructure::rocksdb::RocksDBStore::open(path).into_diagnostic()?;
    Ok((Arc::new(store.clone()), Arc::new(store)))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn persistent_backend(_path: &Path) -> Result<(PaymentStoreRef, WalletLedgerRef)> {
    eprintln!(
        "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
    );
    Ok(in_memory_backend())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "walletpay=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.engine_config();

    let (payments, ledger) = match &cli.db_path {
        Some(db_path) => persistent_backend(db_path)?,
        None => in_memory_backend(),
    };

    let wallets = WalletService::new(Arc::clone(&ledger));
    let engine = Arc::new(PaymentEngine::new(payments, ledger, config));

    // Settle whatever a previous run against the same database left pending.
    engine.resume_pending().await.into_diagnostic()?;

    // Submit every request concurrently, as independent API calls would be.
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = PaymentRequestReader::new(file);
    let mut handles = Vec::new();
    for request in reader.requests() {
        match request {
            Ok(request) => {
                if let Err(e) = wallets.ensure(&request.user_id, cli.opening_balance).await {
                    eprintln!("Error provisioning wallet: {}", e);
                    continue;
                }
                let engine = Arc::clone(&engine);
                handles.push(tokio::spawn(
                    async move { engine.process_payment(request).await },
                ));
            }
            Err(e) => {
                eprintln!("Error reading payment request: {}", e);
            }
        }
    }

    for handle in handles {
        match handle.await.into_diagnostic()? {
            Ok(_) => {}
            Err(e) => eprintln!("Error processing payment: {}", e),
        }
    }

    engine.wait_for_settlements().await;
    for letter in engine.dead_letters().await {
        eprintln!(
            "Settlement failed for transaction {} after {} attempts: {}",
            letter.payment.transaction_id, letter.attempts, letter.error
        );
    }

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    match cli.report {
        Report::Wallets => writer
            .write_wallets(wallets.wallets().await.into_diagnostic()?)
            .into_diagnostic()?,
        Report::Payments => writer
            .write_payments(engine.get_all_payments().await.into_diagnostic()?)
            .into_diagnostic()?,
    }

    Ok(())
}
