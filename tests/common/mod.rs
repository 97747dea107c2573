#![allow(dead_code)]

use rust_decimal::Decimal;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use walletpay::application::engine::PaymentEngine;
use walletpay::application::wallets::WalletService;
use walletpay::config::EngineConfig;
use walletpay::infrastructure::in_memory::InMemoryStore;

/// Default engine settings, including the 100 ms lock bound, but settling
/// within a few milliseconds.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_settle_delay(Duration::from_millis(1), Duration::from_millis(10))
        .with_retries(3, Duration::from_millis(5))
}

/// In-memory engine with one provisioned wallet.
pub async fn engine_with_wallet(
    user_id: &str,
    balance: Decimal,
    config: EngineConfig,
) -> (Arc<PaymentEngine>, WalletService) {
    let store = InMemoryStore::new();
    let wallets = WalletService::new(Arc::new(store.clone()));
    wallets
        .provision(Some(user_id.to_string()), Some(balance))
        .await
        .unwrap();
    let engine = PaymentEngine::new(Arc::new(store.clone()), Arc::new(store), config);
    (Arc::new(engine), wallets)
}

/// Writes `rows` requests spread round-robin over `users` users, one unique
/// transaction id per row.
pub fn generate_csv(path: &Path, users: usize, rows: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["user", "tx", "amount"])?;
    for i in 1..=rows {
        wtr.write_record([
            format!("user_{}", i % users),
            format!("tx_{}", i),
            "1.0".to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
