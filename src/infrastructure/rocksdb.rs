use crate::domain::payment::Payment;
use crate::domain::ports::{LedgerTransaction, PaymentStore, WalletLedger};
use crate::domain::wallet::Wallet;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Column Family for payments, keyed by transaction id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for wallets, keyed by user id.
pub const CF_WALLETS: &str = "wallets";

/// A persistent store implementation using RocksDB.
///
/// Handles storage for both `Payment` and `Wallet` entities using separate
/// Column Families. Uniqueness checks and ledger commits are serialized
/// through a write gate; a committed ledger transaction is a single
/// `WriteBatch`, so status and balance land together or not at all.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    next_payment_id: Arc<AtomicU64>,
    write_gate: Arc<Mutex<()>>,
    wallet_rows: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("payments" and "wallets")
    /// exist, and resumes payment id assignment after the highest stored id.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_payments = ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default());
        let cf_wallets = ColumnFamilyDescriptor::new(CF_WALLETS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_payments, cf_wallets])?;

        let store = Self {
            db: Arc::new(db),
            next_payment_id: Arc::new(AtomicU64::new(0)),
            write_gate: Arc::new(Mutex::new(())),
            wallet_rows: Arc::new(DashMap::new()),
        };
        let max_id = store
            .scan::<Payment>(CF_PAYMENTS)?
            .iter()
            .map(|p| p.id)
            .max()
            .unwrap_or(0);
        store.next_payment_id.store(max_id, Ordering::SeqCst);
        tracing::debug!(max_id, "opened rocksdb store");

        Ok(store)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{name} column family not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key.as_bytes(), encode(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(decode(&value)?);
        }
        Ok(items)
    }

    fn row_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.wallet_rows
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Serialization error: {}", e),
        )))
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Deserialization error: {}", e),
        )))
    })
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn create(&self, mut payment: Payment) -> Result<Payment> {
        let _gate = self.write_gate.lock().await;
        if self
            .read::<Payment>(CF_PAYMENTS, &payment.transaction_id)?
            .is_some()
        {
            return Err(PaymentError::DuplicatePayment(payment.transaction_id));
        }
        payment.id = self.next_payment_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.write(CF_PAYMENTS, &payment.transaction_id, &payment)?;
        Ok(payment)
    }

    async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, transaction_id)
    }

    async fn get_all(&self) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self.scan(CF_PAYMENTS)?;
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }

    async fn get_by_user_id(&self, user_id: &str) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.belongs_to(user_id))
            .collect();
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        if self
            .read::<Payment>(CF_PAYMENTS, &payment.transaction_id)?
            .is_none()
        {
            return Err(PaymentError::NotFound(payment.transaction_id.clone()));
        }
        self.write(CF_PAYMENTS, &payment.transaction_id, payment)
    }
}

#[async_trait]
impl WalletLedger for RocksDBStore {
    async fn create_wallet(&self, wallet: Wallet) -> Result<Wallet> {
        let _gate = self.write_gate.lock().await;
        if self.read::<Wallet>(CF_WALLETS, &wallet.user_id)?.is_some() {
            return Err(PaymentError::DuplicateWallet(wallet.user_id));
        }
        self.write(CF_WALLETS, &wallet.user_id, &wallet)?;
        Ok(wallet)
    }

    async fn get(&self, user_id: &str) -> Result<Option<Wallet>> {
        self.read(CF_WALLETS, user_id)
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        // Keys iterate in byte order, i.e. sorted by user id.
        self.scan(CF_WALLETS)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        Ok(Box::new(RocksDBTransaction {
            store: self.clone(),
            row_guards: HashMap::new(),
            staged_payments: Vec::new(),
            staged_wallets: HashMap::new(),
        }))
    }
}

/// Unit of work over a [`RocksDBStore`], committed as one `WriteBatch`.
pub struct RocksDBTransaction {
    store: RocksDBStore,
    row_guards: HashMap<String, OwnedMutexGuard<()>>,
    staged_payments: Vec<Payment>,
    staged_wallets: HashMap<String, Wallet>,
}

fn check_pending(store: &RocksDBStore, payment: &Payment) -> Result<()> {
    let stored: Payment = store
        .read(CF_PAYMENTS, &payment.transaction_id)?
        .ok_or_else(|| PaymentError::NotFound(payment.transaction_id.clone()))?;
    if stored.status.is_terminal() || !payment.status.is_terminal() {
        return Err(PaymentError::InvalidTransition {
            transaction_id: payment.transaction_id.clone(),
            from: stored.status,
            to: payment.status,
        });
    }
    Ok(())
}

#[async_trait]
impl LedgerTransaction for RocksDBTransaction {
    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        check_pending(&self.store, payment)?;
        self.staged_payments.push(payment.clone());
        Ok(())
    }

    async fn get_for_update(&mut self, user_id: &str) -> Result<Wallet> {
        if !self.row_guards.contains_key(user_id) {
            let guard = self.store.row_lock(user_id).lock_owned().await;
            self.row_guards.insert(user_id.to_string(), guard);
        }
        if let Some(staged) = self.staged_wallets.get(user_id) {
            return Ok(staged.clone());
        }
        self.store
            .read(CF_WALLETS, user_id)?
            .ok_or_else(|| PaymentError::WalletNotFound(user_id.to_string()))
    }

    async fn write_balance(&mut self, wallet: &Wallet) -> Result<()> {
        if !self.row_guards.contains_key(&wallet.user_id) {
            return Err(PaymentError::internal(format!(
                "wallet {} written without get_for_update",
                wallet.user_id
            )));
        }
        self.staged_wallets
            .insert(wallet.user_id.clone(), wallet.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let RocksDBTransaction {
            store,
            row_guards,
            staged_payments,
            staged_wallets,
        } = *self;

        let gate = store.write_gate.lock().await;
        let payments_cf = store.cf(CF_PAYMENTS)?;
        let wallets_cf = store.cf(CF_WALLETS)?;
        let now = Utc::now();

        let mut batch = WriteBatch::default();
        for mut payment in staged_payments {
            check_pending(&store, &payment)?;
            payment.updated_at = now;
            batch.put_cf(payments_cf, payment.transaction_id.as_bytes(), encode(&payment)?);
        }
        for (user_id, mut wallet) in staged_wallets {
            wallet.updated_at = now;
            batch.put_cf(wallets_cf, user_id.as_bytes(), encode(&wallet)?);
        }
        store.db.write(batch)?;

        drop(gate);
        drop(row_guards);
        Ok(())
    }
}
