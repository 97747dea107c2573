use crate::domain::payment::Payment;
use crate::domain::ports::{LedgerTransaction, PaymentStore, WalletLedger};
use crate::domain::wallet::Wallet;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Default)]
struct Tables {
    /// Keyed by transaction id.
    payments: HashMap<String, Payment>,
    next_payment_id: u64,
    /// Keyed by user id.
    wallets: HashMap<String, Wallet>,
}

/// A thread-safe in-memory backend for payments and wallets.
///
/// Both tables sit behind one `RwLock` so a [`LedgerTransaction`] can apply
/// its staged payment and wallet writes in a single critical section. Wallet
/// row locks are separate per-user mutexes, held from `get_for_update` until
/// the transaction commits or is dropped.
///
/// `Clone` shares the underlying tables.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    wallet_rows: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn row_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.wallet_rows
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn create(&self, mut payment: Payment) -> Result<Payment> {
        let mut tables = self.tables.write().await;
        if tables.payments.contains_key(&payment.transaction_id) {
            return Err(PaymentError::DuplicatePayment(payment.transaction_id));
        }
        tables.next_payment_id += 1;
        payment.id = tables.next_payment_id;
        tables
            .payments
            .insert(payment.transaction_id.clone(), payment.clone());
        Ok(payment)
    }

    async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(transaction_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables.payments.values().cloned().collect();
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }

    async fn get_by_user_id(&self, user_id: &str) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.belongs_to(user_id))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.payments.get_mut(&payment.transaction_id) {
            Some(stored) => {
                *stored = payment.clone();
                Ok(())
            }
            None => Err(PaymentError::NotFound(payment.transaction_id.clone())),
        }
    }
}

#[async_trait]
impl WalletLedger for InMemoryStore {
    async fn create_wallet(&self, wallet: Wallet) -> Result<Wallet> {
        let mut tables = self.tables.write().await;
        if tables.wallets.contains_key(&wallet.user_id) {
            return Err(PaymentError::DuplicateWallet(wallet.user_id));
        }
        tables.wallets.insert(wallet.user_id.clone(), wallet.clone());
        Ok(wallet)
    }

    async fn get(&self, user_id: &str) -> Result<Option<Wallet>> {
        let tables = self.tables.read().await;
        Ok(tables.wallets.get(user_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        let tables = self.tables.read().await;
        let mut wallets: Vec<Wallet> = tables.wallets.values().cloned().collect();
        wallets.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(wallets)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            row_guards: HashMap::new(),
            staged_payments: Vec::new(),
            staged_wallets: HashMap::new(),
        }))
    }
}

/// Unit of work over an [`InMemoryStore`].
pub struct InMemoryTransaction {
    store: InMemoryStore,
    row_guards: HashMap<String, OwnedMutexGuard<()>>,
    staged_payments: Vec<Payment>,
    staged_wallets: HashMap<String, Wallet>,
}

fn check_pending(tables: &Tables, payment: &Payment) -> Result<()> {
    let stored = tables
        .payments
        .get(&payment.transaction_id)
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
impl LedgerTransaction for InMemoryTransaction {
    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        {
            let tables = self.store.tables.read().await;
            check_pending(&tables, payment)?;
        }
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
        let tables = self.store.tables.read().await;
        tables
            .wallets
            .get(user_id)
            .cloned()
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
        let InMemoryTransaction {
            store,
            row_guards,
            staged_payments,
            staged_wallets,
        } = *self;

        let mut tables = store.tables.write().await;
        // Re-check under the write lock: another settlement may have finished
        // the same payment since it was staged.
        for payment in &staged_payments {
            check_pending(&tables, payment)?;
        }
        let now = Utc::now();
        for mut payment in staged_payments {
            payment.updated_at = now;
            tables
                .payments
                .insert(payment.transaction_id.clone(), payment);
        }
        for (user_id, mut wallet) in staged_wallets {
            wallet.updated_at = now;
            tables.wallets.insert(user_id, wallet);
        }
        drop(tables);
        // Row locks are released only once the writes are visible.
        drop(row_guards);
        Ok(())
    }
}
