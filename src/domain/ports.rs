//! Contracts the engine consumes. Backends live in `crate::infrastructure`.

use super::payment::{Payment, PaymentStatus};
use super::wallet::Wallet;
use crate::error::Result;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persists a new payment and returns it with its assigned id.
    ///
    /// Fails with `PaymentError::DuplicatePayment` if a payment already
    /// exists for the transaction id.
    async fn create(&self, payment: Payment) -> Result<Payment>;
    async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>>;
    async fn get_all(&self) -> Result<Vec<Payment>>;
    async fn get_by_user_id(&self, user_id: &str) -> Result<Vec<Payment>>;
    /// Overwrites an existing payment; `PaymentError::NotFound` otherwise.
    async fn update(&self, payment: &Payment) -> Result<()>;
}

/// Authoritative wallet state.
///
/// `get` is a plain read for advisory checks. Balance changes go through a
/// [`LedgerTransaction`] obtained from `begin`.
#[async_trait]
pub trait WalletLedger: Send + Sync {
    async fn create_wallet(&self, wallet: Wallet) -> Result<Wallet>;
    async fn get(&self, user_id: &str) -> Result<Option<Wallet>>;
    async fn get_all(&self) -> Result<Vec<Wallet>>;
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;
}

/// A unit of work spanning payment status and wallet balance.
///
/// Writes are staged and become visible together on `commit`. Dropping the
/// transaction without committing discards them and releases every row lock
/// it took.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Stages a status update. The stored row must still be `Pending`,
    /// otherwise `PaymentError::InvalidTransition`.
    async fn update_payment(&mut self, payment: &Payment) -> Result<()>;
    /// Reads a wallet and holds its row lock until the transaction ends.
    async fn get_for_update(&mut self, user_id: &str) -> Result<Wallet>;
    /// Stages a balance write. The row must have been read with `get_for_update`.
    async fn write_balance(&mut self, wallet: &Wallet) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// A held key. Dropping it releases the key, whichever way the holder exits.
pub struct LockGuard(Box<dyn Any + Send + Sync>);

impl LockGuard {
    pub fn new<G: Any + Send + Sync>(held: G) -> Self {
        Self(Box::new(held))
    }

    /// Releases the key now instead of at the end of the holder's scope.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockGuard")
    }
}

#[derive(Debug)]
pub enum LockOutcome {
    Acquired(LockGuard),
    TimedOut,
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }
}

/// Keyed mutual exclusion with a bounded wait.
#[async_trait]
pub trait LockService: Send + Sync {
    async fn try_acquire(&self, key: &str) -> Result<LockOutcome>;
}

/// Decides how a pending payment ends. Stands in for an external processor.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    async fn decide(&self, payment: &Payment) -> PaymentStatus;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type WalletLedgerRef = Arc<dyn WalletLedger>;
pub type LockServiceRef = Arc<dyn LockService>;
pub type SettlementGatewayRef = Arc<dyn SettlementGateway>;
