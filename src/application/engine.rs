use super::settlement::{DeadLetter, RandomGateway, SettlementQueue};
use crate::config::EngineConfig;
use crate::domain::payment::{Payment, PaymentRequest};
use crate::domain::ports::{
    LockOutcome, LockServiceRef, PaymentStoreRef, SettlementGatewayRef, WalletLedgerRef,
};
use crate::error::{PaymentError, Result};
use crate::infrastructure::lock::InMemoryLockManager;
use std::sync::Arc;

/// The main entry point for initiating and querying payments.
///
/// `PaymentEngine` guarantees at most one payment per transaction id: creation
/// happens under a lock keyed by the transaction id, and every caller re-checks
/// the store before creating anything. Accepted payments are handed to the
/// settlement queue and returned `Pending`; callers poll for the final status.
pub struct PaymentEngine {
    payments: PaymentStoreRef,
    ledger: WalletLedgerRef,
    locks: LockServiceRef,
    settlement: SettlementQueue,
}

impl PaymentEngine {
    /// Creates an engine with the in-process lock manager and the random
    /// settlement gateway described by `config`.
    ///
    /// Spawns the settlement dispatcher, so it must be called inside a Tokio
    /// runtime.
    pub fn new(payments: PaymentStoreRef, ledger: WalletLedgerRef, config: EngineConfig) -> Self {
        let locks: LockServiceRef = Arc::new(InMemoryLockManager::new(config.lock_timeout));
        let gateway: SettlementGatewayRef = Arc::new(RandomGateway::new(config.success_rate));
        Self::with_services(payments, ledger, locks, gateway, config)
    }

    /// Creates an engine from explicit collaborators.
    ///
    /// # Arguments
    ///
    /// * `payments` - The store for payment records.
    /// * `ledger` - The wallet ledger; settlement debits go through its transactions.
    /// * `locks` - Keyed lock service guarding creation per transaction id.
    /// * `gateway` - Decides the outcome of each settlement.
    pub fn with_services(
        payments: PaymentStoreRef,
        ledger: WalletLedgerRef,
        locks: LockServiceRef,
        gateway: SettlementGatewayRef,
        config: EngineConfig,
    ) -> Self {
        let settlement = SettlementQueue::start(Arc::clone(&ledger), gateway, &config);
        Self {
            payments,
            ledger,
            locks,
            settlement,
        }
    }

    /// Initiates a payment, or returns the existing one for the same
    /// transaction id.
    ///
    /// The returned payment is `Pending` when newly created; settlement runs in
    /// the background.
    pub async fn process_payment(&self, request: PaymentRequest) -> Result<Payment> {
        let key = request.transaction_id.clone();
        match self.locks.try_acquire(&key).await? {
            LockOutcome::TimedOut => {
                tracing::info!(
                    transaction_id = %key,
                    "payment is being processed elsewhere, falling back to lookup"
                );
                self.find_existing(&request)
                    .await?
                    .ok_or(PaymentError::InProgress {
                        transaction_id: key,
                    })
            }
            // The key is released when `_held` drops, including on cancellation.
            LockOutcome::Acquired(_held) => self.create_once(&request).await,
        }
    }

    /// Runs with the transaction id lock held.
    async fn create_once(&self, request: &PaymentRequest) -> Result<Payment> {
        if let Some(existing) = self.find_existing(request).await? {
            tracing::info!(
                transaction_id = %existing.transaction_id,
                status = %existing.status,
                "found existing payment"
            );
            return Ok(existing);
        }

        // Advisory only: the authoritative debit happens at settlement.
        let wallet = self
            .ledger
            .get(&request.user_id)
            .await?
            .ok_or_else(|| PaymentError::WalletNotFound(request.user_id.clone()))?;
        if !wallet.balance.covers(request.amount) {
            return Err(PaymentError::InsufficientFunds {
                user_id: request.user_id.clone(),
                requested: request.amount.value(),
                available: wallet.balance.value(),
            });
        }

        let payment = match self.payments.create(Payment::pending(request)).await {
            Ok(payment) => payment,
            Err(e @ PaymentError::DuplicatePayment(_)) => {
                tracing::error!(
                    transaction_id = %request.transaction_id,
                    "duplicate payment created while holding the transaction lock"
                );
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        self.settlement.submit(payment.clone())?;
        tracing::info!(
            payment_id = payment.id,
            transaction_id = %payment.transaction_id,
            user_id = %payment.user_id,
            amount = %payment.amount,
            "payment accepted"
        );
        Ok(payment)
    }

    /// Idempotent lookup: the payment for this transaction id, if any, as long
    /// as it belongs to the requesting user.
    async fn find_existing(&self, request: &PaymentRequest) -> Result<Option<Payment>> {
        match self
            .payments
            .get_by_transaction_id(&request.transaction_id)
            .await?
        {
            Some(payment) if !payment.belongs_to(&request.user_id) => {
                Err(PaymentError::OwnershipMismatch {
                    transaction_id: request.transaction_id.clone(),
                    user_id: request.user_id.clone(),
                })
            }
            found => Ok(found),
        }
    }

    pub async fn get_payment_by_transaction_id(&self, transaction_id: &str) -> Result<Payment> {
        self.payments
            .get_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(transaction_id.to_string()))
    }

    pub async fn get_all_payments(&self) -> Result<Vec<Payment>> {
        self.payments.get_all().await
    }

    pub async fn get_payments_by_user(&self, user_id: &str) -> Result<Vec<Payment>> {
        self.payments.get_by_user_id(user_id).await
    }

    /// Queues every stored `Pending` payment for settlement, e.g. after a
    /// restart. Returns how many were queued.
    pub async fn resume_pending(&self) -> Result<usize> {
        let mut resumed = 0;
        for payment in self.payments.get_all().await? {
            if payment.status.is_terminal() {
                continue;
            }
            self.settlement.submit(payment)?;
            resumed += 1;
        }
        if resumed > 0 {
            tracing::info!(resumed, "resumed pending settlements");
        }
        Ok(resumed)
    }

    /// Resolves once no settlement is queued or running.
    pub async fn wait_for_settlements(&self) {
        self.settlement.wait_idle().await;
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.settlement.dead_letters().await
    }

    /// Consumes the engine, letting queued settlements finish.
    pub async fn shutdown(self) {
        self.settlement.shutdown().await;
    }
}
