//! Asynchronous settlement of pending payments.
//!
//! Accepted payments are pushed onto a channel and picked up by a dispatcher
//! task, which runs each settlement in its own task while holding a semaphore
//! permit, so at most `settlement_workers` settlements are in flight. A
//! settlement waits out a simulated processing latency, asks the
//! [`SettlementGateway`] for the outcome, then commits the status update and
//! the wallet debit in one ledger transaction. Failed commits are retried with
//! linear backoff; a job that exhausts its attempts is dead-lettered.

use crate::config::{DebitPolicy, EngineConfig, normalize_rate};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{SettlementGateway, SettlementGatewayRef, WalletLedgerRef};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;

/// Completes a payment with a fixed probability.
pub struct RandomGateway {
    success_rate: f64,
}

impl RandomGateway {
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: normalize_rate(success_rate),
        }
    }
}

#[async_trait]
impl SettlementGateway for RandomGateway {
    async fn decide(&self, _payment: &Payment) -> PaymentStatus {
        if rand::thread_rng().gen_bool(self.success_rate) {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        }
    }
}

/// Always returns the same outcome.
pub struct FixedGateway(pub PaymentStatus);

#[async_trait]
impl SettlementGateway for FixedGateway {
    async fn decide(&self, _payment: &Payment) -> PaymentStatus {
        self.0
    }
}

/// A settlement that could not be committed. The payment stays `Pending`
/// and its wallet is not debited.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub payment: Payment,
    pub error: String,
    pub attempts: u32,
}

/// Counts queued and running jobs so callers can wait for quiescence.
#[derive(Default)]
struct Outstanding {
    count: AtomicUsize,
    idle: Notify,
}

impl Outstanding {
    fn begin(self: &Arc<Self>) -> Ticket {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ticket(Arc::clone(self))
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// One outstanding job. The count drops with the ticket, however the job ends.
struct Ticket(Arc<Outstanding>);

impl Drop for Ticket {
    fn drop(&mut self) {
        self.0.finish();
    }
}

struct Job {
    payment: Payment,
    ticket: Ticket,
}

#[derive(Clone)]
struct Settler {
    ledger: WalletLedgerRef,
    gateway: SettlementGatewayRef,
    delay_min: Duration,
    delay_max: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
    debit_policy: DebitPolicy,
}

impl Settler {
    fn latency(&self) -> Duration {
        if self.delay_max <= self.delay_min {
            return self.delay_min;
        }
        rand::thread_rng().gen_range(self.delay_min..=self.delay_max)
    }

    async fn settle(&self, mut payment: Payment) -> Option<DeadLetter> {
        tokio::time::sleep(self.latency()).await;

        let outcome = self.gateway.decide(&payment).await;
        if let Err(e) = payment.transition_to(outcome) {
            tracing::error!(
                transaction_id = %payment.transaction_id,
                error = %e,
                "gateway returned an unusable outcome"
            );
            return Some(DeadLetter {
                payment,
                error: e.to_string(),
                attempts: 0,
            });
        }

        for attempt in 1..=self.max_attempts {
            match self.commit(&payment).await {
                Ok(()) => {
                    tracing::info!(
                        transaction_id = %payment.transaction_id,
                        user_id = %payment.user_id,
                        status = %payment.status,
                        attempt,
                        "payment settled"
                    );
                    return None;
                }
                // Someone else already settled it.
                Err(PaymentError::InvalidTransition { .. }) => {
                    tracing::warn!(
                        transaction_id = %payment.transaction_id,
                        "payment already settled, skipping"
                    );
                    return None;
                }
                Err(e) if !e.is_retryable() || attempt == self.max_attempts => {
                    tracing::error!(
                        transaction_id = %payment.transaction_id,
                        user_id = %payment.user_id,
                        attempts = attempt,
                        error = %e,
                        "settlement failed, payment left pending"
                    );
                    let mut pending = payment;
                    pending.status = PaymentStatus::Pending;
                    return Some(DeadLetter {
                        payment: pending,
                        error: e.to_string(),
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        transaction_id = %payment.transaction_id,
                        attempt,
                        error = %e,
                        "settlement commit failed, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
            }
        }
        None
    }

    /// Status update, row-locked read, debit, commit: all or nothing.
    async fn commit(&self, payment: &Payment) -> Result<()> {
        let mut tx = self.ledger.begin().await?;
        tx.update_payment(payment).await?;
        let mut wallet = tx.get_for_update(&payment.user_id).await?;
        if self.debit_policy.debits(payment.status) {
            wallet.debit(payment.amount);
            tx.write_balance(&wallet).await?;
        }
        tx.commit().await
    }
}

/// Handle to the settlement worker pool.
pub struct SettlementQueue {
    sender: mpsc::UnboundedSender<Job>,
    dispatcher: JoinHandle<()>,
    outstanding: Arc<Outstanding>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl SettlementQueue {
    /// Spawns the dispatcher. Must be called inside a Tokio runtime.
    pub fn start(
        ledger: WalletLedgerRef,
        gateway: SettlementGatewayRef,
        config: &EngineConfig,
    ) -> Self {
        let settler = Settler {
            ledger,
            gateway,
            delay_min: config.settle_delay_min,
            delay_max: config.settle_delay_max,
            max_attempts: config.settlement_max_attempts.max(1),
            retry_backoff: config.settlement_retry_backoff,
            debit_policy: config.debit_policy,
        };
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let outstanding = Arc::new(Outstanding::default());
        let dead_letters = Arc::new(Mutex::new(Vec::new()));
        let workers = Arc::new(Semaphore::new(config.settlement_workers.max(1)));

        let dispatcher = {
            let dead_letters = Arc::clone(&dead_letters);
            tokio::spawn(async move {
                while let Some(Job { payment, ticket }) = receiver.recv().await {
                    let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
                        break;
                    };
                    let settler = settler.clone();
                    let dead_letters = Arc::clone(&dead_letters);
                    tokio::spawn(async move {
                        let pending = payment.clone();
                        let job = tokio::spawn(async move { settler.settle(payment).await });
                        let letter = match job.await {
                            Ok(letter) => letter,
                            Err(e) => {
                                tracing::error!(
                                    transaction_id = %pending.transaction_id,
                                    error = %e,
                                    "settlement task aborted, payment left pending"
                                );
                                Some(DeadLetter {
                                    payment: pending,
                                    error: e.to_string(),
                                    attempts: 0,
                                })
                            }
                        };
                        if let Some(letter) = letter {
                            dead_letters.lock().await.push(letter);
                        }
                        drop(permit);
                        drop(ticket);
                    });
                }
            })
        };

        Self {
            sender,
            dispatcher,
            outstanding,
            dead_letters,
        }
    }

    /// Queues a payment for settlement without waiting for it.
    pub fn submit(&self, payment: Payment) -> Result<()> {
        let job = Job {
            payment,
            ticket: self.outstanding.begin(),
        };
        // On failure the returned job drops its ticket.
        self.sender.send(job).map_err(|e| {
            PaymentError::internal(format!(
                "settlement queue closed, payment {} not queued",
                e.0.payment.transaction_id
            ))
        })
    }

    /// Number of settlements queued or running.
    pub fn outstanding(&self) -> usize {
        self.outstanding.count.load(Ordering::SeqCst)
    }

    /// Resolves once every submitted settlement has finished.
    pub async fn wait_idle(&self) {
        self.outstanding.wait_idle().await;
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    /// Stops accepting work and waits for queued settlements to finish.
    pub async fn shutdown(self) {
        let SettlementQueue {
            sender,
            dispatcher,
            outstanding,
            ..
        } = self;
        drop(sender);
        if let Err(e) = dispatcher.await {
            tracing::error!(error = %e, "settlement dispatcher panicked");
        }
        outstanding.wait_idle().await;
    }
}
