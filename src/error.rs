use crate::domain::payment::PaymentStatus;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Insufficient funds for user {user_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        user_id: String,
        requested: Decimal,
        available: Decimal,
    },
    #[error("Wallet not found for user {0}")]
    WalletNotFound(String),
    #[error("Payment not found for transaction {0}")]
    NotFound(String),
    #[error("Transaction {transaction_id} does not belong to user {user_id}")]
    OwnershipMismatch {
        transaction_id: String,
        user_id: String,
    },
    #[error("Payment for transaction {transaction_id} is still being created, retry later")]
    InProgress { transaction_id: String },
    /// The store already holds a payment for this transaction id. The lock
    /// protocol should make this unreachable.
    #[error("Duplicate payment for transaction {0}")]
    DuplicatePayment(String),
    #[error("Wallet already exists for user {0}")]
    DuplicateWallet(String),
    #[error("Payment {transaction_id} cannot move from {from} to {to}")]
    InvalidTransition {
        transaction_id: String,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Database error: {0}")]
    DatabaseError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    /// Benign absence, as opposed to a failed lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::WalletNotFound(_))
    }

    /// Settlement retries are pointless once the payment left `Pending`.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidTransition { .. } | Self::NotFound(_) | Self::WalletNotFound(_)
        )
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(PaymentError::NotFound("tx".into()).is_not_found());
        assert!(PaymentError::WalletNotFound("u".into()).is_not_found());
        assert!(!PaymentError::DuplicatePayment("tx".into()).is_not_found());
    }

    #[test]
    fn test_invalid_transition_is_not_retryable() {
        let err = PaymentError::InvalidTransition {
            transaction_id: "tx".into(),
            from: PaymentStatus::Completed,
            to: PaymentStatus::Failed,
        };
        assert!(!err.is_retryable());
        assert!(PaymentError::internal("disk full").is_retryable());
    }
}
