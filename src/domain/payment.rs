use super::wallet::Amount;
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment row. At most one exists per `transaction_id`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    /// Surrogate key assigned by the store; zero until persisted.
    pub id: u64,
    pub transaction_id: String,
    pub user_id: String,
    pub amount: Amount,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Builds an unsaved `Pending` payment for a request.
    pub fn pending(request: &PaymentRequest) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            transaction_id: request.transaction_id.clone(),
            user_id: request.user_id.clone(),
            amount: request.amount,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves a pending payment to a terminal status.
    ///
    /// Status is monotonic: `Pending -> Completed | Failed`, nothing else.
    pub fn transition_to(&mut self, next: PaymentStatus) -> Result<(), PaymentError> {
        if self.status.is_terminal() || !next.is_terminal() {
            return Err(PaymentError::InvalidTransition {
                transaction_id: self.transaction_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// A caller's request to pay `amount` from `user_id`'s wallet, keyed by a
/// caller-supplied idempotency token.
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(try_from = "RawPaymentRequest")]
pub struct PaymentRequest {
    pub user_id: String,
    pub amount: Amount,
    pub transaction_id: String,
}

#[derive(Deserialize)]
struct RawPaymentRequest {
    #[serde(alias = "user")]
    user_id: String,
    #[serde(alias = "tx")]
    transaction_id: String,
    amount: Decimal,
}

impl PaymentRequest {
    pub fn new(
        user_id: impl Into<String>,
        amount: Decimal,
        transaction_id: impl Into<String>,
    ) -> Result<Self, PaymentError> {
        let user_id = user_id.into().trim().to_string();
        let transaction_id = transaction_id.into().trim().to_string();
        if user_id.is_empty() {
            return Err(PaymentError::ValidationError(
                "user_id is required".to_string(),
            ));
        }
        if transaction_id.is_empty() {
            return Err(PaymentError::ValidationError(
                "transaction_id is required".to_string(),
            ));
        }
        Ok(Self {
            user_id,
            amount: Amount::new(amount)?,
            transaction_id,
        })
    }
}

impl TryFrom<RawPaymentRequest> for PaymentRequest {
    type Error = PaymentError;

    fn try_from(raw: RawPaymentRequest) -> Result<Self, Self::Error> {
        Self::new(raw.user_id, raw.amount, raw.transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> PaymentRequest {
        PaymentRequest::new("user_1", dec!(100), "tx123").unwrap()
    }

    #[test]
    fn test_pending_payment_from_request() {
        let payment = Payment::pending(&request());
        assert_eq!(payment.id, 0);
        assert_eq!(payment.transaction_id, "tx123");
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.belongs_to("user_1"));
        assert!(!payment.belongs_to("user_2"));
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut payment = Payment::pending(&request());
        payment.transition_to(PaymentStatus::Completed).unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);

        let result = payment.transition_to(PaymentStatus::Failed);
        assert!(matches!(
            result,
            Err(PaymentError::InvalidTransition {
                from: PaymentStatus::Completed,
                to: PaymentStatus::Failed,
                ..
            })
        ));
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[test]
    fn test_cannot_transition_back_to_pending() {
        let mut payment = Payment::pending(&request());
        assert!(payment.transition_to(PaymentStatus::Pending).is_err());
    }

    #[test]
    fn test_request_validation() {
        assert!(PaymentRequest::new("", dec!(1), "tx").is_err());
        assert!(PaymentRequest::new("user", dec!(1), "   ").is_err());
        assert!(matches!(
            PaymentRequest::new("user", dec!(0), "tx"),
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&PaymentStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        let status: PaymentStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, PaymentStatus::Failed);
    }

    #[test]
    fn test_request_deserialization() {
        let csv = "user, tx, amount\nuser_1, tx1, 1.5";
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(csv.as_bytes());
        let mut iter = reader.deserialize();

        let result: PaymentRequest = iter
            .next()
            .unwrap()
            .expect("Failed to deserialize payment request");
        assert_eq!(result.user_id, "user_1");
        assert_eq!(result.transaction_id, "tx1");
        assert_eq!(result.amount.value(), dec!(1.5));
    }
}
