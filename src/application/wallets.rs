use crate::domain::ports::WalletLedgerRef;
use crate::domain::wallet::{Balance, Wallet};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Opening balance for provisioned wallets when none is given.
pub const DEFAULT_OPENING_BALANCE: Decimal = dec!(10000000);

/// Provisions and reads wallets. Balances are never changed here.
pub struct WalletService {
    ledger: WalletLedgerRef,
}

impl WalletService {
    pub fn new(ledger: WalletLedgerRef) -> Self {
        Self { ledger }
    }

    /// Creates a wallet, generating a user id when none is given.
    pub async fn provision(
        &self,
        user_id: Option<String>,
        opening_balance: Option<Decimal>,
    ) -> Result<Wallet> {
        let user_id = user_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let balance = Balance::new(opening_balance.unwrap_or(DEFAULT_OPENING_BALANCE));
        let wallet = self.ledger.create_wallet(Wallet::new(user_id, balance)).await?;
        tracing::info!(user_id = %wallet.user_id, balance = %wallet.balance, "wallet provisioned");
        Ok(wallet)
    }

    /// Returns the existing wallet, or provisions one.
    pub async fn ensure(&self, user_id: &str, opening_balance: Option<Decimal>) -> Result<Wallet> {
        if let Some(wallet) = self.ledger.get(user_id).await? {
            return Ok(wallet);
        }
        match self
            .provision(Some(user_id.to_string()), opening_balance)
            .await
        {
            // Lost a race with a concurrent provision.
            Err(PaymentError::DuplicateWallet(_)) => self.wallet(user_id).await,
            other => other,
        }
    }

    pub async fn wallet(&self, user_id: &str) -> Result<Wallet> {
        self.ledger
            .get(user_id)
            .await?
            .ok_or_else(|| PaymentError::WalletNotFound(user_id.to_string()))
    }

    pub async fn wallets(&self) -> Result<Vec<Wallet>> {
        self.ledger.get_all().await
    }
}
