use crate::domain::payment::Payment;
use crate::domain::wallet::Wallet;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow<'a> {
    user: &'a str,
    balance: String,
}

#[derive(Serialize)]
struct PaymentRow<'a> {
    id: u64,
    transaction: &'a str,
    user: &'a str,
    amount: String,
    status: &'static str,
}

/// Writes wallet and payment reports as CSV.
///
/// Decimals are normalized, so `999900.00` is written as `999900`.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, wallets: impl IntoIterator<Item = Wallet>) -> Result<()> {
        for wallet in wallets {
            self.writer.serialize(WalletRow {
                user: &wallet.user_id,
                balance: wallet.balance.value().normalize().to_string(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_payments(&mut self, payments: impl IntoIterator<Item = Payment>) -> Result<()> {
        for payment in payments {
            self.writer.serialize(PaymentRow {
                id: payment.id,
                transaction: &payment.transaction_id,
                user: &payment.user_id,
                amount: payment.amount.value().normalize().to_string(),
                status: payment.status.as_str(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
