use crate::domain::wallet::Wallet;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct WalletRow<'a> {
    user: &'a str,
    wallet: String,
    balance: String,
    currency: &'a str,
    entries: usize,
}

/// Writes the final wallet report: `user,wallet,balance,currency,entries`.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes one row per wallet, paired with its ledger entry count.
    pub fn write_wallets<I>(&mut self, wallets: I) -> Result<()>
    where
        I: IntoIterator<Item = (Wallet, usize)>,
    {
        let mut wrote_any = false;
        for (wallet, entries) in wallets {
            self.writer.serialize(WalletRow {
                user: wallet.user_id.as_str(),
                wallet: wallet.id.to_string(),
                balance: format!("{:.2}", wallet.balance.value()),
                currency: &wallet.currency,
                entries,
            })?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer
                .write_record(["user", "wallet", "balance", "currency", "entries"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
