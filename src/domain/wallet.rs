use super::money::{Amount, Balance};
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a platform user, resolved by the caller before reaching this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(pub Uuid);

impl WalletId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credit => f.write_str("credit"),
            Self::Debit => f.write_str("debit"),
        }
    }
}

/// A user's wallet.
///
/// The balance is only ever changed through [`Wallet::apply`], which the ledger
/// store calls while holding the wallet's lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Balance,
    pub currency: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: UserId, currency: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: WalletId::generate(),
            user_id,
            balance: Balance::ZERO,
            currency: currency.into(),
            is_active: true,
            is_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the balance and returns the entry describing the change.
    ///
    /// A debit larger than the balance is rejected and leaves the wallet untouched.
    pub fn apply(
        &mut self,
        direction: Direction,
        amount: Amount,
        reference: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, PaymentError> {
        let balance_before = self.balance;
        let balance_after = match direction {
            Direction::Credit => balance_before + amount.into(),
            Direction::Debit => balance_before.checked_debit(amount).ok_or(
                PaymentError::InsufficientFunds {
                    available: balance_before.value(),
                    required: amount.value(),
                },
            )?,
        };

        self.balance = balance_after;
        self.updated_at = now;

        Ok(LedgerEntry {
            id: Uuid::now_v7(),
            wallet_id: self.id,
            direction,
            amount,
            balance_before,
            balance_after,
            reference: reference.to_string(),
            description: description.to_string(),
            created_at: now,
        })
    }
}

/// Immutable record of one balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub wallet_id: WalletId,
    pub direction: Direction,
    pub amount: Amount,
    pub balance_before: Balance,
    pub balance_after: Balance,
    pub reference: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The entry's effect on the balance: positive for credits, negative for debits.
    pub fn signed_amount(&self) -> rust_decimal::Decimal {
        match self.direction {
            Direction::Credit => self.amount.value(),
            Direction::Debit => -self.amount.value(),
        }
    }

    /// Whether a request for `direction` and `amount` describes this entry.
    pub fn matches(&self, direction: Direction, amount: Amount) -> bool {
        self.direction == direction && self.amount == amount
    }
}

/// What a ledger write did with its reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// The entry was written and the balance moved.
    Applied(LedgerEntry),
    /// An identical entry already held the reference; nothing changed.
    Replayed(LedgerEntry),
}

impl EntryOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            EntryOutcome::Applied(entry) | EntryOutcome::Replayed(entry) => entry,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            EntryOutcome::Applied(entry) | EntryOutcome::Replayed(entry) => entry,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, EntryOutcome::Applied(_))
    }
}

/// Result of replaying a wallet's history against its stored balance.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceAudit {
    pub wallet_id: WalletId,
    pub stored: Balance,
    pub replayed: Balance,
    pub entries: usize,
}

impl BalanceAudit {
    pub fn from_history(wallet: &Wallet, entries: &[LedgerEntry]) -> Self {
        let replayed = entries.iter().map(LedgerEntry::signed_amount).sum();
        Self {
            wallet_id: wallet.id,
            stored: wallet.balance,
            replayed: Balance::new(replayed),
            entries: entries.len(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.stored == self.replayed
    }
}
