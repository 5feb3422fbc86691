use super::routing::MobileNetwork;
use super::wallet::{UserId, WalletId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit => f.write_str("deposit"),
            Self::Withdrawal => f.write_str("withdrawal"),
            Self::Transfer => f.write_str("transfer"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MobileMoney,
    BankTransfer,
    /// Movement between two platform wallets; never reaches the gateway.
    Wallet,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MobileMoney => f.write_str("mobile_money"),
            Self::BankTransfer => f.write_str("bank_transfer"),
            Self::Wallet => f.write_str("wallet"),
        }
    }
}

/// Lifecycle of a [`PaymentTransaction`].
///
/// ```text
/// Pending -> Processing -> Completed
/// Pending -> Failed        Processing -> Failed
/// Pending | Processing -> Cancelled
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Where an outgoing transfer is routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferDestination {
    MobileMoney {
        phone_number: String,
        provider: Option<MobileNetwork>,
    },
    Bank {
        account_number: String,
        bank_code: String,
    },
    Wallet {
        user_id: UserId,
    },
}

impl TransferDestination {
    pub fn method(&self) -> PaymentMethod {
        match self {
            Self::MobileMoney { .. } => PaymentMethod::MobileMoney,
            Self::Bank { .. } => PaymentMethod::BankTransfer,
            Self::Wallet { .. } => PaymentMethod::Wallet,
        }
    }
}

/// The externally visible unit of work. Kept forever for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub wallet_id: WalletId,
    pub r#type: TransactionType,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub reference: String,
    pub gateway_transaction_id: Option<String>,
    /// Fees charged by the platform.
    pub charges: Decimal,
    /// Amount credited (deposits) or delivered (withdrawals and transfers).
    pub net_amount: Decimal,
    /// Amount reserved from the wallet up front; zero for deposits.
    pub reserved_amount: Decimal,
    /// Charges reported by the gateway on its callback.
    pub gateway_charges: Option<Decimal>,
    pub source_account: Option<String>,
    pub destination_account: Option<String>,
    pub phone_number: Option<String>,
    pub provider: Option<MobileNetwork>,
    pub bank_code: Option<String>,
    pub failure_reason: Option<String>,
    /// The failed transaction this one retries, if any.
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Suffix of the ledger reference that credits a reserved amount back.
pub const REFUND_SUFFIX: &str = "-refund";
/// Suffix of the ledger reference that credits the recipient of a wallet transfer.
pub const CREDIT_SUFFIX: &str = "-credit";

/// Whether `reference` has the shape of a ledger reference derived from
/// another transaction. Such references are never accepted from callers.
pub fn is_derived_reference(reference: &str) -> bool {
    reference.ends_with(REFUND_SUFFIX) || reference.ends_with(CREDIT_SUFFIX)
}

impl PaymentTransaction {
    /// Reference used for the compensating credit of a reserved amount.
    pub fn refund_reference(&self) -> String {
        format!("{}{}", self.reference, REFUND_SUFFIX)
    }

    /// Reference used for the recipient's credit of an internal transfer.
    pub fn credit_reference(&self) -> String {
        format!("{}{}", self.reference, CREDIT_SUFFIX)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    #[test]
    fn test_terminal_states_are_closed() {
        let all = [Pending, Processing, Completed, Failed, Cancelled];
        for from in [Completed, Failed, Cancelled] {
            assert!(from.is_terminal());
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let method: PaymentMethod = serde_json::from_str("\"mobile_money\"").unwrap();
        assert_eq!(method, PaymentMethod::MobileMoney);
    }

    #[test]
    fn test_derived_references() {
        assert!(is_derived_reference("W1-refund"));
        assert!(is_derived_reference("T1-credit"));
        assert!(!is_derived_reference("W1"));
        assert!(!is_derived_reference("W1-refunded"));
        assert!(!is_derived_reference("W1-retry-1700000000000"));
    }

    #[test]
    fn test_destination_method() {
        let dest = TransferDestination::Bank {
            account_number: "0123456789".into(),
            bank_code: "GCB".into(),
        };
        assert_eq!(dest.method(), PaymentMethod::BankTransfer);
        let dest = TransferDestination::Wallet {
            user_id: "bob".into(),
        };
        assert_eq!(dest.method(), PaymentMethod::Wallet);
    }
}
