use super::routing::MobileNetwork;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of outcomes the rest of the crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Completed,
    Failed,
    Processing,
    Pending,
}

impl GatewayStatus {
    /// Maps a free-text gateway status onto [`GatewayStatus`].
    ///
    /// Unknown strings map to `Pending`: an unexpected response must neither
    /// settle nor fail a payment.
    pub fn from_gateway(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "success" | "successful" | "succeeded" | "completed" | "complete" | "approved"
            | "paid" | "settled" => Self::Completed,
            "failed" | "failure" | "declined" | "rejected" | "cancelled" | "canceled"
            | "error" | "expired" | "reversed" | "timeout" => Self::Failed,
            "processing" | "in_progress" | "submitted" | "accepted" | "ongoing" => {
                Self::Processing
            }
            _ => Self::Pending,
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network failure, timeout or 5xx after retries were exhausted.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// Synchronous business rejection.
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("gateway authentication failed: {0}")]
    Authentication(String),
    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MobileMoneyDirection {
    Collection,
    Disbursement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MobileMoneyRequest {
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub phone_number: String,
    pub provider: MobileNetwork,
    pub description: String,
    #[serde(skip)]
    pub direction: MobileMoneyDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankTransferRequest {
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub account_number: String,
    pub bank_code: String,
    pub narration: String,
}

/// The gateway's synchronous acknowledgement of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAck {
    pub gateway_transaction_id: String,
    pub status: GatewayStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountValidation {
    /// The gateway resolved the account.
    Verified { account_name: String },
    /// The gateway was unreachable; only the local format check passed.
    ProvisionallyValid,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayBalance {
    pub available_balance: Decimal,
    pub currency: String,
}

/// An asynchronous callback, already authenticated by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCallback {
    #[serde(default, alias = "transactionId", alias = "transaction_id")]
    pub gateway_transaction_id: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    pub status: String,
    #[serde(default)]
    pub charges: Option<Decimal>,
    #[serde(default)]
    pub message: Option<String>,
}
