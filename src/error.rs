use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::gateway::GatewayError;
use crate::domain::transaction::TransactionStatus;

pub type Result<T, E = PaymentError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{which} limit exceeded: limit {limit}, used {used}")]
    LimitExceeded {
        which: &'static str,
        limit: Decimal,
        used: Decimal,
    },
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Decimal, required: Decimal },
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("Gateway rejected the request: {0}")]
    GatewayRejected(String),
    #[error("Gateway authentication failed: {0}")]
    Authentication(String),
    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Transaction cannot move from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PaymentError {
    /// Errors caused by the caller's input; these never touch the ledger.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::LimitExceeded { .. } | Self::DuplicateReference(_)
        )
    }

    /// Errors that leave the operation recoverable by a later retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_) | Self::Authentication(_))
    }
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) | GatewayError::InvalidResponse(msg) => {
                Self::GatewayUnavailable(msg)
            }
            GatewayError::Rejected(msg) => Self::GatewayRejected(msg),
            GatewayError::Authentication(msg) => Self::Authentication(msg),
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("Serialization error: {}", err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_classification() {
        assert!(PaymentError::Validation("bad".into()).is_validation());
        assert!(
            PaymentError::LimitExceeded {
                which: "daily",
                limit: dec!(10),
                used: dec!(9),
            }
            .is_validation()
        );
        assert!(!PaymentError::GatewayRejected("no".into()).is_validation());
        assert!(PaymentError::GatewayUnavailable("down".into()).is_retryable());
        assert!(!PaymentError::DuplicateReference("R1".into()).is_retryable());
    }

    #[test]
    fn test_gateway_error_conversion() {
        let err: PaymentError = GatewayError::Rejected("invalid account".into()).into();
        assert!(matches!(err, PaymentError::GatewayRejected(msg) if msg == "invalid account"));

        let err: PaymentError = GatewayError::InvalidResponse("garbled".into()).into();
        assert!(matches!(err, PaymentError::GatewayUnavailable(_)));
    }
}
