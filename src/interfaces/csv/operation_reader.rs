use crate::application::{DepositRequest, TransferRequest, WithdrawalRequest};
use crate::domain::gateway::GatewayCallback;
use crate::domain::routing::MobileNetwork;
use crate::domain::transaction::TransferDestination;
use crate::domain::wallet::UserId;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// Prefix marking a transfer destination as another platform wallet.
pub const WALLET_DESTINATION_PREFIX: &str = "wallet:";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Open,
    Verify,
    Deposit,
    Withdraw,
    Transfer,
    Webhook,
    Cancel,
    Retry,
}

/// One row of a batch file: `op,user,reference,amount,destination,bank_code,status`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OperationRecord {
    pub op: OperationKind,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub bank_code: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Open(UserId),
    Verify(UserId),
    Deposit(DepositRequest),
    Withdraw(WithdrawalRequest),
    Transfer(TransferRequest),
    Webhook(GatewayCallback),
    Cancel { reference: String },
    Retry { reference: String },
}

impl TryFrom<OperationRecord> for Operation {
    type Error = PaymentError;

    fn try_from(record: OperationRecord) -> Result<Self> {
        let op = record.op;
        let required = |value: Option<String>, field: &str| {
            value
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PaymentError::Validation(format!("{:?} requires a {}", op, field)))
        };
        let amount = |value: Option<Decimal>| {
            value.ok_or_else(|| PaymentError::Validation(format!("{:?} requires an amount", op)))
        };

        Ok(match op {
            OperationKind::Open => Self::Open(UserId::new(required(record.user, "user")?)),
            OperationKind::Verify => Self::Verify(UserId::new(required(record.user, "user")?)),
            OperationKind::Deposit => Self::Deposit(DepositRequest {
                user_id: UserId::new(required(record.user, "user")?),
                amount: amount(record.amount)?,
                phone_number: required(record.destination, "destination")?,
                provider: record
                    .bank_code
                    .filter(|v| !v.is_empty())
                    .map(|v| v.parse::<MobileNetwork>())
                    .transpose()?,
                reference: required(record.reference, "reference")?,
            }),
            OperationKind::Withdraw => Self::Withdraw(WithdrawalRequest {
                user_id: UserId::new(required(record.user, "user")?),
                amount: amount(record.amount)?,
                account_number: required(record.destination, "destination")?,
                bank_code: required(record.bank_code, "bank_code")?,
                reference: required(record.reference, "reference")?,
            }),
            OperationKind::Transfer => {
                let destination = required(record.destination, "destination")?;
                let bank_code = record.bank_code.filter(|v| !v.is_empty());
                let destination = match (destination.strip_prefix(WALLET_DESTINATION_PREFIX), bank_code) {
                    (Some(user), _) => TransferDestination::Wallet {
                        user_id: UserId::new(user),
                    },
                    (None, Some(bank_code)) => TransferDestination::Bank {
                        account_number: destination,
                        bank_code,
                    },
                    (None, None) => TransferDestination::MobileMoney {
                        phone_number: destination,
                        provider: None,
                    },
                };
                Self::Transfer(TransferRequest {
                    user_id: UserId::new(required(record.user, "user")?),
                    amount: amount(record.amount)?,
                    destination,
                    reference: required(record.reference, "reference")?,
                })
            }
            OperationKind::Webhook => Self::Webhook(GatewayCallback {
                gateway_transaction_id: record.destination.filter(|v| !v.is_empty()),
                reference: record.reference.filter(|v| !v.is_empty()),
                status: required(record.status, "status")?,
                charges: record.amount,
                message: None,
            }),
            OperationKind::Cancel => Self::Cancel {
                reference: required(record.reference, "reference")?,
            },
            OperationKind::Retry => Self::Retry {
                reference: required(record.reference, "reference")?,
            },
        })
    }
}

/// Reads batch operations from a CSV source.
///
/// Whitespace is trimmed and short rows are accepted; missing trailing
/// columns read as empty.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily parses rows; a bad row yields an error and reading goes on.
    pub fn operations(self) -> impl Iterator<Item = Result<Operation>> {
        self.reader.into_deserialize().map(|result| {
            let record: OperationRecord = result.map_err(PaymentError::from)?;
            Operation::try_from(record)
        })
    }
}
