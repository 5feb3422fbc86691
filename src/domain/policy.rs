//! Fee and limit policy. Pure functions, no I/O.

use super::money::{Amount, round_money};
use super::transaction::{PaymentMethod, TransactionType};
use crate::error::PaymentError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceFee {
    Flat { amount: Decimal },
    Rate { rate: Decimal, min: Decimal, max: Decimal },
}

impl ServiceFee {
    fn apply(&self, amount: Decimal) -> Decimal {
        match *self {
            Self::Flat { amount: fee } => fee,
            Self::Rate { rate, min, max } => (amount * rate).max(min).min(max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessingFee {
    None,
    Flat { amount: Decimal },
    Percentage { rate: Decimal, cap: Decimal },
}

impl ProcessingFee {
    fn apply(&self, amount: Decimal) -> Decimal {
        match *self {
            Self::None => Decimal::ZERO,
            Self::Flat { amount: fee } => fee,
            Self::Percentage { rate, cap } => (amount * rate).min(cap),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    pub deposit: ServiceFee,
    pub withdrawal: ServiceFee,
    pub transfer: ServiceFee,
    pub mobile_money: ProcessingFee,
    pub bank_transfer: ProcessingFee,
    pub wallet: ProcessingFee,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            deposit: ServiceFee::Rate {
                rate: dec!(0.01),
                min: dec!(0.50),
                max: dec!(50),
            },
            withdrawal: ServiceFee::Flat { amount: dec!(2.00) },
            transfer: ServiceFee::Rate {
                rate: dec!(0.005),
                min: dec!(0.50),
                max: dec!(25),
            },
            mobile_money: ProcessingFee::Percentage {
                rate: dec!(0.01),
                cap: dec!(10),
            },
            bank_transfer: ProcessingFee::Flat { amount: dec!(5.00) },
            wallet: ProcessingFee::None,
        }
    }
}

impl FeeSchedule {
    /// A schedule that charges nothing.
    pub fn free() -> Self {
        let none = ServiceFee::Flat {
            amount: Decimal::ZERO,
        };
        Self {
            deposit: none,
            withdrawal: none,
            transfer: none,
            mobile_money: ProcessingFee::None,
            bank_transfer: ProcessingFee::None,
            wallet: ProcessingFee::None,
        }
    }

    fn service(&self, r#type: TransactionType) -> ServiceFee {
        match r#type {
            TransactionType::Deposit => self.deposit,
            TransactionType::Withdrawal => self.withdrawal,
            TransactionType::Transfer => self.transfer,
        }
    }

    fn processing(&self, method: PaymentMethod) -> ProcessingFee {
        match method {
            PaymentMethod::MobileMoney => self.mobile_money,
            PaymentMethod::BankTransfer => self.bank_transfer,
            PaymentMethod::Wallet => self.wallet,
        }
    }

    /// Computes the fees for one operation.
    ///
    /// Deposits pay fees out of the collected amount; withdrawals and transfers
    /// pay them on top of the amount sent.
    pub fn compute(
        &self,
        r#type: TransactionType,
        method: PaymentMethod,
        amount: Amount,
    ) -> Result<FeeBreakdown, PaymentError> {
        let value = amount.value();
        let service_fee = round_money(self.service(r#type).apply(value));
        let processing_fee = round_money(self.processing(method).apply(value));
        let total_fees = service_fee + processing_fee;

        let (net_amount, total_debit) = match r#type {
            TransactionType::Deposit => (value - total_fees, Decimal::ZERO),
            TransactionType::Withdrawal | TransactionType::Transfer => {
                (value, value + total_fees)
            }
        };

        if net_amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(format!(
                "Amount {} does not cover fees of {}",
                value, total_fees
            )));
        }

        Ok(FeeBreakdown {
            service_fee,
            processing_fee,
            total_fees,
            net_amount,
            total_debit,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub service_fee: Decimal,
    pub processing_fee: Decimal,
    pub total_fees: Decimal,
    /// What the wallet receives (deposit) or the destination receives (outgoing).
    pub net_amount: Decimal,
    /// What is reserved from the wallet; zero for deposits.
    pub total_debit: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub min: Decimal,
    pub max: Decimal,
    pub daily: Decimal,
    pub monthly: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitPolicy {
    pub deposit: Limits,
    pub withdrawal: Limits,
    pub transfer: Limits,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            deposit: Limits {
                min: dec!(1),
                max: dec!(10000),
                daily: dec!(20000),
                monthly: dec!(100000),
            },
            withdrawal: Limits {
                min: dec!(10),
                max: dec!(5000),
                daily: dec!(10000),
                monthly: dec!(50000),
            },
            transfer: Limits {
                min: dec!(1),
                max: dec!(5000),
                daily: dec!(10000),
                monthly: dec!(50000),
            },
        }
    }
}

/// Completed volume already used in the rolling windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub daily: Decimal,
    pub monthly: Decimal,
}

impl LimitPolicy {
    pub fn for_type(&self, r#type: TransactionType) -> &Limits {
        match r#type {
            TransactionType::Deposit => &self.deposit,
            TransactionType::Withdrawal => &self.withdrawal,
            TransactionType::Transfer => &self.transfer,
        }
    }

    /// Checks one amount against the per-transaction and accumulated caps.
    pub fn check(
        &self,
        r#type: TransactionType,
        amount: Decimal,
        usage: Usage,
    ) -> Result<(), PaymentError> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(format!(
                "Amount must be positive, got {}",
                amount
            )));
        }

        let limits = self.for_type(r#type);
        if amount < limits.min {
            return Err(PaymentError::LimitExceeded {
                which: "minimum",
                limit: limits.min,
                used: amount,
            });
        }
        if amount > limits.max {
            return Err(PaymentError::LimitExceeded {
                which: "maximum",
                limit: limits.max,
                used: amount,
            });
        }
        if usage.daily + amount > limits.daily {
            return Err(PaymentError::LimitExceeded {
                which: "daily",
                limit: limits.daily,
                used: usage.daily,
            });
        }
        if usage.monthly + amount > limits.monthly {
            return Err(PaymentError::LimitExceeded {
                which: "monthly",
                limit: limits.monthly,
                used: usage.monthly,
            });
        }
        Ok(())
    }
}
