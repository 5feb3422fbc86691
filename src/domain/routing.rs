//! Local format checks for payment routing data.
//!
//! These run before any gateway call and double as the fallback when the
//! gateway cannot be reached to resolve an account.

use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const COUNTRY_CODE: &str = "233";
const SUBSCRIBER_DIGITS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobileNetwork {
    Mtn,
    Telecel,
    AirtelTigo,
}

impl MobileNetwork {
    /// Detects the network from the two-digit prefix after the trunk zero.
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "24" | "25" | "53" | "54" | "55" | "59" => Some(Self::Mtn),
            "20" | "50" => Some(Self::Telecel),
            "26" | "27" | "56" | "57" => Some(Self::AirtelTigo),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Mtn => "mtn",
            Self::Telecel => "telecel",
            Self::AirtelTigo => "airteltigo",
        }
    }
}

impl fmt::Display for MobileNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MobileNetwork {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mtn" => Ok(Self::Mtn),
            "telecel" | "vodafone" => Ok(Self::Telecel),
            "airteltigo" | "airtel" | "tigo" => Ok(Self::AirtelTigo),
            other => Err(PaymentError::Validation(format!(
                "Unsupported mobile money provider: {}",
                other
            ))),
        }
    }
}

/// A phone number in international form together with its detected network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobileWallet {
    pub msisdn: String,
    pub provider: MobileNetwork,
}

/// Normalizes a phone number to `233XXXXXXXXX` and detects its network.
///
/// If `expected` is given it must agree with the detected network.
pub fn resolve_mobile_wallet(
    phone_number: &str,
    expected: Option<MobileNetwork>,
) -> Result<MobileWallet, PaymentError> {
    let digits: String = phone_number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid_phone(phone_number));
    }

    let subscriber = if let Some(rest) = digits.strip_prefix(COUNTRY_CODE)
        && rest.len() == SUBSCRIBER_DIGITS
    {
        rest
    } else if let Some(rest) = digits.strip_prefix('0')
        && rest.len() == SUBSCRIBER_DIGITS
    {
        rest
    } else {
        return Err(invalid_phone(phone_number));
    };

    let provider = MobileNetwork::from_prefix(&subscriber[..2]).ok_or_else(|| {
        PaymentError::Validation(format!(
            "Phone number {} does not belong to a supported network",
            phone_number
        ))
    })?;

    if let Some(expected) = expected
        && expected != provider
    {
        return Err(PaymentError::Validation(format!(
            "Phone number {} belongs to {}, not {}",
            phone_number, provider, expected
        )));
    }

    Ok(MobileWallet {
        msisdn: format!("{}{}", COUNTRY_CODE, subscriber),
        provider,
    })
}

fn invalid_phone(phone_number: &str) -> PaymentError {
    PaymentError::Validation(format!("Invalid phone number: {}", phone_number))
}

/// Checks the shape of a bank account number and bank code.
pub fn validate_bank_account(account_number: &str, bank_code: &str) -> Result<(), PaymentError> {
    let account_ok = (6..=20).contains(&account_number.len())
        && account_number.chars().all(|c| c.is_ascii_digit());
    if !account_ok {
        return Err(PaymentError::Validation(format!(
            "Invalid account number: {}",
            account_number
        )));
    }

    let bank_ok =
        (3..=10).contains(&bank_code.len()) && bank_code.chars().all(|c| c.is_ascii_alphanumeric());
    if !bank_ok {
        return Err(PaymentError::Validation(format!(
            "Invalid bank code: {}",
            bank_code
        )));
    }

    Ok(())
}
