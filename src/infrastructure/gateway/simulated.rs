use crate::domain::gateway::{
    AccountValidation, BankTransferRequest, GatewayAck, GatewayBalance, GatewayError,
    GatewayStatus, MobileMoneyRequest,
};
use crate::domain::ports::PaymentGateway;
use crate::domain::routing::validate_bank_account;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

/// Offline gateway for dry runs.
///
/// Accepts every well-formed submission as `processing` under the id
/// `SIM-<reference>`; final outcomes arrive through webhooks like in
/// production.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    currency: String,
}

impl SimulatedGateway {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
        }
    }

    fn accept(&self, reference: &str) -> GatewayAck {
        debug!(reference, "Simulated gateway accepted submission");
        GatewayAck {
            gateway_transaction_id: format!("SIM-{}", reference),
            status: GatewayStatus::Processing,
            message: None,
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn collect_mobile_money(
        &self,
        request: &MobileMoneyRequest,
    ) -> Result<GatewayAck, GatewayError> {
        Ok(self.accept(&request.reference))
    }

    async fn disburse_mobile_money(
        &self,
        request: &MobileMoneyRequest,
    ) -> Result<GatewayAck, GatewayError> {
        Ok(self.accept(&request.reference))
    }

    async fn transfer_to_bank(
        &self,
        request: &BankTransferRequest,
    ) -> Result<GatewayAck, GatewayError> {
        Ok(self.accept(&request.reference))
    }

    async fn validate_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<AccountValidation, GatewayError> {
        validate_bank_account(account_number, bank_code)
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;
        Ok(AccountValidation::Verified {
            account_name: format!("Account {}", account_number),
        })
    }

    async fn balance(&self) -> Result<GatewayBalance, GatewayError> {
        Ok(GatewayBalance {
            available_balance: Decimal::ZERO,
            currency: self.currency.clone(),
        })
    }
}
