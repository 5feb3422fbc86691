use super::gateway::{
    AccountValidation, BankTransferRequest, GatewayAck, GatewayBalance, GatewayError,
    MobileMoneyRequest,
};
use super::money::Amount;
use super::transaction::{PaymentTransaction, TransactionStatus, TransactionType};
use super::wallet::{Direction, EntryOutcome, LedgerEntry, UserId, Wallet, WalletId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Durable wallet balances and their append-only history.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns the user's wallet, creating it if needed.
    async fn open_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet>;
    async fn wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>>;
    async fn wallet_by_user(&self, user_id: &UserId) -> Result<Option<Wallet>>;
    async fn wallets(&self) -> Result<Vec<Wallet>>;
    async fn set_wallet_flags(
        &self,
        wallet_id: WalletId,
        is_active: bool,
        is_verified: bool,
    ) -> Result<Wallet>;

    /// The only balance-mutating primitive.
    ///
    /// Atomic per wallet and idempotent on `reference`. Repeating a call with
    /// the same direction and amount yields `Replayed` with the existing
    /// entry. Reusing the reference for a different direction or amount fails
    /// with `DuplicateReference`.
    async fn apply_entry(
        &self,
        wallet_id: WalletId,
        direction: Direction,
        amount: Amount,
        reference: &str,
        description: &str,
    ) -> Result<EntryOutcome>;

    /// Entries in the order they were written.
    async fn entries(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>>;
    async fn entry_by_reference(
        &self,
        wallet_id: WalletId,
        reference: &str,
    ) -> Result<Option<LedgerEntry>>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Fails with `DuplicateReference` if the reference is already taken.
    async fn insert(&self, tx: PaymentTransaction) -> Result<()>;

    /// Persists `tx` only if the stored status still equals `expected`.
    async fn update_if(&self, tx: &PaymentTransaction, expected: TransactionStatus) -> Result<bool>;

    async fn get(&self, id: Uuid) -> Result<Option<PaymentTransaction>>;
    async fn find_by_reference(&self, reference: &str) -> Result<Option<PaymentTransaction>>;
    async fn find_by_gateway_id(&self, gateway_id: &str) -> Result<Option<PaymentTransaction>>;
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PaymentTransaction>>;

    /// Sum of completed amounts of one type since `since`.
    async fn completed_volume(
        &self,
        user_id: &UserId,
        r#type: TransactionType,
        since: DateTime<Utc>,
    ) -> Result<Decimal>;
}

/// The external payment gateway, seen through the calls this crate makes.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn collect_mobile_money(
        &self,
        request: &MobileMoneyRequest,
    ) -> std::result::Result<GatewayAck, GatewayError>;

    async fn disburse_mobile_money(
        &self,
        request: &MobileMoneyRequest,
    ) -> std::result::Result<GatewayAck, GatewayError>;

    async fn transfer_to_bank(
        &self,
        request: &BankTransferRequest,
    ) -> std::result::Result<GatewayAck, GatewayError>;

    async fn validate_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> std::result::Result<AccountValidation, GatewayError>;

    async fn balance(&self) -> std::result::Result<GatewayBalance, GatewayError>;
}

/// Outbound notification collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: &UserId,
        transaction_id: Uuid,
        status: TransactionStatus,
    ) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedLedgerStore = Arc<dyn LedgerStore>;
pub type SharedTransactionStore = Arc<dyn TransactionStore>;
pub type SharedGateway = Arc<dyn PaymentGateway>;
pub type SharedNotifier = Arc<dyn Notifier>;
pub type SharedClock = Arc<dyn Clock>;
