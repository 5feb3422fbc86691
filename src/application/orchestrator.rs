use crate::domain::gateway::{
    AccountValidation, BankTransferRequest, GatewayAck, GatewayBalance, GatewayCallback,
    GatewayError, MobileMoneyDirection, MobileMoneyRequest,
};
use crate::domain::money::Amount;
use crate::domain::policy::{FeeBreakdown, FeeSchedule, LimitPolicy, Usage};
use crate::domain::ports::{SharedClock, SharedGateway, SharedLedgerStore, SharedTransactionStore};
use crate::domain::routing::{MobileNetwork, resolve_mobile_wallet, validate_bank_account};
use crate::domain::transaction::{
    PaymentMethod, PaymentTransaction, TransactionStatus, TransactionType, TransferDestination,
    is_derived_reference,
};
use crate::domain::wallet::{BalanceAudit, Direction, LedgerEntry, UserId, Wallet};
use crate::error::{PaymentError, Result};
use crate::locks::KeyedLocks;
use chrono::Duration;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub currency: String,
    pub fees: FeeSchedule,
    pub limits: LimitPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            currency: "GHS".to_string(),
            fees: FeeSchedule::default(),
            limits: LimitPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub phone_number: String,
    pub provider: Option<MobileNetwork>,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub account_number: String,
    pub bank_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub destination: TransferDestination,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq)]
enum PaymentRequest {
    Deposit(DepositRequest),
    Withdrawal(WithdrawalRequest),
    Transfer(TransferRequest),
}

impl PaymentRequest {
    /// Rebuilds the request that produced `tx`, under a new reference.
    fn replay(tx: &PaymentTransaction, reference: String) -> Result<Self> {
        let missing = |field: &str| {
            PaymentError::Validation(format!("transaction {} has no {}", tx.id, field))
        };
        let user_id = tx.user_id.clone();
        let amount = tx.amount;

        Ok(match (tx.r#type, tx.method) {
            (TransactionType::Deposit, _) => Self::Deposit(DepositRequest {
                user_id,
                amount,
                phone_number: tx.phone_number.clone().ok_or_else(|| missing("phone number"))?,
                provider: tx.provider,
                reference,
            }),
            (TransactionType::Withdrawal, _) => Self::Withdrawal(WithdrawalRequest {
                user_id,
                amount,
                account_number: tx
                    .destination_account
                    .clone()
                    .ok_or_else(|| missing("destination account"))?,
                bank_code: tx.bank_code.clone().ok_or_else(|| missing("bank code"))?,
                reference,
            }),
            (TransactionType::Transfer, method) => {
                let destination = match method {
                    PaymentMethod::MobileMoney => TransferDestination::MobileMoney {
                        phone_number: tx.phone_number.clone().ok_or_else(|| missing("phone number"))?,
                        provider: tx.provider,
                    },
                    PaymentMethod::BankTransfer => TransferDestination::Bank {
                        account_number: tx
                            .destination_account
                            .clone()
                            .ok_or_else(|| missing("destination account"))?,
                        bank_code: tx.bank_code.clone().ok_or_else(|| missing("bank code"))?,
                    },
                    PaymentMethod::Wallet => TransferDestination::Wallet {
                        user_id: tx
                            .destination_account
                            .clone()
                            .map(UserId::new)
                            .ok_or_else(|| missing("recipient"))?,
                    },
                };
                Self::Transfer(TransferRequest {
                    user_id,
                    amount,
                    destination,
                    reference,
                })
            }
        })
    }
}

/// How an operation moves money, which decides its compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStrategy {
    /// Deposits: the gateway collects first and the wallet is credited only
    /// once the gateway confirms. Nothing to undo on failure.
    CreditOnConfirmation,
    /// Withdrawals and transfers: the wallet is debited before the gateway is
    /// called and credited back under `<reference>-refund` on failure.
    ReserveThenCompensate,
}

impl SettlementStrategy {
    pub fn for_type(r#type: TransactionType) -> Self {
        match r#type {
            TransactionType::Deposit => Self::CreditOnConfirmation,
            TransactionType::Withdrawal | TransactionType::Transfer => Self::ReserveThenCompensate,
        }
    }
}

/// Gateway-reported details to record alongside a state change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayUpdate {
    pub gateway_transaction_id: Option<String>,
    pub charges: Option<Decimal>,
}

impl GatewayUpdate {
    fn apply(&self, tx: &mut PaymentTransaction) {
        if tx.gateway_transaction_id.is_none() {
            tx.gateway_transaction_id = self.gateway_transaction_id.clone();
        }
        if self.charges.is_some() {
            tx.gateway_charges = self.charges;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(PaymentTransaction),
    /// The transaction was already past the requested state.
    Unchanged(PaymentTransaction),
}

impl TransitionOutcome {
    pub fn transaction(&self) -> &PaymentTransaction {
        match self {
            Self::Applied(tx) | Self::Unchanged(tx) => tx,
        }
    }
}

/// Drives deposits, withdrawals and transfers through their state machine.
///
/// Every status change is a conditional write against the status the
/// orchestrator last read, and all changes to one transaction are serialized
/// through a per-transaction lock.
pub struct Orchestrator {
    ledger: SharedLedgerStore,
    transactions: SharedTransactionStore,
    gateway: SharedGateway,
    clock: SharedClock,
    config: OrchestratorConfig,
    tx_locks: KeyedLocks<Uuid>,
}

impl Orchestrator {
    pub fn new(
        ledger: SharedLedgerStore,
        transactions: SharedTransactionStore,
        gateway: SharedGateway,
        clock: SharedClock,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            transactions,
            gateway,
            clock,
            config,
            tx_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn open_wallet(&self, user_id: &UserId) -> Result<Wallet> {
        self.ledger.open_wallet(user_id, &self.config.currency).await
    }

    pub async fn set_wallet_flags(
        &self,
        user_id: &UserId,
        is_active: bool,
        is_verified: bool,
    ) -> Result<Wallet> {
        let wallet = self.wallet(user_id).await?;
        self.ledger
            .set_wallet_flags(wallet.id, is_active, is_verified)
            .await
    }

    pub async fn wallet(&self, user_id: &UserId) -> Result<Wallet> {
        self.ledger
            .wallet_by_user(user_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("wallet for user {}", user_id)))
    }

    pub async fn wallets(&self) -> Result<Vec<Wallet>> {
        self.ledger.wallets().await
    }

    pub async fn entries(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
        let wallet = self.wallet(user_id).await?;
        self.ledger.entries(wallet.id).await
    }

    /// Replays the wallet's history against its stored balance.
    pub async fn audit(&self, user_id: &UserId) -> Result<BalanceAudit> {
        let wallet = self.wallet(user_id).await?;
        let entries = self.ledger.entries(wallet.id).await?;
        Ok(BalanceAudit::from_history(&wallet, &entries))
    }

    pub async fn transaction(&self, id: Uuid) -> Result<PaymentTransaction> {
        self.transactions
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {}", id)))
    }

    pub async fn transaction_by_reference(&self, reference: &str) -> Result<PaymentTransaction> {
        self.transactions
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction with reference {}", reference)))
    }

    pub async fn transactions_for(&self, user_id: &UserId) -> Result<Vec<PaymentTransaction>> {
        self.transactions.list_for_user(user_id).await
    }

    /// Looks up the transaction a callback refers to, by gateway id first.
    pub async fn transaction_for_callback(
        &self,
        callback: &GatewayCallback,
    ) -> Result<PaymentTransaction> {
        if let Some(gateway_id) = &callback.gateway_transaction_id
            && let Some(tx) = self.transactions.find_by_gateway_id(gateway_id).await?
        {
            return Ok(tx);
        }
        if let Some(reference) = &callback.reference {
            return self.transaction_by_reference(reference).await;
        }
        match &callback.gateway_transaction_id {
            Some(gateway_id) => Err(PaymentError::NotFound(format!(
                "transaction with gateway id {}",
                gateway_id
            ))),
            None => Err(PaymentError::Validation(
                "callback carries neither a gateway transaction id nor a reference".into(),
            )),
        }
    }

    pub async fn gateway_balance(&self) -> Result<GatewayBalance> {
        Ok(self.gateway.balance().await?)
    }

    pub async fn deposit(&self, request: DepositRequest) -> Result<PaymentTransaction> {
        self.run_deposit(request, None).await
    }

    pub async fn withdraw(&self, request: WithdrawalRequest) -> Result<PaymentTransaction> {
        self.run_withdrawal(request, None).await
    }

    pub async fn transfer(&self, request: TransferRequest) -> Result<PaymentTransaction> {
        self.run_transfer(request, None).await
    }

    /// Starts a fresh attempt of a failed transaction.
    ///
    /// The original stays untouched; the new transaction gets the reference
    /// `<original>-retry-<unix millis>` and points back through `retry_of`.
    pub async fn retry(&self, transaction_id: Uuid) -> Result<PaymentTransaction> {
        let original = self.transaction(transaction_id).await?;
        if original.status != TransactionStatus::Failed {
            return Err(PaymentError::InvalidTransition {
                from: original.status,
                to: TransactionStatus::Pending,
            });
        }

        let reference = format!(
            "{}-retry-{}",
            original.reference,
            self.clock.now().timestamp_millis()
        );
        info!(transaction_id = %original.id, reference = %reference, "Retrying failed transaction");

        match PaymentRequest::replay(&original, reference)? {
            PaymentRequest::Deposit(request) => self.run_deposit(request, Some(original.id)).await,
            PaymentRequest::Withdrawal(request) => {
                self.run_withdrawal(request, Some(original.id)).await
            }
            PaymentRequest::Transfer(request) => {
                self.run_transfer(request, Some(original.id)).await
            }
        }
    }

    /// Cancels a pending or processing transaction, releasing any reservation.
    pub async fn cancel(&self, transaction_id: Uuid) -> Result<PaymentTransaction> {
        let _guard = self.tx_locks.lock(transaction_id).await;
        let tx = self.transaction(transaction_id).await?;
        if tx.is_terminal() {
            return Err(PaymentError::InvalidTransition {
                from: tx.status,
                to: TransactionStatus::Cancelled,
            });
        }

        self.compensate(&tx).await?;
        self.transition(&tx, TransactionStatus::Cancelled, |tx| {
            tx.failure_reason = Some("Cancelled before completion".into());
        })
        .await
    }

    /// Marks a transaction as accepted by the gateway.
    pub async fn mark_processing(
        &self,
        transaction_id: Uuid,
        update: GatewayUpdate,
    ) -> Result<TransitionOutcome> {
        let _guard = self.tx_locks.lock(transaction_id).await;
        let tx = self.transaction(transaction_id).await?;
        match tx.status {
            TransactionStatus::Pending => Ok(TransitionOutcome::Applied(
                self.transition(&tx, TransactionStatus::Processing, |tx| update.apply(tx))
                    .await?,
            )),
            TransactionStatus::Processing => {
                let mut updated = tx.clone();
                update.apply(&mut updated);
                if updated == tx {
                    return Ok(TransitionOutcome::Unchanged(tx));
                }
                updated.updated_at = self.clock.now();
                if self.transactions.update_if(&updated, tx.status).await? {
                    Ok(TransitionOutcome::Applied(updated))
                } else {
                    Ok(TransitionOutcome::Unchanged(self.transaction(tx.id).await?))
                }
            }
            _ => Ok(TransitionOutcome::Unchanged(tx)),
        }
    }

    /// Finalizes a transaction the gateway reports as successful.
    ///
    /// Deposits are credited here, under the transaction's own reference.
    pub async fn complete(
        &self,
        transaction_id: Uuid,
        update: GatewayUpdate,
    ) -> Result<TransitionOutcome> {
        let _guard = self.tx_locks.lock(transaction_id).await;
        let tx = self.transaction(transaction_id).await?;
        self.complete_locked(tx, update).await
    }

    /// Fails a transaction, compensating any reservation first.
    pub async fn fail(
        &self,
        transaction_id: Uuid,
        reason: &str,
        update: GatewayUpdate,
    ) -> Result<TransitionOutcome> {
        let _guard = self.tx_locks.lock(transaction_id).await;
        let tx = self.transaction(transaction_id).await?;
        self.fail_locked(tx, reason, update).await
    }

    async fn complete_locked(
        &self,
        tx: PaymentTransaction,
        update: GatewayUpdate,
    ) -> Result<TransitionOutcome> {
        if tx.is_terminal() {
            if tx.status != TransactionStatus::Completed {
                error!(
                    transaction_id = %tx.id,
                    reference = %tx.reference,
                    status = %tx.status,
                    "Gateway reported success for a transaction already closed; needs manual reconciliation"
                );
            }
            return Ok(TransitionOutcome::Unchanged(tx));
        }

        let tx = if tx.status == TransactionStatus::Pending {
            self.transition(&tx, TransactionStatus::Processing, |tx| update.apply(tx))
                .await?
        } else {
            tx
        };

        if SettlementStrategy::for_type(tx.r#type) == SettlementStrategy::CreditOnConfirmation {
            let credit = Amount::new(tx.net_amount)?;
            self.ledger
                .apply_entry(
                    tx.wallet_id,
                    Direction::Credit,
                    credit,
                    &tx.reference,
                    &format!("{} {}", describe(&tx), tx.reference),
                )
                .await?;
        }

        let completed = self
            .transition(&tx, TransactionStatus::Completed, |tx| update.apply(tx))
            .await?;
        Ok(TransitionOutcome::Applied(completed))
    }

    async fn fail_locked(
        &self,
        tx: PaymentTransaction,
        reason: &str,
        update: GatewayUpdate,
    ) -> Result<TransitionOutcome> {
        if tx.is_terminal() {
            return Ok(TransitionOutcome::Unchanged(tx));
        }

        self.compensate(&tx).await?;
        let failed = self
            .transition(&tx, TransactionStatus::Failed, |tx| {
                tx.failure_reason = Some(reason.to_string());
                update.apply(tx);
            })
            .await?;
        Ok(TransitionOutcome::Applied(failed))
    }

    /// Credits back the reservation of a withdrawal or transfer.
    ///
    /// Idempotent through the `-refund` reference.
    async fn compensate(&self, tx: &PaymentTransaction) -> Result<()> {
        if SettlementStrategy::for_type(tx.r#type) != SettlementStrategy::ReserveThenCompensate
            || tx.reserved_amount <= Decimal::ZERO
        {
            return Ok(());
        }
        let reserved = Amount::new(tx.reserved_amount)?;
        let reservation = self
            .ledger
            .entry_by_reference(tx.wallet_id, &tx.reference)
            .await?;
        if !reservation.is_some_and(|entry| entry.matches(Direction::Debit, reserved)) {
            warn!(transaction_id = %tx.id, reference = %tx.reference, "No reservation found to compensate");
            return Ok(());
        }

        let outcome = self
            .ledger
            .apply_entry(
                tx.wallet_id,
                Direction::Credit,
                reserved,
                &tx.refund_reference(),
                &format!("Refund of {}", tx.reference),
            )
            .await?;
        if outcome.is_applied() {
            info!(
                transaction_id = %tx.id,
                reference = %outcome.entry().reference,
                amount = %outcome.entry().amount,
                "Compensated reservation"
            );
        }
        Ok(())
    }

    /// Conditionally moves `tx` to `next`; fails if another writer got there first.
    async fn transition<F>(
        &self,
        tx: &PaymentTransaction,
        next: TransactionStatus,
        mutate: F,
    ) -> Result<PaymentTransaction>
    where
        F: FnOnce(&mut PaymentTransaction) + Send,
    {
        if !tx.status.can_transition_to(next) {
            return Err(PaymentError::InvalidTransition {
                from: tx.status,
                to: next,
            });
        }

        let now = self.clock.now();
        let mut updated = tx.clone();
        updated.status = next;
        updated.updated_at = now;
        if next == TransactionStatus::Completed {
            updated.completed_at = Some(now);
        }
        mutate(&mut updated);

        if !self.transactions.update_if(&updated, tx.status).await? {
            let current = self.transaction(tx.id).await?;
            return Err(PaymentError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        info!(
            transaction_id = %tx.id,
            reference = %tx.reference,
            from = %tx.status,
            to = %next,
            "Transaction status changed"
        );
        Ok(updated)
    }

    async fn run_deposit(
        &self,
        request: DepositRequest,
        retry_of: Option<Uuid>,
    ) -> Result<PaymentTransaction> {
        let amount = Amount::new(request.amount)?;
        let mobile = resolve_mobile_wallet(&request.phone_number, request.provider)?;
        self.ensure_reference_free(&request.reference).await?;
        let wallet = self.active_wallet(&request.user_id).await?;
        self.ensure_ledger_reference_free(&wallet, &request.reference)
            .await?;
        let fees = self.config.fees.compute(
            TransactionType::Deposit,
            PaymentMethod::MobileMoney,
            amount,
        )?;
        self.check_limits(&request.user_id, TransactionType::Deposit, amount)
            .await?;

        let mut tx = self.new_transaction(
            &wallet,
            TransactionType::Deposit,
            PaymentMethod::MobileMoney,
            amount,
            &fees,
            &request.reference,
            retry_of,
        );
        tx.phone_number = Some(mobile.msisdn.clone());
        tx.source_account = Some(mobile.msisdn.clone());
        tx.provider = Some(mobile.provider);
        self.transactions.insert(tx.clone()).await?;
        info!(transaction_id = %tx.id, reference = %tx.reference, amount = %amount, "Deposit created");

        let submission = MobileMoneyRequest {
            reference: tx.reference.clone(),
            amount: amount.value(),
            currency: tx.currency.clone(),
            phone_number: mobile.msisdn,
            provider: mobile.provider,
            description: "Wallet top-up".into(),
            direction: MobileMoneyDirection::Collection,
        };
        let result = self.gateway.collect_mobile_money(&submission).await;
        self.settle_submission(tx, result).await
    }

    async fn run_withdrawal(
        &self,
        request: WithdrawalRequest,
        retry_of: Option<Uuid>,
    ) -> Result<PaymentTransaction> {
        let amount = Amount::new(request.amount)?;
        validate_bank_account(&request.account_number, &request.bank_code)?;
        self.ensure_reference_free(&request.reference).await?;
        let wallet = self.verified_wallet(&request.user_id).await?;
        self.ensure_ledger_reference_free(&wallet, &request.reference)
            .await?;
        let fees = self.config.fees.compute(
            TransactionType::Withdrawal,
            PaymentMethod::BankTransfer,
            amount,
        )?;
        self.check_limits(&request.user_id, TransactionType::Withdrawal, amount)
            .await?;
        ensure_covers(&wallet, &fees)?;
        self.resolve_bank_account(&request.account_number, &request.bank_code)
            .await?;

        let mut tx = self.new_transaction(
            &wallet,
            TransactionType::Withdrawal,
            PaymentMethod::BankTransfer,
            amount,
            &fees,
            &request.reference,
            retry_of,
        );
        tx.destination_account = Some(request.account_number.clone());
        tx.bank_code = Some(request.bank_code.clone());
        let tx = self.reserve(&wallet, tx).await?;

        let submission = BankTransferRequest {
            reference: tx.reference.clone(),
            amount: tx.net_amount,
            currency: tx.currency.clone(),
            account_number: request.account_number,
            bank_code: request.bank_code,
            narration: format!("Withdrawal {}", tx.reference),
        };
        let result = self.gateway.transfer_to_bank(&submission).await;
        self.settle_submission(tx, result).await
    }

    async fn run_transfer(
        &self,
        request: TransferRequest,
        retry_of: Option<Uuid>,
    ) -> Result<PaymentTransaction> {
        let amount = Amount::new(request.amount)?;
        let method = request.destination.method();

        // Destination checks that need no I/O come first.
        let mobile = match &request.destination {
            TransferDestination::MobileMoney {
                phone_number,
                provider,
            } => Some(resolve_mobile_wallet(phone_number, *provider)?),
            TransferDestination::Bank {
                account_number,
                bank_code,
            } => {
                validate_bank_account(account_number, bank_code)?;
                None
            }
            TransferDestination::Wallet { user_id } => {
                if user_id == &request.user_id {
                    return Err(PaymentError::Validation(
                        "Cannot transfer to your own wallet".into(),
                    ));
                }
                None
            }
        };

        self.ensure_reference_free(&request.reference).await?;
        let wallet = match method {
            PaymentMethod::Wallet => self.active_wallet(&request.user_id).await?,
            _ => self.verified_wallet(&request.user_id).await?,
        };
        self.ensure_ledger_reference_free(&wallet, &request.reference)
            .await?;
        let fees = self
            .config
            .fees
            .compute(TransactionType::Transfer, method, amount)?;
        self.check_limits(&request.user_id, TransactionType::Transfer, amount)
            .await?;
        ensure_covers(&wallet, &fees)?;

        let mut tx = self.new_transaction(
            &wallet,
            TransactionType::Transfer,
            method,
            amount,
            &fees,
            &request.reference,
            retry_of,
        );

        match request.destination {
            TransferDestination::MobileMoney { .. } => {
                let Some(mobile) = mobile else {
                    return Err(PaymentError::Validation("Missing mobile wallet".into()));
                };
                tx.phone_number = Some(mobile.msisdn.clone());
                tx.destination_account = Some(mobile.msisdn.clone());
                tx.provider = Some(mobile.provider);
                let tx = self.reserve(&wallet, tx).await?;

                let submission = MobileMoneyRequest {
                    reference: tx.reference.clone(),
                    amount: tx.net_amount,
                    currency: tx.currency.clone(),
                    phone_number: mobile.msisdn,
                    provider: mobile.provider,
                    description: format!("Transfer {}", tx.reference),
                    direction: MobileMoneyDirection::Disbursement,
                };
                let result = self.gateway.disburse_mobile_money(&submission).await;
                self.settle_submission(tx, result).await
            }
            TransferDestination::Bank {
                account_number,
                bank_code,
            } => {
                self.resolve_bank_account(&account_number, &bank_code).await?;
                tx.destination_account = Some(account_number.clone());
                tx.bank_code = Some(bank_code.clone());
                let tx = self.reserve(&wallet, tx).await?;

                let submission = BankTransferRequest {
                    reference: tx.reference.clone(),
                    amount: tx.net_amount,
                    currency: tx.currency.clone(),
                    account_number,
                    bank_code,
                    narration: format!("Transfer {}", tx.reference),
                };
                let result = self.gateway.transfer_to_bank(&submission).await;
                self.settle_submission(tx, result).await
            }
            TransferDestination::Wallet { user_id } => {
                let recipient = self.active_wallet(&user_id).await?;
                if recipient.currency != wallet.currency {
                    return Err(PaymentError::Validation(format!(
                        "Recipient wallet holds {}, not {}",
                        recipient.currency, wallet.currency
                    )));
                }
                tx.destination_account = Some(user_id.to_string());
                let tx = self.reserve(&wallet, tx).await?;
                self.settle_internal_transfer(tx, &recipient).await
            }
        }
    }

    /// Moves an internal transfer to completion: two single-wallet mutations,
    /// the sender's reservation and then the recipient's credit.
    async fn settle_internal_transfer(
        &self,
        tx: PaymentTransaction,
        recipient: &Wallet,
    ) -> Result<PaymentTransaction> {
        let _guard = self.tx_locks.lock(tx.id).await;
        let tx = self
            .transition(&tx, TransactionStatus::Processing, |_| {})
            .await?;

        let credit = self
            .ledger
            .apply_entry(
                recipient.id,
                Direction::Credit,
                Amount::new(tx.net_amount)?,
                &tx.credit_reference(),
                &format!("Transfer from {}", tx.user_id),
            )
            .await;

        match credit {
            Ok(_) => {
                self.transition(&tx, TransactionStatus::Completed, |_| {})
                    .await
            }
            Err(err) => {
                warn!(transaction_id = %tx.id, error = %err, "Recipient credit failed; compensating sender");
                self.fail_locked(tx, &format!("Recipient credit failed: {}", err), GatewayUpdate::default())
                    .await?;
                Err(err)
            }
        }
    }

    /// Applies the gateway's synchronous answer to a freshly created transaction.
    async fn settle_submission(
        &self,
        tx: PaymentTransaction,
        result: std::result::Result<GatewayAck, GatewayError>,
    ) -> Result<PaymentTransaction> {
        let strategy = SettlementStrategy::for_type(tx.r#type);
        let _guard = self.tx_locks.lock(tx.id).await;
        let current = self.transaction(tx.id).await?;

        match result {
            Ok(ack) => {
                if current.status != TransactionStatus::Pending {
                    warn!(
                        transaction_id = %current.id,
                        status = %current.status,
                        gateway_transaction_id = %ack.gateway_transaction_id,
                        "Transaction moved on while the gateway call was in flight"
                    );
                    return Ok(current);
                }
                info!(
                    transaction_id = %current.id,
                    gateway_transaction_id = %ack.gateway_transaction_id,
                    gateway_status = ?ack.status,
                    "Gateway accepted transaction"
                );
                let update = GatewayUpdate {
                    gateway_transaction_id: Some(ack.gateway_transaction_id),
                    charges: None,
                };
                self.transition(&current, TransactionStatus::Processing, |tx| update.apply(tx))
                    .await
            }
            Err(GatewayError::Rejected(reason)) => {
                self.fail_locked(
                    current,
                    &format!("Rejected by gateway: {}", reason),
                    GatewayUpdate::default(),
                )
                .await?;
                Err(PaymentError::GatewayRejected(reason))
            }
            Err(err) => match strategy {
                SettlementStrategy::CreditOnConfirmation => {
                    warn!(
                        transaction_id = %current.id,
                        error = %err,
                        "Gateway submission failed; transaction left pending"
                    );
                    Err(err.into())
                }
                SettlementStrategy::ReserveThenCompensate => {
                    warn!(
                        transaction_id = %current.id,
                        error = %err,
                        "Gateway submission failed; releasing reservation"
                    );
                    self.fail_locked(current, &err.to_string(), GatewayUpdate::default())
                        .await?;
                    Err(err.into())
                }
            },
        }
    }

    /// Debits the reservation, then records the transaction.
    ///
    /// The debit comes first so that a wallet without funds never produces a
    /// transaction record. A debit this call did not write belongs to another
    /// request and is left alone; a debit it did write is credited back if the
    /// record cannot be stored.
    async fn reserve(&self, wallet: &Wallet, tx: PaymentTransaction) -> Result<PaymentTransaction> {
        let debit = Amount::new(tx.reserved_amount)?;
        let outcome = self
            .ledger
            .apply_entry(
                wallet.id,
                Direction::Debit,
                debit,
                &tx.reference,
                &format!("{} {}", describe(&tx), tx.reference),
            )
            .await?;
        if !outcome.is_applied() {
            warn!(reference = %tx.reference, wallet_id = %wallet.id, "Reservation already held by another request");
            return Err(PaymentError::DuplicateReference(tx.reference.clone()));
        }

        match self.transactions.insert(tx.clone()).await {
            Ok(()) => {
                info!(
                    transaction_id = %tx.id,
                    reference = %tx.reference,
                    reserved = %debit,
                    "Reserved funds"
                );
                Ok(tx)
            }
            Err(err) => {
                warn!(reference = %tx.reference, error = %err, "Transaction not recorded; releasing reservation");
                self.ledger
                    .apply_entry(
                        wallet.id,
                        Direction::Credit,
                        debit,
                        &tx.refund_reference(),
                        &format!("Refund of {}", tx.reference),
                    )
                    .await?;
                Err(err)
            }
        }
    }

    async fn resolve_bank_account(&self, account_number: &str, bank_code: &str) -> Result<()> {
        match self.gateway.validate_account(account_number, bank_code).await {
            Ok(AccountValidation::Verified { account_name }) => {
                info!(bank_code, account_name = %account_name, "Destination account verified");
                Ok(())
            }
            Ok(AccountValidation::ProvisionallyValid) => {
                warn!(bank_code, "Destination account only provisionally valid");
                Ok(())
            }
            Err(GatewayError::Rejected(reason)) => Err(PaymentError::Validation(format!(
                "Destination account rejected: {}",
                reason
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn ensure_reference_free(&self, reference: &str) -> Result<()> {
        if reference.trim().is_empty() {
            return Err(PaymentError::Validation("Reference must not be empty".into()));
        }
        if is_derived_reference(reference) {
            return Err(PaymentError::Validation(format!(
                "Reference {} ends with a suffix reserved for ledger entries",
                reference
            )));
        }
        if self.transactions.find_by_reference(reference).await?.is_some() {
            return Err(PaymentError::DuplicateReference(reference.to_string()));
        }
        Ok(())
    }

    /// Ledger references are scoped per wallet and include entries no
    /// transaction owns, such as seed credits.
    async fn ensure_ledger_reference_free(&self, wallet: &Wallet, reference: &str) -> Result<()> {
        if self
            .ledger
            .entry_by_reference(wallet.id, reference)
            .await?
            .is_some()
        {
            return Err(PaymentError::DuplicateReference(reference.to_string()));
        }
        Ok(())
    }

    async fn active_wallet(&self, user_id: &UserId) -> Result<Wallet> {
        let wallet = self
            .ledger
            .wallet_by_user(user_id)
            .await?
            .ok_or_else(|| PaymentError::Validation(format!("User {} has no wallet", user_id)))?;
        if !wallet.is_active {
            return Err(PaymentError::Validation(format!(
                "Wallet of user {} is inactive",
                user_id
            )));
        }
        Ok(wallet)
    }

    async fn verified_wallet(&self, user_id: &UserId) -> Result<Wallet> {
        let wallet = self.active_wallet(user_id).await?;
        if !wallet.is_verified {
            return Err(PaymentError::Validation(format!(
                "Wallet of user {} is not verified",
                user_id
            )));
        }
        Ok(wallet)
    }

    async fn check_limits(
        &self,
        user_id: &UserId,
        r#type: TransactionType,
        amount: Amount,
    ) -> Result<()> {
        let now = self.clock.now();
        let usage = Usage {
            daily: self
                .transactions
                .completed_volume(user_id, r#type, now - Duration::hours(24))
                .await?,
            monthly: self
                .transactions
                .completed_volume(user_id, r#type, now - Duration::days(30))
                .await?,
        };
        self.config.limits.check(r#type, amount.value(), usage)
    }

    #[allow(clippy::too_many_arguments)]
    fn new_transaction(
        &self,
        wallet: &Wallet,
        r#type: TransactionType,
        method: PaymentMethod,
        amount: Amount,
        fees: &FeeBreakdown,
        reference: &str,
        retry_of: Option<Uuid>,
    ) -> PaymentTransaction {
        let now = self.clock.now();
        PaymentTransaction {
            id: Uuid::now_v7(),
            user_id: wallet.user_id.clone(),
            wallet_id: wallet.id,
            r#type,
            method,
            amount: amount.value(),
            currency: wallet.currency.clone(),
            status: TransactionStatus::Pending,
            reference: reference.to_string(),
            gateway_transaction_id: None,
            charges: fees.total_fees,
            net_amount: fees.net_amount,
            reserved_amount: fees.total_debit,
            gateway_charges: None,
            source_account: None,
            destination_account: None,
            phone_number: None,
            provider: None,
            bank_code: None,
            failure_reason: None,
            retry_of,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

fn ensure_covers(wallet: &Wallet, fees: &FeeBreakdown) -> Result<()> {
    if wallet.balance.value() < fees.total_debit {
        return Err(PaymentError::InsufficientFunds {
            available: wallet.balance.value(),
            required: fees.total_debit,
        });
    }
    Ok(())
}

fn describe(tx: &PaymentTransaction) -> String {
    match (tx.r#type, tx.method) {
        (TransactionType::Deposit, _) => "Mobile money deposit".to_string(),
        (TransactionType::Withdrawal, _) => "Bank withdrawal".to_string(),
        (TransactionType::Transfer, method) => format!("Transfer via {}", method),
    }
}
