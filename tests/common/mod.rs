#![allow(dead_code)]

use async_trait::async_trait;
use paycore::application::{Orchestrator, OrchestratorConfig, Reconciler};
use paycore::domain::gateway::{
    AccountValidation, BankTransferRequest, GatewayAck, GatewayBalance, GatewayCallback,
    GatewayError, GatewayStatus, MobileMoneyRequest,
};
use paycore::domain::money::Amount;
use paycore::domain::policy::FeeSchedule;
use paycore::domain::ports::{LedgerStore, Notifier, PaymentGateway, SharedGateway};
use paycore::domain::transaction::TransactionStatus;
use paycore::domain::wallet::{Direction, UserId, Wallet};
use paycore::error::Result;
use paycore::infrastructure::clock::ManualClock;
use paycore::infrastructure::gateway::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use paycore::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryTransactionStore};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use uuid::Uuid;

/// Gateway double: accepts everything as processing unless an outcome was
/// queued, and records the references it was asked to move.
#[derive(Default)]
pub struct ScriptedGateway {
    outcomes: Mutex<VecDeque<std::result::Result<GatewayAck, GatewayError>>>,
    validation: Mutex<Option<std::result::Result<AccountValidation, GatewayError>>>,
    submissions: Mutex<Vec<String>>,
    validation_delay: Mutex<Option<Duration>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the answer to the next submission.
    pub fn push_outcome(&self, outcome: std::result::Result<GatewayAck, GatewayError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn fail_next(&self, error: GatewayError) {
        self.push_outcome(Err(error));
    }

    pub fn set_validation(&self, result: std::result::Result<AccountValidation, GatewayError>) {
        *self.validation.lock().unwrap() = Some(result);
    }

    /// Holds every account validation for `delay` before answering.
    pub fn set_validation_delay(&self, delay: Duration) {
        *self.validation_delay.lock().unwrap() = Some(delay);
    }

    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }

    fn answer(&self, reference: &str) -> std::result::Result<GatewayAck, GatewayError> {
        self.submissions.lock().unwrap().push(reference.to_string());
        self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(GatewayAck {
                gateway_transaction_id: gateway_id(reference),
                status: GatewayStatus::Processing,
                message: None,
            })
        })
    }
}

pub fn gateway_id(reference: &str) -> String {
    format!("GW-{}", reference)
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn collect_mobile_money(
        &self,
        request: &MobileMoneyRequest,
    ) -> std::result::Result<GatewayAck, GatewayError> {
        self.answer(&request.reference)
    }

    async fn disburse_mobile_money(
        &self,
        request: &MobileMoneyRequest,
    ) -> std::result::Result<GatewayAck, GatewayError> {
        self.answer(&request.reference)
    }

    async fn transfer_to_bank(
        &self,
        request: &BankTransferRequest,
    ) -> std::result::Result<GatewayAck, GatewayError> {
        self.answer(&request.reference)
    }

    async fn validate_account(
        &self,
        account_number: &str,
        _bank_code: &str,
    ) -> std::result::Result<AccountValidation, GatewayError> {
        let delay = *self.validation_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.validation.lock().unwrap().clone().unwrap_or_else(|| {
            Ok(AccountValidation::Verified {
                account_name: format!("Holder of {}", account_number),
            })
        })
    }

    async fn balance(&self) -> std::result::Result<GatewayBalance, GatewayError> {
        Ok(GatewayBalance {
            available_balance: Decimal::ZERO,
            currency: "GHS".into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub user_id: UserId,
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
}

pub struct RecordingNotifier {
    sender: UnboundedSender<Notification>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn new() -> (Self, UnboundedReceiver<Notification>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender,
                fail: false,
                delay: None,
            },
            receiver,
        )
    }

    /// Records the call only after `delay`.
    pub fn slow(delay: Duration) -> (Self, UnboundedReceiver<Notification>) {
        let (notifier, receiver) = Self::new();
        (
            Self {
                delay: Some(delay),
                ..notifier
            },
            receiver,
        )
    }

    /// Records the call, then reports failure.
    pub fn failing() -> (Self, UnboundedReceiver<Notification>) {
        let (notifier, receiver) = Self::new();
        (Self { fail: true, ..notifier }, receiver)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        user_id: &UserId,
        transaction_id: Uuid,
        status: TransactionStatus,
    ) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let _ = self.sender.send(Notification {
            user_id: user_id.clone(),
            transaction_id,
            status,
        });
        if self.fail {
            return Err(paycore::error::PaymentError::Storage("mailer down".into()));
        }
        Ok(())
    }
}

/// Transport double for the HTTP gateway client.
///
/// Queued responses are served per path; when a path's queue is empty the
/// transport answers like a healthy gateway (fresh token on the token path,
/// acceptance on submissions).
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<std::result::Result<HttpResponse, TransportError>>>>,
    requests: Mutex<Vec<HttpRequest>>,
    tokens_issued: AtomicUsize,
    token_lifetime_secs: Mutex<i64>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        *transport.token_lifetime_secs.lock().unwrap() = 3600;
        transport
    }

    pub fn with_token_lifetime(secs: i64) -> Self {
        let transport = Self::new();
        *transport.token_lifetime_secs.lock().unwrap() = secs;
        transport
    }

    pub fn enqueue(&self, path: &str, response: HttpResponse) {
        self.enqueue_result(path, Ok(response));
    }

    pub fn enqueue_error(&self, path: &str, error: TransportError) {
        self.enqueue_result(path, Err(error));
    }

    fn enqueue_result(&self, path: &str, result: std::result::Result<HttpResponse, TransportError>) {
        self.queued
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    pub fn tokens_issued(&self) -> usize {
        self.tokens_issued.load(Ordering::SeqCst)
    }

    fn healthy(&self, request: &HttpRequest) -> HttpResponse {
        match request.path.as_str() {
            "/oauth/token" => {
                let n = self.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
                let lifetime = *self.token_lifetime_secs.lock().unwrap();
                HttpResponse::new(
                    200,
                    format!(r#"{{"access_token":"token-{}","expires_in":{}}}"#, n, lifetime),
                )
            }
            "/v1/accounts/resolve" => HttpResponse::new(200, r#"{"account_name":"Ama Mensah"}"#),
            "/v1/balance" => {
                HttpResponse::new(200, r#"{"available_balance":"2500.00","currency":"GHS"}"#)
            }
            _ => {
                let count = self.requests.lock().unwrap().len();
                HttpResponse::new(
                    200,
                    format!(r#"{{"transaction_id":"GW-{}","status":"accepted"}}"#, count),
                )
            }
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(result) => {
                if let Ok(response) = &result
                    && request.path == "/oauth/token"
                    && response.is_success()
                {
                    self.tokens_issued.fetch_add(1, Ordering::SeqCst);
                }
                result
            }
            None => Ok(self.healthy(&request)),
        }
    }
}

/// An orchestrator over in-memory stores, a scripted gateway and a manual clock.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub reconciler: Reconciler,
    pub gateway: Arc<ScriptedGateway>,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub transactions: Arc<InMemoryTransactionStore>,
    pub clock: Arc<ManualClock>,
    pub notifications: UnboundedReceiver<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn free() -> Self {
        Self::with_config(OrchestratorConfig {
            fees: FeeSchedule::free(),
            ..OrchestratorConfig::default()
        })
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let gateway = Arc::new(ScriptedGateway::new());
        Self::with_gateway(config, gateway.clone(), gateway)
    }

    /// Runs against `gateway`; `scripted` is kept for inspection only.
    pub fn with_gateway(
        config: OrchestratorConfig,
        gateway: SharedGateway,
        scripted: Arc<ScriptedGateway>,
    ) -> Self {
        let clock = Arc::new(ManualClock::default());
        let ledger = Arc::new(InMemoryLedgerStore::with_clock(clock.clone()));
        let transactions = Arc::new(InMemoryTransactionStore::new());
        let orchestrator = Arc::new(Orchestrator::new(
            ledger.clone(),
            transactions.clone(),
            gateway,
            clock.clone(),
            config,
        ));
        let (notifier, notifications) = RecordingNotifier::new();
        let reconciler = Reconciler::new(orchestrator.clone(), Arc::new(notifier));

        Self {
            orchestrator,
            reconciler,
            gateway: scripted,
            ledger,
            transactions,
            clock,
            notifications,
        }
    }

    /// Opens and verifies a wallet holding `balance`.
    pub async fn funded_wallet(&self, user: &str, balance: Decimal) -> Wallet {
        let user_id = UserId::new(user);
        let wallet = self.orchestrator.open_wallet(&user_id).await.unwrap();
        self.orchestrator
            .set_wallet_flags(&user_id, true, true)
            .await
            .unwrap();
        if balance > Decimal::ZERO {
            self.ledger
                .apply_entry(
                    wallet.id,
                    Direction::Credit,
                    Amount::new(balance).unwrap(),
                    &format!("seed-{}", user),
                    "Opening balance",
                )
                .await
                .unwrap();
        }
        self.orchestrator.wallet(&user_id).await.unwrap()
    }

    pub async fn balance(&self, user: &str) -> Decimal {
        self.orchestrator
            .wallet(&UserId::new(user))
            .await
            .unwrap()
            .balance
            .value()
    }

    /// Every wallet's balance equals the replay of its history and is not negative.
    pub async fn assert_ledger_consistent(&self) {
        for wallet in self.ledger.wallets().await.unwrap() {
            let audit = self.orchestrator.audit(&wallet.user_id).await.unwrap();
            assert!(
                audit.is_consistent(),
                "wallet of {} drifted: stored {} replayed {}",
                wallet.user_id,
                audit.stored,
                audit.replayed
            );
            assert!(wallet.balance.value() >= Decimal::ZERO);
        }
    }

    /// Waits for the next notification spawned by the reconciler.
    pub async fn next_notification(&mut self) -> Notification {
        tokio::time::timeout(Duration::from_secs(5), self.notifications.recv())
            .await
            .expect("notification timed out")
            .expect("notifier dropped")
    }
}

pub fn callback(reference: &str, status: &str) -> GatewayCallback {
    GatewayCallback {
        gateway_transaction_id: None,
        reference: Some(reference.to_string()),
        status: status.to_string(),
        charges: None,
        message: None,
    }
}

pub fn gateway_callback(gateway_transaction_id: &str, status: &str) -> GatewayCallback {
    GatewayCallback {
        gateway_transaction_id: Some(gateway_transaction_id.to_string()),
        reference: None,
        status: status.to_string(),
        charges: None,
        message: None,
    }
}

/// Writes a batch CSV with the standard header.
pub fn write_batch(path: &Path, rows: &[&str]) -> std::result::Result<(), Error> {
    use std::io::Write;
    let mut file = File::create(path)?;
    writeln!(file, "op,user,reference,amount,destination,bank_code,status")?;
    for row in rows {
        writeln!(file, "{}", row)?;
    }
    Ok(())
}
