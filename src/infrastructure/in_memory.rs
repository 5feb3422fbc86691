use super::clock::SystemClock;
use crate::domain::money::Amount;
use crate::domain::ports::{LedgerStore, SharedClock, TransactionStore};
use crate::domain::transaction::{PaymentTransaction, TransactionStatus, TransactionType};
use crate::domain::wallet::{Direction, EntryOutcome, LedgerEntry, UserId, Wallet, WalletId};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One wallet and its history, guarded together so balance and entries
/// always change in the same critical section.
struct WalletBook {
    wallet: Wallet,
    entries: Vec<LedgerEntry>,
    by_reference: HashMap<String, usize>,
}

/// A thread-safe in-memory ledger.
///
/// Each wallet sits behind its own mutex: `apply_entry` on one wallet never
/// waits for another wallet.
pub struct InMemoryLedgerStore {
    books: RwLock<HashMap<WalletId, Arc<Mutex<WalletBook>>>>,
    users: RwLock<HashMap<UserId, WalletId>>,
    clock: SharedClock,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            clock,
        }
    }

    async fn book(&self, wallet_id: WalletId) -> Result<Arc<Mutex<WalletBook>>> {
        self.books
            .read()
            .await
            .get(&wallet_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(format!("wallet {}", wallet_id)))
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn open_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet> {
        let mut users = self.users.write().await;
        if let Some(wallet_id) = users.get(user_id).copied() {
            let book = self.book(wallet_id).await?;
            return Ok(book.lock().await.wallet.clone());
        }

        let wallet = Wallet::new(user_id.clone(), currency, self.clock.now());
        let book = WalletBook {
            wallet: wallet.clone(),
            entries: Vec::new(),
            by_reference: HashMap::new(),
        };
        self.books
            .write()
            .await
            .insert(wallet.id, Arc::new(Mutex::new(book)));
        users.insert(user_id.clone(), wallet.id);

        info!(user_id = %user_id, wallet_id = %wallet.id, "Opened wallet");
        Ok(wallet)
    }

    async fn wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        let Some(book) = self.books.read().await.get(&wallet_id).cloned() else {
            return Ok(None);
        };
        Ok(Some(book.lock().await.wallet.clone()))
    }

    async fn wallet_by_user(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        let wallet_id = self.users.read().await.get(user_id).copied();
        match wallet_id {
            Some(wallet_id) => self.wallet(wallet_id).await,
            None => Ok(None),
        }
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        let books: Vec<_> = self.books.read().await.values().cloned().collect();
        let mut wallets = Vec::with_capacity(books.len());
        for book in books {
            wallets.push(book.lock().await.wallet.clone());
        }
        wallets.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(wallets)
    }

    async fn set_wallet_flags(
        &self,
        wallet_id: WalletId,
        is_active: bool,
        is_verified: bool,
    ) -> Result<Wallet> {
        let book = self.book(wallet_id).await?;
        let mut book = book.lock().await;
        book.wallet.is_active = is_active;
        book.wallet.is_verified = is_verified;
        book.wallet.updated_at = self.clock.now();
        Ok(book.wallet.clone())
    }

    async fn apply_entry(
        &self,
        wallet_id: WalletId,
        direction: Direction,
        amount: Amount,
        reference: &str,
        description: &str,
    ) -> Result<EntryOutcome> {
        let book = self.book(wallet_id).await?;
        let mut book = book.lock().await;

        if let Some(&index) = book.by_reference.get(reference) {
            let existing = book.entries[index].clone();
            if !existing.matches(direction, amount) {
                warn!(
                    wallet_id = %wallet_id,
                    reference,
                    "Reference already holds a different ledger entry"
                );
                return Err(PaymentError::DuplicateReference(reference.to_string()));
            }
            debug!(wallet_id = %wallet_id, reference, "Ledger entry already applied");
            return Ok(EntryOutcome::Replayed(existing));
        }

        let entry = book
            .wallet
            .apply(direction, amount, reference, description, self.clock.now())?;
        let index = book.entries.len();
        book.entries.push(entry.clone());
        book.by_reference.insert(reference.to_string(), index);

        info!(
            wallet_id = %wallet_id,
            reference,
            direction = %direction,
            amount = %amount,
            balance = %entry.balance_after,
            "Applied ledger entry"
        );
        Ok(EntryOutcome::Applied(entry))
    }

    async fn entries(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        let book = self.book(wallet_id).await?;
        let entries = book.lock().await.entries.clone();
        Ok(entries)
    }

    async fn entry_by_reference(
        &self,
        wallet_id: WalletId,
        reference: &str,
    ) -> Result<Option<LedgerEntry>> {
        let book = self.book(wallet_id).await?;
        let book = book.lock().await;
        Ok(book
            .by_reference
            .get(reference)
            .map(|&index| book.entries[index].clone()))
    }
}

#[derive(Default)]
struct TransactionIndex {
    by_id: HashMap<Uuid, PaymentTransaction>,
    by_reference: HashMap<String, Uuid>,
    by_gateway_id: HashMap<String, Uuid>,
}

impl TransactionIndex {
    fn lookup(&self, id: Option<&Uuid>) -> Option<PaymentTransaction> {
        id.and_then(|id| self.by_id.get(id)).cloned()
    }
}

/// A thread-safe in-memory store for payment transactions.
///
/// All writes happen under one write lock, which makes `insert` and
/// `update_if` atomic.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    index: RwLock<TransactionIndex>,
}

impl InMemoryTransactionStore {
    /// Creates a new, empty in-memory transaction store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: PaymentTransaction) -> Result<()> {
        let mut index = self.index.write().await;
        if index.by_reference.contains_key(&tx.reference) {
            return Err(PaymentError::DuplicateReference(tx.reference));
        }
        index.by_reference.insert(tx.reference.clone(), tx.id);
        if let Some(gateway_id) = &tx.gateway_transaction_id {
            index.by_gateway_id.insert(gateway_id.clone(), tx.id);
        }
        index.by_id.insert(tx.id, tx);
        Ok(())
    }

    async fn update_if(&self, tx: &PaymentTransaction, expected: TransactionStatus) -> Result<bool> {
        let mut index = self.index.write().await;
        let Some(current) = index.by_id.get(&tx.id) else {
            return Err(PaymentError::NotFound(format!("transaction {}", tx.id)));
        };
        if current.status != expected {
            return Ok(false);
        }
        if let Some(gateway_id) = &tx.gateway_transaction_id {
            index.by_gateway_id.insert(gateway_id.clone(), tx.id);
        }
        index.by_id.insert(tx.id, tx.clone());
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentTransaction>> {
        Ok(self.index.read().await.by_id.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<PaymentTransaction>> {
        let index = self.index.read().await;
        Ok(index.lookup(index.by_reference.get(reference)))
    }

    async fn find_by_gateway_id(&self, gateway_id: &str) -> Result<Option<PaymentTransaction>> {
        let index = self.index.read().await;
        Ok(index.lookup(index.by_gateway_id.get(gateway_id)))
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PaymentTransaction>> {
        let index = self.index.read().await;
        let mut txs: Vec<_> = index
            .by_id
            .values()
            .filter(|tx| &tx.user_id == user_id)
            .cloned()
            .collect();
        txs.sort_by_key(|tx| tx.created_at);
        Ok(txs)
    }

    async fn completed_volume(
        &self,
        user_id: &UserId,
        r#type: TransactionType,
        since: DateTime<Utc>,
    ) -> Result<Decimal> {
        let index = self.index.read().await;
        Ok(index
            .by_id
            .values()
            .filter(|tx| {
                &tx.user_id == user_id
                    && tx.r#type == r#type
                    && tx.status == TransactionStatus::Completed
                    && tx.completed_at.is_some_and(|at| at >= since)
            })
            .map(|tx| tx.amount)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use crate::domain::transaction::PaymentMethod;
    use rust_decimal_macros::dec;

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn sample_tx(user: &str, wallet_id: WalletId, reference: &str) -> PaymentTransaction {
        let now = Utc::now();
        PaymentTransaction {
            id: Uuid::now_v7(),
            user_id: user.into(),
            wallet_id,
            r#type: TransactionType::Withdrawal,
            method: PaymentMethod::BankTransfer,
            amount: dec!(100),
            currency: "GHS".into(),
            status: TransactionStatus::Pending,
            reference: reference.into(),
            gateway_transaction_id: None,
            charges: Decimal::ZERO,
            net_amount: dec!(100),
            reserved_amount: dec!(100),
            gateway_charges: None,
            source_account: None,
            destination_account: Some("0123456789".into()),
            phone_number: None,
            provider: None,
            bank_code: Some("GCB".into()),
            failure_reason: None,
            retry_of: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_open_wallet_is_idempotent() {
        let store = InMemoryLedgerStore::new();
        let first = store.open_wallet(&"alice".into(), "GHS").await.unwrap();
        let second = store.open_wallet(&"alice".into(), "GHS").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.wallets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_entry_is_idempotent_on_reference() {
        let store = InMemoryLedgerStore::new();
        let wallet = store.open_wallet(&"alice".into(), "GHS").await.unwrap();

        let first = store
            .apply_entry(wallet.id, Direction::Credit, amount(dec!(200)), "R1", "deposit")
            .await
            .unwrap();
        let second = store
            .apply_entry(wallet.id, Direction::Credit, amount(dec!(200)), "R1", "deposit")
            .await
            .unwrap();

        assert!(first.is_applied());
        assert!(!second.is_applied());
        assert_eq!(first.entry().id, second.entry().id);
        assert_eq!(store.entries(wallet.id).await.unwrap().len(), 1);
        let wallet = store.wallet(wallet.id).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Balance::new(dec!(200)));
    }

    #[tokio::test]
    async fn test_reference_reused_for_different_entry_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let wallet = store.open_wallet(&"alice".into(), "GHS").await.unwrap();
        store
            .apply_entry(wallet.id, Direction::Credit, amount(dec!(1000)), "seed", "seed")
            .await
            .unwrap();
        store
            .apply_entry(wallet.id, Direction::Debit, amount(dec!(500)), "W1", "withdrawal")
            .await
            .unwrap();

        let other_direction = store
            .apply_entry(wallet.id, Direction::Credit, amount(dec!(500)), "W1", "refund")
            .await;
        assert!(matches!(other_direction, Err(PaymentError::DuplicateReference(r)) if r == "W1"));
        let other_amount = store
            .apply_entry(wallet.id, Direction::Debit, amount(dec!(7)), "W1", "withdrawal")
            .await;
        assert!(matches!(other_amount, Err(PaymentError::DuplicateReference(_))));

        assert_eq!(store.entries(wallet.id).await.unwrap().len(), 2);
        let wallet = store.wallet(wallet.id).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Balance::new(dec!(500)));
    }

    #[tokio::test]
    async fn test_concurrent_writes_of_one_reference() {
        let store = InMemoryLedgerStore::new();
        let alice = store.open_wallet(&"alice".into(), "GHS").await.unwrap();
        let bob = store.open_wallet(&"bob".into(), "GHS").await.unwrap();
        for wallet in [&alice, &bob] {
            store
                .apply_entry(wallet.id, Direction::Credit, amount(dec!(1000)), "seed", "seed")
                .await
                .unwrap();
        }

        let (first, second) = tokio::join!(
            store.apply_entry(alice.id, Direction::Debit, amount(dec!(107)), "R", "withdrawal"),
            store.apply_entry(alice.id, Direction::Debit, amount(dec!(107)), "R", "withdrawal"),
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(first.is_applied() != second.is_applied());
        assert_eq!(first.entry().id, second.entry().id);

        // References are scoped per wallet.
        let other = store
            .apply_entry(bob.id, Direction::Debit, amount(dec!(107)), "R", "withdrawal")
            .await
            .unwrap();
        assert!(other.is_applied());

        for wallet in [&alice, &bob] {
            let wallet = store.wallet(wallet.id).await.unwrap().unwrap();
            assert_eq!(wallet.balance, Balance::new(dec!(893)));
        }
    }

    #[tokio::test]
    async fn test_rejected_debit_writes_nothing() {
        let store = InMemoryLedgerStore::new();
        let wallet = store.open_wallet(&"alice".into(), "GHS").await.unwrap();
        store
            .apply_entry(wallet.id, Direction::Credit, amount(dec!(50)), "R1", "deposit")
            .await
            .unwrap();

        let result = store
            .apply_entry(wallet.id, Direction::Debit, amount(dec!(51)), "W1", "withdrawal")
            .await;
        assert!(matches!(result, Err(PaymentError::InsufficientFunds { .. })));
        assert_eq!(store.entries(wallet.id).await.unwrap().len(), 1);
        assert!(
            store
                .entry_by_reference(wallet.id, "W1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_apply_entry_unknown_wallet() {
        let store = InMemoryLedgerStore::new();
        let result = store
            .apply_entry(WalletId::generate(), Direction::Credit, amount(dec!(1)), "R1", "x")
            .await;
        assert!(matches!(result, Err(PaymentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_transaction_store_rejects_duplicate_reference() {
        let store = InMemoryTransactionStore::new();
        let wallet_id = WalletId::generate();
        store.insert(sample_tx("alice", wallet_id, "R1")).await.unwrap();
        let result = store.insert(sample_tx("bob", wallet_id, "R1")).await;
        assert!(matches!(result, Err(PaymentError::DuplicateReference(r)) if r == "R1"));
    }

    #[tokio::test]
    async fn test_update_if_is_conditional() {
        let store = InMemoryTransactionStore::new();
        let mut tx = sample_tx("alice", WalletId::generate(), "R1");
        store.insert(tx.clone()).await.unwrap();

        tx.status = TransactionStatus::Processing;
        tx.gateway_transaction_id = Some("GW-1".into());
        assert!(store.update_if(&tx, TransactionStatus::Pending).await.unwrap());

        tx.status = TransactionStatus::Failed;
        assert!(!store.update_if(&tx, TransactionStatus::Pending).await.unwrap());

        let stored = store.find_by_gateway_id("GW-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Processing);
    }

    #[tokio::test]
    async fn test_completed_volume_counts_window() {
        let store = InMemoryTransactionStore::new();
        let wallet_id = WalletId::generate();
        let now = Utc::now();

        let mut recent = sample_tx("alice", wallet_id, "R1");
        recent.status = TransactionStatus::Completed;
        recent.completed_at = Some(now);
        let mut old = sample_tx("alice", wallet_id, "R2");
        old.status = TransactionStatus::Completed;
        old.completed_at = Some(now - chrono::Duration::days(3));
        let pending = sample_tx("alice", wallet_id, "R3");

        for tx in [recent, old, pending] {
            store.insert(tx).await.unwrap();
        }

        let since = now - chrono::Duration::days(1);
        let volume = store
            .completed_volume(&"alice".into(), TransactionType::Withdrawal, since)
            .await
            .unwrap();
        assert_eq!(volume, dec!(100));
        let volume = store
            .completed_volume(&"alice".into(), TransactionType::Deposit, since)
            .await
            .unwrap();
        assert_eq!(volume, Decimal::ZERO);
    }
}
