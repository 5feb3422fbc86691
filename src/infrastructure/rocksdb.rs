use super::clock::SystemClock;
use crate::domain::money::Amount;
use crate::domain::ports::{LedgerStore, SharedClock, TransactionStore};
use crate::domain::transaction::{PaymentTransaction, TransactionStatus, TransactionType};
use crate::domain::wallet::{Direction, EntryOutcome, LedgerEntry, UserId, Wallet, WalletId};
use crate::error::{PaymentError, Result};
use crate::locks::KeyedLocks;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Wallet id -> wallet.
pub const CF_WALLETS: &str = "wallets";
/// User id -> wallet id.
pub const CF_WALLET_USERS: &str = "wallet_users";
/// Wallet id ++ entry id -> ledger entry. Entry ids are time-ordered, so a
/// prefix scan yields a wallet's history in write order.
pub const CF_ENTRIES: &str = "entries";
/// Wallet id ++ reference -> entries key.
pub const CF_ENTRY_REFS: &str = "entry_refs";
/// Transaction id -> transaction.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Reference -> transaction id.
pub const CF_TRANSACTION_REFS: &str = "transaction_refs";
/// Gateway transaction id -> transaction id.
pub const CF_TRANSACTION_GATEWAY_IDS: &str = "transaction_gateway_ids";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_WALLETS,
    CF_WALLET_USERS,
    CF_ENTRIES,
    CF_ENTRY_REFS,
    CF_TRANSACTIONS,
    CF_TRANSACTION_REFS,
    CF_TRANSACTION_GATEWAY_IDS,
];

/// A persistent ledger and transaction store backed by RocksDB.
///
/// Every balance change is written as one `WriteBatch` holding the new wallet
/// state, the entry and its reference index. Writers of one wallet are
/// serialized through a per-wallet lock; transaction writes share one lock so
/// that reference checks and conditional updates stay atomic.
///
/// `Clone` shares the underlying database and locks.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    wallet_locks: Arc<KeyedLocks<WalletId>>,
    registry: Arc<Mutex<()>>,
    tx_writes: Arc<Mutex<()>>,
    clock: SharedClock,
}

impl RocksDBStore {
    /// Opens or creates a database at `path` with all column families present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock<P: AsRef<Path>>(path: P, clock: SharedClock) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            wallet_locks: Arc::new(KeyedLocks::new()),
            registry: Arc::new(Mutex::new(())),
            tx_writes: Arc::new(Mutex::new(())),
            clock,
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::Storage(format!("Column family {} not found", name)))
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_uuid(&self, cf: &str, key: &[u8]) -> Result<Option<Uuid>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key)? {
            Some(bytes) => Uuid::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PaymentError::Storage(format!("Corrupt index value: {}", e))),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let mode = IteratorMode::From(prefix, rocksdb::Direction::Forward);
        let mut items = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn load_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.read(CF_WALLETS, wallet_id.0.as_bytes())?
            .ok_or_else(|| PaymentError::NotFound(format!("wallet {}", wallet_id)))
    }

    fn load_transaction(&self, id: Option<Uuid>) -> Result<Option<PaymentTransaction>> {
        match id {
            Some(id) => self.read(CF_TRANSACTIONS, id.as_bytes()),
            None => Ok(None),
        }
    }

    fn all_transactions(&self) -> Result<Vec<PaymentTransaction>> {
        self.scan(CF_TRANSACTIONS, &[])
    }
}

fn entry_key(wallet_id: WalletId, entry_id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(wallet_id.0.as_bytes());
    key.extend_from_slice(entry_id.as_bytes());
    key
}

fn entry_ref_key(wallet_id: WalletId, reference: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + reference.len());
    key.extend_from_slice(wallet_id.0.as_bytes());
    key.extend_from_slice(reference.as_bytes());
    key
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn open_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet> {
        let _registry = self.registry.lock().await;
        if let Some(wallet_id) = self.read_uuid(CF_WALLET_USERS, user_id.as_str().as_bytes())? {
            return self.load_wallet(WalletId(wallet_id));
        }

        let wallet = Wallet::new(user_id.clone(), currency, self.clock.now());
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_WALLETS, wallet.id.0.as_bytes(), &wallet)?;
        batch.put_cf(
            self.cf(CF_WALLET_USERS)?,
            user_id.as_str().as_bytes(),
            wallet.id.0.as_bytes(),
        );
        self.db.write(batch)?;

        info!(user_id = %user_id, wallet_id = %wallet.id, "Opened wallet");
        Ok(wallet)
    }

    async fn wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        self.read(CF_WALLETS, wallet_id.0.as_bytes())
    }

    async fn wallet_by_user(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        match self.read_uuid(CF_WALLET_USERS, user_id.as_str().as_bytes())? {
            Some(wallet_id) => self.wallet(WalletId(wallet_id)).await,
            None => Ok(None),
        }
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = self.scan(CF_WALLETS, &[])?;
        wallets.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(wallets)
    }

    async fn set_wallet_flags(
        &self,
        wallet_id: WalletId,
        is_active: bool,
        is_verified: bool,
    ) -> Result<Wallet> {
        let _guard = self.wallet_locks.lock(wallet_id).await;
        let mut wallet = self.load_wallet(wallet_id)?;
        wallet.is_active = is_active;
        wallet.is_verified = is_verified;
        wallet.updated_at = self.clock.now();
        self.db.put_cf(
            self.cf(CF_WALLETS)?,
            wallet_id.0.as_bytes(),
            serde_json::to_vec(&wallet)?,
        )?;
        Ok(wallet)
    }

    async fn apply_entry(
        &self,
        wallet_id: WalletId,
        direction: Direction,
        amount: Amount,
        reference: &str,
        description: &str,
    ) -> Result<EntryOutcome> {
        let _guard = self.wallet_locks.lock(wallet_id).await;

        if let Some(existing) = self.entry_by_reference(wallet_id, reference).await? {
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

        let mut wallet = self.load_wallet(wallet_id)?;
        let entry = wallet.apply(direction, amount, reference, description, self.clock.now())?;
        let key = entry_key(wallet_id, entry.id);

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_WALLETS, wallet_id.0.as_bytes(), &wallet)?;
        self.put_json(&mut batch, CF_ENTRIES, &key, &entry)?;
        batch.put_cf(
            self.cf(CF_ENTRY_REFS)?,
            entry_ref_key(wallet_id, reference),
            &key,
        );
        self.db.write(batch)?;

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
        if self.wallet(wallet_id).await?.is_none() {
            return Err(PaymentError::NotFound(format!("wallet {}", wallet_id)));
        }
        self.scan(CF_ENTRIES, wallet_id.0.as_bytes())
    }

    async fn entry_by_reference(
        &self,
        wallet_id: WalletId,
        reference: &str,
    ) -> Result<Option<LedgerEntry>> {
        let key = self
            .db
            .get_cf(self.cf(CF_ENTRY_REFS)?, entry_ref_key(wallet_id, reference))?;
        match key {
            Some(key) => self.read(CF_ENTRIES, &key),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, tx: PaymentTransaction) -> Result<()> {
        let _writes = self.tx_writes.lock().await;
        if self
            .read_uuid(CF_TRANSACTION_REFS, tx.reference.as_bytes())?
            .is_some()
        {
            return Err(PaymentError::DuplicateReference(tx.reference));
        }

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_TRANSACTIONS, tx.id.as_bytes(), &tx)?;
        batch.put_cf(
            self.cf(CF_TRANSACTION_REFS)?,
            tx.reference.as_bytes(),
            tx.id.as_bytes(),
        );
        if let Some(gateway_id) = &tx.gateway_transaction_id {
            batch.put_cf(
                self.cf(CF_TRANSACTION_GATEWAY_IDS)?,
                gateway_id.as_bytes(),
                tx.id.as_bytes(),
            );
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn update_if(&self, tx: &PaymentTransaction, expected: TransactionStatus) -> Result<bool> {
        let _writes = self.tx_writes.lock().await;
        let current: PaymentTransaction = self
            .read(CF_TRANSACTIONS, tx.id.as_bytes())?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {}", tx.id)))?;
        if current.status != expected {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_TRANSACTIONS, tx.id.as_bytes(), tx)?;
        if let Some(gateway_id) = &tx.gateway_transaction_id {
            batch.put_cf(
                self.cf(CF_TRANSACTION_GATEWAY_IDS)?,
                gateway_id.as_bytes(),
                tx.id.as_bytes(),
            );
        }
        self.db.write(batch)?;
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentTransaction>> {
        self.load_transaction(Some(id))
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<PaymentTransaction>> {
        self.load_transaction(self.read_uuid(CF_TRANSACTION_REFS, reference.as_bytes())?)
    }

    async fn find_by_gateway_id(&self, gateway_id: &str) -> Result<Option<PaymentTransaction>> {
        self.load_transaction(self.read_uuid(CF_TRANSACTION_GATEWAY_IDS, gateway_id.as_bytes())?)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PaymentTransaction>> {
        let mut txs: Vec<_> = self
            .all_transactions()?
            .into_iter()
            .filter(|tx| &tx.user_id == user_id)
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
        Ok(self
            .all_transactions()?
            .iter()
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
