use super::csv::operation_reader::Operation;
use crate::application::{Orchestrator, Reconciler};
use crate::domain::ports::SharedNotifier;
use crate::domain::wallet::Wallet;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Replays parsed batch operations against the orchestrator.
pub struct BatchRunner {
    orchestrator: Arc<Orchestrator>,
    reconciler: Reconciler,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, notifier: SharedNotifier) -> Self {
        Self {
            reconciler: Reconciler::new(orchestrator.clone(), notifier),
            orchestrator,
        }
    }

    pub async fn apply(&self, operation: Operation) -> Result<()> {
        debug!(?operation, "Applying operation");
        let orchestrator = &self.orchestrator;
        match operation {
            Operation::Open(user_id) => {
                orchestrator.open_wallet(&user_id).await?;
            }
            Operation::Verify(user_id) => {
                let wallet = orchestrator.wallet(&user_id).await?;
                orchestrator
                    .set_wallet_flags(&user_id, wallet.is_active, true)
                    .await?;
            }
            Operation::Deposit(request) => {
                orchestrator.deposit(request).await?;
            }
            Operation::Withdraw(request) => {
                orchestrator.withdraw(request).await?;
            }
            Operation::Transfer(request) => {
                orchestrator.transfer(request).await?;
            }
            Operation::Webhook(callback) => {
                self.reconciler.reconcile(callback).await?;
            }
            Operation::Cancel { reference } => {
                let tx = orchestrator.transaction_by_reference(&reference).await?;
                orchestrator.cancel(tx.id).await?;
            }
            Operation::Retry { reference } => {
                let tx = orchestrator.transaction_by_reference(&reference).await?;
                orchestrator.retry(tx.id).await?;
            }
        }
        Ok(())
    }

    /// Lets notifications spawned by webhooks finish before the runtime stops.
    pub async fn finish(&self, grace: Duration) {
        self.reconciler.drain_notifications(grace).await;
    }

    /// Every wallet with the number of entries in its history.
    pub async fn report(&self) -> Result<Vec<(Wallet, usize)>> {
        let mut rows = Vec::new();
        for wallet in self.orchestrator.wallets().await? {
            let entries = self.orchestrator.entries(&wallet.user_id).await?.len();
            rows.push((wallet, entries));
        }
        Ok(rows)
    }
}
