use super::orchestrator::{GatewayUpdate, Orchestrator, TransitionOutcome};
use crate::domain::gateway::{GatewayCallback, GatewayStatus};
use crate::domain::ports::SharedNotifier;
use crate::domain::transaction::{PaymentTransaction, TransactionStatus};
use crate::error::Result;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// What a callback did to its transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The callback moved the transaction forward.
    Applied(TransactionStatus),
    /// The transaction was already settled; the callback was acknowledged and
    /// dropped.
    Discarded(TransactionStatus),
}

/// Applies asynchronous gateway status callbacks.
///
/// Reconciling the same callback twice is a no-op: every path goes through
/// the orchestrator's conditional transitions, which refuse to leave a
/// terminal state, and the ledger replays references it has already seen.
pub struct Reconciler {
    orchestrator: Arc<Orchestrator>,
    notifier: SharedNotifier,
    in_flight: Mutex<JoinSet<()>>,
}

impl Reconciler {
    pub fn new(orchestrator: Arc<Orchestrator>, notifier: SharedNotifier) -> Self {
        Self {
            orchestrator,
            notifier,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub async fn reconcile(&self, callback: GatewayCallback) -> Result<ReconcileOutcome> {
        let tx = self.orchestrator.transaction_for_callback(&callback).await?;
        let status = GatewayStatus::from_gateway(&callback.status);
        debug!(
            transaction_id = %tx.id,
            gateway_status = %callback.status,
            mapped = ?status,
            "Reconciling gateway callback"
        );

        let update = GatewayUpdate {
            gateway_transaction_id: callback.gateway_transaction_id.clone(),
            charges: callback.charges,
        };
        let outcome = match status {
            GatewayStatus::Completed => self.orchestrator.complete(tx.id, update).await?,
            GatewayStatus::Failed => {
                let reason = callback
                    .message
                    .clone()
                    .unwrap_or_else(|| "Gateway reported failure".to_string());
                self.orchestrator.fail(tx.id, &reason, update).await?
            }
            GatewayStatus::Processing | GatewayStatus::Pending => {
                self.orchestrator.mark_processing(tx.id, update).await?
            }
        };

        match outcome {
            TransitionOutcome::Applied(tx) => {
                info!(
                    transaction_id = %tx.id,
                    reference = %tx.reference,
                    status = %tx.status,
                    "Callback applied"
                );
                self.notify(&tx);
                Ok(ReconcileOutcome::Applied(tx.status))
            }
            TransitionOutcome::Unchanged(tx) => {
                debug!(
                    transaction_id = %tx.id,
                    status = %tx.status,
                    gateway_status = %callback.status,
                    "Callback discarded"
                );
                Ok(ReconcileOutcome::Discarded(tx.status))
            }
        }
    }

    /// Fire-and-forget; a failing notifier never affects reconciliation.
    fn notify(&self, tx: &PaymentTransaction) {
        let notifier = self.notifier.clone();
        let user_id = tx.user_id.clone();
        let (id, status) = (tx.id, tx.status);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            if let Err(err) = notifier.notify(&user_id, id, status).await {
                warn!(transaction_id = %id, error = %err, "Notification failed");
            }
        });
    }

    /// Waits up to `grace` for notifications still in flight; any left after
    /// that are aborted.
    pub async fn drain_notifications(&self, grace: Duration) {
        let mut pending = std::mem::take(
            &mut *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let waiting = async {
            while pending.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, waiting).await.is_err() {
            warn!(pending = pending.len(), "Dropping notifications still in flight");
        }
    }
}
