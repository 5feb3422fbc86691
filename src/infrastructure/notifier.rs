use crate::domain::ports::Notifier;
use crate::domain::transaction::TransactionStatus;
use crate::domain::wallet::UserId;
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Notifier that only records the event in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: &UserId,
        transaction_id: Uuid,
        status: TransactionStatus,
    ) -> Result<()> {
        info!(user_id = %user_id, transaction_id = %transaction_id, status = %status, "Payment notification");
        Ok(())
    }
}
