//! Application layer: the transaction state machine and the webhook path.
//!
//! [`Orchestrator`] is the entry point for user-initiated operations and owns
//! every status transition; [`Reconciler`] feeds gateway callbacks into it.

pub mod orchestrator;
pub mod reconciler;

pub use orchestrator::{
    DepositRequest, GatewayUpdate, Orchestrator, OrchestratorConfig, SettlementStrategy,
    TransferRequest, TransitionOutcome, WithdrawalRequest,
};
pub use reconciler::{ReconcileOutcome, Reconciler};
