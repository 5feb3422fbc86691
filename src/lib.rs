//! Wallet ledger and payment orchestration core.
//!
//! Users hold one wallet each; deposits arrive through mobile money,
//! withdrawals leave to bank accounts and transfers go to mobile money, bank
//! accounts or other wallets. The external payment gateway confirms most
//! outcomes asynchronously, so every operation runs through an explicit state
//! machine and webhooks are reconciled idempotently.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod locks;
pub mod telemetry;
