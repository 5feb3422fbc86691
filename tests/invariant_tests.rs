mod common;

use common::{Harness, callback};
use paycore::application::{DepositRequest, TransferRequest, WithdrawalRequest};
use paycore::domain::gateway::GatewayError;
use paycore::domain::transaction::{PaymentMethod, TransactionStatus, TransactionType, TransferDestination};
use paycore::domain::wallet::UserId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::HashMap;

const USERS: [&str; 3] = ["alice", "bob", "carol"];
const SEED_BALANCE: i64 = 500;

async fn run_random_operations(seed: u64, steps: usize) -> Harness {
    let mut rng = StdRng::seed_from_u64(seed);
    let h = Harness::free();
    for user in USERS {
        h.funded_wallet(user, Decimal::from(SEED_BALANCE)).await;
    }
    let mut references: Vec<String> = Vec::new();

    for step in 0..steps {
        let user = *USERS.choose(&mut rng).unwrap();
        let reference = format!("S{}-{}", seed, step);
        if rng.gen_bool(0.1) {
            h.gateway.fail_next(GatewayError::Unavailable("flaky".into()));
        }

        match rng.gen_range(0..6) {
            0 => {
                let _ = h
                    .orchestrator
                    .deposit(DepositRequest {
                        user_id: user.into(),
                        amount: Decimal::from(rng.gen_range(1..=100)),
                        phone_number: "0241234567".into(),
                        provider: None,
                        reference: reference.clone(),
                    })
                    .await;
                references.push(reference);
            }
            1 => {
                let _ = h
                    .orchestrator
                    .withdraw(WithdrawalRequest {
                        user_id: user.into(),
                        amount: Decimal::from(rng.gen_range(10..=120)),
                        account_number: "0123456789".into(),
                        bank_code: "GCB".into(),
                        reference: reference.clone(),
                    })
                    .await;
                references.push(reference);
            }
            2 => {
                let recipient = *USERS.choose(&mut rng).unwrap();
                let _ = h
                    .orchestrator
                    .transfer(TransferRequest {
                        user_id: user.into(),
                        amount: Decimal::from(rng.gen_range(1..=80)),
                        destination: TransferDestination::Wallet {
                            user_id: recipient.into(),
                        },
                        reference,
                    })
                    .await;
            }
            3 => {
                let _ = h
                    .orchestrator
                    .transfer(TransferRequest {
                        user_id: user.into(),
                        amount: Decimal::from(rng.gen_range(1..=80)),
                        destination: TransferDestination::MobileMoney {
                            phone_number: "0201234567".into(),
                            provider: None,
                        },
                        reference: reference.clone(),
                    })
                    .await;
                references.push(reference);
            }
            4 => {
                if let Some(target) = references.choose(&mut rng) {
                    let status = *["success", "failed", "processing"].choose(&mut rng).unwrap();
                    let _ = h.reconciler.reconcile(callback(target, status)).await;
                }
            }
            _ => {
                if let Some(target) = references.choose(&mut rng)
                    && let Ok(tx) = h.orchestrator.transaction_by_reference(target).await
                {
                    let _ = h.orchestrator.cancel(tx.id).await;
                }
            }
        }
    }
    h
}

/// Money only enters through completed deposits and only leaves through
/// outgoing gateway payments that were not compensated.
async fn assert_money_conserved(h: &Harness) {
    let mut expected = Decimal::from(SEED_BALANCE) * Decimal::from(USERS.len() as i64);
    let mut actual = Decimal::ZERO;

    for user in USERS {
        actual += h.balance(user).await;
        for tx in h.orchestrator.transactions_for(&UserId::new(user)).await.unwrap() {
            let compensated = matches!(
                tx.status,
                TransactionStatus::Failed | TransactionStatus::Cancelled
            );
            match tx.r#type {
                TransactionType::Deposit if tx.status == TransactionStatus::Completed => {
                    expected += tx.net_amount;
                }
                TransactionType::Withdrawal | TransactionType::Transfer
                    if tx.method != PaymentMethod::Wallet && !compensated =>
                {
                    expected -= tx.reserved_amount;
                }
                _ => {}
            }
        }
    }

    assert_eq!(actual, expected);
}

async fn assert_compensated_at_most_once(h: &Harness) {
    for user in USERS {
        let mut refunds: HashMap<String, usize> = HashMap::new();
        for entry in h.orchestrator.entries(&UserId::new(user)).await.unwrap() {
            if entry.reference.ends_with("-refund") {
                *refunds.entry(entry.reference.clone()).or_default() += 1;
            }
        }
        assert!(refunds.values().all(|count| *count == 1), "{:?}", refunds);

        for tx in h.orchestrator.transactions_for(&UserId::new(user)).await.unwrap() {
            if tx.status == TransactionStatus::Completed {
                assert!(!refunds.contains_key(&tx.refund_reference()));
            }
        }
    }
}

#[tokio::test]
async fn test_random_operation_sequences_preserve_ledger_invariants() {
    for seed in 0..20 {
        let h = run_random_operations(seed, 60).await;
        h.assert_ledger_consistent().await;
        assert_money_conserved(&h).await;
        assert_compensated_at_most_once(&h).await;
    }
}
