use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

const HEADER: [&str; 7] = ["op", "user", "reference", "amount", "destination", "bank_code", "status"];

fn write_batch(path: &std::path::Path, rows: &[[&str; 7]]) {
    let mut wtr = csv::Writer::from_path(path).unwrap();
    wtr.write_record(HEADER).unwrap();
    for row in rows {
        wtr.write_record(row).unwrap();
    }
    wtr.flush().unwrap();
}

#[test]
fn test_malformed_csv_handling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("robustness_test.csv");
    write_batch(
        &path,
        &[
            ["open", "alice", "", "", "", "", ""],
            ["deposit", "alice", "D1", "10.00", "0241234567", "", ""],
            // Unknown operation
            ["refund", "alice", "X1", "1.0", "", "", ""],
            // Missing amount for deposit
            ["deposit", "alice", "D2", "", "0241234567", "", ""],
            ["webhook", "", "D1", "", "", "", "success"],
        ],
    );

    let mut cmd = Command::new(cargo_bin!("paycore"));
    cmd.arg(&path);

    // 10.00 less 0.50 minimum service fee and 0.10 mobile money fee.
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading operation"))
        .stdout(predicate::str::contains(",9.40,GHS,1"));
}

#[test]
fn test_invalid_data_types() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data_type_test.csv");
    write_batch(
        &path,
        &[
            ["open", "alice", "", "", "", "", ""],
            ["deposit", "alice", "D1", "not_a_number", "0241234567", "", ""],
            ["deposit", "alice", "D2", "5.00", "0241234567", "orange", ""],
            ["deposit", "alice", "D3", "5.00", "0241234567", "", ""],
            ["webhook", "", "D3", "", "", "", "success"],
        ],
    );

    let mut cmd = Command::new(cargo_bin!("paycore"));
    cmd.arg(&path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading operation"))
        .stdout(predicate::str::contains(",4.45,GHS,1"));
}

#[test]
fn test_rejected_operations_do_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rejections_test.csv");
    write_batch(
        &path,
        &[
            ["open", "alice", "", "", "", "", ""],
            // Unverified wallets cannot withdraw.
            ["withdraw", "alice", "W1", "50.00", "0123456789", "GCB", ""],
            // Unknown user.
            ["deposit", "mallory", "D1", "5.00", "0241234567", "", ""],
            // Nothing to settle.
            ["webhook", "", "nope", "", "", "", "success"],
            ["open", "bob", "", "", "", "", ""],
        ],
    );

    let mut cmd = Command::new(cargo_bin!("paycore"));
    cmd.arg(&path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error processing operation"))
        .stdout(predicate::str::contains("alice,"))
        .stdout(predicate::str::contains("bob,"));
}
