#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

fn run(input: &std::path::Path, db_path: &std::path::Path, report: &str) -> String {
    let output = Command::new(cargo_bin!("walletpay"))
        .arg(input)
        .arg("--db-path")
        .arg(db_path)
        .args(["--settle-delay-min-ms", "1", "--settle-delay-max-ms", "5"])
        .args(["--report", report])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: one payment
    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "user, tx, amount").unwrap();
    writeln!(csv1, "user_1, tx1, 100.0").unwrap();

    let stdout1 = run(csv1.path(), &db_path, "wallets");
    assert!(stdout1.contains("user_1,9999900"));

    // 2. Second run: the repeated tx1 is not debited again
    let mut csv2 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv2, "user, tx, amount").unwrap();
    writeln!(csv2, "user_1, tx1, 100.0").unwrap();
    writeln!(csv2, "user_1, tx2, 50.0").unwrap();

    let stdout2 = run(csv2.path(), &db_path, "wallets");
    assert!(stdout2.contains("user_1,9999850"));

    // 3. Payment ids keep counting from the stored maximum
    let mut empty = tempfile::NamedTempFile::new().unwrap();
    writeln!(empty, "user, tx, amount").unwrap();
    let stdout3 = run(empty.path(), &db_path, "payments");
    assert!(stdout3.contains("1,tx1,user_1,100,"));
    assert!(stdout3.contains("2,tx2,user_1,50,"));
}
