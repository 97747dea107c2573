use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

mod common;

fn walletpay() -> Command {
    let mut cmd = Command::new(cargo_bin!("walletpay"));
    cmd.args(["--settle-delay-min-ms", "1", "--settle-delay-max-ms", "10"]);
    cmd
}

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = walletpay();
    cmd.arg("tests/fixtures/payments.csv");

    // Failed settlements are debited too, so balances are deterministic.
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("user,balance"))
        .stdout(predicate::str::contains("user_1,9999849.5"))
        .stdout(predicate::str::contains("user_2,9999980"));

    Ok(())
}

#[test]
fn test_cli_payments_report() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = walletpay();
    cmd.arg("tests/fixtures/payments.csv")
        .args(["--report", "payments", "--success-rate", "1.0"]);

    let output = cmd.output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.starts_with("id,transaction,user,amount,status\n"));
    // The repeated tx1 row resolves to the existing payment.
    assert_eq!(stdout.lines().count(), 4);
    assert!(stdout.contains(",tx1,user_1,100,completed"));
    assert!(stdout.contains(",tx2,user_1,50.5,completed"));
    assert!(stdout.contains(",tx3,user_2,20,completed"));

    Ok(())
}

#[test]
fn test_cli_opening_balance_and_completed_only() {
    let mut cmd = walletpay();
    cmd.arg("tests/fixtures/payments.csv").args([
        "--opening-balance",
        "500",
        "--success-rate",
        "0",
        "--debit-policy",
        "completed-only",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("user_1,500"))
        .stdout(predicate::str::contains("user_2,500"));
}

#[test]
fn test_cli_opening_balance_from_env() {
    let mut cmd = walletpay();
    cmd.arg("tests/fixtures/payments.csv")
        .env("WALLETPAY_OPENING_BALANCE", "1000")
        .env("WALLETPAY_SUCCESS_RATE", "1");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("user_1,849.5"))
        .stdout(predicate::str::contains("user_2,980"));
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = walletpay();
    cmd.arg("tests/fixtures/does_not_exist.csv");
    cmd.assert().failure();
}

#[test]
fn test_cli_many_users() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("many_users.csv");
    common::generate_csv(&input, 3, 30)?;

    let mut cmd = walletpay();
    cmd.arg(&input).args(["--opening-balance", "100", "--workers", "4"]);

    let output = cmd.output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(
        stdout,
        "user,balance\nuser_0,90\nuser_1,90\nuser_2,90\n"
    );

    Ok(())
}

#[test]
fn test_cli_rejects_invalid_success_rate() {
    for rate in ["NaN", "1.5", "-0.1"] {
        let mut cmd = walletpay();
        cmd.arg("tests/fixtures/payments.csv")
            .arg(format!("--success-rate={rate}"));
        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("not a probability"));
    }

    let mut cmd = walletpay();
    cmd.arg("tests/fixtures/payments.csv")
        .env("WALLETPAY_SUCCESS_RATE", "NaN");
    cmd.assert().failure();
}
