//! Smoke tests -- verify the binary runs and rejects bad input up front.

use assert_cmd::Command;
use predicates::prelude::*;

fn linkstress() -> Command {
    let mut cmd = Command::cargo_bin("linkstress").unwrap();
    cmd.env_remove("LINKSTRESS_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    linkstress()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Serial link stress tester"));
}

#[test]
fn test_cli_version() {
    linkstress()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("linkstress"));
}

#[test]
fn test_run_subcommand_exists() {
    linkstress()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--detailed-logging"))
        .stdout(predicates::str::contains("--continuous"));
}

#[test]
fn test_invalid_baud_rate_rejected() {
    linkstress()
        .args(["run", "10", "4800", "--backend", "loopback"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("invalid baud rate 4800"))
        .stderr(predicates::str::contains("115200"));
}

#[test]
fn test_zero_duration_rejected() {
    linkstress()
        .args(["run", "0", "9600", "--backend", "loopback"])
        .assert()
        .failure();
}

#[test]
fn test_non_numeric_duration_rejected() {
    linkstress()
        .args(["run", "soon", "9600"])
        .assert()
        .failure();
}

#[test]
fn test_mismatched_ports_rejected() {
    linkstress()
        .args([
            "run", "1", "9600", "--backend", "loopback", "--dut", "d0", "--dut", "d1", "--aux",
            "a0",
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains("port lists differ"));
}

#[test]
fn test_config_show_prints_defaults() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("linkstress.toml");
    std::fs::write(&path, "[link]\nxonxoff = true\n").unwrap();

    linkstress()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("[timing]"))
        .stdout(predicates::str::contains("xonxoff = true"))
        .stdout(predicates::str::contains("/dev/ttye800"));
}

#[test]
fn test_config_show_reports_unreadable_env_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let missing = dir.path().join("missing.toml");

    linkstress()
        .env("LINKSTRESS_CONFIG", &missing)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicates::str::contains("[ports]"))
        .stderr(predicates::str::contains("could not be loaded"));
}

#[test]
fn test_release_profile_unwinds_task_panics() {
    // A panicking sender or receiver must reach the join and fail its
    // session, which an aborting release build would never do.
    let manifest = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml")).unwrap();
    let manifest: toml::Value = toml::from_str(&manifest).unwrap();
    let panic = manifest
        .get("profile")
        .and_then(|p| p.get("release"))
        .and_then(|r| r.get("panic"))
        .and_then(|v| v.as_str());
    assert_ne!(panic, Some("abort"));
}

#[test]
fn test_loopback_run_passes_with_json_report() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("linkstress.toml");
    std::fs::write(
        &path,
        r#"
[ports]
dut = ["dut0", "dut1"]
aux = ["aux0", "aux1"]
backend = "loopback"

[link]
read_timeout_ms = 100

[timing]
start_delay_ms = 0
drain_delay_ms = 50
receiver_grace_ms = 200
"#,
    )
    .unwrap();

    linkstress()
        .args(["run", "1", "115200", "--json", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("\"passed\": true"))
        .stdout(predicates::str::contains("\"reason\": \"completed\""))
        .stdout(predicates::str::contains("\"dropped\": 0"));
}

#[test]
fn test_missing_serial_device_fails_session() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("linkstress.toml");
    std::fs::write(&path, "[timing]\nstart_delay_ms = 0\ndrain_delay_ms = 0\n").unwrap();

    linkstress()
        .args(["run", "1", "9600", "--backend", "serial", "--config"])
        .arg(&path)
        .args(["--dut", "/nonexistent/ttyDUT", "--aux", "/nonexistent/ttyAUX"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("open failed"))
        .stdout(predicate::str::contains("FAIL"));
}
