//! CLI argument parsing and binary-level protocol tests for scpd.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn check_scpd_help() {
    Command::cargo_bin("scpd")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn check_scpd_version() {
    Command::cargo_bin("scpd")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn requires_a_mode_flag() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("scpd")
        .unwrap()
        .env_remove("SSH_ORIGINAL_COMMAND")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("one of -t or -f is required"));
}

#[test]
fn modes_conflict() {
    Command::cargo_bin("scpd")
        .unwrap()
        .args(["-t", "-f", "somewhere"])
        .assert()
        .failure();
}

#[test]
fn sink_takes_exactly_one_path() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("scpd")
        .unwrap()
        .arg("-t")
        .arg(dir.path())
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("exactly one target path"));
}

#[test]
fn sink_receives_over_stdio() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("scpd")
        .unwrap()
        .arg("-t")
        .arg(dir.path())
        .write_stdin(&b"C0644 11 out.txt\n0123456789\n\x00"[..])
        .assert()
        .success()
        // readiness, header and payload acknowledgements
        .stdout(predicate::eq(&b"\x00\x00\x00"[..]));
    let contents = std::fs::read(dir.path().join("out.txt")).unwrap();
    assert_eq!(contents, b"0123456789\n");
}

#[test]
fn source_sends_over_stdio() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("out.txt"), "0123456789\n").unwrap();
    Command::cargo_bin("scpd")
        .unwrap()
        .arg("-f")
        .arg(dir.path().join("out.txt"))
        .write_stdin(&b"\x00\x00\x00"[..])
        .assert()
        .success()
        .stdout(predicate::eq(&b"C0644 11 out.txt\n0123456789\n\x00"[..]));
}

#[test]
fn sink_reports_summary_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("scpd")
        .unwrap()
        .arg("-t")
        .arg("--summary")
        .arg(dir.path())
        .write_stdin(&b"C0644 2 s.txt\nhi\x00"[..])
        .assert()
        .success()
        .stderr(predicate::str::contains("files transferred: 1"));
}

#[test]
fn forced_command_drives_the_sink() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("scpd")
        .unwrap()
        .env(
            "SSH_ORIGINAL_COMMAND",
            format!("scp -t {}", dir.path().to_string_lossy()),
        )
        .write_stdin(&b"C0644 2 f.txt\nhi\x00"[..])
        .assert()
        .success()
        .stdout(predicate::eq(&b"\x00\x00\x00"[..]));
    assert_eq!(std::fs::read(dir.path().join("f.txt")).unwrap(), b"hi");
}

#[test]
fn unsupported_forced_command_fails() {
    Command::cargo_bin("scpd")
        .unwrap()
        .env("SSH_ORIGINAL_COMMAND", "rm -rf /")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot serve forced command"));
}

#[test]
fn buffer_size_accepts_human_readable_values() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("scpd")
        .unwrap()
        .args(["--buffer-size", "1MiB", "-t"])
        .arg(dir.path())
        .write_stdin(&b""[..])
        .assert()
        .success();
}
