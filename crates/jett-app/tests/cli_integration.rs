//! Integration tests for the jett CLI binary.
//!
//! Each test writes its own config with a dry-run delegate and an audit
//! directory inside a temp dir.

use std::path::Path;
use std::process::{Command, Output};

const ALLOWLIST: &str = r#"
allow = [
    { kind = "restart", target = "svcA" },
    { kind = "status", target = "*" },
]
"#;

fn write_config(dir: &Path, governor_extra: &str) -> std::path::PathBuf {
    let config = format!(
        "[governor]\ndelegate = \"dry-run\"\nper_minute = 2\nper_hour = 10\n{governor_extra}\n\
         [audit]\ndir = \"{}\"\n\n[router]\nmode = \"hybrid\"\n",
        dir.join("audit").display()
    );
    let path = dir.join("jett.toml");
    std::fs::write(&path, config).unwrap();
    path
}

fn jett(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_jett"));
    cmd.arg("--config").arg(config);
    cmd.env("RUST_LOG", "warn");
    cmd.env_remove("ANTHROPIC_API_KEY");
    cmd
}

fn output(cmd: &mut Command) -> Output {
    cmd.output().expect("Failed to execute command")
}

fn run(cmd: &mut Command) -> String {
    let out = output(cmd);
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    if !out.status.success() {
        panic!(
            "Command failed with status {:?}\nstdout: {stdout}\nstderr: {stderr}",
            out.status
        );
    }
    stdout
}

#[test]
fn classify_prints_route_and_signal() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), ALLOWLIST);

    let out = run(jett(&config).args(["classify", "what time is it"]));
    assert!(out.starts_with("local\t"), "Got: {out}");

    let out = run(jett(&config).args([
        "classify",
        "explain the tradeoffs of eventual consistency in distributed databases",
    ]));
    assert!(out.starts_with("cloud\t"), "Got: {out}");
}

#[test]
fn classify_json_explains_decision() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), ALLOWLIST);

    let out = run(jett(&config).args(["classify", "--json", "what time is it"]));
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["decision"], "local");
    assert_eq!(value["cloud_available"], false);
}

#[test]
fn exec_is_governed_and_audited() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), ALLOWLIST);

    let out = run(jett(&config).args(["exec", "--kind", "restart", "--target", "svcA"]));
    assert!(out.contains("[dry-run]"), "Got: {out}");

    let denied = output(jett(&config).args(["exec", "--kind", "restart", "--target", "svcB"]));
    assert!(!denied.status.success());
    let stderr = String::from_utf8_lossy(&denied.stderr);
    assert!(stderr.contains("Policy denied"), "Got: {stderr}");

    let listing = run(jett(&config).args(["audit", "--recent", "10"]));
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.last(), Some(&"(4 records)"));
    assert!(lines[0].contains("|ATTEMPT|voice-session|restart|svcA|"), "Got: {}", lines[0]);
    assert!(lines[1].contains("|SUCCESS|voice-session|restart|svcA|"), "Got: {}", lines[1]);
    assert!(lines[2].contains("|ATTEMPT|voice-session|restart|svcB|"), "Got: {}", lines[2]);
    assert!(lines[3].contains("|DENIED|voice-session|restart|svcB|"), "Got: {}", lines[3]);

    let verified = run(jett(&config).args(["audit", "--verify"]));
    assert_eq!(verified.trim(), "OK: 4 records verified");
}

#[test]
fn wildcard_status_is_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), ALLOWLIST);

    let out = run(jett(&config).args(["exec", "--kind", "status", "--target", "anything"]));
    assert!(out.contains("status on anything"), "Got: {out}");
}

#[test]
fn unknown_kind_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), ALLOWLIST);

    let out = output(jett(&config).args(["exec", "--kind", "remove", "--target", "svcA"]));
    assert!(!out.status.success());
}

#[test]
fn wildcard_on_mutating_kind_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "allow = [ { kind = \"restart\", target = \"*\" } ]");

    let out = output(jett(&config).arg("check-config"));
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Wildcard target not allowed"), "Got: {stderr}");
}

#[test]
fn check_config_reports_settings() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), ALLOWLIST);

    let out = run(jett(&config).arg("check-config"));
    assert!(out.contains("allowlist:  2 entries"), "Got: {out}");
    assert!(out.contains("2/min, 10/hour"), "Got: {out}");
    assert!(out.trim_end().ends_with("OK"));
}
