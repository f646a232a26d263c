//! Command-line behaviour that is decided before any database is contacted

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

const A: &str = "6f1c3f0e-6c4b-4e4f-9a57-0d4a2b8f1e11";
const B: &str = "0b7d3d5e-1f7a-4c1e-8d3b-2f5c6a7b8c9d";

/// Run the binary with its home directory in `home` and optional stdin
fn rbc_admin(home: &Path, args: &[&str], stdin: Option<&str>) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_rbc-admin"))
        .args(args)
        .current_dir(home)
        .env("BALDRICK_REBEC_HOME_DIR", home)
        .env("RUST_LOG", "warn")
        // an unreachable port keeps accidental connections from succeeding
        .env("RBC__POSTGRES__PORT", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    {
        let mut pipe = child.stdin.take().unwrap();
        if let Some(input) = stdin {
            pipe.write_all(input.as_bytes()).unwrap();
        }
    }
    child.wait_with_output().unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn assert_failed_with(output: &Output, exit_code: i32, code: &str) {
    assert_eq!(output.status.code(), Some(exit_code), "stderr: {}", stderr(output));
    assert!(
        stderr(output).contains(&format!("error[{}]", code)),
        "stderr: {}",
        stderr(output)
    );
    assert!(output.stdout.is_empty(), "stdout must stay clean on failure");
}

#[test]
fn test_reset_without_force_is_refused() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(home.path(), &["db", "reset", "--drop-app-role"], None);
    assert_failed_with(&output, 2, "CONFIRMATION_REQUIRED");
}

#[test]
fn test_scaffold_requires_admin_credentials() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(home.path(), &["db", "scaffold", "--all", "--yes"], None);
    assert_failed_with(&output, 2, "MISSING_CREDENTIALS");
}

#[test]
fn test_scaffold_without_yes_is_refused() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(
        home.path().join("config.yaml"),
        "postgres:\n  admin:\n    user: boss\n    password: s3cret\n",
    )
    .unwrap();
    let output = rbc_admin(home.path(), &["db", "scaffold", "--create-roles"], None);
    assert_failed_with(&output, 2, "CONFIRMATION_REQUIRED");
}

#[test]
fn test_invalid_relation_type_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(
        home.path(),
        &["stickie-rel", "set", "--from", A, "--to", B, "--type", "likes"],
        None,
    );
    assert_failed_with(&output, 2, "INVALID_RELATION_TYPE");
}

#[test]
fn test_missing_from_is_a_validation_error() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(
        home.path(),
        &["stickie-rel", "get", "--to", B, "--type", "uses"],
        None,
    );
    assert_failed_with(&output, 2, "VALIDATION_ERROR");
    assert!(stderr(&output).contains("--from"));
}

#[test]
fn test_delete_needs_typed_confirmation() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(
        home.path(),
        &["stickie-rel", "delete", "--from", A, "--to", B, "--type", "causes"],
        Some("no\n"),
    );
    assert_failed_with(&output, 2, "CONFIRMATION_REQUIRED");
    assert!(stderr(&output).contains("Type YES to confirm"));
}

#[test]
fn test_restore_rejects_unknown_tables_before_connecting() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(
        home.path(),
        &["db", "restore"],
        Some(r#"{"roles": [], "users": [{"id": 1}]}"#),
    );
    assert_failed_with(&output, 2, "UNKNOWN_TABLE");
    assert!(stderr(&output).contains("users"));
}

#[test]
fn test_restore_rejects_malformed_json() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(home.path(), &["db", "restore"], Some("{not json"));
    assert_failed_with(&output, 2, "VALIDATION_ERROR");
}

#[test]
fn test_unreachable_database_is_a_connectivity_error() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(home.path(), &["db", "age-status"], None);
    assert_failed_with(&output, 3, "CONNECTIVITY_ERROR");
}

#[test]
fn test_invalid_configuration_is_reported() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(home.path().join("config.yaml"), "graph:\n  name: \"\"\n").unwrap();
    let output = rbc_admin(home.path(), &["db", "plan"], None);
    assert_failed_with(&output, 1, "CONFIG_ERROR");
}

#[test]
fn test_json_log_format_reports_errors_as_json() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(
        home.path(),
        &["--log-format", "json", "db", "reset"],
        None,
    );
    assert_eq!(output.status.code(), Some(2));
    let last = stderr(&output)
        .lines()
        .last()
        .map(str::to_string)
        .unwrap_or_default();
    let body: serde_json::Value = serde_json::from_str(&last).unwrap();
    assert_eq!(body["success"], serde_json::json!(false));
    assert_eq!(body["code"], serde_json::json!("CONFIRMATION_REQUIRED"));
}

#[test]
fn test_backup_retention_out_of_range_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(
        home.path(),
        &["db", "backup", "--retention-days", "4294967295"],
        None,
    );
    assert_failed_with(&output, 2, "VALIDATION_ERROR");
    assert!(stderr(&output).contains("--retention-days"));
}

#[test]
fn test_backup_rejects_unknown_filter_tables() {
    let home = tempfile::tempdir().unwrap();
    let output = rbc_admin(
        home.path(),
        &["db", "backup", "--include", "roles,users"],
        None,
    );
    assert_failed_with(&output, 2, "UNKNOWN_TABLE");
    assert!(stderr(&output).contains("users"));
}
