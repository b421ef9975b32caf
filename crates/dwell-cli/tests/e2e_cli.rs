//! E2E tests for the `dwell` binary: `dwell policy` and `dwell report`.
//!
//! Covers: policy validation from config, output modes, credential and
//! base-URL resolution failures, and report runs against a local HTTP stub.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Test harness helpers
// ---------------------------------------------------------------------------

fn dwell_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("dwell"));
    cmd.current_dir(dir);
    cmd.env("DWELL_LOG", "error");
    cmd.env("DWELL_FORMAT", "text");
    cmd.env_remove("JIRA_BASE64_AUTH");
    cmd.env_remove("JIRA_BASE_URL");
    cmd
}

fn write_file(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).expect("write fixture");
}

const TOKEN: &str = "dXNlcjp0b2tlbg==";
const BOARDS_PATH: &str = "/rest/agile/1.0/board";

const OVERLAPPING_POLICY: &str = r#"
[policy]
cycle_time_issue_types = ["story", "bug"]
ignored_issue_types = ["epic", "bug"]
terminal_statuses = ["done"]
non_terminal_statuses = ["in progress"]
in_flight_statuses = ["in progress"]
not_in_flight_statuses = ["done"]
"#;

// ---------------------------------------------------------------------------
// dwell policy
// ---------------------------------------------------------------------------

#[test]
fn policy_reports_builtin_tables() {
    let dir = TempDir::new().expect("tempdir");
    dwell_cmd(dir.path())
        .arg("policy")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("source=builtin valid=true"));
}

#[test]
fn policy_json_lists_three_pairs() {
    let dir = TempDir::new().expect("tempdir");
    let output = dwell_cmd(dir.path())
        .args(["--json", "policy", "--values"])
        .output()
        .expect("policy should not crash");
    assert!(output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    let pairs = json["pairs"].as_array().expect("pairs array");
    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs[0]["pair"], "cycle_time_task");
    assert_eq!(pairs[1]["dimension"], "status");
    assert!(pairs[2]["universe"].as_array().is_some_and(|v| !v.is_empty()));
}

#[test]
fn overlapping_policy_config_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    write_file(dir.path(), "dwell.toml", OVERLAPPING_POLICY);

    dwell_cmd(dir.path())
        .arg("policy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1001]"))
        .stderr(predicate::str::contains("bug"));
}

#[test]
fn malformed_config_is_a_parse_error() {
    let dir = TempDir::new().expect("tempdir");
    write_file(dir.path(), "custom.toml", "[fetch\nmax_concurrency = ");

    dwell_cmd(dir.path())
        .args(["--config", "custom.toml", "policy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1002]"));
}

#[test]
fn zero_concurrency_in_config_is_invalid() {
    let dir = TempDir::new().expect("tempdir");
    write_file(dir.path(), "dwell.toml", "[fetch]\nmax_concurrency = 0\n");

    dwell_cmd(dir.path())
        .arg("policy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1003]"))
        .stderr(predicate::str::contains("fetch.max_concurrency"));
}

// ---------------------------------------------------------------------------
// dwell report
// ---------------------------------------------------------------------------

#[test]
fn report_without_base_url_fails_before_fetching() {
    let dir = TempDir::new().expect("tempdir");
    write_file(dir.path(), ".jira-base64-auth", &format!("{TOKEN}\n"));

    dwell_cmd(dir.path())
        .arg("report")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1003]"))
        .stderr(predicate::str::contains("jira.base_url"));

    assert!(!dir.path().join("output").exists());
}

#[test]
fn report_without_credentials_fails() {
    let dir = TempDir::new().expect("tempdir");

    let output = dwell_cmd(dir.path())
        .args(["--json", "report", "--base-url", "https://acme.atlassian.net"])
        .output()
        .expect("report should not crash");
    assert!(!output.status.success());

    let json: Value = serde_json::from_slice(&output.stderr).expect("JSON error on stderr");
    assert_eq!(json["error"]["error_code"], "E1004");
    assert!(json["error"]["suggestion"].is_string());
}

#[test]
fn report_policy_problems_surface_before_credentials() {
    let dir = TempDir::new().expect("tempdir");
    write_file(dir.path(), "dwell.toml", OVERLAPPING_POLICY);

    dwell_cmd(dir.path())
        .args(["report", "--base-url", "https://acme.atlassian.net"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1001]"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_credentials_are_reported_as_authentication_failure() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(BOARDS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string(
            r#"{"errorMessages":["Client must be authenticated to access this resource."]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    dwell_cmd(dir.path())
        .env("JIRA_BASE64_AUTH", TOKEN)
        .args(["report", "--base-url", &server.uri()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E2002]"));

    assert!(!dir.path().join("output").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_site_writes_header_only_artifacts() {
    let dir = TempDir::new().expect("tempdir");
    write_file(dir.path(), ".jira-base64-auth", &format!("{TOKEN}\n"));

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(BOARDS_PATH))
        .and(query_param("startAt", "0"))
        .and(header("Authorization", format!("Basic {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "maxResults": 50,
            "startAt": 0,
            "isLast": true,
            "values": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let output = dwell_cmd(dir.path())
        .args(["--json", "report", "--base-url", &server.uri(), "--output-dir", "reports"])
        .output()
        .expect("report should not crash");
    assert!(
        output.status.success(),
        "report failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let requests = server.received_requests().await.expect("recording enabled");
    let paths: Vec<&str> = requests.iter().map(|request| request.url.path()).collect();
    assert_eq!(paths, vec![BOARDS_PATH]);

    let json: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(json["boards"], 0);
    assert_eq!(json["issues"], 0);
    assert_eq!(json["requests"], 1);
    assert!(json["search_window"].is_null());

    let raw_path = json["artifacts"]["raw_csv"].as_str().expect("raw path");
    let summary_path = json["artifacts"]["summary_csv"].as_str().expect("summary path");
    assert!(raw_path.contains("time-in-status-raw-"));

    let raw = std::fs::read_to_string(dir.path().join(raw_path)).expect("raw csv");
    assert_eq!(raw.lines().count(), 1);
    assert!(raw.starts_with("board_id,project_name,sprint_id,"));

    let summary = std::fs::read_to_string(dir.path().join(summary_path)).expect("summary csv");
    assert_eq!(
        summary.trim_end(),
        "project_name,in_flight_hours_p85,earliest_sprint_start_date,latest_sprint_end_date,\
         in_flight_hours_n,in_flight_hours_avg,in_flight_hours_p75,in_flight_hours_p50,\
         in_flight_hours_p25,in_flight_hours_min,in_flight_hours_max"
    );
}

#[test]
fn help_lists_both_commands() {
    let dir = TempDir::new().expect("tempdir");
    dwell_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("report"))
        .stdout(predicate::str::contains("policy"));
}
