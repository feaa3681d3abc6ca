use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cascade(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cascade").unwrap();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("E2E_LOG_ROOT", dir.path().join("logs"))
        .env_remove("E2E_RUN_STAMP")
        .env_remove("E2E_FIXTURE_ERROR")
        .env_remove("E2E_SUITE_ABSENT");
    cmd
}

#[test]
fn test_no_command_prints_usage() {
    let dir = tempfile::tempdir().unwrap();
    cascade(&dir)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("USAGE:"))
        .stderr(predicate::str::contains("cascade run"));
}

#[test]
fn test_unknown_area_rejected_before_setup() {
    let dir = tempfile::tempdir().unwrap();
    cascade(&dir)
        .args(["run", "--only", "infra", "--no-fixture"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown area 'infra'"));
    assert!(!dir.path().join("logs").exists());
}

#[test]
fn test_summary_of_missing_run() {
    let dir = tempfile::tempdir().unwrap();
    cascade(&dir)
        .args(["summary", "20990101-000000"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no run found"));
}

#[test]
fn test_summary_of_past_run() {
    let dir = tempfile::tempdir().unwrap();
    let e2e = dir.path().join("logs/20260301-101010/e2e");
    std::fs::create_dir_all(&e2e).unwrap();
    std::fs::write(
        e2e.join("_suite-detail.json"),
        r#"[{"severity":"ok","message":"database provisioned"}]"#,
    )
    .unwrap();
    std::fs::write(
        e2e.join("_scenario-detail.json"),
        r#"{"app":{"scaffold":{"severity":"ok"},"env":{"severity":"fail","meta":{"missing":["PORT"]}}}}"#,
    )
    .unwrap();

    cascade(&dir)
        .args(["summary", "20260301-101010"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("SUMMARY 20260301-101010"))
        .stdout(predicate::str::contains("suite: 1 ok · 0 warn · 0 fail"))
        .stdout(predicate::str::contains("app  [scaffold ✅  env ❌  files ⏳]"));
}

#[test]
fn test_exec_streams_external_runner() {
    let dir = tempfile::tempdir().unwrap();
    let script = r#"
echo '{"event":"collected","files":[{"id":"f","name":"e2e/suite.test.ts","type":"file","file":"e2e/suite.test.ts","children":[{"id":"t","name":"log directory writable","type":"test","file":"e2e/suite.test.ts"}]}]}'
echo '{"event":"taskUpdate","updates":[["t","run"]]}'
echo 'probing logs'
echo 'runner diagnostics' >&2
echo '{"event":"taskUpdate","updates":[["t","pass"]]}'
echo '{"event":"finished"}'
"#;
    cascade(&dir)
        .env("E2E_RUN_STAMP", "20260301-111111")
        .args(["exec", "--no-fixture", "--", "sh", "-c", script])
        .assert()
        .success()
        .stdout(predicate::str::contains("┌─ SUITE"))
        .stdout(predicate::str::contains("• log directory writable"))
        .stdout(predicate::str::contains("probing logs"))
        .stdout(predicate::str::contains("📁 Logs:"));

    let suite_log = std::fs::read_to_string(dir.path().join("logs/20260301-111111/suite.log")).unwrap();
    assert!(suite_log.contains("runner diagnostics"));
}

const SCENARIO_RUNNER: &str = r#"
echo '{"event":"collected","files":[{"id":"f","name":"e2e/scenarios/basic/app.test.ts","type":"file","file":"e2e/scenarios/basic/app.test.ts","children":[{"id":"g","name":"app","type":"suite","file":"e2e/scenarios/basic/app.test.ts","children":[{"id":"t","name":"scaffold","type":"test","file":"e2e/scenarios/basic/app.test.ts"}]}]}]}'
echo '{"event":"taskUpdate","updates":[["t","run"]]}'
echo '{"event":"consoleLog","content":"scaffolding app","taskId":"t"}'
echo '{"event":"taskUpdate","updates":[["t","pass"]]}'
echo '{"event":"finished"}'
"#;

#[test]
fn test_exec_no_suite_streams_scenarios_only_run() {
    let dir = tempfile::tempdir().unwrap();
    cascade(&dir)
        .args(["exec", "--no-fixture", "--no-suite", "--", "sh", "-c", SCENARIO_RUNNER])
        .assert()
        .success()
        .stdout(predicate::str::contains("┌─ SCENARIOS"))
        .stdout(predicate::str::contains("scaffolding app"))
        .stdout(predicate::str::contains("┌─ SUITE").not());
}

#[test]
fn test_exec_suite_absent_from_env() {
    let dir = tempfile::tempdir().unwrap();
    cascade(&dir)
        .env("E2E_SUITE_ABSENT", "1")
        .args(["exec", "--no-fixture", "--", "sh", "-c", SCENARIO_RUNNER])
        .assert()
        .success()
        .stdout(predicate::str::contains("✅ scaffold"));
}
