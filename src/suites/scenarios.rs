//! Scaffolding scenarios: run the CLI, then check the generated `.env` and
//! file layout. Every step lands in the scenario detail file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use walkdir::WalkDir;

use super::{scenario_test_file, SuiteContext};
use crate::detail::{Severity, Step};
use crate::fixture::DbEndpoint;
use crate::logger::Logger;
use crate::process::{self, CommandSpec};
use crate::prompt::{PromptDriver, PromptStep};
use crate::runner::{Outcome, SuiteDef, TestCase, TestContext, TestFile};
use crate::{Error, Result};

/// Config used for definitions placed directly in the scenarios directory.
const DEFAULT_CONFIG: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvExpectations {
    #[serde(default)]
    pub required: Vec<String>,
    /// Exact values; `{dbUrl}`, `{dbHost}`, `{dbPort}`, `{dbName}` and
    /// `{dbUser}` expand to the published database endpoint.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl EnvExpectations {
    fn is_empty(&self) -> bool {
        self.required.is_empty() && self.values.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileExpectations {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub absent: Vec<String>,
}

/// One scenario definition file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDef {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub prompts: Vec<PromptStep>,
    /// Directory the CLI creates, relative to its working directory.
    /// Defaults to the scenario name.
    #[serde(default)]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub env: EnvExpectations,
    #[serde(default)]
    pub files: FileExpectations,
}

impl ScenarioDef {
    pub fn project_dir(&self) -> String {
        self.project_dir
            .clone()
            .unwrap_or_else(|| crate::format::sanitize_name(&self.name))
    }
}

/// A definition file found under the scenarios directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionFile {
    pub path: PathBuf,
    /// Path relative to the scenarios directory, `/`-separated.
    pub rel: String,
    pub config: String,
}

/// Every `*.json` under `dir`, sorted. The first directory level names the
/// config.
pub fn load_definitions(dir: &Path) -> Vec<DefinitionFile> {
    if !dir.is_dir() {
        tracing::warn!("Scenarios directory not found: {}", dir.display());
        return Vec::new();
    }
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| {
            let rel = e.path().strip_prefix(dir).ok()?;
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let config = if parts.len() > 1 { parts[0].clone() } else { DEFAULT_CONFIG.to_string() };
            Some(DefinitionFile {
                path: e.path().to_path_buf(),
                rel: parts.join("/"),
                config,
            })
        })
        .collect()
}

pub fn parse_definition(path: &Path) -> Result<ScenarioDef> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| Error::InvalidScenario {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// One test file per config, one group per scenario.
pub(super) fn files(ctx: &SuiteContext, definitions: &[DefinitionFile]) -> Vec<TestFile> {
    let mut by_config: BTreeMap<String, Vec<ScenarioDef>> = BTreeMap::new();
    for file in definitions {
        match parse_definition(&file.path) {
            Ok(def) => by_config.entry(file.config.clone()).or_default().push(def),
            Err(e) => tracing::warn!("Skipping scenario {}: {}", file.rel, e),
        }
    }

    by_config
        .into_iter()
        .map(|(config, defs)| {
            let mut test_file = TestFile::new(scenario_test_file(&config));
            for def in defs {
                let run = Arc::new(ScenarioRun::new(ctx, &config, def));
                test_file = test_file.suite(
                    SuiteDef::new(run.def.name.clone())
                        .test(step_case(&run, Step::Scaffold))
                        .test(step_case(&run, Step::Env))
                        .test(step_case(&run, Step::Files)),
                );
            }
            test_file
        })
        .collect()
}

fn step_case(run: &Arc<ScenarioRun>, step: Step) -> TestCase {
    let run = Arc::clone(run);
    TestCase::new(step.as_str(), move |t| async move {
        match step {
            Step::Scaffold => scaffold(&t, &run).await,
            Step::Env => check_env(&t, &run).await,
            Step::Files => check_files(&t, &run).await,
        }
    })
}

struct ScenarioRun {
    ctx: SuiteContext,
    def: ScenarioDef,
    /// Working directory of the CLI.
    work: PathBuf,
    /// Directory the CLI is expected to generate.
    project: PathBuf,
    log: Logger,
}

impl ScenarioRun {
    fn new(ctx: &SuiteContext, config: &str, def: ScenarioDef) -> Self {
        let work = ctx.paths.work_dir().join(crate::format::sanitize_name(config));
        let project = work.join(def.project_dir());
        let log = Logger::new(ctx.paths.area_log(&def.name)).with_width(ctx.settings.box_width);
        Self { ctx: ctx.clone(), def, work, project, log }
    }

    fn record(&self, step: Step, severity: Severity, meta: Option<serde_json::Value>) {
        let _ = self.log.line(&format!("{} {}: {}", severity.icon(), step.as_str(), severity));
        if let Err(e) = self.ctx.store.record_step(&self.def.name, step, severity, meta) {
            tracing::warn!("Could not record {} for {}: {}", step.as_str(), self.def.name, e);
        }
    }

    fn scaffold_failed(&self) -> bool {
        self.ctx
            .store
            .read_scenarios()
            .get(&self.def.name)
            .and_then(|r| r.scaffold.as_ref())
            .is_some_and(|s| s.severity == Severity::Fail)
    }

    /// Later steps have nothing to inspect once scaffolding failed.
    fn skip_after_failed_scaffold(&self, step: Step) -> Option<Outcome> {
        if !self.scaffold_failed() {
            return None;
        }
        self.record(step, Severity::Fail, Some(json!({ "skipped": "scaffold failed" })));
        Some(Outcome::Skipped("scaffold failed".to_string()))
    }

    fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.ctx.settings.process_timeout_ms)
    }
}

async fn scaffold(t: &TestContext, run: &ScenarioRun) -> Result<Outcome> {
    let result = run_scaffold(t, run).await;
    match &result {
        Ok(_) => run.record(Step::Scaffold, Severity::Ok, None),
        Err(e) => run.record(Step::Scaffold, Severity::Fail, Some(json!({ "error": e.to_string() }))),
    }
    result
}

async fn run_scaffold(t: &TestContext, run: &ScenarioRun) -> Result<Outcome> {
    if run.project.exists() {
        tokio::fs::remove_dir_all(&run.project).await?;
    }
    tokio::fs::create_dir_all(&run.work).await?;

    let project_dir = run.def.project_dir();
    let argv: Vec<String> = run
        .ctx
        .settings
        .scaffold_command
        .iter()
        .cloned()
        .chain(run.def.args.iter().map(|a| a.replace("{projectDir}", &project_dir)))
        .collect();
    let spec = CommandSpec::from_argv(&argv)?
        .cwd(&run.work)
        .timeout(run.process_timeout());
    t.log(format!("$ {}", spec.display()));

    if run.def.prompts.is_empty() {
        let output = process::run(&spec, Some(&run.log)).await?;
        if output.timed_out {
            return Err(Error::ProcessTimeout {
                program: spec.program.clone(),
                timeout_ms: run.ctx.settings.process_timeout_ms,
            });
        }
        if !output.success() {
            return Err(Error::Assertion(format!(
                "scaffold exited with {:?}: {}",
                output.code,
                process::last_lines(&output.stderr, 5)
            )));
        }
    } else {
        drive_prompts(t, run, &spec).await?;
    }

    if !run.project.is_dir() {
        return Err(Error::Assertion(format!(
            "project directory {} was not created",
            run.project.display()
        )));
    }
    t.log(format!("project generated in {}", run.project.display()));
    Ok(Outcome::Passed)
}

async fn drive_prompts(t: &TestContext, run: &ScenarioRun, spec: &CommandSpec) -> Result<()> {
    let mut cmd = spec.command();
    cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| Error::Spawn {
        program: spec.program.clone(),
        reason: e.to_string(),
    })?;
    let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
        return Err(Error::Spawn {
            program: spec.program.clone(),
            reason: "stdio not captured".to_string(),
        });
    };
    let err_log = run.log.nested();
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let Some(stream) = stderr else { return };
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = err_log.line(&format!("stderr: {}", line));
        }
    });

    let prompt_timeout = Duration::from_millis(run.ctx.settings.prompt_timeout_ms);
    let mut driver = PromptDriver::new(stdout, stdin, prompt_timeout);
    let answered = driver.run(&run.def.prompts).await;
    if let Err(e) = answered {
        let _ = run.log.boxed("prompt transcript (aborted)", &[driver.transcript()]);
        let _ = child.kill().await;
        return Err(e);
    }
    t.log(format!("answered {} prompt(s)", run.def.prompts.len()));
    let transcript = driver.finish(run.process_timeout()).await?;
    let _ = run.log.boxed("prompt transcript", &[transcript.as_str()]);
    drop(driver);

    let status = match tokio::time::timeout(run.process_timeout(), child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(Error::ProcessTimeout {
                program: spec.program.clone(),
                timeout_ms: run.ctx.settings.process_timeout_ms,
            });
        }
    };
    if !status.success() {
        return Err(Error::Assertion(format!("scaffold exited with {:?}", status.code())));
    }
    Ok(())
}

/// Result of comparing a generated `.env` against expectations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvReport {
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
}

impl EnvReport {
    pub fn severity(&self) -> Severity {
        if self.missing.is_empty() && self.mismatched.is_empty() {
            Severity::Ok
        } else {
            Severity::Fail
        }
    }
}

pub fn evaluate_env(
    vars: &HashMap<String, String>,
    expected: &EnvExpectations,
    endpoint: Option<&DbEndpoint>,
) -> EnvReport {
    let missing = expected
        .required
        .iter()
        .filter(|k| !vars.contains_key(*k))
        .cloned()
        .collect();
    let mismatched = expected
        .values
        .iter()
        .filter(|(k, v)| vars.get(*k) != Some(&expand_placeholders(v, endpoint)))
        .map(|(k, _)| k.clone())
        .collect();
    EnvReport { missing, mismatched }
}

fn expand_placeholders(value: &str, endpoint: Option<&DbEndpoint>) -> String {
    let Some(db) = endpoint else {
        return value.to_string();
    };
    value
        .replace("{dbUrl}", &db.url())
        .replace("{dbHost}", &db.host)
        .replace("{dbPort}", &db.port.to_string())
        .replace("{dbName}", &db.database)
        .replace("{dbUser}", &db.user)
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let iter = dotenvy::from_path_iter(path)
        .map_err(|e| Error::Assertion(format!("cannot read {}: {}", path.display(), e)))?;
    let mut vars = HashMap::new();
    for item in iter {
        let (key, value) =
            item.map_err(|e| Error::Assertion(format!("malformed {}: {}", path.display(), e)))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

async fn check_env(t: &TestContext, run: &ScenarioRun) -> Result<Outcome> {
    if let Some(skipped) = run.skip_after_failed_scaffold(Step::Env) {
        return Ok(skipped);
    }
    if run.def.env.is_empty() {
        t.log("no .env expectations");
        run.record(Step::Env, Severity::Ok, None);
        return Ok(Outcome::Passed);
    }

    let path = run.project.join(".env");
    let vars = match read_env_file(&path) {
        Ok(vars) => vars,
        Err(e) => {
            run.record(Step::Env, Severity::Fail, Some(json!({ "error": e.to_string() })));
            return Err(e);
        }
    };
    let report = evaluate_env(&vars, &run.def.env, DbEndpoint::from_env().as_ref());
    let severity = report.severity();
    let meta = (severity != Severity::Ok)
        .then(|| json!({ "missing": report.missing, "mismatched": report.mismatched }));
    run.record(Step::Env, severity, meta);

    if severity == Severity::Fail {
        return Err(Error::Assertion(format!(
            ".env missing {:?}, unexpected values for {:?}",
            report.missing, report.mismatched
        )));
    }
    t.log(format!(".env has {} expected key(s)", run.def.env.required.len() + run.def.env.values.len()));
    Ok(Outcome::Passed)
}

/// Result of checking the generated file layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilesReport {
    pub missing: Vec<String>,
    pub optional_missing: Vec<String>,
    pub unexpected: Vec<String>,
}

impl FilesReport {
    pub fn severity(&self) -> Severity {
        if !self.missing.is_empty() || !self.unexpected.is_empty() {
            Severity::Fail
        } else if !self.optional_missing.is_empty() {
            Severity::Warn
        } else {
            Severity::Ok
        }
    }
}

pub fn evaluate_files(project: &Path, expected: &FileExpectations) -> FilesReport {
    let missing_from = |list: &[String]| -> Vec<String> {
        list.iter().filter(|p| !project.join(p).exists()).cloned().collect()
    };
    FilesReport {
        missing: missing_from(&expected.required),
        optional_missing: missing_from(&expected.optional),
        unexpected: expected
            .absent
            .iter()
            .filter(|p| project.join(p).exists())
            .cloned()
            .collect(),
    }
}

async fn check_files(t: &TestContext, run: &ScenarioRun) -> Result<Outcome> {
    if let Some(skipped) = run.skip_after_failed_scaffold(Step::Files) {
        return Ok(skipped);
    }
    let report = evaluate_files(&run.project, &run.def.files);
    let severity = report.severity();
    let meta = (severity != Severity::Ok).then(|| {
        json!({
            "missing": report.missing,
            "optionalMissing": report.optional_missing,
            "unexpected": report.unexpected,
        })
    });
    run.record(Step::Files, severity, meta);

    match severity {
        Severity::Fail => Err(Error::Assertion(format!(
            "missing {:?}, should not exist {:?}",
            report.missing, report.unexpected
        ))),
        Severity::Warn => {
            t.log(format!("⚠️ optional files missing: {}", report.optional_missing.join(", ")));
            Ok(Outcome::Passed)
        }
        Severity::Ok => {
            t.log(format!("{} required file(s) present", run.def.files.required.len()));
            Ok(Outcome::Passed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Answer;
    use tempfile::tempdir;

    #[test]
    fn test_parse_definition_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        std::fs::write(
            &path,
            r#"{
                "name": "basic app",
                "args": ["{projectDir}", "--yes"],
                "prompts": [
                    {"expect": "Project name?", "answer": {"text": "demo"}},
                    {"expect": "Use TypeScript?", "answer": {"confirm": true}},
                    {"expect": "Features", "answer": {"checkbox": ["auth", "db"]}},
                    {"expect": "Continue", "answer": "enter", "timeoutMs": 500}
                ],
                "env": {"required": ["DATABASE_URL"], "values": {"PORT": "3000"}},
                "files": {"required": ["package.json"], "optional": ["README.md"], "absent": [".git"]}
            }"#,
        )
        .unwrap();

        let def = parse_definition(&path).unwrap();
        assert_eq!(def.project_dir(), "basic_app");
        assert_eq!(def.prompts[1].answer, Answer::Confirm(true));
        assert_eq!(def.prompts[2].answer, Answer::Checkbox(vec!["auth".into(), "db".into()]));
        assert_eq!(def.prompts[3].answer, Answer::Enter);
        assert_eq!(def.prompts[3].timeout_ms, Some(500));
        assert_eq!(def.env.values["PORT"], "3000");
        assert_eq!(def.files.absent, vec![".git"]);
    }

    #[test]
    fn test_invalid_definition() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"args": []}"#).unwrap();
        let err = parse_definition(&path).unwrap_err();
        assert!(err.to_string().starts_with("INVALID_SCENARIO:"));
    }

    #[test]
    fn test_load_definitions_derives_config() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("with-db")).unwrap();
        std::fs::write(dir.path().join("with-db/b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("with-db/a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("top.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let defs = load_definitions(dir.path());
        let found: Vec<(&str, &str)> = defs.iter().map(|d| (d.rel.as_str(), d.config.as_str())).collect();
        assert_eq!(
            found,
            vec![("top.json", "default"), ("with-db/a.json", "with-db"), ("with-db/b.json", "with-db")]
        );
    }

    #[test]
    fn test_evaluate_env() {
        let vars: HashMap<String, String> = [
            ("DATABASE_URL", "postgres://u:p@127.0.0.1:5432/db"),
            ("PORT", "8080"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let expected = EnvExpectations {
            required: vec!["DATABASE_URL".into(), "SECRET".into()],
            values: [
                ("PORT".to_string(), "3000".to_string()),
                ("DATABASE_URL".to_string(), "{dbUrl}".to_string()),
            ]
            .into_iter()
            .collect(),
        };
        let endpoint = DbEndpoint {
            host: "127.0.0.1".into(),
            port: 5432,
            user: "u".into(),
            password: "p".into(),
            database: "db".into(),
        };
        let report = evaluate_env(&vars, &expected, Some(&endpoint));
        assert_eq!(report.missing, vec!["SECRET"]);
        assert_eq!(report.mismatched, vec!["PORT"]);
        assert_eq!(report.severity(), Severity::Fail);
    }

    #[test]
    fn test_evaluate_files_severity() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();

        let mut expected = FileExpectations {
            required: vec!["package.json".into()],
            optional: vec!["README.md".into()],
            absent: vec![],
        };
        assert_eq!(evaluate_files(dir.path(), &expected).severity(), Severity::Warn);

        expected.absent.push(".git".into());
        let report = evaluate_files(dir.path(), &expected);
        assert_eq!(report.unexpected, vec![".git"]);
        assert_eq!(report.severity(), Severity::Fail);
    }

    #[test]
    fn test_read_env_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "# generated\nPORT=3000\nNAME=\"demo app\"\n").unwrap();
        let vars = read_env_file(&path).unwrap();
        assert_eq!(vars["PORT"], "3000");
        assert_eq!(vars["NAME"], "demo app");
        assert!(read_env_file(&dir.path().join("missing.env")).is_err());
    }
}
