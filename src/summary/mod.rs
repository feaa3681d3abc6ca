//! End-of-run summary over the detail store.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::detail::{DetailKind, DetailStore, Severity, SeverityCounts, Step};
use crate::emitter::{CiEmitter, LineSink};
use crate::logger::{RunPaths, RunStamp};
use crate::Result;

pub const SUMMARY_FILE: &str = "_summary.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub name: String,
    pub overall: Option<Severity>,
    pub steps: BTreeMap<String, Severity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub stamp: String,
    /// Keyed by area name.
    pub areas: BTreeMap<String, SeverityCounts>,
    pub scenarios: Vec<ScenarioSummary>,
}

impl RunReport {
    pub fn totals(&self) -> SeverityCounts {
        let mut totals = SeverityCounts::default();
        for counts in self.areas.values() {
            totals.merge(counts);
        }
        totals
    }

    pub fn has_failures(&self) -> bool {
        self.totals().fail > 0
    }
}

pub fn summarise(store: &DetailStore, stamp: &RunStamp) -> RunReport {
    let areas = DetailKind::ALL
        .iter()
        .map(|kind| (kind.area().to_string(), store.counts(*kind)))
        .collect();
    let scenarios = store
        .read_scenarios()
        .into_iter()
        .map(|(name, record)| ScenarioSummary {
            overall: record.overall(),
            steps: Step::ALL
                .iter()
                .filter_map(|s| record.step(*s).map(|r| (s.as_str().to_string(), r.severity)))
                .collect(),
            name,
        })
        .collect();
    RunReport { stamp: stamp.as_str().to_string(), areas, scenarios }
}

/// Boxed report: one line per area, then one per scenario with step icons.
pub fn render<S: LineSink>(report: &RunReport, emitter: &mut CiEmitter<S>) {
    let mut body = Vec::new();
    for (area, counts) in &report.areas {
        let icon = counts.worst().map(|s| s.icon()).unwrap_or(crate::format::ICON_SKIP);
        body.push(format!("{} {}: {}", icon, area, counts));
    }
    if !report.scenarios.is_empty() {
        body.push(String::new());
        for scenario in &report.scenarios {
            let icon = scenario.overall.map(|s| s.icon()).unwrap_or(crate::format::ICON_PENDING);
            let steps: Vec<String> = Step::ALL
                .iter()
                .map(|step| {
                    let mark = scenario
                        .steps
                        .get(step.as_str())
                        .map(|s| s.icon())
                        .unwrap_or(crate::format::ICON_PENDING);
                    format!("{} {}", step.as_str(), mark)
                })
                .collect();
            body.push(format!("{} {}  [{}]", icon, scenario.name, steps.join("  ")));
        }
    }
    let title = format!("SUMMARY {}", report.stamp);
    emitter.boxed(&title, &body, &report.totals().to_string());
}

pub fn write(report: &RunReport, paths: &RunPaths) -> Result<PathBuf> {
    std::fs::create_dir_all(paths.e2e_dir())?;
    let path = paths.e2e_dir().join(SUMMARY_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
    Ok(path)
}

/// Non-zero when a test failed or any detail record is `fail`.
pub fn exit_code(report: &RunReport, tests_failed: bool) -> i32 {
    if tests_failed || report.has_failures() {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::MemorySink;
    use tempfile::tempdir;

    fn populated(root: &std::path::Path) -> (RunPaths, DetailStore) {
        let paths = RunPaths::new(root, RunStamp::from("20260102-030405"));
        let store = DetailStore::for_run(&paths);
        store.init().unwrap();
        store.append(DetailKind::Suite, Severity::Ok, "database provisioned").unwrap();
        store.append(DetailKind::Schema, Severity::Warn, "a.json: no validator").unwrap();
        store.record_step("app", Step::Scaffold, Severity::Ok, None).unwrap();
        store.record_step("app", Step::Files, Severity::Warn, None).unwrap();
        (paths, store)
    }

    #[test]
    fn test_summarise_counts_areas_and_scenarios() {
        let dir = tempdir().unwrap();
        let (paths, store) = populated(dir.path());
        let report = summarise(&store, paths.stamp());

        assert_eq!(report.stamp, "20260102-030405");
        assert_eq!(report.areas["suite"].ok, 1);
        assert_eq!(report.areas["schema"].warn, 1);
        assert_eq!(report.areas["scenarios"].warn, 1);
        assert_eq!(report.scenarios[0].overall, Some(Severity::Warn));
        assert!(!report.scenarios[0].steps.contains_key("env"));
        assert_eq!(exit_code(&report, false), 0);
        assert_eq!(exit_code(&report, true), 1);
    }

    #[test]
    fn test_fail_record_sets_exit_code() {
        let dir = tempdir().unwrap();
        let (paths, store) = populated(dir.path());
        store.record_step("app", Step::Env, Severity::Fail, None).unwrap();
        let report = summarise(&store, paths.stamp());
        assert!(report.has_failures());
        assert_eq!(exit_code(&report, false), 1);
    }

    #[test]
    fn test_render_and_write() {
        let dir = tempdir().unwrap();
        let (paths, store) = populated(dir.path());
        let report = summarise(&store, paths.stamp());

        let sink = MemorySink::new();
        let mut emitter = CiEmitter::new(sink.clone(), 60);
        render(&report, &mut emitter);
        let lines = sink.lines();
        assert!(lines[0].starts_with("┌─ SUMMARY 20260102-030405"));
        assert!(lines.iter().any(|l| l.contains("schema: 0 ok · 1 warn · 0 fail")));
        assert!(lines.iter().any(|l| l.contains("app  [scaffold ✅  env ⏳  files ⚠️]")));
        assert!(lines.last().unwrap().contains("1 ok · 2 warn · 0 fail"));

        let path = write(&report, &paths).unwrap();
        let back: RunReport = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, report);
    }
}
